//! Internal temperature sensor and reference voltage on ADC0
//!
//! Prints the chip temperature and the supply voltage derived from Vrefint once a second.

#![deny(unsafe_code)]
#![no_std]
#![no_main]

use panic_halt as _;

use gd32vf103_hal::{
    adc::{self, Adc, SampleTime},
    console,
    delay::McycleDelay,
    pac,
    prelude::*,
    serial::{Config, Serial},
    sprintln,
};
use riscv_rt::entry;

#[entry]
fn main() -> ! {
    let dp = pac::Peripherals::take().unwrap();

    let mut rcu = dp.RCU.constrain();
    let clocks = rcu
        .cfgr
        .use_hxtal(8.mhz())
        .sysclk(108.mhz())
        .adcclk(12.mhz())
        .freeze();

    let mut gpioa = dp.GPIOA.split(&mut rcu.apb2);
    let tx = gpioa.pa9.into_alternate_push_pull(&mut gpioa.crh);
    let serial = Serial::new(dp.USART0, (tx, gpioa.pa10), Config::default(), clocks, &mut rcu.apb2);
    console::init(serial.split().0);

    let mut adc = Adc::adc0(dp.ADC0, &mut rcu.apb2, clocks);
    // the sensor needs at least 17.1 us of sampling
    adc.set_sample_time(SampleTime::T_239_5);
    let (mut temperature, mut vrefint) = adc.enable_temp_vref();

    let mut delay = McycleDelay::new(&clocks);
    loop {
        let raw_temp: u16 = adc.read(&mut temperature).unwrap();
        let raw_vref: u16 = adc.read(&mut vrefint).unwrap();
        let decicelsius = adc::temperature_decicelsius(raw_temp);

        sprintln!(
            "temperature {}.{} C, vref {} mV, VDDA {} mV",
            decicelsius / 10,
            (decicelsius % 10).abs(),
            adc::to_millivolts(raw_vref, 3_300),
            adc::vdda_millivolts(raw_vref).unwrap_or(0)
        );
        delay.delay_ms(1_000_u32);
    }
}
