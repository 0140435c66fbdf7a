//! ADC0 analog watchdog
//!
//! Converts pc3 (channel 13) continuously. Whenever a result leaves the 1.0 V to 2.0 V window
//! the watchdog interrupt lights pc0 and posts the offending value; the main loop reports it and
//! turns the LED off again once the input is back inside the window.

#![no_std]
#![no_main]

use panic_halt as _;

use core::cell::RefCell;

use embedded_hal::adc::Channel;
use gd32vf103_hal::{
    adc::{self, Adc, Event},
    console,
    delay::McycleDelay,
    eclic::{Eclic, Irq, Level, LevelPriorityBits, Priority, Trigger},
    gpio::{gpioc::PC3, Analog},
    handoff::Slot,
    pac::{self, ADC0},
    prelude::*,
    serial::{Config, Serial},
    sprintln,
};
use riscv::interrupt::{self, Mutex};
use riscv_rt::entry;

const VREF_MV: u32 = 3_300;
const LOW: u16 = 1_241; // 1.0 V
const HIGH: u16 = 2_482; // 2.0 V

static ADC: Mutex<RefCell<Option<Adc<ADC0>>>> = Mutex::new(RefCell::new(None));
static OUT_OF_WINDOW: Slot<u16> = Slot::new();

fn adc0_1() {
    interrupt::free(|cs| {
        if let Some(adc) = ADC.borrow(cs).borrow_mut().as_mut() {
            if adc.watchdog_tripped() {
                // stays off until the main loop has seen the value
                adc.unlisten(Event::Watchdog);
                adc.clear_watchdog();
                OUT_OF_WINDOW.put(adc.latest());
            }
        }
    });
}

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

    let mut gpioc = dp.GPIOC.split(&mut rcu.apb2);
    let mut led = gpioc.pc0.into_push_pull_output(&mut gpioc.crl);
    let _input = gpioc.pc3.into_analog(&mut gpioc.crl);
    let channel = <PC3<Analog> as Channel<ADC0>>::channel();

    let mut adc = Adc::adc0(dp.ADC0, &mut rcu.apb2, clocks);
    adc.set_sample_time(adc::SampleTime::T_55_5);
    adc.watchdog_on(channel, LOW, HIGH).unwrap();
    adc.listen(Event::Watchdog);
    adc.start_continuous(channel);
    interrupt::free(|cs| *ADC.borrow(cs).borrow_mut() = Some(adc));

    let mut eclic = unsafe { Eclic::new(dp.ECLIC, LevelPriorityBits::L3P1) };
    eclic.register(Irq::ADC0_1, adc0_1);
    eclic.setup(Irq::ADC0_1, Trigger::Level, Level::L1, Priority::P0).unwrap();
    unsafe {
        eclic.unmask(Irq::ADC0_1);
        interrupt::enable();
    }

    let mut delay = McycleDelay::new(&clocks);
    loop {
        if let Some(raw) = OUT_OF_WINDOW.take() {
            led.set_high();
            sprintln!(
                "watchdog: {} mV outside {}..{} mV",
                adc::to_millivolts(raw, VREF_MV),
                adc::to_millivolts(LOW, VREF_MV),
                adc::to_millivolts(HIGH, VREF_MV)
            );
        }

        let inside = interrupt::free(|cs| match ADC.borrow(cs).borrow_mut().as_mut() {
            Some(adc) => {
                let raw = adc.latest();
                let inside = (LOW..=HIGH).contains(&raw);
                if inside {
                    adc.listen(Event::Watchdog);
                }
                inside
            }
            None => false,
        });
        if inside {
            led.set_low();
        }
        delay.delay_ms(100_u32);
    }
}
