//! DAC0 staircase on pa4
//!
//! Steps the output through 16 levels with a software trigger every 10 ms and prints the value
//! read back from the output register at each step.

#![deny(unsafe_code)]
#![no_std]
#![no_main]

use panic_halt as _;

use gd32vf103_hal::{
    console,
    dac::{Dac, Trigger, MAX_VALUE},
    delay::McycleDelay,
    pac,
    prelude::*,
    serial::{Config, Serial},
    sprintln,
};
use riscv_rt::entry;

const STEPS: u16 = 16;

#[entry]
fn main() -> ! {
    let dp = pac::Peripherals::take().unwrap();

    let mut rcu = dp.RCU.constrain();
    let clocks = rcu.cfgr.use_hxtal(8.mhz()).sysclk(108.mhz()).freeze();

    let mut gpioa = dp.GPIOA.split(&mut rcu.apb2);
    let tx = gpioa.pa9.into_alternate_push_pull(&mut gpioa.crh);
    let serial = Serial::new(dp.USART0, (tx, gpioa.pa10), Config::default(), clocks, &mut rcu.apb2);
    console::init(serial.split().0);

    let mut dac = Dac::new(dp.DAC, &mut rcu.apb1);
    let mut out = dac.ch0(gpioa.pa4.into_analog(&mut gpioa.crl));
    out.set_trigger(Trigger::Software);
    out.enable();

    let mut delay = McycleDelay::new(&clocks);
    let mut step: u16 = 0;
    loop {
        let value = step * (MAX_VALUE / (STEPS - 1));
        match out.set_value(value) {
            Ok(()) => {
                out.trigger_software();
                sprintln!("step {:2}: {:4}", step, out.output());
            }
            Err(error) => sprintln!("step {:2}: {:?}", step, error),
        }
        step = (step + 1) % STEPS;
        delay.delay_ms(10_u32);
    }
}
