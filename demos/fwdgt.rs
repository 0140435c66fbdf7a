//! Free watchdog
//!
//! Reports why the device last reset, then starts the free watchdog with a 1 s period and feeds
//! it every 250 ms while the wakeup key (pa0) is released. Holding the key stops the feeding and
//! the watchdog resets the device; the next boot reports `FreeWatchdog`.

#![deny(unsafe_code)]
#![no_std]
#![no_main]

use panic_halt as _;

use gd32vf103_hal::{
    console,
    delay::McycleDelay,
    pac,
    prelude::*,
    serial::{Config, Serial},
    sprintln,
    watchdog::{self, FreeWatchdog, ResetCause},
};
use riscv_rt::entry;

#[entry]
fn main() -> ! {
    let dp = pac::Peripherals::take().unwrap();

    let mut rcu = dp.RCU.constrain();
    let clocks = rcu.cfgr.use_hxtal(8.mhz()).sysclk(108.mhz()).freeze();

    let mut gpioa = dp.GPIOA.split(&mut rcu.apb2);
    let tx = gpioa.pa9.into_alternate_push_pull(&mut gpioa.crh);
    let serial = Serial::new(dp.USART0, (tx, gpioa.pa10), Config::default(), clocks, &mut rcu.apb2);
    console::init(serial.split().0);

    let mut gpioc = dp.GPIOC.split(&mut rcu.apb2);
    let mut led = gpioc.pc0.into_push_pull_output(&mut gpioc.crl);
    let key = gpioa.pa0.into_floating_input(&mut gpioa.crl);

    let cause = watchdog::reset_cause();
    sprintln!("reset cause: {:?}", cause);
    if cause == ResetCause::FreeWatchdog {
        led.set_high();
    }

    let mut dog = FreeWatchdog::new(dp.FWDGT);
    dog.start(1_000.ms());
    sprintln!("watchdog period: {} ms", dog.interval().0);

    let mut delay = McycleDelay::new(&clocks);
    let mut starving = false;
    loop {
        // the key pulls pa0 high when pressed
        if key.is_high() {
            if !starving {
                sprintln!("no longer feeding the watchdog");
                starving = true;
            }
        } else {
            dog.feed();
        }
        delay.delay_ms(250_u32);
    }
}
