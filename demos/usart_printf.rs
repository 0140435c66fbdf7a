//! Console output on USART0
//!
//! 115200 8N1 on pa9 (TX) / pa10 (RX). `sprintln!` expands `\n` into `\r\n`.

#![deny(unsafe_code)]
#![no_std]
#![no_main]

use panic_halt as _;

use core::fmt::Write;

use gd32vf103_hal::{
    console,
    delay::McycleDelay,
    pac,
    prelude::*,
    serial::{Config, Serial},
    sprint, sprintln,
};
use riscv_rt::entry;

#[entry]
fn main() -> ! {
    let dp = pac::Peripherals::take().unwrap();

    let mut rcu = dp.RCU.constrain();
    let clocks = rcu.cfgr.use_hxtal(8.mhz()).sysclk(108.mhz()).freeze();

    let mut gpioa = dp.GPIOA.split(&mut rcu.apb2);
    let tx = gpioa.pa9.into_alternate_push_pull(&mut gpioa.crh);
    let serial = Serial::new(
        dp.USART0,
        (tx, gpioa.pa10),
        Config::default().baudrate(115_200.bps()),
        clocks,
        &mut rcu.apb2,
    );
    let (mut tx, _rx) = serial.split();

    // the transmitter itself is a `fmt::Write`
    writeln!(tx, "\nUSART printf example").unwrap();
    console::init(tx);

    sprintln!(
        "sysclk {} Hz, pclk1 {} Hz, pclk2 {} Hz",
        clocks.sysclk().0,
        clocks.pclk1().0,
        clocks.pclk2().0
    );

    let mut delay = McycleDelay::new(&clocks);
    let mut seconds: u32 = 0;
    loop {
        sprint!("uptime {} s\n", seconds);
        delay.delay_ms(1_000_u32);
        seconds += 1;
    }
}
