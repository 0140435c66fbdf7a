//! External SRAM on the EXMC
//!
//! Routes the multiplexed EXMC bus to its pins, configures region 0 for a 16-bit asynchronous
//! SRAM, then writes and verifies two patterns over the first 64 KiB. pc0 lights on success, pc2
//! on the first mismatch.

#![deny(unsafe_code)]
#![no_std]
#![no_main]

use panic_halt as _;

use gd32vf103_hal::{
    console,
    exmc::{Exmc, Region, Timing, Width},
    pac,
    prelude::*,
    serial::{Config, Serial},
    sprintln,
};
use riscv_rt::entry;

const WORDS: usize = 32 * 1024;

#[entry]
fn main() -> ! {
    let dp = pac::Peripherals::take().unwrap();

    let mut rcu = dp.RCU.constrain();
    let clocks = rcu.cfgr.use_hxtal(8.mhz()).sysclk(108.mhz()).freeze();

    let mut gpioa = dp.GPIOA.split(&mut rcu.apb2);
    let tx = gpioa.pa9.into_alternate_push_pull(&mut gpioa.crh);
    let serial = Serial::new(dp.USART0, (tx, gpioa.pa10), Config::default(), clocks, &mut rcu.apb2);
    console::init(serial.split().0);

    let mut gpiob = dp.GPIOB.split(&mut rcu.apb2);
    let mut gpioc = dp.GPIOC.split(&mut rcu.apb2);
    let mut gpiod = dp.GPIOD.split(&mut rcu.apb2);
    let mut gpioe = dp.GPIOE.split(&mut rcu.apb2);

    let mut ok_led = gpioc.pc0.into_push_pull_output(&mut gpioc.crl);
    let mut fail_led = gpioc.pc2.into_push_pull_output(&mut gpioc.crl);

    // AD0..AD15
    let _data = (
        gpiod.pd14.into_alternate_push_pull(&mut gpiod.crh),
        gpiod.pd15.into_alternate_push_pull(&mut gpiod.crh),
        gpiod.pd0.into_alternate_push_pull(&mut gpiod.crl),
        gpiod.pd1.into_alternate_push_pull(&mut gpiod.crl),
        gpioe.pe7.into_alternate_push_pull(&mut gpioe.crl),
        gpioe.pe8.into_alternate_push_pull(&mut gpioe.crh),
        gpioe.pe9.into_alternate_push_pull(&mut gpioe.crh),
        gpioe.pe10.into_alternate_push_pull(&mut gpioe.crh),
        gpioe.pe11.into_alternate_push_pull(&mut gpioe.crh),
        gpioe.pe12.into_alternate_push_pull(&mut gpioe.crh),
        gpioe.pe13.into_alternate_push_pull(&mut gpioe.crh),
        gpioe.pe14.into_alternate_push_pull(&mut gpioe.crh),
        gpioe.pe15.into_alternate_push_pull(&mut gpioe.crh),
        gpiod.pd8.into_alternate_push_pull(&mut gpiod.crh),
        gpiod.pd9.into_alternate_push_pull(&mut gpiod.crh),
        gpiod.pd10.into_alternate_push_pull(&mut gpiod.crh),
    );
    // A16..A18, NOE, NWE, NE0, NADV
    let _control = (
        gpiod.pd11.into_alternate_push_pull(&mut gpiod.crh),
        gpiod.pd12.into_alternate_push_pull(&mut gpiod.crh),
        gpiod.pd13.into_alternate_push_pull(&mut gpiod.crh),
        gpiod.pd4.into_alternate_push_pull(&mut gpiod.crl),
        gpiod.pd5.into_alternate_push_pull(&mut gpiod.crl),
        gpiod.pd7.into_alternate_push_pull(&mut gpiod.crl),
        gpiob.pb7.into_alternate_push_pull(&mut gpiob.crl),
    );

    let timing = Timing {
        address_setup: 2,
        address_hold: 1,
        data_setup: 5,
        bus_turnaround: 0,
    };
    let mut exmc = Exmc::new(dp.EXMC, &mut rcu.ahb);
    let mut sram = match exmc.configure_sram(Region::Region0, Width::Bits16, timing) {
        Ok(sram) => sram,
        Err(error) => {
            sprintln!("EXMC configuration rejected: {:?}", error);
            fail_led.set_high();
            #[allow(clippy::empty_loop)]
            loop {}
        }
    };

    let patterns: [fn(usize) -> u16; 2] = [|i| i as u16, |i| !(i as u16) ^ 0x5a5a];
    let mut passed = true;
    for (n, pattern) in patterns.iter().enumerate() {
        let result = sram
            .fill(0, WORDS, pattern)
            .and_then(|()| sram.verify(0, WORDS, pattern));
        match result {
            Ok(None) => sprintln!("pattern {}: {} words ok", n, WORDS),
            Ok(Some(word)) => {
                sprintln!(
                    "pattern {}: word {} reads {:#06x}",
                    n,
                    word,
                    sram.read(word).unwrap_or(0)
                );
                passed = false;
            }
            Err(error) => {
                sprintln!("pattern {}: {:?}", n, error);
                passed = false;
            }
        }
    }

    if passed {
        ok_led.set_high();
    } else {
        fail_led.set_high();
    }

    #[allow(clippy::empty_loop)]
    loop {}
}
