//! Window watchdog
//!
//! Runs the window watchdog from the 54 MHz APB1 clock with counter 0x7F and window 0x50, and
//! feeds it only once the window has opened. The early wakeup interrupt counts how often the
//! counter reached 0x40. Holding the wakeup key (pa0) feeds too early and the device resets.

#![no_std]
#![no_main]

use panic_halt as _;

use core::cell::RefCell;

use gd32vf103_hal::{
    console,
    eclic::{Eclic, Irq, Level, LevelPriorityBits, Priority, Trigger},
    handoff::ErrorCounter,
    pac,
    prelude::*,
    serial::{Config, Serial},
    sprintln,
    watchdog::{self, WindowWatchdog, WwdgtPrescaler},
};
use riscv::interrupt::{self, Mutex};
use riscv_rt::entry;

static DOG: Mutex<RefCell<Option<WindowWatchdog>>> = Mutex::new(RefCell::new(None));
static EARLY: ErrorCounter = ErrorCounter::new();

fn wwdgt() {
    interrupt::free(|cs| {
        if let Some(dog) = DOG.borrow(cs).borrow_mut().as_mut() {
            dog.clear_early_wakeup();
            // last chance before the reset
            dog.feed();
        }
    });
    EARLY.record();
}

#[entry]
fn main() -> ! {
    let dp = pac::Peripherals::take().unwrap();

    let mut rcu = dp.RCU.constrain();
    let clocks = rcu.cfgr.use_hxtal(8.mhz()).sysclk(108.mhz()).freeze();

    let mut gpioa = dp.GPIOA.split(&mut rcu.apb2);
    let tx = gpioa.pa9.into_alternate_push_pull(&mut gpioa.crh);
    let serial = Serial::new(dp.USART0, (tx, gpioa.pa10), Config::default(), clocks, &mut rcu.apb2);
    console::init(serial.split().0);

    let key = gpioa.pa0.into_floating_input(&mut gpioa.crl);
    sprintln!("reset cause: {:?}", watchdog::reset_cause());

    let mut dog = WindowWatchdog::new(dp.WWDGT, &mut rcu.apb1, &clocks);
    dog.clear_early_wakeup();
    dog.listen_early_wakeup();
    if let Err(error) = dog.start(0x7f, 0x50, WwdgtPrescaler::Div8) {
        sprintln!("window watchdog not started: {:?}", error);
    }
    sprintln!("timeout: {} us", dog.timeout().0);
    interrupt::free(|cs| *DOG.borrow(cs).borrow_mut() = Some(dog));

    let mut eclic = unsafe { Eclic::new(dp.ECLIC, LevelPriorityBits::L3P1) };
    eclic.register(Irq::WWDGT, wwdgt);
    eclic.setup(Irq::WWDGT, Trigger::Level, Level::L1, Priority::P0).unwrap();
    unsafe {
        eclic.unmask(Irq::WWDGT);
        interrupt::enable();
    }

    let mut feeds: u32 = 0;
    loop {
        let early = key.is_high();
        let fed = interrupt::free(|cs| match DOG.borrow(cs).borrow_mut().as_mut() {
            Some(dog) if early || dog.window_open() => {
                dog.feed();
                true
            }
            _ => false,
        });
        if fed {
            feeds = feeds.wrapping_add(1);
            if feeds % 1_000 == 0 {
                sprintln!("{} feeds, {} early wakeups", feeds, EARLY.count());
            }
        }
    }
}
