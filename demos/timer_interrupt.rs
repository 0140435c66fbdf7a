//! TIMER1 update interrupt toggling the LEDs
//!
//! The handler only clears the update flag and raises a `Flag`; the main loop consumes it and
//! walks the four LEDs of the GD32VF103V-EVAL board (pc0, pc2, pe0, pe1).

#![no_std]
#![no_main]

use panic_halt as _;

use core::cell::RefCell;

use gd32vf103_hal::{
    eclic::{Eclic, Irq, Level, LevelPriorityBits, Priority, Trigger},
    handoff::Flag,
    pac::{self, TIMER1},
    prelude::*,
    timer::{CountDownTimer, Event, Timer},
};
use riscv::interrupt::{self, Mutex};
use riscv_rt::entry;

static TIMER: Mutex<RefCell<Option<CountDownTimer<TIMER1>>>> = Mutex::new(RefCell::new(None));
static TICK: Flag = Flag::new();

fn timer1() {
    interrupt::free(|cs| {
        if let Some(timer) = TIMER.borrow(cs).borrow_mut().as_mut() {
            timer.clear_update();
        }
    });
    TICK.set();
}

#[entry]
fn main() -> ! {
    let dp = pac::Peripherals::take().unwrap();

    let mut rcu = dp.RCU.constrain();
    let clocks = rcu.cfgr.use_hxtal(8.mhz()).sysclk(108.mhz()).freeze();

    let mut gpioc = dp.GPIOC.split(&mut rcu.apb2);
    let mut gpioe = dp.GPIOE.split(&mut rcu.apb2);
    let mut leds = [
        gpioc.pc0.into_push_pull_output(&mut gpioc.crl).erase(),
        gpioc.pc2.into_push_pull_output(&mut gpioc.crl).erase(),
        gpioe.pe0.into_push_pull_output(&mut gpioe.crl).erase(),
        gpioe.pe1.into_push_pull_output(&mut gpioe.crl).erase(),
    ];

    let mut timer = Timer::timer1(dp.TIMER1, &clocks, &mut rcu.apb1).start_count_down(4.hz());
    timer.listen(Event::Update);
    interrupt::free(|cs| *TIMER.borrow(cs).borrow_mut() = Some(timer));

    let mut eclic = unsafe { Eclic::new(dp.ECLIC, LevelPriorityBits::L3P1) };
    eclic.register(Irq::TIMER1, timer1);
    eclic.setup(Irq::TIMER1, Trigger::Level, Level::L1, Priority::P0).unwrap();
    unsafe {
        eclic.unmask(Irq::TIMER1);
        interrupt::enable();
    }

    let mut current = 0;
    loop {
        if TICK.take() {
            leds[current].set_low();
            current = (current + 1) % leds.len();
            leds[current].set_high();
        }
    }
}
