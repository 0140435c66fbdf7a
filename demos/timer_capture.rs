//! Frequency measurement with TIMER1 input capture
//!
//! TIMER2 outputs a 1 kHz PWM signal on pa6; wire it to pa0 (TIMER1 channel 0). The capture
//! interrupt turns successive rising edges into a frequency and posts it in a `Slot`, the main
//! loop prints the readings.

#![no_std]
#![no_main]

use panic_halt as _;

use core::cell::RefCell;

use gd32vf103_hal::{
    console,
    delay::McycleDelay,
    eclic::{Eclic, Irq, Level, LevelPriorityBits, Priority, Trigger},
    handoff::{ErrorCounter, Slot},
    pac::{self, TIMER1},
    prelude::*,
    serial::{Config, Serial},
    sprintln,
    time::Hertz,
    timer::{Channel, Edge, FrequencyMeter, InputCapture, Timer},
};
use riscv::interrupt::{self, Mutex};
use riscv_rt::entry;

static CAPTURE: Mutex<RefCell<Option<(InputCapture<TIMER1>, FrequencyMeter)>>> =
    Mutex::new(RefCell::new(None));
static READING: Slot<Hertz> = Slot::new();
static LOST: ErrorCounter = ErrorCounter::new();

fn timer1() {
    interrupt::free(|cs| {
        if let Some((capture, meter)) = CAPTURE.borrow(cs).borrow_mut().as_mut() {
            if capture.overcaptured() {
                capture.clear_overcapture();
                meter.reset();
                LOST.record();
            }
            if capture.captured() {
                if let Some(freq) = meter.push(capture.read()) {
                    READING.put(freq);
                }
            }
        }
    });
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

    let signal = gpioa.pa6.into_alternate_push_pull(&mut gpioa.crl);
    let mut pwm = Timer::timer2(dp.TIMER2, &clocks, &mut rcu.apb1).pwm(signal, 1.khz());
    pwm.set_duty(Channel::C0, pwm.get_max_duty() / 2);
    pwm.enable(Channel::C0);

    let timer = Timer::timer1(dp.TIMER1, &clocks, &mut rcu.apb1);
    let mut capture = InputCapture::<TIMER1>::new(timer, Channel::C0, Edge::Rising, 1.mhz().into());
    let meter = FrequencyMeter::new(capture.tick());
    capture.listen();
    interrupt::free(|cs| *CAPTURE.borrow(cs).borrow_mut() = Some((capture, meter)));

    let mut eclic = unsafe { Eclic::new(dp.ECLIC, LevelPriorityBits::L3P1) };
    eclic.register(Irq::TIMER1, timer1);
    eclic.setup(Irq::TIMER1, Trigger::Level, Level::L1, Priority::P0).unwrap();
    unsafe {
        eclic.unmask(Irq::TIMER1);
        interrupt::enable();
    }

    let delay = McycleDelay::new(&clocks);
    loop {
        match READING.wait(&mut delay.deadline(500.ms().into())) {
            Ok(freq) => sprintln!(
                "input: {} Hz (dropped readings {}, lost edges {})",
                freq.0,
                READING.overruns(),
                LOST.count()
            ),
            Err(_) => sprintln!("no input signal on pa0"),
        }
    }
}
