//! CAN0 in loopback mode
//!
//! Sends a frame every 500 ms to itself. The FIFO0 interrupt copies each received frame into an
//! `RxHandoff`, the main loop checks the payload and lights pc0 on success, pc2 on error.

#![no_std]
#![no_main]

use panic_halt as _;

use core::cell::RefCell;

use bxcan::{filter::Mask32, Fifo, Frame, Interrupt, Rx0, StandardId};
use gd32vf103_hal::{
    can::{BitTiming, Can, RxHandoff},
    console,
    delay::McycleDelay,
    eclic::{Eclic, Irq, Level, LevelPriorityBits, Priority, Trigger},
    pac::{self, CAN0},
    prelude::*,
    serial::{Config, Serial},
    sprintln,
};
use nb::block;
use riscv::interrupt::{self, Mutex};
use riscv_rt::entry;

static RX: Mutex<RefCell<Option<Rx0<Can<CAN0>>>>> = Mutex::new(RefCell::new(None));
static FRAMES: RxHandoff = RxHandoff::new();

fn can0_rx0() {
    interrupt::free(|cs| {
        if let Some(rx) = RX.borrow(cs).borrow_mut().as_mut() {
            loop {
                match rx.receive() {
                    Ok(frame) => FRAMES.deliver(&frame),
                    Err(nb::Error::Other(_overrun)) => FRAMES.record_error(),
                    Err(nb::Error::WouldBlock) => break,
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
    let mut afio = dp.AFIO.constrain(&mut rcu.apb2);

    let mut gpioa = dp.GPIOA.split(&mut rcu.apb2);
    let mut gpioc = dp.GPIOC.split(&mut rcu.apb2);
    let mut ok_led = gpioc.pc0.into_push_pull_output(&mut gpioc.crl);
    let mut error_led = gpioc.pc2.into_push_pull_output(&mut gpioc.crl);

    let tx = gpioa.pa9.into_alternate_push_pull(&mut gpioa.crh);
    let serial = Serial::new(dp.USART0, (tx, gpioa.pa10), Config::default(), clocks, &mut rcu.apb2);
    console::init(serial.split().0);

    let can = Can::new(dp.CAN0, &mut rcu.apb1);
    let tx_pin = gpioa.pa12.into_alternate_push_pull(&mut gpioa.crh);
    can.assign_pins((tx_pin, gpioa.pa11), &mut afio);

    let timing = BitTiming::for_bitrate(clocks.pclk1(), 500_000.bps()).unwrap();
    sprintln!(
        "CAN0 500 kbit/s: prescaler {}, bs1 {}, bs2 {}, sample point {}",
        timing.prescaler,
        timing.bs1,
        timing.bs2,
        timing.sample_point()
    );

    let mut can = bxcan::Can::builder(can)
        .set_bit_timing(timing.btr())
        .set_loopback(true)
        .set_silent(true)
        .enable();
    can.modify_filters()
        .enable_bank(0, Fifo::Fifo0, Mask32::accept_all());
    can.enable_interrupt(Interrupt::Fifo0MessagePending);
    let (mut can_tx, rx0, _rx1) = can.split();
    interrupt::free(|cs| *RX.borrow(cs).borrow_mut() = Some(rx0));

    let mut eclic = unsafe { Eclic::new(dp.ECLIC, LevelPriorityBits::L3P1) };
    eclic.register(Irq::CAN0_RX0, can0_rx0);
    eclic.setup(Irq::CAN0_RX0, Trigger::Level, Level::L1, Priority::P0).unwrap();
    unsafe {
        eclic.unmask(Irq::CAN0_RX0);
        interrupt::enable();
    }

    let mut delay = McycleDelay::new(&clocks);
    let id = StandardId::new(0x321).unwrap();
    let mut counter: u8 = 0;
    loop {
        let payload = [0xde, 0xca, counter, counter.wrapping_add(1)];
        let frame = Frame::new_data(id, payload);
        block!(can_tx.transmit(&frame)).unwrap();

        match FRAMES.wait(&mut delay.deadline(10.ms().into())) {
            Ok(received) if received.id == 0x321 && received.payload() == payload => {
                ok_led.set_high();
                error_led.set_low();
                sprintln!("frame {} received", counter);
            }
            Ok(received) => {
                error_led.set_high();
                sprintln!("unexpected frame {:x}: {:?}", received.id, received.payload());
            }
            Err(_) => {
                error_led.set_high();
                sprintln!("no frame, receive errors {}", FRAMES.errors());
            }
        }

        counter = counter.wrapping_add(1);
        delay.delay_ms(500_u32);
    }
}
