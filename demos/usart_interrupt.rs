//! USART0 transmit and receive driven by TBE/RBNE interrupts
//!
//! Sends a greeting from the TBE handler, then collects 16 bytes typed on the terminal in the
//! RBNE handler and echoes them back in one block.

#![no_std]
#![no_main]

use panic_halt as _;

use core::cell::RefCell;

use gd32vf103_hal::{
    eclic::{Eclic, Irq, Level, LevelPriorityBits, Priority, Trigger},
    delay::McycleDelay,
    handoff::{ErrorCounter, Forever, Progress, Transfer},
    pac::{self, USART0},
    prelude::*,
    serial::{Config, Rx, Serial, Tx},
};
use heapless::Vec;
use riscv::interrupt::{self, Mutex};
use riscv_rt::entry;

const COUNT: usize = 16;

static TX: Mutex<RefCell<Option<Tx<USART0>>>> = Mutex::new(RefCell::new(None));
static RX: Mutex<RefCell<Option<Rx<USART0>>>> = Mutex::new(RefCell::new(None));

static SEND: Transfer<64> = Transfer::new();
static RECEIVE: Transfer<COUNT> = Transfer::new();
static RX_ERRORS: ErrorCounter = ErrorCounter::new();
static TX_TIMEOUTS: ErrorCounter = ErrorCounter::new();

fn usart0() {
    interrupt::free(|cs| {
        if let Some(rx) = RX.borrow(cs).borrow_mut().as_mut() {
            if rx.is_rx_not_empty() {
                match rx.read() {
                    Ok(byte) => match RECEIVE.push_rx(byte) {
                        Progress::More => {}
                        Progress::Done => rx.unlisten(),
                        Progress::Overrun => RX_ERRORS.record(),
                    },
                    Err(_) => RX_ERRORS.record(),
                }
            }
        }
        if let Some(tx) = TX.borrow(cs).borrow_mut().as_mut() {
            if tx.is_tx_empty() && SEND.is_busy() {
                if let Some(step) = SEND.next_tx() {
                    tx.write_data(step.byte);
                    if step.last {
                        tx.unlisten();
                    }
                }
            }
        }
    });
}

/// Queues `data` and enables the TBE interrupt
fn send(data: &[u8]) {
    SEND.start_tx(data).unwrap();
    interrupt::free(|cs| {
        if let Some(tx) = TX.borrow(cs).borrow_mut().as_mut() {
            tx.listen();
        }
    });
}

/// Waits for the queued bytes to leave, dropping them if the TBE interrupt stalls
fn flush(delay: &McycleDelay) {
    if SEND.wait(&mut delay.deadline(100.ms().into())).is_err() {
        interrupt::free(|cs| {
            if let Some(tx) = TX.borrow(cs).borrow_mut().as_mut() {
                tx.unlisten();
            }
        });
        SEND.reset();
        TX_TIMEOUTS.record();
    }
}

#[entry]
fn main() -> ! {
    let dp = pac::Peripherals::take().unwrap();

    let mut rcu = dp.RCU.constrain();
    let clocks = rcu.cfgr.use_hxtal(8.mhz()).sysclk(108.mhz()).freeze();

    let mut gpioa = dp.GPIOA.split(&mut rcu.apb2);
    let tx = gpioa.pa9.into_alternate_push_pull(&mut gpioa.crh);
    let serial = Serial::new(dp.USART0, (tx, gpioa.pa10), Config::default(), clocks, &mut rcu.apb2);
    let (tx, rx) = serial.split();
    interrupt::free(|cs| {
        *TX.borrow(cs).borrow_mut() = Some(tx);
        *RX.borrow(cs).borrow_mut() = Some(rx);
    });

    let mut eclic = unsafe { Eclic::new(dp.ECLIC, LevelPriorityBits::L3P1) };
    eclic.register(Irq::USART0, usart0);
    eclic.setup(Irq::USART0, Trigger::Level, Level::L1, Priority::P0).unwrap();
    unsafe {
        eclic.unmask(Irq::USART0);
        interrupt::enable();
    }

    let delay = McycleDelay::new(&clocks);
    send(b"\r\nUSART interrupt example: type 16 characters\r\n");
    flush(&delay);

    loop {
        RECEIVE.start_rx(COUNT).unwrap();
        interrupt::free(|cs| {
            if let Some(rx) = RX.borrow(cs).borrow_mut().as_mut() {
                rx.listen();
            }
        });
        // waiting on a person typing
        RECEIVE.wait(&mut Forever).ok();

        let mut line: Vec<u8, { COUNT + 2 }> = RECEIVE
            .with_data(Vec::from_slice)
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default();
        line.extend_from_slice(b"\r\n").ok();
        send(&line);
        flush(&delay);
        if (RX_ERRORS.take() | TX_TIMEOUTS.take()) != 0 {
            send(b"(transfer errors)\r\n");
            flush(&delay);
        }
    }
}
