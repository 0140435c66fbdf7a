//! USART0 transmit and receive through DMA0
//!
//! Sends a banner with DMA channel 3, then receives blocks of 10 bytes with DMA channel 4 and
//! sends each block back. A receive that does not complete within five seconds is reported and
//! restarted.

#![deny(unsafe_code)]
#![no_main]
#![no_std]

use panic_halt as _;

use riscv::singleton;

use gd32vf103_hal::{
    delay::McycleDelay,
    pac,
    prelude::*,
    serial::{Config, Serial},
};
use riscv_rt::entry;

#[entry]
fn main() -> ! {
    let p = pac::Peripherals::take().unwrap();

    let mut rcu = p.RCU.constrain();
    let clocks = rcu.cfgr.use_hxtal(8.mhz()).sysclk(108.mhz()).freeze();

    let channels = p.DMA0.split(&mut rcu.ahb);

    let mut gpioa = p.GPIOA.split(&mut rcu.apb2);

    // USART0
    let tx = gpioa.pa9.into_alternate_push_pull(&mut gpioa.crh);
    let rx = gpioa.pa10;

    let serial = Serial::new(
        p.USART0,
        (tx, rx),
        Config::default().baudrate(115_200.bps()),
        clocks,
        &mut rcu.apb2,
    );
    let (tx, rx) = serial.split();
    let mut tx = tx.with_dma(channels.3);
    let mut rx = rx.with_dma(channels.4);

    let banner: &'static [u8] = b"\r\nUSART DMA example: type 10 characters\r\n";
    let (_, tx_dma) = tx.write(banner).wait();
    tx = tx_dma;

    let delay = McycleDelay::new(&clocks);
    let mut buf = singleton!(: [u8; 10] = [0; 10]).unwrap();
    loop {
        let transfer = rx.read(buf);
        match transfer.wait_for(&mut delay.deadline(5_000.ms().into())) {
            Ok((filled, rx_dma)) => {
                rx = rx_dma;
                let (echoed, tx_dma) = tx.write(filled).wait();
                tx = tx_dma;
                buf = echoed;
            }
            Err(transfer) => {
                let (unfilled, rx_dma) = transfer.abort();
                rx = rx_dma;
                buf = unfilled;
                let (_, tx_dma) = tx.write(b"\r\n(timeout)\r\n" as &'static [u8]).wait();
                tx = tx_dma;
            }
        }
    }
}
