//! Blocking I2C0 access to an AT24C02 EEPROM
//!
//! Writes one 8-byte page at word address 0x00, waits for the internal write cycle, reads it back
//! and compares. SCL on pb6, SDA on pb7, EEPROM at address 0x50.

#![deny(unsafe_code)]
#![no_std]
#![no_main]

use panic_halt as _;

use gd32vf103_hal::{
    console,
    delay::McycleDelay,
    i2c::{BlockingI2c, I2c, Mode},
    pac,
    prelude::*,
    serial::{Config, Serial},
    sprintln,
};
use riscv_rt::entry;

const EEPROM_ADDRESS: u8 = 0x50;
const PAGE_SIZE: usize = 8;

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
    let scl = gpiob.pb6.into_alternate_open_drain(&mut gpiob.crl);
    let sda = gpiob.pb7.into_alternate_open_drain(&mut gpiob.crl);
    let i2c = I2c::i2c0(
        dp.I2C0,
        (scl, sda),
        Mode::standard(100.khz()),
        clocks,
        &mut rcu.apb1,
    );
    let mut eeprom = BlockingI2c::new(i2c, 1_000, 10_000, 10_000);
    let mut delay = McycleDelay::new(&clocks);

    let mut page = [0_u8; PAGE_SIZE + 1];
    page[0] = 0x00;
    for (i, byte) in page[1..].iter_mut().enumerate() {
        *byte = i as u8 * 3 + 1;
    }

    sprintln!("AT24C02 write page: {:?}", &page[1..]);
    match eeprom.write(EEPROM_ADDRESS, &page) {
        Ok(()) => {}
        Err(error) => sprintln!("write failed: {:?}", error),
    }
    // internal write cycle
    delay.delay_ms(5_u32);

    let mut read_back = [0_u8; PAGE_SIZE];
    match eeprom.write_read(EEPROM_ADDRESS, &page[..1], &mut read_back) {
        Ok(()) if read_back == page[1..] => sprintln!("read back {:?}: match", read_back),
        Ok(()) => sprintln!("read back {:?}: MISMATCH", read_back),
        Err(error) => sprintln!("read failed: {:?}", error),
    }

    #[allow(clippy::empty_loop)]
    loop {}
}
