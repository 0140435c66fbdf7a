//! Full duplex transfer between SPI0 (master) and SPI1 (slave), driven by interrupts
//!
//! Connect pa5 to pb13 (SCK), pa6 to pb14 (MISO) and pa7 to pb15 (MOSI). Each side sends its own
//! block and receives the other's; both handlers feed and drain their data register through a
//! `Transfer`.

#![no_std]
#![no_main]

use panic_halt as _;

use core::cell::RefCell;

use gd32vf103_hal::{
    console,
    delay::McycleDelay,
    eclic::{Eclic, Irq, Level, LevelPriorityBits, Priority, Trigger},
    gpio::{
        gpioa::{PA5, PA6, PA7},
        gpiob::{PB13, PB14, PB15},
        Alternate, Floating, Input, PushPull,
    },
    handoff::{ErrorCounter, Progress, Transfer},
    pac::{self, SPI0, SPI1},
    prelude::*,
    serial::{Config, Serial},
    spi::{Event, Spi, MODE_0},
    sprintln,
};
use riscv::interrupt::{self, Mutex};
use riscv_rt::entry;

type Master = Spi<
    SPI0,
    (
        PA5<Alternate<PushPull>>,
        PA6<Input<Floating>>,
        PA7<Alternate<PushPull>>,
    ),
>;
type Slave = Spi<
    SPI1,
    (
        PB13<Input<Floating>>,
        PB14<Alternate<PushPull>>,
        PB15<Input<Floating>>,
    ),
>;

const COUNT: usize = 10;

static MASTER: Mutex<RefCell<Option<Master>>> = Mutex::new(RefCell::new(None));
static SLAVE: Mutex<RefCell<Option<Slave>>> = Mutex::new(RefCell::new(None));

static MASTER_TX: Transfer<COUNT> = Transfer::new();
static MASTER_RX: Transfer<COUNT> = Transfer::new();
static SLAVE_TX: Transfer<COUNT> = Transfer::new();
static SLAVE_RX: Transfer<COUNT> = Transfer::new();
static ERRORS: ErrorCounter = ErrorCounter::new();

fn service<SPI, PINS>(spi: &mut Spi<SPI, PINS>, tx: &Transfer<COUNT>, rx: &Transfer<COUNT>)
where
    SPI: gd32vf103_hal::spi::Instance,
{
    if spi.error().is_some() {
        ERRORS.record();
    }
    if spi.is_rbne() {
        match rx.push_rx(spi.read_data()) {
            Progress::More => {}
            Progress::Done => spi.unlisten(Event::Rbne),
            Progress::Overrun => ERRORS.record(),
        }
    }
    if spi.is_tbe() && tx.is_busy() {
        if let Some(step) = tx.next_tx() {
            spi.write_data(step.byte);
            if step.last {
                spi.unlisten(Event::Tbe);
            }
        }
    }
}

fn spi0() {
    interrupt::free(|cs| {
        if let Some(spi) = MASTER.borrow(cs).borrow_mut().as_mut() {
            service(spi, &MASTER_TX, &MASTER_RX);
        }
    });
}

fn spi1() {
    interrupt::free(|cs| {
        if let Some(spi) = SLAVE.borrow(cs).borrow_mut().as_mut() {
            service(spi, &SLAVE_TX, &SLAVE_RX);
        }
    });
}

fn check(name: &str, rx: &Transfer<COUNT>, expected: &[u8]) {
    let mut buffer = [0_u8; COUNT];
    match rx.read_into(&mut buffer) {
        Ok(count) if &buffer[..count] == expected => sprintln!("{}: {} bytes, match", name, count),
        Ok(count) => sprintln!("{}: {:?}, MISMATCH", name, &buffer[..count]),
        Err(error) => sprintln!("{}: {:?} after {} bytes", name, error, rx.progress()),
    }
}

#[entry]
fn main() -> ! {
    let dp = pac::Peripherals::take().unwrap();

    let mut rcu = dp.RCU.constrain();
    let clocks = rcu.cfgr.use_hxtal(8.mhz()).sysclk(108.mhz()).freeze();

    let mut gpioa = dp.GPIOA.split(&mut rcu.apb2);
    let mut gpiob = dp.GPIOB.split(&mut rcu.apb2);

    let tx = gpioa.pa9.into_alternate_push_pull(&mut gpioa.crh);
    let serial = Serial::new(dp.USART0, (tx, gpioa.pa10), Config::default(), clocks, &mut rcu.apb2);
    console::init(serial.split().0);

    let master_pins = (
        gpioa.pa5.into_alternate_push_pull(&mut gpioa.crl),
        gpioa.pa6,
        gpioa.pa7.into_alternate_push_pull(&mut gpioa.crl),
    );
    let slave_pins = (
        gpiob.pb13,
        gpiob.pb14.into_alternate_push_pull(&mut gpiob.crh),
        gpiob.pb15,
    );

    let master_data: [u8; COUNT] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a];
    let slave_data: [u8; COUNT] = [0x81, 0x82, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88, 0x89, 0x8a];
    MASTER_TX.start_tx(&master_data).unwrap();
    MASTER_RX.start_rx(COUNT).unwrap();
    SLAVE_TX.start_tx(&slave_data).unwrap();
    SLAVE_RX.start_rx(COUNT).unwrap();

    let mut slave = Spi::spi1_slave(dp.SPI1, slave_pins, MODE_0, &mut rcu.apb1);
    slave.listen(Event::Rbne);
    slave.listen(Event::Tbe);
    slave.listen(Event::Error);
    interrupt::free(|cs| *SLAVE.borrow(cs).borrow_mut() = Some(slave));

    let master = Spi::spi0(dp.SPI0, master_pins, MODE_0, 1.mhz(), clocks, &mut rcu.apb2);

    let mut eclic = unsafe { Eclic::new(dp.ECLIC, LevelPriorityBits::L3P1) };
    eclic.register(Irq::SPI0, spi0);
    eclic.register(Irq::SPI1, spi1);
    // handlers do not nest; when both lines are pending the slave is served first
    eclic.setup(Irq::SPI1, Trigger::Level, Level::L2, Priority::P0).unwrap();
    eclic.setup(Irq::SPI0, Trigger::Level, Level::L1, Priority::P0).unwrap();
    unsafe {
        eclic.unmask(Irq::SPI1);
        eclic.unmask(Irq::SPI0);
        interrupt::enable();
    }

    // the first TBE interrupt of the master starts the clock
    interrupt::free(|cs| {
        let mut slot = MASTER.borrow(cs).borrow_mut();
        let master = slot.insert(master);
        master.listen(Event::Rbne);
        master.listen(Event::Error);
        master.listen(Event::Tbe);
    });

    let delay = McycleDelay::new(&clocks);
    let master_done = MASTER_RX.wait(&mut delay.deadline(10.ms().into()));
    let slave_done = SLAVE_RX.wait(&mut delay.deadline(10.ms().into()));
    if master_done.is_err() || slave_done.is_err() {
        sprintln!("timeout, errors {}", ERRORS.count());
    }
    check("SPI0 received", &MASTER_RX, &slave_data);
    check("SPI1 received", &SLAVE_RX, &master_data);

    #[allow(clippy::empty_loop)]
    loop {}
}
