//! Interrupt driven transfer from I2C0 (master) to I2C1 (slave)
//!
//! Connect pb6 to pb10 (SCL) and pb7 to pb11 (SDA), with pull-ups. The master transmitter and
//! the slave receiver run entirely in their event interrupts; the main loop arms both transfers
//! and compares the result.

#![no_std]
#![no_main]

use panic_halt as _;

use core::cell::RefCell;

use gd32vf103_hal::{
    console,
    delay::McycleDelay,
    eclic::{Eclic, Irq, Level, LevelPriorityBits, Priority, Trigger},
    gpio::{
        gpiob::{PB10, PB11, PB6, PB7},
        Alternate, OpenDrain,
    },
    handoff::{ErrorCounter, Flag, Progress, Transfer},
    i2c::{Event, I2c, MasterTransmitter, Mode, SlaveReceiver},
    pac::{self, I2C0, I2C1},
    prelude::*,
    serial::{Config, Serial},
    sprintln,
};
use riscv::interrupt::{self, Mutex};
use riscv_rt::entry;

type Master = I2c<I2C0, (PB6<Alternate<OpenDrain>>, PB7<Alternate<OpenDrain>>)>;
type Slave = I2c<I2C1, (PB10<Alternate<OpenDrain>>, PB11<Alternate<OpenDrain>>)>;

const SLAVE_ADDRESS: u8 = 0x72;
const COUNT: usize = 16;

static MASTER: Mutex<RefCell<Option<(Master, MasterTransmitter)>>> =
    Mutex::new(RefCell::new(None));
static SLAVE: Mutex<RefCell<Option<(Slave, SlaveReceiver)>>> = Mutex::new(RefCell::new(None));

static TX: Transfer<COUNT> = Transfer::new();
static RX: Transfer<COUNT> = Transfer::new();
static MASTER_DONE: Flag = Flag::new();
static BUS_ERRORS: ErrorCounter = ErrorCounter::new();

fn i2c0_ev() {
    interrupt::free(|cs| {
        if let Some((i2c, machine)) = MASTER.borrow(cs).borrow_mut().as_mut() {
            let actions = machine.on_event(i2c.stat0(), || TX.next_tx());
            i2c.apply(actions);
            if actions.stop_buffer {
                i2c.unlisten(Event::Buffer);
            }
            if actions.done {
                i2c.unlisten(Event::Event);
                MASTER_DONE.set();
            }
        }
    });
}

fn i2c0_er() {
    interrupt::free(|cs| {
        if let Some((i2c, machine)) = MASTER.borrow(cs).borrow_mut().as_mut() {
            if i2c.take_error().is_some() {
                BUS_ERRORS.record();
                machine.abort();
                i2c.send_stop();
                i2c.unlisten(Event::Buffer);
                i2c.unlisten(Event::Event);
            }
        }
    });
}

fn i2c1_ev() {
    interrupt::free(|cs| {
        if let Some((i2c, machine)) = SLAVE.borrow(cs).borrow_mut().as_mut() {
            let actions = machine.on_event(i2c.stat0());
            if let Some(byte) = i2c.apply(actions) {
                if RX.push_rx(byte) == Progress::Overrun {
                    BUS_ERRORS.record();
                }
            }
        }
    });
}

fn i2c1_er() {
    interrupt::free(|cs| {
        if let Some((i2c, machine)) = SLAVE.borrow(cs).borrow_mut().as_mut() {
            if i2c.take_error().is_some() {
                BUS_ERRORS.record();
                // drop the partial data, a new ADDSEND starts over
                machine.abort();
                RX.reset();
                RX.start_rx(COUNT).ok();
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

    let mut gpiob = dp.GPIOB.split(&mut rcu.apb2);
    let master_pins = (
        gpiob.pb6.into_alternate_open_drain(&mut gpiob.crl),
        gpiob.pb7.into_alternate_open_drain(&mut gpiob.crl),
    );
    let slave_pins = (
        gpiob.pb10.into_alternate_open_drain(&mut gpiob.crh),
        gpiob.pb11.into_alternate_open_drain(&mut gpiob.crh),
    );

    let mut slave = I2c::i2c1(dp.I2C1, slave_pins, Mode::standard(100.khz()), clocks, &mut rcu.apb1);
    slave.set_own_address(SLAVE_ADDRESS);
    slave.set_ack(true);
    slave.listen(Event::Error);
    slave.listen(Event::Event);
    slave.listen(Event::Buffer);

    let mut master = I2c::i2c0(dp.I2C0, master_pins, Mode::standard(100.khz()), clocks, &mut rcu.apb1);
    master.listen(Event::Error);

    interrupt::free(|cs| {
        *SLAVE.borrow(cs).borrow_mut() = Some((slave, SlaveReceiver::new()));
    });

    let mut eclic = unsafe { Eclic::new(dp.ECLIC, LevelPriorityBits::L3P1) };
    for (irq, handler) in [
        (Irq::I2C0_EV, i2c0_ev as fn()),
        (Irq::I2C0_ER, i2c0_er),
        (Irq::I2C1_EV, i2c1_ev),
        (Irq::I2C1_ER, i2c1_er),
    ] {
        eclic.register(irq, handler);
        eclic.setup(irq, Trigger::Level, Level::L1, Priority::P0).unwrap();
        unsafe { eclic.unmask(irq) };
    }
    unsafe { interrupt::enable() };

    let mut data = [0_u8; COUNT];
    for (i, byte) in data.iter_mut().enumerate() {
        *byte = 0x80 + i as u8;
    }
    RX.start_rx(COUNT).unwrap();
    TX.start_tx(&data).unwrap();

    let mut machine = MasterTransmitter::new(SLAVE_ADDRESS);
    machine.begin();
    master.set_ack(true);
    master.listen(Event::Event);
    master.listen(Event::Buffer);
    interrupt::free(|cs| {
        let mut slot = MASTER.borrow(cs).borrow_mut();
        let (master, _) = slot.insert((master, machine));
        master.send_start();
    });

    let delay = McycleDelay::new(&clocks);
    let sent = MASTER_DONE.wait(&mut delay.deadline(100.ms().into()));
    let received = RX.wait(&mut delay.deadline(100.ms().into()));

    let mut buffer = [0_u8; COUNT];
    match (sent, received) {
        (Ok(()), Ok(())) => {
            let count = RX.read_into(&mut buffer).unwrap_or(0);
            if buffer[..count] == data[..] {
                sprintln!("I2C1 received {} bytes, data match", count);
            } else {
                sprintln!("I2C1 received {:?}, data MISMATCH", &buffer[..count]);
            }
        }
        _ => sprintln!(
            "transfer timed out after {} bytes, bus errors {}",
            RX.progress(),
            BUS_ERRORS.count()
        ),
    }

    #[allow(clippy::empty_loop)]
    loop {}
}
