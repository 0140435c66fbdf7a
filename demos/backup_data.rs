//! Backup data registers and the tamper pin
//!
//! On first power-up writes a pattern into the 42 backup data registers. After a reset the
//! pattern is checked: pc0 lights when it survived, pc2 when it did not. Pulling the tamper pin
//! (pc13) low erases the registers; the tamper interrupt reports it and lights pe0.

#![no_std]
#![no_main]

use panic_halt as _;

use core::cell::RefCell;

use gd32vf103_hal::{
    backup::{BackupDomain, TamperLevel},
    console,
    eclic::{Eclic, Irq, Level, LevelPriorityBits, Priority, Trigger},
    handoff::{Flag, Forever},
    pac,
    prelude::*,
    serial::{Config, Serial},
    sprintln,
};
use riscv::interrupt::{self, Mutex};
use riscv_rt::entry;

const SEED: u16 = 0x1226;

static BACKUP: Mutex<RefCell<Option<BackupDomain>>> = Mutex::new(RefCell::new(None));
static TAMPERED: Flag = Flag::new();

fn tamper() {
    interrupt::free(|cs| {
        if let Some(backup) = BACKUP.borrow(cs).borrow_mut().as_mut() {
            // disarmed until the main loop has rewritten the registers
            backup.unlisten_tamper();
            backup.clear_tamper();
        }
    });
    TAMPERED.set();
}

#[entry]
fn main() -> ! {
    let mut dp = pac::Peripherals::take().unwrap();

    let mut rcu = dp.RCU.constrain();
    let clocks = rcu.cfgr.use_hxtal(8.mhz()).sysclk(108.mhz()).freeze();

    let mut gpioa = dp.GPIOA.split(&mut rcu.apb2);
    let tx = gpioa.pa9.into_alternate_push_pull(&mut gpioa.crh);
    let serial = Serial::new(dp.USART0, (tx, gpioa.pa10), Config::default(), clocks, &mut rcu.apb2);
    console::init(serial.split().0);

    let mut gpioc = dp.GPIOC.split(&mut rcu.apb2);
    let mut gpioe = dp.GPIOE.split(&mut rcu.apb2);
    let mut kept_led = gpioc.pc0.into_push_pull_output(&mut gpioc.crl);
    let mut lost_led = gpioc.pc2.into_push_pull_output(&mut gpioc.crl);
    let mut tamper_led = gpioe.pe0.into_push_pull_output(&mut gpioe.crl);

    let mut backup = BackupDomain::new(dp.BKP, &mut rcu.apb1, &mut dp.PMU);
    if backup.is_written_pattern(SEED) {
        sprintln!("backup registers kept their data");
        kept_led.set_high();
    } else {
        if backup.is_cleared() {
            sprintln!("backup registers are empty, writing them");
        } else {
            sprintln!("backup registers corrupted, rewriting them");
            lost_led.set_high();
        }
        backup.fill_pattern(SEED);
    }

    backup.clear_tamper();
    backup.enable_tamper(TamperLevel::Low);
    backup.listen_tamper();
    interrupt::free(|cs| *BACKUP.borrow(cs).borrow_mut() = Some(backup));

    let mut eclic = unsafe { Eclic::new(dp.ECLIC, LevelPriorityBits::L3P1) };
    eclic.register(Irq::TAMPER, tamper);
    eclic.setup(Irq::TAMPER, Trigger::Level, Level::L1, Priority::P0).unwrap();
    unsafe {
        eclic.unmask(Irq::TAMPER);
        interrupt::enable();
    }

    loop {
        // nothing happens until someone presses the tamper key
        TAMPERED.wait(&mut Forever).ok();
        TAMPERED.clear();
        tamper_led.set_high();
        interrupt::free(|cs| {
            if let Some(backup) = BACKUP.borrow(cs).borrow_mut().as_mut() {
                if backup.is_cleared() {
                    sprintln!("tamper event: backup registers erased");
                } else {
                    sprintln!("tamper event, but the registers still hold data");
                }
                backup.fill_pattern(SEED);
                backup.clear_tamper();
                backup.listen_tamper();
            }
        });
    }
}
