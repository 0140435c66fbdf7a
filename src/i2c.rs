// Copyright 2023 The gd32vf103-hal authors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Inter-Integrated Circuit (I2C) bus
//!
//! [`I2c`] configures the peripheral and gives register level access for interrupt handlers.
//! [`BlockingI2c`] adds master transfers with the embedded-hal blocking traits.
//!
//! For interrupt driven transfers the handler feeds a snapshot of `stat0` to one of the event
//! machines ([`MasterTransmitter`], [`MasterReceiver`], [`SlaveReceiver`],
//! [`SlaveTransmitter`]) and applies the [`Actions`] it returns:
//!
//! ```ignore
//! static TX: Transfer<16> = Transfer::new();
//! static DONE: Flag = Flag::new();
//!
//! fn i2c0_ev() {
//!     let stat0 = i2c.stat0();
//!     let actions = machine.on_event(stat0, || TX.next_tx());
//!     i2c.apply(actions);
//!     if actions.stop_buffer {
//!         i2c.unlisten(Event::Buffer);
//!     }
//!     if actions.done {
//!         DONE.set();
//!     }
//! }
//! ```
//!
//! ## Pins
//!
//! | I2C  | SCL  | SDA  |
//! |------|------|------|
//! | I2C0 | PB6  | PB7  |
//! | I2C1 | PB10 | PB11 |
//!
//! Both pins are alternate open-drain outputs.

use core::ops::Deref;

use embedded_hal::blocking::i2c::{Read, Write, WriteRead};

use crate::gpio::gpiob::{PB10, PB11, PB6, PB7};
use crate::gpio::{Alternate, OpenDrain};
use crate::handoff::Step;
use crate::pac::{i2c0, I2C0, I2C1};
use crate::rcu::{Clocks, Enable, RcuBus, Reset, APB1};
use crate::time::Hertz;

// CTL0
const I2CEN: u32 = 1 << 0;
const START: u32 = 1 << 8;
const STOP: u32 = 1 << 9;
const ACKEN: u32 = 1 << 10;
const POAP: u32 = 1 << 11;
const SRESET: u32 = 1 << 15;

// CTL1
const ERRIE: u32 = 1 << 8;
const EVIE: u32 = 1 << 9;
const BUFIE: u32 = 1 << 10;

// CKCFG
const DTCY: u32 = 1 << 14;
const FAST: u32 = 1 << 15;

/// Flags of the `stat0` register
pub mod status {
    /// Start condition sent (master)
    pub const SBSEND: u32 = 1 << 0;
    /// Address sent (master) or matched (slave)
    pub const ADDSEND: u32 = 1 << 1;
    /// Byte transmission completed
    pub const BTC: u32 = 1 << 2;
    /// Stop condition detected (slave)
    pub const STPDET: u32 = 1 << 4;
    /// Receive buffer not empty
    pub const RBNE: u32 = 1 << 6;
    /// Transmit buffer empty
    pub const TBE: u32 = 1 << 7;
    /// Bus error
    pub const BERR: u32 = 1 << 8;
    /// Arbitration lost
    pub const LOSTARB: u32 = 1 << 9;
    /// Acknowledge failure
    pub const AERR: u32 = 1 << 10;
    /// Overrun or underrun
    pub const OUERR: u32 = 1 << 11;

    /// All error flags
    pub const ERRORS: u32 = BERR | LOSTARB | AERR | OUERR;
}

use status::*;

/// I2C error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Bus error
    Bus,
    /// Arbitration loss
    Arbitration,
    /// No ack received
    Acknowledge,
    /// Overrun/underrun
    Overrun,
    /// An event did not occur within its retry budget
    Timeout,
}

impl Error {
    /// Classifies the error flags of a `stat0` snapshot.
    pub fn from_stat0(stat0: u32) -> Option<Self> {
        if stat0 & BERR != 0 {
            Some(Error::Bus)
        } else if stat0 & LOSTARB != 0 {
            Some(Error::Arbitration)
        } else if stat0 & AERR != 0 {
            Some(Error::Acknowledge)
        } else if stat0 & OUERR != 0 {
            Some(Error::Overrun)
        } else {
            None
        }
    }
}

/// Interrupt groups
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// Start, address, byte transfer complete and stop events
    Event,
    /// RBNE and TBE, needs `Event` too
    Buffer,
    /// Error events
    Error,
}

impl Event {
    fn ctl1_bit(self) -> u32 {
        match self {
            Event::Event => EVIE,
            Event::Buffer => BUFIE,
            Event::Error => ERRIE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DutyCycle {
    Ratio2to1,
    Ratio16to9,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Standard {
        frequency: Hertz,
    },
    Fast {
        frequency: Hertz,
        duty_cycle: DutyCycle,
    },
}

impl Mode {
    pub fn standard<F: Into<Hertz>>(frequency: F) -> Self {
        Mode::Standard {
            frequency: frequency.into(),
        }
    }

    pub fn fast<F: Into<Hertz>>(frequency: F, duty_cycle: DutyCycle) -> Self {
        Mode::Fast {
            frequency: frequency.into(),
            duty_cycle,
        }
    }

    pub fn get_frequency(&self) -> Hertz {
        match *self {
            Mode::Standard { frequency } => frequency,
            Mode::Fast { frequency, .. } => frequency,
        }
    }
}

/// Register values derived from the APB1 clock and the bus mode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ClockConfig {
    i2cclk: u32,
    ckcfg: u32,
    rt: u32,
}

/// Largest divider the CLKC field holds
const CLKC_MAX: u32 = 0xfff;

/// Computes the clock registers; the divider saturates at the ends of the CLKC range, so
/// bus frequencies the APB1 clock cannot reach run at the nearest reachable rate.
fn clock_config(pclk1: Hertz, mode: Mode) -> ClockConfig {
    let mhz = pclk1.0 / 1_000_000;
    match mode {
        Mode::Standard { frequency } => {
            let clkc = pclk1.0 / frequency.0.max(1).saturating_mul(2);
            ClockConfig {
                i2cclk: mhz,
                ckcfg: clkc.clamp(4, CLKC_MAX),
                rt: mhz + 1,
            }
        }
        Mode::Fast {
            frequency,
            duty_cycle,
        } => {
            let frequency = frequency.0.max(1);
            let (clkc, dtcy) = match duty_cycle {
                DutyCycle::Ratio2to1 => (pclk1.0 / frequency.saturating_mul(3), 0),
                DutyCycle::Ratio16to9 => (pclk1.0 / frequency.saturating_mul(25), DTCY),
            };
            ClockConfig {
                i2cclk: mhz,
                ckcfg: FAST | dtcy | clkc.clamp(1, CLKC_MAX),
                rt: mhz * 300 / 1000 + 1,
            }
        }
    }
}

/// Flag that ends the data phase of a master write; BTC never sets without data
fn write_end_flag(bytes: &[u8]) -> Option<u32> {
    if bytes.is_empty() {
        None
    } else {
        Some(BTC)
    }
}

mod sealed {
    pub trait Sealed {}
}

/// An I2C peripheral sharing the I2C0 register layout
pub trait Instance:
    sealed::Sealed + Deref<Target = i2c0::RegisterBlock> + Enable + Reset + RcuBus<Bus = APB1>
{
}

impl sealed::Sealed for I2C0 {}
impl Instance for I2C0 {}
impl sealed::Sealed for I2C1 {}
impl Instance for I2C1 {}

/// SCL and SDA pins
pub trait Pins<I2C> {}

impl Pins<I2C0> for (PB6<Alternate<OpenDrain>>, PB7<Alternate<OpenDrain>>) {}
impl Pins<I2C1> for (PB10<Alternate<OpenDrain>>, PB11<Alternate<OpenDrain>>) {}

/// Register actions requested by an event machine, applied by [`I2c::apply`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Actions {
    /// Write this address byte to the data register
    pub send_address: Option<u8>,
    /// Clear ADDSEND by reading `stat0` then `stat1`
    pub clear_address: bool,
    /// Stop acknowledging received bytes
    pub disable_ack: bool,
    /// Generate a STOP condition
    pub stop: bool,
    /// Clear STPDET by writing `ctl0`
    pub clear_stop: bool,
    /// Error flags to clear
    pub clear_errors: u32,
    /// Write this byte to the data register
    pub write: Option<u8>,
    /// Read the data register
    pub read: bool,
    /// Stop listening to [`Event::Buffer`]: the last byte is in the data register and TBE
    /// would keep firing until BTC
    pub stop_buffer: bool,
    /// The transfer is over
    pub done: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Start,
    Address,
    Data,
    Finishing,
    Done,
}

/// Master transmitter driven by event interrupts
///
/// The main loop calls [`begin`](Self::begin), enables ACK and generates START. The handler
/// then feeds every `stat0` snapshot to [`on_event`](Self::on_event).
#[derive(Debug)]
pub struct MasterTransmitter {
    address: u8,
    phase: Phase,
}

impl MasterTransmitter {
    /// `address` is the 7-bit slave address
    pub const fn new(address: u8) -> Self {
        Self {
            address,
            phase: Phase::Idle,
        }
    }

    pub fn begin(&mut self) {
        self.phase = Phase::Start;
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Abandons the transfer after an error
    pub fn abort(&mut self) {
        self.phase = Phase::Idle;
    }

    /// `next` yields the bytes to send.
    pub fn on_event(&mut self, stat0: u32, next: impl FnOnce() -> Option<Step>) -> Actions {
        let mut actions = Actions::default();
        match self.phase {
            Phase::Start if stat0 & SBSEND != 0 => {
                actions.send_address = Some(self.address << 1);
                self.phase = Phase::Address;
            }
            Phase::Address if stat0 & ADDSEND != 0 => {
                actions.clear_address = true;
                self.phase = Phase::Data;
            }
            Phase::Data if stat0 & TBE != 0 => match next() {
                Some(step) => {
                    actions.write = Some(step.byte);
                    if step.last {
                        actions.stop_buffer = true;
                        self.phase = Phase::Finishing;
                    }
                }
                None => {
                    actions.stop = true;
                    actions.stop_buffer = true;
                    actions.done = true;
                    self.phase = Phase::Done;
                }
            },
            Phase::Finishing if stat0 & BTC != 0 => {
                actions.stop = true;
                actions.done = true;
                self.phase = Phase::Done;
            }
            _ => {}
        }
        actions
    }
}

/// Master receiver driven by event interrupts
///
/// The last byte is answered with NACK followed by STOP.
#[derive(Debug)]
pub struct MasterReceiver {
    address: u8,
    remaining: usize,
    phase: Phase,
}

impl MasterReceiver {
    /// `address` is the 7-bit slave address
    pub const fn new(address: u8) -> Self {
        Self {
            address,
            remaining: 0,
            phase: Phase::Idle,
        }
    }

    /// Prepares the reception of `count` bytes, at least one.
    pub fn begin(&mut self, count: usize) {
        self.remaining = count.max(1);
        self.phase = Phase::Start;
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    pub fn abort(&mut self) {
        self.phase = Phase::Idle;
    }

    /// Each `read` action yields a byte for the receive buffer.
    pub fn on_event(&mut self, stat0: u32) -> Actions {
        let mut actions = Actions::default();
        match self.phase {
            Phase::Start if stat0 & SBSEND != 0 => {
                actions.send_address = Some((self.address << 1) | 1);
                self.phase = Phase::Address;
            }
            Phase::Address if stat0 & ADDSEND != 0 => {
                if self.remaining == 1 {
                    actions.disable_ack = true;
                    actions.stop = true;
                }
                actions.clear_address = true;
                self.phase = Phase::Data;
            }
            Phase::Data if stat0 & RBNE != 0 => {
                if self.remaining == 2 {
                    actions.disable_ack = true;
                    actions.stop = true;
                }
                actions.read = true;
                self.remaining -= 1;
                if self.remaining == 0 {
                    actions.done = true;
                    self.phase = Phase::Done;
                }
            }
            _ => {}
        }
        actions
    }
}

/// Slave receiver driven by event interrupts
///
/// A transfer ends with the master's STOP condition.
#[derive(Debug)]
pub struct SlaveReceiver {
    phase: Phase,
}

impl SlaveReceiver {
    pub const fn new() -> Self {
        Self { phase: Phase::Idle }
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Abandons the transfer after a bus error; the next ADDSEND starts a new one
    pub fn abort(&mut self) {
        self.phase = Phase::Idle;
    }

    pub fn on_event(&mut self, stat0: u32) -> Actions {
        let mut actions = Actions::default();
        if stat0 & ADDSEND != 0 {
            actions.clear_address = true;
            self.phase = Phase::Data;
        }
        if stat0 & RBNE != 0 && self.phase == Phase::Data {
            actions.read = true;
        }
        if stat0 & STPDET != 0 {
            actions.clear_stop = true;
            if self.phase == Phase::Data {
                actions.done = true;
                self.phase = Phase::Done;
            }
        }
        actions
    }
}

impl Default for SlaveReceiver {
    fn default() -> Self {
        Self::new()
    }
}

/// Slave transmitter driven by event and error interrupts
///
/// The master ends the transfer by not acknowledging the last byte; that AERR is the normal end
/// of the transfer and is cleared here. Bytes requested after the data ran out are sent as
/// `0xFF`.
#[derive(Debug)]
pub struct SlaveTransmitter {
    phase: Phase,
}

impl SlaveTransmitter {
    pub const fn new() -> Self {
        Self { phase: Phase::Idle }
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Abandons the transfer after a bus error; the next ADDSEND starts a new one
    pub fn abort(&mut self) {
        self.phase = Phase::Idle;
    }

    pub fn on_event(&mut self, stat0: u32, next: impl FnOnce() -> Option<Step>) -> Actions {
        let mut actions = Actions::default();
        if stat0 & ADDSEND != 0 {
            actions.clear_address = true;
            self.phase = Phase::Data;
        }
        if stat0 & AERR != 0 && self.phase == Phase::Data {
            actions.clear_errors = AERR;
            actions.done = true;
            self.phase = Phase::Done;
        } else if stat0 & TBE != 0 && self.phase == Phase::Data {
            actions.write = Some(next().map_or(0xff, |step| step.byte));
        }
        actions
    }
}

impl Default for SlaveTransmitter {
    fn default() -> Self {
        Self::new()
    }
}

/// I2C peripheral operating in master or slave mode
pub struct I2c<I2C, PINS> {
    i2c: I2C,
    pins: PINS,
    mode: Mode,
    pclk1: Hertz,
}

impl<I2C: Instance, PINS> I2c<I2C, PINS> {
    /// Configures the I2C peripheral to work in master mode
    pub fn new(i2c: I2C, pins: PINS, mode: Mode, clocks: Clocks, apb: &mut APB1) -> Self
    where
        PINS: Pins<I2C>,
    {
        I2C::enable(apb);
        I2C::reset(apb);

        let mut i2c = I2c {
            i2c,
            pins,
            mode,
            pclk1: clocks.pclk1(),
        };
        i2c.init();
        i2c
    }

    fn init(&mut self) {
        let config = clock_config(self.pclk1, self.mode);
        self.i2c.ctl0.write(|w| unsafe { w.bits(0) });
        self.i2c.ctl1.write(|w| unsafe { w.bits(config.i2cclk as _) });
        self.i2c.ckcfg.write(|w| unsafe { w.bits(config.ckcfg as _) });
        self.i2c.rt.write(|w| unsafe { w.bits(config.rt as _) });
        self.set_ctl0(I2CEN | ACKEN, true);
    }

    /// Perform an I2C software reset
    pub fn reset(&mut self) {
        self.set_ctl0(SRESET, true);
        self.set_ctl0(SRESET, false);
        self.init();
    }

    fn set_ctl0(&mut self, bits: u32, enable: bool) {
        self.i2c.ctl0.modify(|r, w| unsafe {
            let old = r.bits() as u32;
            w.bits(if enable { old | bits } else { old & !bits } as _)
        });
    }

    /// Sets the 7-bit address this interface answers to in slave mode
    pub fn set_own_address(&mut self, address: u8) {
        self.i2c
            .saddr0
            .write(|w| unsafe { w.bits((u32::from(address & 0x7f) << 1) as _) });
    }

    /// Starts listening for an interrupt event
    pub fn listen(&mut self, event: Event) {
        self.i2c
            .ctl1
            .modify(|r, w| unsafe { w.bits((r.bits() as u32 | event.ctl1_bit()) as _) });
    }

    /// Stops listening for an interrupt event
    pub fn unlisten(&mut self, event: Event) {
        self.i2c
            .ctl1
            .modify(|r, w| unsafe { w.bits((r.bits() as u32 & !event.ctl1_bit()) as _) });
    }

    pub fn stat0(&self) -> u32 {
        self.i2c.stat0.read().bits() as u32
    }

    pub fn stat1(&self) -> u32 {
        self.i2c.stat1.read().bits() as u32
    }

    /// Generates a START condition
    pub fn send_start(&mut self) {
        self.set_ctl0(START, true);
    }

    /// Generates a STOP condition
    pub fn send_stop(&mut self) {
        self.set_ctl0(STOP, true);
    }

    /// Whether a STOP condition is still pending
    pub fn stop_pending(&self) -> bool {
        self.i2c.ctl0.read().bits() as u32 & STOP != 0
    }

    pub fn set_ack(&mut self, enable: bool) {
        self.set_ctl0(ACKEN, enable);
    }

    fn set_poap(&mut self, enable: bool) {
        self.set_ctl0(POAP, enable);
    }

    /// Clears ADDSEND
    pub fn clear_address(&mut self) {
        let _ = self.stat0();
        let _ = self.stat1();
    }

    /// Clears STPDET
    pub fn clear_stop(&mut self) {
        let _ = self.stat0();
        self.set_ctl0(I2CEN, true);
    }

    /// Clears the given error flags
    pub fn clear_errors(&mut self, flags: u32) {
        self.i2c
            .stat0
            .modify(|r, w| unsafe { w.bits((r.bits() as u32 & !(flags & ERRORS)) as _) });
    }

    /// Reads, classifies and clears the error flags
    pub fn take_error(&mut self) -> Option<Error> {
        let stat0 = self.stat0();
        let error = Error::from_stat0(stat0);
        if error.is_some() {
            self.clear_errors(stat0 & ERRORS);
        }
        error
    }

    pub fn read_data(&mut self) -> u8 {
        self.i2c.data.read().bits() as u8
    }

    pub fn write_data(&mut self, byte: u8) {
        self.i2c.data.write(|w| unsafe { w.bits(u32::from(byte) as _) });
    }

    /// Applies the actions of an event machine; returns the byte read, if any.
    pub fn apply(&mut self, actions: Actions) -> Option<u8> {
        if actions.disable_ack {
            self.set_ack(false);
        }
        if actions.clear_address {
            self.clear_address();
        }
        if actions.stop {
            self.send_stop();
        }
        if actions.clear_stop {
            self.clear_stop();
        }
        if actions.clear_errors != 0 {
            self.clear_errors(actions.clear_errors);
        }
        if let Some(byte) = actions.send_address.or(actions.write) {
            self.write_data(byte);
        }
        if actions.read {
            Some(self.read_data())
        } else {
            None
        }
    }

    /// Disables the peripheral and returns it with the pins
    pub fn release(self) -> (I2C, PINS) {
        self.i2c.ctl0.write(|w| unsafe { w.bits(0) });
        (self.i2c, self.pins)
    }
}

impl<PINS> I2c<I2C0, PINS> {
    pub fn i2c0(i2c: I2C0, pins: PINS, mode: Mode, clocks: Clocks, apb: &mut APB1) -> Self
    where
        PINS: Pins<I2C0>,
    {
        Self::new(i2c, pins, mode, clocks, apb)
    }
}

impl<PINS> I2c<I2C1, PINS> {
    pub fn i2c1(i2c: I2C1, pins: PINS, mode: Mode, clocks: Clocks, apb: &mut APB1) -> Self
    where
        PINS: Pins<I2C1>,
    {
        Self::new(i2c, pins, mode, clocks, apb)
    }
}

/// Polls `stat0` until `flag` is set, an error flag shows up, or `retries` polls passed.
fn wait_stat0(mut read: impl FnMut() -> u32, flag: u32, retries: u32) -> Result<u32, Error> {
    let mut left = retries;
    loop {
        let stat0 = read();
        if let Some(error) = Error::from_stat0(stat0) {
            return Err(error);
        }
        if stat0 & flag != 0 {
            return Ok(stat0);
        }
        match left.checked_sub(1) {
            Some(l) => left = l,
            None => return Err(Error::Timeout),
        }
    }
}

/// Blocking I2C master with bounded waits
pub struct BlockingI2c<I2C, PINS> {
    nb: I2c<I2C, PINS>,
    start_retries: u32,
    addr_retries: u32,
    data_retries: u32,
}

impl<I2C: Instance, PINS> BlockingI2c<I2C, PINS> {
    /// Every event wait gives up after its number of `stat0` polls.
    pub fn new(i2c: I2c<I2C, PINS>, start_retries: u32, addr_retries: u32, data_retries: u32) -> Self {
        BlockingI2c {
            nb: i2c,
            start_retries,
            addr_retries,
            data_retries,
        }
    }

    fn wait(&mut self, flag: u32, retries: u32) -> Result<(), Error> {
        let nb = &self.nb;
        let result = wait_stat0(|| nb.stat0(), flag, retries);
        if let Err(error) = result {
            if error != Error::Timeout {
                self.nb.clear_errors(ERRORS);
            }
        }
        result.map(|_| ())
    }

    fn send_start_and_wait(&mut self) -> Result<(), Error> {
        self.nb.send_start();
        self.wait(SBSEND, self.start_retries)
    }

    fn send_addr_and_wait(&mut self, byte: u8) -> Result<(), Error> {
        self.nb.write_data(byte);
        self.wait(ADDSEND, self.addr_retries)
    }

    fn wait_stop_sent(&mut self) -> Result<(), Error> {
        let mut left = self.data_retries;
        while self.nb.stop_pending() {
            left = left.checked_sub(1).ok_or(Error::Timeout)?;
        }
        Ok(())
    }

    fn write_without_stop(&mut self, addr: u8, bytes: &[u8]) -> Result<(), Error> {
        self.send_start_and_wait()?;
        self.send_addr_and_wait(addr << 1)?;
        self.nb.clear_address();

        for byte in bytes {
            self.wait(TBE, self.data_retries)?;
            self.nb.write_data(*byte);
        }
        match write_end_flag(bytes) {
            Some(flag) => self.wait(flag, self.data_retries),
            None => Ok(()),
        }
    }

    fn read_bytes(&mut self, addr: u8, buffer: &mut [u8]) -> Result<(), Error> {
        self.nb.set_ack(true);
        self.send_start_and_wait()?;
        self.send_addr_and_wait((addr << 1) | 1)?;

        match buffer.len() {
            1 => {
                self.nb.set_ack(false);
                self.nb.clear_address();
                self.nb.send_stop();
                self.wait(RBNE, self.data_retries)?;
                buffer[0] = self.nb.read_data();
            }
            2 => {
                self.nb.set_poap(true);
                self.nb.set_ack(false);
                self.nb.clear_address();
                self.wait(BTC, self.data_retries)?;
                self.nb.send_stop();
                buffer[0] = self.nb.read_data();
                buffer[1] = self.nb.read_data();
                self.nb.set_poap(false);
            }
            len => {
                self.nb.clear_address();
                for byte in &mut buffer[..len - 3] {
                    self.wait(RBNE, self.data_retries)?;
                    *byte = self.nb.read_data();
                }
                self.wait(BTC, self.data_retries)?;
                self.nb.set_ack(false);
                buffer[len - 3] = self.nb.read_data();
                self.wait(BTC, self.data_retries)?;
                self.nb.send_stop();
                buffer[len - 2] = self.nb.read_data();
                buffer[len - 1] = self.nb.read_data();
            }
        }
        self.nb.set_ack(true);
        self.wait_stop_sent()
    }

    /// Generates STOP after a failed transfer so the bus is released.
    fn finish<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        if result.is_err() {
            self.nb.send_stop();
            self.nb.set_poap(false);
            self.nb.set_ack(true);
        }
        result
    }

    pub fn release(self) -> (I2C, PINS) {
        self.nb.release()
    }
}

impl<I2C: Instance, PINS> Write for BlockingI2c<I2C, PINS> {
    type Error = Error;

    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), Error> {
        let result = self.write_without_stop(addr, bytes).and_then(|()| {
            self.nb.send_stop();
            self.wait_stop_sent()
        });
        self.finish(result)
    }
}

impl<I2C: Instance, PINS> Read for BlockingI2c<I2C, PINS> {
    type Error = Error;

    fn read(&mut self, addr: u8, buffer: &mut [u8]) -> Result<(), Error> {
        if buffer.is_empty() {
            return Ok(());
        }
        let result = self.read_bytes(addr, buffer);
        self.finish(result)
    }
}

impl<I2C: Instance, PINS> WriteRead for BlockingI2c<I2C, PINS> {
    type Error = Error;

    fn write_read(&mut self, addr: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<(), Error> {
        if buffer.is_empty() {
            return self.write(addr, bytes);
        }
        let result = self
            .write_without_stop(addr, bytes)
            .and_then(|()| self.read_bytes(addr, buffer));
        self.finish(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::{Progress, Transfer};

    #[test]
    fn bus_clock_registers() {
        let pclk1 = Hertz(54_000_000);
        assert_eq!(
            clock_config(pclk1, Mode::standard(Hertz(100_000))),
            ClockConfig {
                i2cclk: 54,
                ckcfg: 270,
                rt: 55
            }
        );
        assert_eq!(
            clock_config(pclk1, Mode::fast(Hertz(400_000), DutyCycle::Ratio2to1)),
            ClockConfig {
                i2cclk: 54,
                ckcfg: FAST | 45,
                rt: 17
            }
        );
        let fast = clock_config(pclk1, Mode::fast(Hertz(400_000), DutyCycle::Ratio16to9));
        assert_eq!(fast.ckcfg, FAST | DTCY | 5);
        // slow APB1 clamps the standard mode divider
        let slow = clock_config(Hertz(2_000_000), Mode::standard(Hertz(400_000)));
        assert_eq!(slow.ckcfg, 4);
    }

    #[test]
    fn bus_clock_divider_limits() {
        let pclk1 = Hertz(54_000_000);
        // 5400 does not fit the 12 bit field
        let low = clock_config(pclk1, Mode::standard(Hertz(5_000)));
        assert_eq!(low.ckcfg, CLKC_MAX);
        let zero = clock_config(pclk1, Mode::standard(Hertz(0)));
        assert_eq!(zero.ckcfg, CLKC_MAX);
        let zero = clock_config(pclk1, Mode::fast(Hertz(0), DutyCycle::Ratio16to9));
        assert_eq!(zero.ckcfg, FAST | DTCY | CLKC_MAX);
        let high = clock_config(pclk1, Mode::fast(Hertz(u32::MAX), DutyCycle::Ratio2to1));
        assert_eq!(high.ckcfg, FAST | 1);
        // largest divider that still fits
        let edge = clock_config(Hertz(8_190_000), Mode::standard(Hertz(1_000)));
        assert_eq!(edge.ckcfg, 4095);
    }

    #[test]
    fn error_classification() {
        assert_eq!(Error::from_stat0(TBE | BTC), None);
        assert_eq!(Error::from_stat0(AERR), Some(Error::Acknowledge));
        assert_eq!(Error::from_stat0(LOSTARB | AERR), Some(Error::Arbitration));
        assert_eq!(Error::from_stat0(BERR | OUERR), Some(Error::Bus));
        assert_eq!(Error::from_stat0(OUERR), Some(Error::Overrun));
    }

    #[test]
    fn bounded_wait() {
        assert_eq!(wait_stat0(|| SBSEND, SBSEND, 0), Ok(SBSEND));
        assert_eq!(wait_stat0(|| 0, SBSEND, 10), Err(Error::Timeout));
        assert_eq!(wait_stat0(|| AERR, ADDSEND, 10), Err(Error::Acknowledge));

        let mut polls = 0;
        let result = wait_stat0(
            || {
                polls += 1;
                if polls == 3 {
                    TBE
                } else {
                    0
                }
            },
            TBE,
            5,
        );
        assert_eq!(result, Ok(TBE));
    }

    #[test]
    fn master_transmitter_sequence() {
        let tx: Transfer<4> = Transfer::new();
        tx.start_tx(&[0x10, 0x20]).unwrap();

        let mut machine = MasterTransmitter::new(0x50);
        // events before begin are ignored
        assert_eq!(machine.on_event(SBSEND, || tx.next_tx()), Actions::default());
        machine.begin();

        let a = machine.on_event(SBSEND, || tx.next_tx());
        assert_eq!(a.send_address, Some(0xa0));

        let a = machine.on_event(ADDSEND | TBE, || tx.next_tx());
        assert!(a.clear_address);
        assert_eq!(a.write, None);

        let a = machine.on_event(TBE, || tx.next_tx());
        assert_eq!(a.write, Some(0x10));
        assert!(!a.stop_buffer);
        let a = machine.on_event(TBE, || tx.next_tx());
        assert_eq!(a.write, Some(0x20));
        // TBE is of no further use once the last byte is written
        assert!(a.stop_buffer);
        assert!(!a.done);

        // waits for the last byte to leave the shift register
        assert_eq!(machine.on_event(TBE, || tx.next_tx()), Actions::default());
        let a = machine.on_event(TBE | BTC, || tx.next_tx());
        assert!(a.stop && a.done);
        assert!(machine.is_done());
        assert!(tx.is_complete());
    }

    #[test]
    fn master_receiver_nacks_last_byte() {
        let mut machine = MasterReceiver::new(0x50);
        machine.begin(3);

        assert_eq!(machine.on_event(SBSEND).send_address, Some(0xa1));
        let a = machine.on_event(ADDSEND);
        assert!(a.clear_address && !a.disable_ack && !a.stop);

        let a = machine.on_event(RBNE);
        assert!(a.read && !a.stop);
        let a = machine.on_event(RBNE);
        assert!(a.read && a.disable_ack && a.stop && !a.done);
        let a = machine.on_event(RBNE);
        assert!(a.read && a.done);
        assert!(machine.is_done());
        // nothing more is read
        assert_eq!(machine.on_event(RBNE), Actions::default());
    }

    #[test]
    fn master_receiver_single_byte() {
        let mut machine = MasterReceiver::new(0x50);
        machine.begin(1);
        machine.on_event(SBSEND);
        let a = machine.on_event(ADDSEND);
        assert!(a.disable_ack && a.stop && a.clear_address);
        let a = machine.on_event(RBNE);
        assert!(a.read && a.done);
    }

    #[test]
    fn slave_receiver_until_stop() {
        let rx: Transfer<4> = Transfer::new();
        rx.start_rx(4).unwrap();
        let mut machine = SlaveReceiver::new();

        // data before being addressed is not ours
        assert!(!machine.on_event(RBNE).read);

        assert!(machine.on_event(ADDSEND).clear_address);
        for byte in [1, 2] {
            let a = machine.on_event(RBNE);
            assert!(a.read);
            assert_eq!(rx.push_rx(byte), Progress::More);
        }
        let a = machine.on_event(STPDET);
        assert!(a.clear_stop && a.done);
        assert!(machine.is_done());
    }

    #[test]
    fn master_transmitter_without_data() {
        let tx: Transfer<4> = Transfer::new();
        let mut machine = MasterTransmitter::new(0x50);
        machine.begin();
        machine.on_event(SBSEND, || tx.next_tx());
        machine.on_event(ADDSEND, || tx.next_tx());
        let a = machine.on_event(TBE, || tx.next_tx());
        assert!(a.stop && a.stop_buffer && a.done);
    }

    #[test]
    fn address_only_write_skips_byte_transfer_wait() {
        assert_eq!(write_end_flag(&[]), None);
        assert_eq!(write_end_flag(&[0x00]), Some(BTC));
    }

    #[test]
    fn slave_receiver_restarts_after_error() {
        let rx: Transfer<4> = Transfer::new();
        rx.start_rx(2).unwrap();
        let mut machine = SlaveReceiver::new();

        machine.on_event(ADDSEND);
        assert!(machine.on_event(RBNE).read);
        assert_eq!(rx.push_rx(0xaa), Progress::More);

        // bus error in the middle of the transfer
        machine.abort();
        rx.reset();
        assert!(!machine.is_done());
        // leftovers of the broken transfer are not read, its STOP does not complete
        assert!(!machine.on_event(RBNE).read);
        assert!(!machine.on_event(STPDET).done);

        rx.start_rx(2).unwrap();
        assert!(machine.on_event(ADDSEND).clear_address);
        for byte in [1, 2] {
            assert!(machine.on_event(RBNE).read);
            rx.push_rx(byte);
        }
        assert!(machine.on_event(STPDET).done);
        assert_eq!(rx.with_data(|data| data == [1, 2]), Ok(true));
    }

    #[test]
    fn slave_transmitter_restarts_after_error() {
        let tx: Transfer<2> = Transfer::new();
        tx.start_tx(&[5, 6]).unwrap();
        let mut machine = SlaveTransmitter::new();

        assert_eq!(machine.on_event(ADDSEND | TBE, || tx.next_tx()).write, Some(5));
        machine.abort();
        tx.reset();
        assert_eq!(machine.on_event(TBE, || tx.next_tx()).write, None);
        assert!(!machine.on_event(AERR, || tx.next_tx()).done);

        tx.start_tx(&[9]).unwrap();
        assert_eq!(machine.on_event(ADDSEND | TBE, || tx.next_tx()).write, Some(9));
        assert!(machine.on_event(AERR, || tx.next_tx()).done);
    }

    #[test]
    fn slave_transmitter_ends_on_nack() {
        let tx: Transfer<2> = Transfer::new();
        tx.start_tx(&[7]).unwrap();
        let mut machine = SlaveTransmitter::new();

        let a = machine.on_event(ADDSEND | TBE, || tx.next_tx());
        assert!(a.clear_address);
        assert_eq!(a.write, Some(7));
        // the master asks for more than was prepared
        assert_eq!(machine.on_event(TBE, || tx.next_tx()).write, Some(0xff));

        let a = machine.on_event(AERR, || tx.next_tx());
        assert_eq!(a.clear_errors, AERR);
        assert!(a.done);
    }
}
