// Copyright 2023 The gd32vf103-hal authors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Serial Communication (USART)
//!
//! This module contains the functions to utilize the USART (Universal synchronous asynchronous
//! receiver transmitter)
//!
//! ## Example usage:
//!
//! ```ignore
//! // prelude: create handles to the peripherals and registers
//! let p = pac::Peripherals::take().unwrap();
//! let mut rcu = p.RCU.constrain();
//! let clocks = rcu.cfgr.freeze();
//! let mut gpioa = p.GPIOA.split(&mut rcu.apb2);
//!
//! // USART0 on Pins A9 and A10
//! let pin_tx = gpioa.pa9.into_alternate_push_pull(&mut gpioa.crh);
//! let pin_rx = gpioa.pa10;
//! // Create an interface struct for USART0 with 115200 Baud
//! let serial = Serial::new(
//!     p.USART0,
//!     (pin_tx, pin_rx),
//!     Config::default().baudrate(115_200.bps()),
//!     clocks,
//!     &mut rcu.apb2,
//! );
//!
//! // separate into tx and rx channels
//! let (mut tx, mut rx) = serial.split();
//!
//! // Write 'R' to the USART
//! block!(tx.write(b'R')).ok();
//! // Receive a byte from the USART and store it in "received"
//! let received = block!(rx.read()).unwrap();
//! ```
//!
//! ## Pins
//!
//! | USART  | TX   | RX   |
//! |--------|------|------|
//! | USART0 | PA9  | PA10 |
//! | USART1 | PA2  | PA3  |
//! | USART2 | PB10 | PB11 |

use core::convert::Infallible;
use core::fmt;
use core::marker::PhantomData;
use core::ops::Deref;

use cast::u16;
use embedded_dma::{ReadBuffer, WriteBuffer};
use embedded_hal::serial;

use crate::dma::{self, dma0, ChannelConfig, Direction, RxDma, Transfer, TransferPayload, TxDma, R, W};
use crate::gpio::gpioa::{PA10, PA2, PA3, PA9};
use crate::gpio::gpiob::{PB10, PB11};
use crate::gpio::{Alternate, Floating, Input, PushPull};
use crate::pac::{usart0, USART0, USART1, USART2};
use crate::rcu::{Clocks, Enable, Reset};
use crate::time::{Bps, Hertz, U32Ext};

// STAT
const PERR: u32 = 1 << 0;
const FERR: u32 = 1 << 1;
const NERR: u32 = 1 << 2;
const ORERR: u32 = 1 << 3;
const IDLEF: u32 = 1 << 4;
const RBNE: u32 = 1 << 5;
const TC: u32 = 1 << 6;
const TBE: u32 = 1 << 7;

// CTL0
const REN: u32 = 1 << 2;
const TEN: u32 = 1 << 3;
const IDLEIE: u32 = 1 << 4;
const RBNEIE: u32 = 1 << 5;
const TCIE: u32 = 1 << 6;
const TBEIE: u32 = 1 << 7;
const PM: u32 = 1 << 9;
const PCEN: u32 = 1 << 10;
const WL: u32 = 1 << 12;
const UEN: u32 = 1 << 13;

// CTL1
const STB_SHIFT: u32 = 12;

// CTL2
const DENR: u32 = 1 << 6;
const DENT: u32 = 1 << 7;

/// Interrupt event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// New data has been received
    Rxne,
    /// New data can be sent
    Txe,
    /// The last frame left the shift register
    Tc,
    /// Idle line state detected
    Idle,
}

impl Event {
    fn ctl0_bit(self) -> u32 {
        match self {
            Event::Rxne => RBNEIE,
            Event::Txe => TBEIE,
            Event::Tc => TCIE,
            Event::Idle => IDLEIE,
        }
    }
}

/// Serial error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Framing error
    Framing,
    /// Noise error
    Noise,
    /// RX buffer overrun
    Overrun,
    /// Parity check error
    Parity,
}

impl Error {
    /// Classifies the error flags of a status register snapshot.
    fn from_stat(stat: u32) -> Option<Self> {
        if stat & PERR != 0 {
            Some(Error::Parity)
        } else if stat & FERR != 0 {
            Some(Error::Framing)
        } else if stat & NERR != 0 {
            Some(Error::Noise)
        } else if stat & ORERR != 0 {
            Some(Error::Overrun)
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WordLength {
    /// When parity is enabled, a word has 7 data bits + 1 parity bit,
    /// otherwise 8 data bits.
    Bits8,
    /// When parity is enabled, a word has 8 data bits + 1 parity bit,
    /// otherwise 9 data bits.
    Bits9,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parity {
    ParityNone,
    ParityEven,
    ParityOdd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopBits {
    /// 1 stop bit
    STOP1 = 0b00,
    /// 0.5 stop bits
    STOP0P5 = 0b01,
    /// 2 stop bits
    STOP2 = 0b10,
    /// 1.5 stop bits
    STOP1P5 = 0b11,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub baudrate: Bps,
    pub wordlength: WordLength,
    pub parity: Parity,
    pub stopbits: StopBits,
}

impl Config {
    pub fn baudrate(mut self, baudrate: Bps) -> Self {
        self.baudrate = baudrate;
        self
    }

    pub fn wordlength_8bits(mut self) -> Self {
        self.wordlength = WordLength::Bits8;
        self
    }

    pub fn wordlength_9bits(mut self) -> Self {
        self.wordlength = WordLength::Bits9;
        self
    }

    pub fn parity_none(mut self) -> Self {
        self.parity = Parity::ParityNone;
        self
    }

    pub fn parity_even(mut self) -> Self {
        self.parity = Parity::ParityEven;
        self
    }

    pub fn parity_odd(mut self) -> Self {
        self.parity = Parity::ParityOdd;
        self
    }

    pub fn stopbits(mut self, stopbits: StopBits) -> Self {
        self.stopbits = stopbits;
        self
    }

    fn ctl0_bits(&self) -> u32 {
        let mut bits = match self.parity {
            Parity::ParityNone => 0,
            Parity::ParityEven => PCEN,
            Parity::ParityOdd => PCEN | PM,
        };
        if self.wordlength == WordLength::Bits9 {
            bits |= WL;
        }
        bits
    }

    fn ctl1_bits(&self) -> u32 {
        (self.stopbits as u32) << STB_SHIFT
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            baudrate: 115_200_u32.bps(),
            wordlength: WordLength::Bits8,
            parity: Parity::ParityNone,
            stopbits: StopBits::STOP1,
        }
    }
}

/// Value of the baud rate register for 16x oversampling, rounded to nearest.
///
/// Rates outside `pclk / 0xffff ..= pclk / 16` saturate at the nearest end of the register.
fn baud_divider(pclk: Hertz, baudrate: Bps) -> u16 {
    let baudrate = baudrate.0.max(1);
    let div = (u64::from(pclk.0) + u64::from(baudrate / 2)) / u64::from(baudrate);
    u16(div.max(16)).unwrap_or(u16::MAX)
}

mod sealed {
    pub trait Sealed {}
}

/// A USART peripheral sharing the USART0 register layout
pub trait Instance:
    sealed::Sealed + Deref<Target = usart0::RegisterBlock> + Enable + Reset
{
    #[doc(hidden)]
    fn ptr() -> *const usart0::RegisterBlock;
    #[doc(hidden)]
    fn clock(clocks: &Clocks) -> Hertz;
}

macro_rules! instance {
    ($($USARTX:ident: $pclk:ident,)+) => {
        $(
            impl sealed::Sealed for $USARTX {}
            impl Instance for $USARTX {
                fn ptr() -> *const usart0::RegisterBlock {
                    $USARTX::ptr()
                }

                fn clock(clocks: &Clocks) -> Hertz {
                    clocks.$pclk()
                }
            }
        )+
    };
}

instance! {
    USART0: pclk2,
    USART1: pclk1,
    USART2: pclk1,
}

/// Pins usable by a USART, TX first
pub trait Pins<USART> {}

impl Pins<USART0> for (PA9<Alternate<PushPull>>, PA10<Input<Floating>>) {}
impl Pins<USART1> for (PA2<Alternate<PushPull>>, PA3<Input<Floating>>) {}
impl Pins<USART2> for (PB10<Alternate<PushPull>>, PB11<Input<Floating>>) {}

/// Serial abstraction
pub struct Serial<USART, PINS> {
    usart: USART,
    pins: PINS,
}

/// Serial receiver
pub struct Rx<USART> {
    _usart: PhantomData<USART>,
}

/// Serial transmitter
pub struct Tx<USART> {
    _usart: PhantomData<USART>,
}

impl<USART: Instance, PINS> Serial<USART, PINS> {
    /// Configures the USART and enables transmitter and receiver.
    pub fn new(
        usart: USART,
        pins: PINS,
        config: Config,
        clocks: Clocks,
        bus: &mut USART::Bus,
    ) -> Self
    where
        PINS: Pins<USART>,
    {
        USART::enable(bus);
        USART::reset(bus);

        let div = baud_divider(USART::clock(&clocks), config.baudrate);
        usart.baud.write(|w| unsafe { w.bits(div.into()) });
        usart.ctl1.write(|w| unsafe { w.bits(config.ctl1_bits() as _) });
        usart.ctl2.write(|w| unsafe { w.bits(0) });
        usart
            .ctl0
            .write(|w| unsafe { w.bits((config.ctl0_bits() | UEN | TEN | REN) as _) });

        Serial { usart, pins }
    }

    /// Starts listening for an interrupt event
    pub fn listen(&mut self, event: Event) {
        self.usart
            .ctl0
            .modify(|r, w| unsafe { w.bits((r.bits() as u32 | event.ctl0_bit()) as _) });
    }

    /// Stops listening for an interrupt event
    pub fn unlisten(&mut self, event: Event) {
        self.usart
            .ctl0
            .modify(|r, w| unsafe { w.bits((r.bits() as u32 & !event.ctl0_bit()) as _) });
    }

    /// Splits the `Serial` abstraction into a transmitter and a receiver half
    pub fn split(self) -> (Tx<USART>, Rx<USART>) {
        (
            Tx {
                _usart: PhantomData,
            },
            Rx {
                _usart: PhantomData,
            },
        )
    }

    /// Disables the USART and returns the peripheral and the pins
    pub fn release(self) -> (USART, PINS) {
        self.usart.ctl0.write(|w| unsafe { w.bits(0) });
        (self.usart, self.pins)
    }
}

fn registers<USART: Instance>() -> &'static usart0::RegisterBlock {
    // NOTE(unsafe) Tx and Rx only touch their own bits of the shared registers
    unsafe { &*USART::ptr() }
}

fn set_ctl0<USART: Instance>(bit: u32, enable: bool) {
    registers::<USART>().ctl0.modify(|r, w| unsafe {
        let bits = r.bits() as u32;
        w.bits(if enable { bits | bit } else { bits & !bit } as _)
    });
}

fn set_ctl2<USART: Instance>(bit: u32, enable: bool) {
    registers::<USART>().ctl2.modify(|r, w| unsafe {
        let bits = r.bits() as u32;
        w.bits(if enable { bits | bit } else { bits & !bit } as _)
    });
}

impl<USART: Instance> Rx<USART> {
    /// Enables the RBNE interrupt
    pub fn listen(&mut self) {
        set_ctl0::<USART>(RBNEIE, true);
    }

    /// Disables the RBNE interrupt
    pub fn unlisten(&mut self) {
        set_ctl0::<USART>(RBNEIE, false);
    }

    /// Enables the idle line interrupt
    pub fn listen_idle(&mut self) {
        set_ctl0::<USART>(IDLEIE, true);
    }

    /// Disables the idle line interrupt
    pub fn unlisten_idle(&mut self) {
        set_ctl0::<USART>(IDLEIE, false);
    }

    /// Whether a received byte is waiting in the data register
    pub fn is_rx_not_empty(&self) -> bool {
        registers::<USART>().stat.read().bits() as u32 & RBNE != 0
    }

    /// Whether the line went idle; reading `stat` then `data` clears it.
    pub fn is_idle(&self) -> bool {
        registers::<USART>().stat.read().bits() as u32 & IDLEF != 0
    }

    /// Clears the idle line flag
    pub fn clear_idle(&mut self) {
        let usart = registers::<USART>();
        let _ = usart.stat.read();
        let _ = usart.data.read();
    }
}

impl<USART: Instance> serial::Read<u8> for Rx<USART> {
    type Error = Error;

    fn read(&mut self) -> nb::Result<u8, Error> {
        let usart = registers::<USART>();
        let stat = usart.stat.read().bits() as u32;

        if let Some(err) = Error::from_stat(stat) {
            // reading the data register after the status register clears the error flags
            let _ = usart.data.read();
            Err(nb::Error::Other(err))
        } else if stat & RBNE != 0 {
            Ok(usart.data.read().bits() as u8)
        } else {
            Err(nb::Error::WouldBlock)
        }
    }
}

impl<USART: Instance> Tx<USART> {
    /// Enables the TBE interrupt
    pub fn listen(&mut self) {
        set_ctl0::<USART>(TBEIE, true);
    }

    /// Disables the TBE interrupt
    pub fn unlisten(&mut self) {
        set_ctl0::<USART>(TBEIE, false);
    }

    /// Enables the transmission complete interrupt
    pub fn listen_complete(&mut self) {
        set_ctl0::<USART>(TCIE, true);
    }

    /// Disables the transmission complete interrupt
    pub fn unlisten_complete(&mut self) {
        set_ctl0::<USART>(TCIE, false);
    }

    /// Whether the data register can take another byte
    pub fn is_tx_empty(&self) -> bool {
        registers::<USART>().stat.read().bits() as u32 & TBE != 0
    }

    /// Whether the last byte has left the shift register
    pub fn is_tx_complete(&self) -> bool {
        registers::<USART>().stat.read().bits() as u32 & TC != 0
    }

    /// Writes a byte without checking TBE, for use right after the flag has been seen.
    pub fn write_data(&mut self, byte: u8) {
        registers::<USART>()
            .data
            .write(|w| unsafe { w.bits(u32::from(byte) as _) });
    }
}

impl<USART: Instance> serial::Write<u8> for Tx<USART> {
    type Error = Infallible;

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        if self.is_tx_complete() {
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }

    fn write(&mut self, byte: u8) -> nb::Result<(), Self::Error> {
        if self.is_tx_empty() {
            self.write_data(byte);
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }
}

impl<USART: Instance> embedded_hal::blocking::serial::write::Default<u8> for Tx<USART> {}

impl<USART: Instance> fmt::Write for Tx<USART> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        crate::console::crlf(s, |byte| {
            let _ = nb::block!(serial::Write::write(self, byte));
        });
        Ok(())
    }
}

impl<USART: Instance> Tx<USART> {
    pub(crate) fn ptr(&self) -> *const usart0::RegisterBlock {
        USART::ptr()
    }
}

macro_rules! serial_dma {
    ($($USARTX:ident: ($txchannel:ident, $rxchannel:ident),)+) => {
        $(
            impl Rx<$USARTX> {
                /// Hands the receiver to its DMA channel
                pub fn with_dma(self, mut channel: dma0::$rxchannel) -> RxDma<Self, dma0::$rxchannel> {
                    channel.configure(ChannelConfig::peripheral(Direction::PeripheralToMemory));
                    channel.set_peripheral_address(&registers::<$USARTX>().data as *const _ as u32);
                    RxDma { payload: self, channel }
                }
            }

            impl Tx<$USARTX> {
                /// Hands the transmitter to its DMA channel
                pub fn with_dma(self, mut channel: dma0::$txchannel) -> TxDma<Self, dma0::$txchannel> {
                    channel.configure(ChannelConfig::peripheral(Direction::MemoryToPeripheral));
                    channel.set_peripheral_address(&registers::<$USARTX>().data as *const _ as u32);
                    TxDma { payload: self, channel }
                }
            }

            impl RxDma<Rx<$USARTX>, dma0::$rxchannel> {
                /// Gives back the receiver and the channel
                pub fn release(mut self) -> (Rx<$USARTX>, dma0::$rxchannel) {
                    self.stop();
                    (self.payload, self.channel)
                }

                /// Fills `buffer` with received bytes
                pub fn read<B>(mut self, mut buffer: B) -> Transfer<R, B, Self>
                where
                    B: WriteBuffer<Word = u8>,
                {
                    // NOTE(unsafe) the buffer stays owned by the transfer until it completes
                    let (ptr, len) = unsafe { buffer.write_buffer() };
                    self.channel.set_memory_address(ptr as u32);
                    self.channel.set_transfer_length(len);
                    self.start();
                    Transfer::r(buffer, self)
                }
            }

            impl TxDma<Tx<$USARTX>, dma0::$txchannel> {
                /// Gives back the transmitter and the channel
                pub fn release(mut self) -> (Tx<$USARTX>, dma0::$txchannel) {
                    self.stop();
                    (self.payload, self.channel)
                }

                /// Sends the contents of `buffer`
                pub fn write<B>(mut self, buffer: B) -> Transfer<W, B, Self>
                where
                    B: ReadBuffer<Word = u8>,
                {
                    // NOTE(unsafe) the buffer stays owned by the transfer until it completes
                    let (ptr, len) = unsafe { buffer.read_buffer() };
                    self.channel.set_memory_address(ptr as u32);
                    self.channel.set_transfer_length(len);
                    self.start();
                    Transfer::w(buffer, self)
                }
            }

            impl TransferPayload for RxDma<Rx<$USARTX>, dma0::$rxchannel> {
                fn start(&mut self) {
                    self.channel.start();
                    set_ctl2::<$USARTX>(DENR, true);
                }

                fn stop(&mut self) {
                    set_ctl2::<$USARTX>(DENR, false);
                    self.channel.stop();
                }

                fn in_progress(&self) -> bool {
                    self.channel.in_progress()
                }

                fn error(&self) -> bool {
                    self.channel.event_occurred(dma::Event::Error)
                }
            }

            impl TransferPayload for TxDma<Tx<$USARTX>, dma0::$txchannel> {
                fn start(&mut self) {
                    self.channel.start();
                    set_ctl2::<$USARTX>(DENT, true);
                }

                fn stop(&mut self) {
                    set_ctl2::<$USARTX>(DENT, false);
                    self.channel.stop();
                }

                fn in_progress(&self) -> bool {
                    self.channel.in_progress()
                }

                fn error(&self) -> bool {
                    self.channel.event_occurred(dma::Event::Error)
                }
            }
        )+
    };
}

serial_dma! {
    USART0: (C3, C4),
    USART1: (C6, C5),
    USART2: (C1, C2),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baud_register() {
        assert_eq!(baud_divider(Hertz(108_000_000), Bps(115_200)), 938);
        assert_eq!(baud_divider(Hertz(54_000_000), Bps(115_200)), 469);
        assert_eq!(baud_divider(Hertz(8_000_000), Bps(9_600)), 833);
    }

    #[test]
    fn baud_register_limits() {
        // 90000 does not fit the 16 bit register
        assert_eq!(baud_divider(Hertz(108_000_000), Bps(1_200)), u16::MAX);
        assert_eq!(baud_divider(Hertz(108_000_000), Bps(0)), u16::MAX);
        assert_eq!(baud_divider(Hertz(8_000_000), Bps(4_000_000)), 16);
        assert_eq!(baud_divider(Hertz(108_000_000), Bps(1_648)), 65_534);
    }

    #[test]
    fn frame_format() {
        let config = Config::default();
        assert_eq!(config.ctl0_bits(), 0);
        assert_eq!(config.ctl1_bits(), 0);

        let config = Config::default()
            .wordlength_9bits()
            .parity_odd()
            .stopbits(StopBits::STOP2);
        assert_eq!(config.ctl0_bits(), WL | PCEN | PM);
        assert_eq!(config.ctl1_bits(), 0b10 << 12);
    }

    #[test]
    fn error_priority() {
        assert_eq!(Error::from_stat(RBNE), None);
        assert_eq!(Error::from_stat(ORERR | RBNE), Some(Error::Overrun));
        assert_eq!(Error::from_stat(PERR | FERR), Some(Error::Parity));
        assert_eq!(Error::from_stat(NERR), Some(Error::Noise));
    }
}
