// Copyright 2023 The gd32vf103-hal authors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Serial Peripheral Interface
//!
//! 8-bit frames, MSB first, with software NSS.
//!
//! ## Pins
//!
//! | SPI  | SCK  | MISO | MOSI |
//! |------|------|------|------|
//! | SPI0 | PA5  | PA6  | PA7  |
//! | SPI1 | PB13 | PB14 | PB15 |
//! | SPI2 | PB3  | PB4  | PB5  |
//!
//! PB3 and PB4 belong to the JTAG port after reset; release them with
//! [`Afio::disable_jtag`](crate::afio::Afio::disable_jtag) before using SPI2.
//!
//! In master role SCK and MOSI are alternate push-pull outputs and MISO a floating input; in
//! slave role MISO is the alternate output and SCK and MOSI are inputs.

use core::ops::Deref;

pub use embedded_hal::spi::{Mode, Phase, Polarity, MODE_0, MODE_1, MODE_2, MODE_3};
use embedded_hal::spi::FullDuplex;

use crate::gpio::gpioa::{PA5, PA6, PA7};
use crate::gpio::gpiob::{PB13, PB14, PB15, PB3, PB4, PB5};
use crate::gpio::{Alternate, Floating, Input, PushPull};
use crate::pac::{spi0, SPI0, SPI1, SPI2};
use crate::rcu::{Clocks, Enable, Reset};
use crate::time::Hertz;

// CTL0
const CKPH: u32 = 1 << 0;
const CKPL: u32 = 1 << 1;
const MSTMOD: u32 = 1 << 2;
const PSC_SHIFT: u32 = 3;
const SPIEN: u32 = 1 << 6;
const SWNSS: u32 = 1 << 8;
const SWNSSEN: u32 = 1 << 9;

// CTL1
const ERRIE: u32 = 1 << 5;
const RBNEIE: u32 = 1 << 6;
const TBEIE: u32 = 1 << 7;

// STAT
const RBNE: u32 = 1 << 0;
const TBE: u32 = 1 << 1;
const CRCERR: u32 = 1 << 4;
const CONFERR: u32 = 1 << 5;
const RXORERR: u32 = 1 << 6;
const TRANS: u32 = 1 << 7;

/// SPI error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Overrun occurred
    Overrun,
    /// Mode fault occurred
    ModeFault,
    /// CRC error
    Crc,
}

impl Error {
    fn from_stat(stat: u32) -> Option<Self> {
        if stat & RXORERR != 0 {
            Some(Error::Overrun)
        } else if stat & CONFERR != 0 {
            Some(Error::ModeFault)
        } else if stat & CRCERR != 0 {
            Some(Error::Crc)
        } else {
            None
        }
    }
}

/// Interrupt event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// Receive buffer not empty
    Rbne,
    /// Transmit buffer empty
    Tbe,
    /// Overrun, mode fault or CRC error
    Error,
}

impl Event {
    fn ctl1_bit(self) -> u32 {
        match self {
            Event::Rbne => RBNEIE,
            Event::Tbe => TBEIE,
            Event::Error => ERRIE,
        }
    }
}

/// Role of the interface on the bus
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Master,
    Slave,
}

/// PSC field for the fastest clock not above `freq`.
fn prescaler(pclk: Hertz, freq: Hertz) -> u32 {
    (0..8)
        .find(|psc| pclk.0 >> (psc + 1) <= freq.0)
        .unwrap_or(0b111)
}

fn ctl0_bits(mode: Mode, role: Role, psc: u32) -> u32 {
    let mut bits = SPIEN | SWNSSEN | (psc << PSC_SHIFT);
    if mode.phase == Phase::CaptureOnSecondTransition {
        bits |= CKPH;
    }
    if mode.polarity == Polarity::IdleHigh {
        bits |= CKPL;
    }
    if role == Role::Master {
        bits |= MSTMOD | SWNSS;
    }
    bits
}

mod sealed {
    pub trait Sealed {}
}

/// An SPI peripheral sharing the SPI0 register layout
pub trait Instance: sealed::Sealed + Deref<Target = spi0::RegisterBlock> + Enable + Reset {
    #[doc(hidden)]
    fn clock(clocks: &Clocks) -> Hertz;
}

macro_rules! instance {
    ($($SPIX:ident: $pclk:ident,)+) => {
        $(
            impl sealed::Sealed for $SPIX {}
            impl Instance for $SPIX {
                fn clock(clocks: &Clocks) -> Hertz {
                    clocks.$pclk()
                }
            }
        )+
    };
}

instance! {
    SPI0: pclk2,
    SPI1: pclk1,
    SPI2: pclk1,
}

/// Pins of a master: SCK, MISO, MOSI
pub trait Pins<SPI> {}

/// Pins of a slave: SCK, MISO, MOSI
pub trait SlavePins<SPI> {}

macro_rules! pins {
    ($($SPIX:ident: ($SCK:ident, $MISO:ident, $MOSI:ident),)+) => {
        $(
            impl Pins<$SPIX>
                for ($SCK<Alternate<PushPull>>, $MISO<Input<Floating>>, $MOSI<Alternate<PushPull>>)
            {
            }

            impl SlavePins<$SPIX>
                for ($SCK<Input<Floating>>, $MISO<Alternate<PushPull>>, $MOSI<Input<Floating>>)
            {
            }
        )+
    };
}

pins! {
    SPI0: (PA5, PA6, PA7),
    SPI1: (PB13, PB14, PB15),
    SPI2: (PB3, PB4, PB5),
}

/// SPI interface
pub struct Spi<SPI, PINS> {
    spi: SPI,
    pins: PINS,
}

impl<SPI: Instance, PINS> Spi<SPI, PINS> {
    fn configure(spi: &SPI, bus: &mut SPI::Bus, bits: u32) {
        SPI::enable(bus);
        SPI::reset(bus);
        spi.ctl1.write(|w| unsafe { w.bits(0) });
        spi.ctl0.write(|w| unsafe { w.bits(bits as _) });
    }

    /// Configures the SPI peripheral as bus master.
    ///
    /// The clock runs at the fastest rate the prescaler allows without exceeding `freq`.
    pub fn master<F>(
        spi: SPI,
        pins: PINS,
        mode: Mode,
        freq: F,
        clocks: Clocks,
        bus: &mut SPI::Bus,
    ) -> Self
    where
        F: Into<Hertz>,
        PINS: Pins<SPI>,
    {
        let psc = prescaler(SPI::clock(&clocks), freq.into());
        Self::configure(&spi, bus, ctl0_bits(mode, Role::Master, psc));
        Spi { spi, pins }
    }

    /// Configures the SPI peripheral as a slave selected in software.
    pub fn slave(spi: SPI, pins: PINS, mode: Mode, bus: &mut SPI::Bus) -> Self
    where
        PINS: SlavePins<SPI>,
    {
        Self::configure(&spi, bus, ctl0_bits(mode, Role::Slave, 0));
        Spi { spi, pins }
    }

    /// Starts listening for an interrupt event
    pub fn listen(&mut self, event: Event) {
        self.spi
            .ctl1
            .modify(|r, w| unsafe { w.bits((r.bits() as u32 | event.ctl1_bit()) as _) });
    }

    /// Stops listening for an interrupt event
    pub fn unlisten(&mut self, event: Event) {
        self.spi
            .ctl1
            .modify(|r, w| unsafe { w.bits((r.bits() as u32 & !event.ctl1_bit()) as _) });
    }

    fn stat(&self) -> u32 {
        self.spi.stat.read().bits() as u32
    }

    /// Whether a received frame waits in the data register
    pub fn is_rbne(&self) -> bool {
        self.stat() & RBNE != 0
    }

    /// Whether the data register can take another frame
    pub fn is_tbe(&self) -> bool {
        self.stat() & TBE != 0
    }

    /// Whether a frame is on the wire
    pub fn is_busy(&self) -> bool {
        self.stat() & TRANS != 0
    }

    /// Error flagged in the status register, if any
    pub fn error(&self) -> Option<Error> {
        Error::from_stat(self.stat())
    }

    /// Reads the data register without checking RBNE
    pub fn read_data(&mut self) -> u8 {
        self.spi.data.read().bits() as u8
    }

    /// Writes the data register without checking TBE
    pub fn write_data(&mut self, byte: u8) {
        self.spi.data.write(|w| unsafe { w.bits(u32::from(byte) as _) });
    }

    /// Disables the interface and returns the peripheral and the pins
    pub fn release(self) -> (SPI, PINS) {
        self.spi.ctl0.write(|w| unsafe { w.bits(0) });
        (self.spi, self.pins)
    }
}

macro_rules! constructors {
    ($($SPIX:ident: ($spix:ident, $spix_slave:ident),)+) => {
        $(
            impl<PINS> Spi<$SPIX, PINS> {
                /// Configures the interface as bus master
                pub fn $spix<F>(
                    spi: $SPIX,
                    pins: PINS,
                    mode: Mode,
                    freq: F,
                    clocks: Clocks,
                    bus: &mut <$SPIX as crate::rcu::RcuBus>::Bus,
                ) -> Self
                where
                    F: Into<Hertz>,
                    PINS: Pins<$SPIX>,
                {
                    Self::master(spi, pins, mode, freq, clocks, bus)
                }

                /// Configures the interface as slave
                pub fn $spix_slave(
                    spi: $SPIX,
                    pins: PINS,
                    mode: Mode,
                    bus: &mut <$SPIX as crate::rcu::RcuBus>::Bus,
                ) -> Self
                where
                    PINS: SlavePins<$SPIX>,
                {
                    Self::slave(spi, pins, mode, bus)
                }
            }
        )+
    };
}

constructors! {
    SPI0: (spi0, spi0_slave),
    SPI1: (spi1, spi1_slave),
    SPI2: (spi2, spi2_slave),
}

impl<SPI: Instance, PINS> FullDuplex<u8> for Spi<SPI, PINS> {
    type Error = Error;

    fn read(&mut self) -> nb::Result<u8, Error> {
        let stat = self.stat();
        if let Some(err) = Error::from_stat(stat) {
            // reading data then stat clears the overrun flag
            let _ = self.read_data();
            let _ = self.stat();
            Err(nb::Error::Other(err))
        } else if stat & RBNE != 0 {
            Ok(self.read_data())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }

    fn send(&mut self, byte: u8) -> nb::Result<(), Error> {
        let stat = self.stat();
        if let Some(err) = Error::from_stat(stat) {
            Err(nb::Error::Other(err))
        } else if stat & TBE != 0 {
            self.write_data(byte);
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }
}

impl<SPI: Instance, PINS> embedded_hal::blocking::spi::transfer::Default<u8> for Spi<SPI, PINS> {}

impl<SPI: Instance, PINS> embedded_hal::blocking::spi::write::Default<u8> for Spi<SPI, PINS> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prescaler_selection() {
        // 108 MHz APB2: /2 = 54 MHz
        assert_eq!(prescaler(Hertz(108_000_000), Hertz(60_000_000)), 0);
        // /16 = 6.75 MHz is the first at or below 7 MHz
        assert_eq!(prescaler(Hertz(108_000_000), Hertz(7_000_000)), 3);
        assert_eq!(prescaler(Hertz(54_000_000), Hertz(27_000_000)), 0);
        // slower than /256 is clamped to /256
        assert_eq!(prescaler(Hertz(108_000_000), Hertz(1_000)), 7);
    }

    #[test]
    fn control_bits() {
        assert_eq!(
            ctl0_bits(MODE_0, Role::Master, 3),
            SPIEN | SWNSSEN | SWNSS | MSTMOD | (3 << PSC_SHIFT)
        );
        assert_eq!(ctl0_bits(MODE_3, Role::Slave, 0), SPIEN | SWNSSEN | CKPH | CKPL);
    }

    #[test]
    fn error_classification() {
        assert_eq!(Error::from_stat(RBNE | TBE), None);
        assert_eq!(Error::from_stat(RXORERR | RBNE), Some(Error::Overrun));
        assert_eq!(Error::from_stat(CONFERR), Some(Error::ModeFault));
        assert_eq!(Error::from_stat(CRCERR), Some(Error::Crc));
    }
}
