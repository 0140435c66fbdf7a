// Copyright 2023 The gd32vf103-hal authors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Alternate function I/O
//!
//! Pin remapping for the peripherals whose signals can be moved to other pins, and release of
//! the JTAG pins.

use crate::pac::AFIO;
use crate::rcu::{Enable, Reset, APB2};

// PCF0
const SPI0_REMAP: u32 = 1 << 0;
const I2C0_REMAP: u32 = 1 << 1;
const USART0_REMAP: u32 = 1 << 2;
const CAN0_REMAP_SHIFT: u32 = 13;
const CAN1_REMAP: u32 = 1 << 22;
const SWJ_CFG_SHIFT: u32 = 24;

/// Extension trait that enables the AFIO clock
pub trait AfioExt {
    fn constrain(self, apb2: &mut APB2) -> Afio;
}

impl AfioExt for AFIO {
    fn constrain(self, apb2: &mut APB2) -> Afio {
        AFIO::enable(apb2);
        AFIO::reset(apb2);
        Afio { afio: self }
    }
}

/// Debug port configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebugPorts {
    /// Full JTAG (reset state)
    FullJtag = 0b000,
    /// JTAG without NJTRST, frees PB4
    NoNjtrst = 0b001,
    /// JTAG disabled, frees PA13, PA14, PA15, PB3 and PB4
    Disabled = 0b100,
}

/// Constrained AFIO peripheral
pub struct Afio {
    afio: AFIO,
}

impl Afio {
    fn modify_pcf0(&mut self, clear: u32, set: u32) {
        // SWJ_CFG reads back as zero, so keep it out of the read-modify-write.
        self.afio.pcf0.modify(|r, w| unsafe {
            w.bits((r.bits() & !(clear | (0b111 << SWJ_CFG_SHIFT))) | set)
        });
    }

    /// Configures which debug port pins stay with the debugger.
    pub fn set_debug_ports(&mut self, ports: DebugPorts) {
        self.modify_pcf0(0, (ports as u32) << SWJ_CFG_SHIFT);
    }

    /// Releases all JTAG pins.
    pub fn disable_jtag(&mut self) {
        self.set_debug_ports(DebugPorts::Disabled);
    }

    /// Moves SPI0 from PA4..PA7 to PA15, PB3, PB4, PB5.
    pub fn remap_spi0(&mut self, remap: bool) {
        self.modify_pcf0(SPI0_REMAP, if remap { SPI0_REMAP } else { 0 });
    }

    /// Moves I2C0 from PB6/PB7 to PB8/PB9.
    pub fn remap_i2c0(&mut self, remap: bool) {
        self.modify_pcf0(I2C0_REMAP, if remap { I2C0_REMAP } else { 0 });
    }

    /// Moves USART0 from PA9/PA10 to PB6/PB7.
    pub fn remap_usart0(&mut self, remap: bool) {
        self.modify_pcf0(USART0_REMAP, if remap { USART0_REMAP } else { 0 });
    }

    /// Selects the CAN0 pins: 0b00 PA11/PA12, 0b10 PB8/PB9, 0b11 PD0/PD1.
    pub(crate) fn remap_can0(&mut self, bits: u32) {
        self.modify_pcf0(0b11 << CAN0_REMAP_SHIFT, bits << CAN0_REMAP_SHIFT);
    }

    /// Selects the CAN1 pins: PB12/PB13 or PB5/PB6.
    pub(crate) fn remap_can1(&mut self, remap: bool) {
        self.modify_pcf0(CAN1_REMAP, if remap { CAN1_REMAP } else { 0 });
    }

    /// Returns the raw peripheral
    pub fn release(self) -> AFIO {
        self.afio
    }
}
