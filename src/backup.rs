// Copyright 2023 The gd32vf103-hal authors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Backup domain
//!
//! 42 half-word data registers that keep their value through a system reset as long as VBAT is
//! supplied, and the tamper pin (PC13) that erases them.

use crate::pac::{bkp, BKP, PMU};
use crate::rcu::{Enable, APB1};

/// Number of data registers
pub const DATA_REGISTERS: usize = 42;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// No data register with this index
    Index,
}

/// Tamper pin level that triggers a tamper event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TamperLevel {
    High,
    Low,
}

// DATA0..DATA9 and DATA10..DATA41 sit in two separate banks of the block
macro_rules! data_registers {
    ($($index:literal: $data:ident,)+) => {
        fn read_data(bkp: &bkp::RegisterBlock, index: usize) -> Option<u16> {
            match index {
                $($index => Some(bkp.$data.read().bits()),)+
                _ => None,
            }
        }

        fn write_data(bkp: &bkp::RegisterBlock, index: usize, value: u16) -> Result<(), Error> {
            match index {
                $($index => bkp.$data.write(|w| unsafe { w.bits(value) }),)+
                _ => return Err(Error::Index),
            }
            Ok(())
        }
    };
}

data_registers! {
    0: data0, 1: data1, 2: data2, 3: data3, 4: data4, 5: data5, 6: data6, 7: data7,
    8: data8, 9: data9, 10: data10, 11: data11, 12: data12, 13: data13, 14: data14,
    15: data15, 16: data16, 17: data17, 18: data18, 19: data19, 20: data20, 21: data21,
    22: data22, 23: data23, 24: data24, 25: data25, 26: data26, 27: data27, 28: data28,
    29: data29, 30: data30, 31: data31, 32: data32, 33: data33, 34: data34, 35: data35,
    36: data36, 37: data37, 38: data38, 39: data39, 40: data40, 41: data41,
}

/// Test value for data register `index`
pub fn pattern(seed: u16, index: usize) -> u16 {
    seed.wrapping_add((index as u16).wrapping_mul(0x0101))
}

/// Backup registers with write access enabled
pub struct BackupDomain {
    bkp: BKP,
}

impl BackupDomain {
    /// Enables the PMU and backup clocks and unlocks writes to the backup domain.
    pub fn new(bkp: BKP, apb1: &mut APB1, pmu: &mut PMU) -> Self {
        PMU::enable(apb1);
        BKP::enable(apb1);
        pmu.ctl.modify(|_, w| w.bkpwen().set_bit());
        BackupDomain { bkp }
    }

    /// Reads data register `index` (0..=41)
    pub fn read(&self, index: usize) -> Option<u16> {
        read_data(&self.bkp, index)
    }

    /// Writes data register `index` (0..=41)
    pub fn write(&mut self, index: usize, value: u16) -> Result<(), Error> {
        write_data(&self.bkp, index, value)
    }

    /// Writes [`pattern`] to every data register
    pub fn fill_pattern(&mut self, seed: u16) {
        for index in 0..DATA_REGISTERS {
            // every index below DATA_REGISTERS is valid
            let _ = self.write(index, pattern(seed, index));
        }
    }

    /// Whether every data register still holds [`pattern`]
    pub fn is_written_pattern(&self, seed: u16) -> bool {
        (0..DATA_REGISTERS).all(|index| self.read(index) == Some(pattern(seed, index)))
    }

    /// Whether every data register reads zero, as after a tamper event
    pub fn is_cleared(&self) -> bool {
        (0..DATA_REGISTERS).all(|index| self.read(index) == Some(0))
    }

    /// Arms the tamper pin
    pub fn enable_tamper(&mut self, level: TamperLevel) {
        // the level must be set while the pin is disabled
        self.bkp
            .tpctl
            .modify(|_, w| w.tpen().clear_bit().tpal().bit(level == TamperLevel::Low));
        self.bkp.tpctl.modify(|_, w| w.tpen().set_bit());
    }

    pub fn disable_tamper(&mut self) {
        self.bkp.tpctl.modify(|_, w| w.tpen().clear_bit());
    }

    /// Enables the tamper interrupt
    pub fn listen_tamper(&mut self) {
        self.bkp.tpcs.modify(|_, w| w.tpie().set_bit());
    }

    pub fn unlisten_tamper(&mut self) {
        self.bkp.tpcs.modify(|_, w| w.tpie().clear_bit());
    }

    /// Whether a tamper event occurred; the data registers have been erased
    pub fn tamper_event(&self) -> bool {
        self.bkp.tpcs.read().tef().bit_is_set()
    }

    /// Clears the tamper event and interrupt flags
    pub fn clear_tamper(&mut self) {
        self.bkp.tpcs.modify(|_, w| w.ter().set_bit().tir().set_bit());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_differ_per_register() {
        assert_eq!(pattern(0x1226, 0), 0x1226);
        assert_eq!(pattern(0x1226, 1), 0x1327);
        assert_eq!(pattern(0xffff, 1), 0x0100);
        let distinct = (1..DATA_REGISTERS).all(|i| pattern(0x5a5a, i) != pattern(0x5a5a, i - 1));
        assert!(distinct);
    }
}
