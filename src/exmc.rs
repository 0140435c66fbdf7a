// Copyright 2023 The gd32vf103-hal authors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # External Memory Controller
//!
//! Asynchronous SRAM on NOR/SRAM region 0, mapped at `0x6000_0000`. The GD32VF103 only has the
//! multiplexed bus: AD0..AD15 (PD14, PD15, PD0, PD1, PE7-15, PD8-10) carry the low address and
//! the data, latched by NADV (PB7). A16..A18 (PD11-13), NOE (PD4), NWE (PD5) and NE0 (PD7) have to
//! be switched to alternate push-pull as well before the memory is accessed.
//!
//! ```ignore
//! let mut exmc = Exmc::new(p.EXMC, &mut rcu.ahb);
//! let timing = Timing { address_setup: 2, address_hold: 1, data_setup: 5, bus_turnaround: 0 };
//! let mut sram = exmc.configure_sram(Region::Region0, Width::Bits16, timing)?;
//! sram.fill(0, 256, |i| i as u16);
//! ```

use core::ptr;

use crate::pac::EXMC;
use crate::rcu::{Enable, AHB};

// SNCTL
const NRBKEN: u32 = 1 << 0;
const NRMUX: u32 = 1 << 1;
const NRW_SHIFT: u32 = 4;
const WREN: u32 = 1 << 12;

// SNTCFG
const AHLD_SHIFT: u32 = 4;
const DSET_SHIFT: u32 = 8;
const BUSLAT_SHIFT: u32 = 16;

/// Base address of region 0
pub const REGION0_BASE: usize = 0x6000_0000;
/// Size of region 0
pub const REGION0_SIZE: usize = 0x0400_0000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    AddressSetup,
    AddressHold,
    DataSetup,
    BusTurnaround,
    /// Access outside the memory region
    Range,
}

/// NOR/SRAM region; the GD32VF103 only wires region 0 to NE0
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Region {
    Region0,
}

/// Data bus width
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Width {
    Bits8 = 0b00,
    Bits16 = 0b01,
}

/// Asynchronous access timing, in HCLK cycles
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timing {
    /// 0..=15
    pub address_setup: u8,
    /// 1..=15
    pub address_hold: u8,
    /// 1..=255
    pub data_setup: u8,
    /// 0..=15
    pub bus_turnaround: u8,
}

impl Timing {
    /// Checks every field against its register width and returns the SNTCFG value.
    pub fn bits(&self) -> Result<u32, Error> {
        if self.address_setup > 15 {
            return Err(Error::AddressSetup);
        }
        if !(1..=15).contains(&self.address_hold) {
            return Err(Error::AddressHold);
        }
        if self.data_setup == 0 {
            return Err(Error::DataSetup);
        }
        if self.bus_turnaround > 15 {
            return Err(Error::BusTurnaround);
        }
        Ok(u32::from(self.address_setup)
            | (u32::from(self.address_hold) << AHLD_SHIFT)
            | (u32::from(self.data_setup) << DSET_SHIFT)
            | (u32::from(self.bus_turnaround) << BUSLAT_SHIFT))
    }
}

fn snctl_bits(width: Width) -> u32 {
    NRBKEN | NRMUX | ((width as u32) << NRW_SHIFT) | WREN
}

/// External memory controller
pub struct Exmc {
    exmc: EXMC,
}

impl Exmc {
    pub fn new(exmc: EXMC, ahb: &mut AHB) -> Self {
        EXMC::enable(ahb);
        Exmc { exmc }
    }

    /// Configures a region for asynchronous SRAM with writes enabled.
    pub fn configure_sram(
        &mut self,
        region: Region,
        width: Width,
        timing: Timing,
    ) -> Result<Sram, Error> {
        let timing = timing.bits()?;
        let Region::Region0 = region;
        // the region must be disabled while its timing changes
        self.exmc.snctl0.write(|w| unsafe { w.bits(0) });
        self.exmc.sntcfg0.write(|w| unsafe { w.bits(timing) });
        self.exmc
            .snctl0
            .write(|w| unsafe { w.bits(snctl_bits(width)) });
        Ok(Sram {
            base: REGION0_BASE,
            size: REGION0_SIZE,
        })
    }

    pub fn free(self, ahb: &mut AHB) -> EXMC {
        self.exmc.snctl0.reset();
        EXMC::disable(ahb);
        self.exmc
    }
}

/// SRAM accessed as 16-bit words
pub struct Sram {
    base: usize,
    size: usize,
}

impl Sram {
    fn address(&self, word: usize) -> Result<*mut u16, Error> {
        let offset = word.checked_mul(2).ok_or(Error::Range)?;
        if offset >= self.size {
            return Err(Error::Range);
        }
        Ok((self.base + offset) as *mut u16)
    }

    /// Reads the word at index `word`
    pub fn read(&self, word: usize) -> Result<u16, Error> {
        let address = self.address(word)?;
        // NOTE(unsafe) inside the configured region
        Ok(unsafe { ptr::read_volatile(address) })
    }

    pub fn write(&mut self, word: usize, value: u16) -> Result<(), Error> {
        let address = self.address(word)?;
        // NOTE(unsafe) inside the configured region
        unsafe { ptr::write_volatile(address, value) };
        Ok(())
    }

    /// Writes `f(i)` to `count` words starting at `start`
    pub fn fill<F>(&mut self, start: usize, count: usize, f: F) -> Result<(), Error>
    where
        F: Fn(usize) -> u16,
    {
        for i in 0..count {
            self.write(start + i, f(i))?;
        }
        Ok(())
    }

    /// Index of the first of `count` words that does not read back as `f(i)`
    pub fn verify<F>(&self, start: usize, count: usize, f: F) -> Result<Option<usize>, Error>
    where
        F: Fn(usize) -> u16,
    {
        for i in 0..count {
            if self.read(start + i)? != f(i) {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing() -> Timing {
        Timing {
            address_setup: 2,
            address_hold: 1,
            data_setup: 5,
            bus_turnaround: 0,
        }
    }

    #[test]
    fn timing_register() {
        assert_eq!(timing().bits(), Ok(0x0000_0512));
        let slow = Timing {
            address_setup: 15,
            address_hold: 15,
            data_setup: 255,
            bus_turnaround: 15,
        };
        assert_eq!(slow.bits(), Ok(0x000f_ffff));
    }

    #[test]
    fn timing_limits() {
        let t = Timing { address_setup: 16, ..timing() };
        assert_eq!(t.bits(), Err(Error::AddressSetup));
        let t = Timing { address_hold: 0, ..timing() };
        assert_eq!(t.bits(), Err(Error::AddressHold));
        let t = Timing { data_setup: 0, ..timing() };
        assert_eq!(t.bits(), Err(Error::DataSetup));
        let t = Timing { bus_turnaround: 16, ..timing() };
        assert_eq!(t.bits(), Err(Error::BusTurnaround));
    }

    #[test]
    fn control_register() {
        assert_eq!(snctl_bits(Width::Bits16), 0x1013);
        assert_eq!(snctl_bits(Width::Bits8), 0x1003);
    }

    #[test]
    fn out_of_range_access() {
        let sram = Sram { base: REGION0_BASE, size: 8 };
        assert!(sram.address(3).is_ok());
        assert_eq!(sram.address(4), Err(Error::Range));
        assert_eq!(sram.address(usize::MAX), Err(Error::Range));
    }
}
