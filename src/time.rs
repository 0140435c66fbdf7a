// Copyright 2023 The gd32vf103-hal authors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Time units
//!
//! See [`Hertz`], [`Bps`], [`MilliSeconds`] and [`MicroSeconds`] for the available units.
//! The [`U32Ext`] trait adds constructors to `u32`:
//!
//! ```ignore
//! use gd32vf103_hal::prelude::*;
//!
//! let freq = 8.mhz();
//! let baud = 115_200.bps();
//! let period = 500.ms();
//! ```

use core::ops;

/// Bits per second
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Bps(pub u32);

/// Hertz
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Hertz(pub u32);

/// KiloHertz
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct KiloHertz(pub u32);

/// MegaHertz
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MegaHertz(pub u32);

/// Time unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MilliSeconds(pub u32);

/// Time unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MicroSeconds(pub u32);

/// Extension trait that adds convenience methods to the `u32` type
pub trait U32Ext {
    /// Wrap in `Bps`
    fn bps(self) -> Bps;

    /// Wrap in `Hertz`
    fn hz(self) -> Hertz;

    /// Wrap in `KiloHertz`
    fn khz(self) -> KiloHertz;

    /// Wrap in `MegaHertz`
    fn mhz(self) -> MegaHertz;

    /// Wrap in `MilliSeconds`
    fn ms(self) -> MilliSeconds;

    /// Wrap in `MicroSeconds`
    fn us(self) -> MicroSeconds;
}

impl U32Ext for u32 {
    fn bps(self) -> Bps {
        Bps(self)
    }

    fn hz(self) -> Hertz {
        Hertz(self)
    }

    fn khz(self) -> KiloHertz {
        KiloHertz(self)
    }

    fn mhz(self) -> MegaHertz {
        MegaHertz(self)
    }

    fn ms(self) -> MilliSeconds {
        MilliSeconds(self)
    }

    fn us(self) -> MicroSeconds {
        MicroSeconds(self)
    }
}

impl From<KiloHertz> for Hertz {
    fn from(val: KiloHertz) -> Self {
        Self(val.0 * 1_000)
    }
}

impl From<MegaHertz> for Hertz {
    fn from(val: MegaHertz) -> Self {
        Self(val.0 * 1_000_000)
    }
}

impl From<MegaHertz> for KiloHertz {
    fn from(val: MegaHertz) -> Self {
        Self(val.0 * 1_000)
    }
}

impl From<MilliSeconds> for MicroSeconds {
    fn from(val: MilliSeconds) -> Self {
        Self(val.0 * 1_000)
    }
}

impl Hertz {
    /// Period of one cycle of this frequency, in microseconds.
    pub fn period_us(self) -> u32 {
        1_000_000 / self.0
    }
}

impl MilliSeconds {
    /// Frequency whose period is this duration.
    pub fn to_hertz(self) -> Hertz {
        Hertz(1_000 / self.0)
    }
}

impl ops::Mul<u32> for Hertz {
    type Output = Hertz;

    fn mul(self, rhs: u32) -> Hertz {
        Hertz(self.0 * rhs)
    }
}

impl ops::Div<u32> for Hertz {
    type Output = Hertz;

    fn div(self, rhs: u32) -> Hertz {
        Hertz(self.0 / rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_conversions() {
        assert_eq!(Hertz::from(8.mhz()), Hertz(8_000_000));
        assert_eq!(Hertz::from(40.khz()), Hertz(40_000));
        assert_eq!(MicroSeconds::from(3.ms()), MicroSeconds(3_000));
        assert_eq!(Hertz(1_000).period_us(), 1_000);
        assert_eq!(250.ms().to_hertz(), Hertz(4));
        assert_eq!(Hertz(54_000_000) / 2, Hertz(27_000_000));
    }
}
