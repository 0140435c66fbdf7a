// Copyright 2023 The gd32vf103-hal authors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delays and deadlines based on the `mcycle` counter of the core

use crate::handoff::Deadline;
use crate::rcu::Clocks;
use crate::time::MicroSeconds;
use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use riscv::register::{mcycle, mcycleh};

/// Reads the 64-bit cycle counter, handling a carry between the two halves.
fn cycles() -> u64 {
    loop {
        let high = mcycleh::read();
        let low = mcycle::read();
        if mcycleh::read() == high {
            return (u64::from(high as u32) << 32) | u64::from(low as u32);
        }
    }
}

fn cycles_for(core_frequency: u32, us: u32) -> u64 {
    u64::from(us) * u64::from(core_frequency) / 1_000_000
}

/// Busy-waiting delay driven by the core clock
pub struct McycleDelay {
    core_frequency: u32,
}

impl McycleDelay {
    /// Configures the delay for the frozen system clock
    pub fn new(clocks: &Clocks) -> Self {
        Self {
            core_frequency: clocks.sysclk().0,
        }
    }

    /// Deadline that expires `us` microseconds from now
    pub fn deadline(&self, us: MicroSeconds) -> McycleDeadline {
        McycleDeadline::new(self.core_frequency, us)
    }
}

impl DelayUs<u32> for McycleDelay {
    fn delay_us(&mut self, us: u32) {
        let end = cycles() + cycles_for(self.core_frequency, us);
        while cycles() < end {}
    }
}

impl DelayUs<u16> for McycleDelay {
    fn delay_us(&mut self, us: u16) {
        self.delay_us(u32::from(us));
    }
}

impl DelayUs<u8> for McycleDelay {
    fn delay_us(&mut self, us: u8) {
        self.delay_us(u32::from(us));
    }
}

impl DelayMs<u32> for McycleDelay {
    fn delay_ms(&mut self, ms: u32) {
        for _ in 0..ms {
            self.delay_us(1_000_u32);
        }
    }
}

impl DelayMs<u16> for McycleDelay {
    fn delay_ms(&mut self, ms: u16) {
        self.delay_ms(u32::from(ms));
    }
}

impl DelayMs<u8> for McycleDelay {
    fn delay_ms(&mut self, ms: u8) {
        self.delay_ms(u32::from(ms));
    }
}

/// [`Deadline`] measured on the cycle counter
pub struct McycleDeadline {
    end: u64,
}

impl McycleDeadline {
    pub fn new(core_frequency: u32, timeout: MicroSeconds) -> Self {
        Self {
            end: cycles() + cycles_for(core_frequency, timeout.0),
        }
    }
}

impl Deadline for McycleDeadline {
    fn expired(&mut self) -> bool {
        cycles() >= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::cycles_for;

    #[test]
    fn cycle_counts() {
        assert_eq!(cycles_for(108_000_000, 1), 108);
        assert_eq!(cycles_for(8_000_000, 1_000), 8_000);
        // no overflow for long delays at full speed
        let long = cycles_for(108_000_000, u32::MAX);
        assert_eq!(long, 463_856_467_860);
        assert!(long > u64::from(u32::MAX));
    }
}
