// Copyright 2023 The gd32vf103-hal authors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Digital to Analog Converter
//!
//! Two 12-bit channels, DAC0 on PA4 and DAC1 on PA5. Values are written right aligned.
//!
//! ```ignore
//! let mut dac = Dac::new(p.DAC, &mut rcu.apb1);
//! let mut out = dac.ch0(gpioa.pa4.into_analog(&mut gpioa.crl));
//! out.set_trigger(Trigger::Software);
//! out.enable();
//! out.set_value(2048)?;
//! out.trigger_software();
//! ```

use core::marker::PhantomData;

use crate::gpio::gpioa::{PA4, PA5};
use crate::gpio::Analog;
use crate::pac::{dac, DAC};
use crate::rcu::{Enable, Reset, APB1};

// CTL, channel 0 half; channel 1 is 16 bits up
const DEN: u32 = 1 << 0;
const DBOFF: u32 = 1 << 1;
const DTEN: u32 = 1 << 2;
const DTSEL_SHIFT: u32 = 3;
const DWM_SHIFT: u32 = 6;
const DWBW_SHIFT: u32 = 8;
const CHANNEL_MASK: u32 = 0xffff;

/// Largest output value
pub const MAX_VALUE: u16 = 0xfff;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Value does not fit in 12 bits
    Value,
}

/// Conversion trigger
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    Timer5 = 0b000,
    Timer2 = 0b001,
    Timer6 = 0b010,
    Timer4 = 0b011,
    Timer1 = 0b100,
    Timer3 = 0b101,
    Exti9 = 0b110,
    Software = 0b111,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Wave {
    Disabled = 0b00,
    Noise = 0b01,
    Triangle = 0b10,
}

fn check(value: u16) -> Result<u32, Error> {
    if value > MAX_VALUE {
        Err(Error::Value)
    } else {
        Ok(u32::from(value))
    }
}

/// Packs both channel values for the concurrent holding register.
fn dual_value(ch0: u16, ch1: u16) -> Result<u32, Error> {
    Ok(check(ch0)? | (check(ch1)? << 16))
}

/// Wave bits of a channel: mode and the 4-bit width/amplitude selector.
fn wave_bits(wave: Wave, width: u8) -> u32 {
    ((wave as u32) << DWM_SHIFT) | (u32::from(width.min(11)) << DWBW_SHIFT)
}

/// Digital to analog converter
pub struct Dac {
    _dac: DAC,
}

fn regs() -> &'static dac::RegisterBlock {
    // NOTE(unsafe) channels only exist while `Dac` owns the peripheral; CTL updates of the two
    // channels are read-modify-write on separate halves
    unsafe { &*DAC::ptr() }
}

impl Dac {
    pub fn new(dac: DAC, apb1: &mut APB1) -> Self {
        DAC::enable(apb1);
        DAC::reset(apb1);
        Dac { _dac: dac }
    }

    /// Channel 0, output on PA4
    pub fn ch0(&mut self, _pin: PA4<Analog>) -> DacChannel<0> {
        DacChannel { _dac: PhantomData }
    }

    /// Channel 1, output on PA5
    pub fn ch1(&mut self, _pin: PA5<Analog>) -> DacChannel<1> {
        DacChannel { _dac: PhantomData }
    }

    /// Writes both channels at once; they convert on their own triggers.
    pub fn set_dual(&mut self, ch0: u16, ch1: u16) -> Result<(), Error> {
        let value = dual_value(ch0, ch1)?;
        regs().dacc_r12dh.write(|w| unsafe { w.bits(value) });
        Ok(())
    }

    /// Software trigger of both channels at the same time
    pub fn trigger_both(&mut self) {
        regs().swt.write(|w| unsafe { w.bits(0b11) });
    }

    /// Disables the DAC clock and returns the peripheral
    pub fn release(self, apb1: &mut APB1) -> DAC {
        regs().ctl.reset();
        DAC::disable(apb1);
        self._dac
    }
}

/// One DAC output channel
pub struct DacChannel<const C: u8> {
    _dac: PhantomData<*const ()>,
}

impl<const C: u8> DacChannel<C> {
    const SHIFT: u32 = 16 * C as u32;

    fn modify_ctl(&mut self, clear: u32, set: u32) {
        let clear = (clear & CHANNEL_MASK) << Self::SHIFT;
        let set = (set & CHANNEL_MASK) << Self::SHIFT;
        regs()
            .ctl
            .modify(|r, w| unsafe { w.bits((r.bits() & !clear) | set) });
    }

    pub fn enable(&mut self) {
        self.modify_ctl(0, DEN);
    }

    pub fn disable(&mut self) {
        self.modify_ctl(DEN, 0);
    }

    /// Disables the output buffer, for high impedance loads
    pub fn set_output_buffer(&mut self, enabled: bool) {
        if enabled {
            self.modify_ctl(DBOFF, 0);
        } else {
            self.modify_ctl(0, DBOFF);
        }
    }

    /// Selects the trigger that moves the holding register to the output
    pub fn set_trigger(&mut self, trigger: Trigger) {
        self.modify_ctl(0b111 << DTSEL_SHIFT, DTEN | ((trigger as u32) << DTSEL_SHIFT));
    }

    /// Output follows the holding register without trigger
    pub fn disable_trigger(&mut self) {
        self.modify_ctl(DTEN, 0);
    }

    /// Loads a 12-bit right aligned value
    pub fn set_value(&mut self, value: u16) -> Result<(), Error> {
        let value = check(value)?;
        if C == 0 {
            regs().dac0_r12dh.write(|w| unsafe { w.bits(value) });
        } else {
            regs().dac1_r12dh.write(|w| unsafe { w.bits(value) });
        }
        Ok(())
    }

    pub fn trigger_software(&mut self) {
        regs().swt.write(|w| unsafe { w.bits(1 << C) });
    }

    /// Adds LFSR noise unmasking `bits + 1` low bits to every conversion
    pub fn set_noise_wave(&mut self, bits: u8) {
        self.modify_ctl(0xff << DWM_SHIFT, wave_bits(Wave::Noise, bits));
    }

    /// Adds a triangle of amplitude `2^(amplitude + 1) - 1` to every conversion
    pub fn set_triangle_wave(&mut self, amplitude: u8) {
        self.modify_ctl(0xff << DWM_SHIFT, wave_bits(Wave::Triangle, amplitude));
    }

    pub fn disable_wave(&mut self) {
        self.modify_ctl(0xff << DWM_SHIFT, wave_bits(Wave::Disabled, 0));
    }

    /// Value currently driven on the pin
    pub fn output(&self) -> u16 {
        let value = if C == 0 {
            regs().dac0_do.read().bits()
        } else {
            regs().dac1_do.read().bits()
        };
        (value & u32::from(MAX_VALUE)) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_twelve_bits() {
        assert_eq!(check(0), Ok(0));
        assert_eq!(check(4095), Ok(4095));
        assert_eq!(check(4096), Err(Error::Value));
    }

    #[test]
    fn dual_register_layout() {
        assert_eq!(dual_value(0x123, 0xabc), Ok(0x0abc_0123));
        assert_eq!(dual_value(0, 5000), Err(Error::Value));
    }

    #[test]
    fn wave_fields() {
        assert_eq!(wave_bits(Wave::Triangle, 11), (0b10 << 6) | (11 << 8));
        // width selector saturates at 12 bits
        assert_eq!(wave_bits(Wave::Noise, 15), (0b01 << 6) | (11 << 8));
        assert_eq!(DacChannel::<1>::SHIFT, 16);
    }
}
