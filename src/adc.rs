// Copyright 2023 The gd32vf103-hal authors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Analog to Digital Converter
//!
//! Single conversions through the embedded-hal [`OneShot`] trait, continuous conversion of one
//! channel, and the analog watchdog.
//!
//! ```ignore
//! let mut adc = Adc::adc0(p.ADC0, &mut rcu.apb2, clocks);
//! let mut pin = gpioc.pc3.into_analog(&mut gpioc.crl);
//! let raw: u16 = adc.read(&mut pin).unwrap();
//! sprintln!("{} mV", adc::to_millivolts(raw, 3300));
//! ```
//!
//! | Channel | Pin  | Channel | Pin  |
//! |---------|------|---------|------|
//! | 0..=7   | PA0..=PA7 | 10..=15 | PC0..=PC5 |
//! | 8, 9    | PB0, PB1  | 16, 17  | temperature, Vrefint (ADC0 only) |

use embedded_hal::adc::{Channel, OneShot};

use crate::gpio::gpioa::{PA0, PA1, PA2, PA3, PA4, PA5, PA6, PA7};
use crate::gpio::gpiob::{PB0, PB1};
use crate::gpio::gpioc::{PC0, PC1, PC2, PC3, PC4, PC5};
use crate::gpio::Analog;
use crate::pac::{ADC0, ADC1};
use crate::rcu::{Clocks, Enable, Reset, APB2};

// CTL0
const WDCHSEL_MASK: u32 = 0x1f;
const EOCIE: u32 = 1 << 5;
const WDEIE: u32 = 1 << 6;
const WDSC: u32 = 1 << 9;
const RWDEN: u32 = 1 << 23;

// CTL1
const ADCON: u32 = 1 << 0;
const CTN: u32 = 1 << 1;
const CLB: u32 = 1 << 2;
const RSTCLB: u32 = 1 << 3;
const DAL: u32 = 1 << 11;
const ETSRC_SWRCST: u32 = 0b111 << 17;
const ETERC: u32 = 1 << 20;
const SWRCST: u32 = 1 << 22;
const TSVREN: u32 = 1 << 23;

// STAT
const WDE: u32 = 1 << 0;
const EOC: u32 = 1 << 1;

/// Largest conversion result
pub const MAX_VALUE: u16 = 0xfff;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Watchdog thresholds above 4095 or low above high
    Threshold,
}

/// Interrupt event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// Conversion result outside the watchdog window
    Watchdog,
    /// End of conversion
    Eoc,
}

impl Event {
    fn ctl0_bit(self) -> u32 {
        match self {
            Event::Watchdog => WDEIE,
            Event::Eoc => EOCIE,
        }
    }
}

/// ADC sampling time, in ADC clock cycles
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleTime {
    T_1_5 = 0b000,
    T_7_5 = 0b001,
    T_13_5 = 0b010,
    T_28_5 = 0b011,
    T_41_5 = 0b100,
    T_55_5 = 0b101,
    T_71_5 = 0b110,
    T_239_5 = 0b111,
}

impl Default for SampleTime {
    /// Long enough for the temperature sensor
    fn default() -> Self {
        SampleTime::T_239_5
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Align {
    /// 12 bit result in bits 0..=11
    Right,
    /// 12 bit result in bits 4..=15
    Left,
}

impl Default for Align {
    fn default() -> Self {
        Align::Right
    }
}

/// Which sample time register holds `channel`, and the shift of its field.
fn sample_time_field(channel: u8) -> (bool, u32) {
    if channel < 10 {
        (false, u32::from(channel) * 3)
    } else {
        (true, u32::from(channel - 10) * 3)
    }
}

fn check_thresholds(low: u16, high: u16) -> Result<(), Error> {
    if low > MAX_VALUE || high > MAX_VALUE || low > high {
        Err(Error::Threshold)
    } else {
        Ok(())
    }
}

/// Converts a right aligned result to millivolts.
pub fn to_millivolts(raw: u16, vref_mv: u32) -> u32 {
    u32::from(raw.min(MAX_VALUE)) * vref_mv / u32::from(MAX_VALUE)
}

/// Temperature sensor reading, in tenths of a degree Celsius, for a 3.3 V reference.
///
/// The sensor gives 1.45 V at 25 °C and falls by 4.1 mV/°C.
pub fn temperature_decicelsius(raw: u16) -> i32 {
    let uv = i64::from(raw.min(MAX_VALUE)) * 3_300_000 / i64::from(MAX_VALUE);
    (250 + (1_450_000 - uv) * 100 / 41_000) as i32
}

/// Supply voltage in millivolts derived from a reading of the 1.2 V internal reference.
pub fn vdda_millivolts(vrefint_raw: u16) -> Option<u32> {
    if vrefint_raw == 0 {
        None
    } else {
        Some(1_200 * u32::from(MAX_VALUE) / u32::from(vrefint_raw))
    }
}

/// Internal temperature sensor (ADC0 channel 16)
pub struct Temperature {
    _0: (),
}

/// Internal voltage reference (ADC0 channel 17)
pub struct Vrefint {
    _0: (),
}

/// Analog to Digital Converter
pub struct Adc<ADC> {
    rb: ADC,
    sample_time: SampleTime,
    align: Align,
    clocks: Clocks,
}

macro_rules! adc_pins {
    ($ADC:ident, $($pin:ty => $chan:expr),+ $(,)?) => {
        $(
            impl Channel<$ADC> for $pin {
                type ID = u8;

                fn channel() -> u8 { $chan }
            }
        )+
    };
}

adc_pins!(ADC0,
    PA0<Analog> => 0,
    PA1<Analog> => 1,
    PA2<Analog> => 2,
    PA3<Analog> => 3,
    PA4<Analog> => 4,
    PA5<Analog> => 5,
    PA6<Analog> => 6,
    PA7<Analog> => 7,
    PB0<Analog> => 8,
    PB1<Analog> => 9,
    PC0<Analog> => 10,
    PC1<Analog> => 11,
    PC2<Analog> => 12,
    PC3<Analog> => 13,
    PC4<Analog> => 14,
    PC5<Analog> => 15,
    Temperature => 16,
    Vrefint => 17,
);

adc_pins!(ADC1,
    PA0<Analog> => 0,
    PA1<Analog> => 1,
    PA2<Analog> => 2,
    PA3<Analog> => 3,
    PA4<Analog> => 4,
    PA5<Analog> => 5,
    PA6<Analog> => 6,
    PA7<Analog> => 7,
    PB0<Analog> => 8,
    PB1<Analog> => 9,
    PC0<Analog> => 10,
    PC1<Analog> => 11,
    PC2<Analog> => 12,
    PC3<Analog> => 13,
    PC4<Analog> => 14,
    PC5<Analog> => 15,
);

macro_rules! adc_hal {
    ($($ADC:ident: ($adc:ident),)+) => {
        $(
            impl Adc<$ADC> {
                /// Powers up, resets and calibrates the ADC.
                ///
                /// Sets all configurable parameters to one-shot defaults and performs a
                /// boot-time calibration.
                pub fn $adc(adc: $ADC, apb2: &mut APB2, clocks: Clocks) -> Self {
                    let mut s = Self {
                        rb: adc,
                        sample_time: SampleTime::default(),
                        align: Align::default(),
                        clocks,
                    };
                    $ADC::enable(apb2);
                    $ADC::reset(apb2);
                    s.power_down();
                    s.setup_oneshot();
                    s.power_up();
                    s.calibrate();
                    s
                }

                /// Set ADC sampling time
                ///
                /// Applies to every channel converted afterwards.
                pub fn set_sample_time(&mut self, t_samp: SampleTime) {
                    self.sample_time = t_samp;
                }

                /// Set the ADC result alignment
                pub fn set_align(&mut self, align: Align) {
                    self.align = align;
                    self.modify_ctl1(DAL, align == Align::Left);
                }

                /// Returns the largest possible sample value for the current alignment
                pub fn max_sample(&self) -> u16 {
                    match self.align {
                        Align::Left => u16::max_value(),
                        Align::Right => MAX_VALUE,
                    }
                }

                /// Keeps converting the regular channel
                pub fn set_continuous_mode(&mut self, continuous: bool) {
                    self.modify_ctl1(CTN, continuous);
                }

                fn modify_ctl1(&mut self, bits: u32, set: bool) {
                    self.rb.ctl1.modify(|r, w| unsafe {
                        let old = r.bits() as u32;
                        w.bits(if set { old | bits } else { old & !bits } as _)
                    });
                }

                fn modify_ctl0(&mut self, bits: u32, set: bool) {
                    self.rb.ctl0.modify(|r, w| unsafe {
                        let old = r.bits() as u32;
                        w.bits(if set { old | bits } else { old & !bits } as _)
                    });
                }

                fn power_up(&mut self) {
                    self.modify_ctl1(ADCON, true);

                    // The reference manual says that a stabilization time is needed after power_up,
                    // this time can be found in the datasheets: 14 ADC clock cycles.
                    let cycles = 14 * self.clocks.sysclk().0 / self.clocks.adcclk().0;
                    for _ in 0..cycles {
                        unsafe { riscv::asm::nop() };
                    }
                }

                fn power_down(&mut self) {
                    self.modify_ctl1(ADCON, false);
                }

                fn calibrate(&mut self) {
                    self.modify_ctl1(RSTCLB, true);
                    while self.rb.ctl1.read().bits() as u32 & RSTCLB != 0 {}

                    self.modify_ctl1(CLB, true);
                    while self.rb.ctl1.read().bits() as u32 & CLB != 0 {}
                }

                fn setup_oneshot(&mut self) {
                    self.modify_ctl1(CTN, false);
                    self.modify_ctl1(ETERC | ETSRC_SWRCST, true);
                    // one conversion in the regular sequence
                    self.rb.rsq0.write(|w| unsafe { w.bits(0) });
                }

                fn set_channel_sample_time(&mut self, chan: u8, sample_time: SampleTime) {
                    let (high, shift) = sample_time_field(chan);
                    let smp = (sample_time as u32) << shift;
                    let mask = 0b111 << shift;
                    if high {
                        self.rb.sampt0.modify(|r, w| unsafe {
                            w.bits(((r.bits() as u32 & !mask) | smp) as _)
                        });
                    } else {
                        self.rb.sampt1.modify(|r, w| unsafe {
                            w.bits(((r.bits() as u32 & !mask) | smp) as _)
                        });
                    }
                }

                fn select(&mut self, chan: u8) {
                    self.set_channel_sample_time(chan, self.sample_time);
                    self.rb.rsq2.write(|w| unsafe { w.bits(u32::from(chan) as _) });
                }

                fn start(&mut self) {
                    self.modify_ctl1(SWRCST, true);
                }

                fn convert(&mut self, chan: u8) -> u16 {
                    self.select(chan);
                    self.start();
                    while self.rb.stat.read().bits() as u32 & EOC == 0 {}
                    self.latest()
                }

                /// Arms the analog watchdog on `chan`: results below `low` or above `high` set
                /// the watchdog flag.
                pub fn watchdog_on(&mut self, chan: u8, low: u16, high: u16) -> Result<(), Error> {
                    check_thresholds(low, high)?;
                    self.rb.wdlt.write(|w| unsafe { w.bits(u32::from(low) as _) });
                    self.rb.wdht.write(|w| unsafe { w.bits(u32::from(high) as _) });
                    self.rb.ctl0.modify(|r, w| unsafe {
                        let old = r.bits() as u32 & !WDCHSEL_MASK;
                        w.bits((old | WDSC | RWDEN | (u32::from(chan) & WDCHSEL_MASK)) as _)
                    });
                    Ok(())
                }

                /// Disarms the analog watchdog
                pub fn watchdog_off(&mut self) {
                    self.modify_ctl0(RWDEN | WDSC, false);
                }

                /// Starts converting `chan` over and over
                pub fn start_continuous(&mut self, chan: u8) {
                    self.select(chan);
                    self.set_continuous_mode(true);
                    self.start();
                }

                /// Stops a continuous conversion
                pub fn stop_continuous(&mut self) {
                    self.set_continuous_mode(false);
                }

                pub fn listen(&mut self, event: Event) {
                    self.modify_ctl0(event.ctl0_bit(), true);
                }

                pub fn unlisten(&mut self, event: Event) {
                    self.modify_ctl0(event.ctl0_bit(), false);
                }

                pub fn watchdog_tripped(&self) -> bool {
                    self.rb.stat.read().bits() as u32 & WDE != 0
                }

                pub fn clear_watchdog(&mut self) {
                    self.rb.stat.modify(|r, w| unsafe { w.bits((r.bits() as u32 & !WDE) as _) });
                }

                pub fn is_eoc(&self) -> bool {
                    self.rb.stat.read().bits() as u32 & EOC != 0
                }

                /// Last conversion result; reading it clears EOC
                pub fn latest(&self) -> u16 {
                    self.rb.rdata.read().bits() as u16
                }

                /// Powers down the ADC, disables the ADC clock and releases the ADC peripheral
                pub fn release(mut self, apb2: &mut APB2) -> $ADC {
                    self.power_down();
                    $ADC::disable(apb2);
                    self.rb
                }
            }

            impl<WORD, PIN> OneShot<$ADC, WORD, PIN> for Adc<$ADC>
            where
                WORD: From<u16>,
                PIN: Channel<$ADC, ID = u8>,
            {
                type Error = ();

                fn read(&mut self, _pin: &mut PIN) -> nb::Result<WORD, Self::Error> {
                    let res = self.convert(PIN::channel());
                    Ok(res.into())
                }
            }
        )+
    };
}

adc_hal! {
    ADC0: (adc0),
    ADC1: (adc1),
}

impl Adc<ADC0> {
    /// Powers the temperature sensor and Vrefint and returns their channels.
    pub fn enable_temp_vref(&mut self) -> (Temperature, Vrefint) {
        self.modify_ctl1(TSVREN, true);
        (Temperature { _0: () }, Vrefint { _0: () })
    }

    pub fn disable_temp_vref(&mut self, _temp: Temperature, _vref: Vrefint) {
        self.modify_ctl1(TSVREN, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_time_registers() {
        assert_eq!(sample_time_field(0), (false, 0));
        assert_eq!(sample_time_field(9), (false, 27));
        assert_eq!(sample_time_field(10), (true, 0));
        assert_eq!(sample_time_field(16), (true, 18));
    }

    #[test]
    fn watchdog_thresholds() {
        assert_eq!(check_thresholds(0, 4095), Ok(()));
        assert_eq!(check_thresholds(1000, 1000), Ok(()));
        assert_eq!(check_thresholds(0, 4096), Err(Error::Threshold));
        assert_eq!(check_thresholds(3000, 2000), Err(Error::Threshold));
    }

    #[test]
    fn conversions() {
        assert_eq!(to_millivolts(0, 3300), 0);
        assert_eq!(to_millivolts(4095, 3300), 3300);
        assert_eq!(to_millivolts(2048, 3300), 1650);

        // 1.45 V is 25.0 °C
        assert_eq!(temperature_decicelsius(1799), 250);
        // 1.2 V is about 86 °C
        assert_eq!(temperature_decicelsius(1489), 859);
        // above 1.45 V the reading goes below 25 °C
        assert_eq!(temperature_decicelsius(2048), -238);

        assert_eq!(vdda_millivolts(1489), Some(3300));
        assert_eq!(vdda_millivolts(0), None);
    }
}
