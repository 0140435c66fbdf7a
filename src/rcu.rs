// Copyright 2023 The gd32vf103-hal authors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Reset and clock unit

use crate::pac::RCU;
use crate::time::Hertz;

/// Frequency of the internal 8 MHz RC oscillator.
pub const IRC8M: u32 = 8_000_000;
/// Frequency of the internal 40 kHz RC oscillator which drives the free watchdog.
pub const IRC40K: u32 = 40_000;

const MAX_SYSCLK: u32 = 108_000_000;
const MAX_PCLK1: u32 = 54_000_000;
const MAX_ADCCLK: u32 = 14_000_000;

// CTL
const IRC8MEN: u32 = 1 << 0;
const HXTALEN: u32 = 1 << 16;
const HXTALSTB: u32 = 1 << 17;
const PLLEN: u32 = 1 << 24;
const PLLSTB: u32 = 1 << 25;

// CFG0
const SCS_MASK: u32 = 0b11;
const SCSS_SHIFT: u32 = 2;
const AHBPSC_SHIFT: u32 = 4;
const APB1PSC_SHIFT: u32 = 8;
const APB2PSC_SHIFT: u32 = 11;
const ADCPSC_SHIFT: u32 = 14;
const PLLSEL: u32 = 1 << 16;
const PLLMF_SHIFT: u32 = 18;
const ADCPSC_2: u32 = 1 << 28;
const PLLMF_4: u32 = 1 << 29;

/// Extension trait that constrains the `RCU` peripheral
pub trait RcuExt {
    /// Constrains the `RCU` peripheral so it plays nicely with the other abstractions
    fn constrain(self) -> Rcu;
}

impl RcuExt for RCU {
    fn constrain(self) -> Rcu {
        Rcu {
            ahb: AHB { _0: () },
            apb1: APB1 { _0: () },
            apb2: APB2 { _0: () },
            cfgr: CFGR::default(),
        }
    }
}

/// Constrained RCU peripheral
///
/// Aquired by calling the [constrain](trait.RcuExt.html#tymethod.constrain) method
/// on the RCU peripheral.
pub struct Rcu {
    /// AMBA High-performance Bus (AHB) registers
    pub ahb: AHB,
    /// Advanced Peripheral Bus 1 (APB1) registers
    pub apb1: APB1,
    /// Advanced Peripheral Bus 2 (APB2) registers
    pub apb2: APB2,
    /// Clock configuration
    pub cfgr: CFGR,
}

/// AMBA High-performance Bus (AHB) registers
pub struct AHB {
    _0: (),
}

/// Advanced Peripheral Bus 1 (APB1) registers
pub struct APB1 {
    _0: (),
}

/// Advanced Peripheral Bus 2 (APB2) registers
pub struct APB2 {
    _0: (),
}

/// Clock configuration register
///
/// Used to configure the frequencies of the clocks present in the processor. After setting all
/// frequencies, call the [freeze](#method.freeze) function to apply the configuration.
///
/// ```ignore
/// let clocks = rcu
///     .cfgr
///     .use_hxtal(8.mhz())
///     .sysclk(108.mhz())
///     .pclk1(54.mhz())
///     .freeze();
/// ```
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CFGR {
    hxtal: Option<u32>,
    sysclk: Option<u32>,
    hclk: Option<u32>,
    pclk1: Option<u32>,
    pclk2: Option<u32>,
    adcclk: Option<u32>,
}

impl CFGR {
    /// Uses an external oscillator of the given frequency instead of the internal 8 MHz one.
    ///
    /// The crystal must run between 4 and 32 MHz.
    pub fn use_hxtal<F: Into<Hertz>>(mut self, freq: F) -> Self {
        self.hxtal = Some(freq.into().0);
        self
    }

    /// Sets the desired frequency for the SYSCLK clock
    pub fn sysclk<F: Into<Hertz>>(mut self, freq: F) -> Self {
        self.sysclk = Some(freq.into().0);
        self
    }

    /// Sets the desired frequency for the HCLK clock
    pub fn hclk<F: Into<Hertz>>(mut self, freq: F) -> Self {
        self.hclk = Some(freq.into().0);
        self
    }

    /// Sets the desired frequency for the PCLK1 clock
    pub fn pclk1<F: Into<Hertz>>(mut self, freq: F) -> Self {
        self.pclk1 = Some(freq.into().0);
        self
    }

    /// Sets the desired frequency for the PCLK2 clock
    pub fn pclk2<F: Into<Hertz>>(mut self, freq: F) -> Self {
        self.pclk2 = Some(freq.into().0);
        self
    }

    /// Sets the desired frequency for the ADC clock
    pub fn adcclk<F: Into<Hertz>>(mut self, freq: F) -> Self {
        self.adcclk = Some(freq.into().0);
        self
    }

    /// Applies the clock configuration and returns a `Clocks` struct that signifies that the
    /// clocks are frozen, and contains the frequencies used. After this function is called,
    /// the clocks can not change
    pub fn freeze(self) -> Clocks {
        let plan = self.plan();
        let rcu = unsafe { &*RCU::ptr() };

        if self.hxtal.is_some() {
            rcu.ctl
                .modify(|r, w| unsafe { w.bits((r.bits() | HXTALEN) as _) });
            while rcu.ctl.read().bits() & HXTALSTB == 0 {}
        }

        if let Some(pllmf) = plan.pllmf {
            // PREDV0 = 1, PREDV0 source = HXTAL
            rcu.cfg1.modify(|r, w| unsafe { w.bits((r.bits() & !0x1_000f) as _) });
            rcu.cfg0.modify(|r, w| {
                let mut bits = r.bits() & !(PLLSEL | (0b1111 << PLLMF_SHIFT) | PLLMF_4);
                if self.hxtal.is_some() {
                    bits |= PLLSEL;
                }
                bits |= u32::from(pllmf & 0b1111) << PLLMF_SHIFT;
                if pllmf & 0b1_0000 != 0 {
                    bits |= PLLMF_4;
                }
                unsafe { w.bits(bits as _) }
            });
            rcu.ctl.modify(|r, w| unsafe { w.bits((r.bits() | PLLEN) as _) });
            while rcu.ctl.read().bits() & PLLSTB == 0 {}
        }

        rcu.cfg0.modify(|r, w| {
            let mut bits = r.bits()
                & !((0b1111 << AHBPSC_SHIFT)
                    | (0b111 << APB1PSC_SHIFT)
                    | (0b111 << APB2PSC_SHIFT)
                    | (0b11 << ADCPSC_SHIFT)
                    | ADCPSC_2);
            bits |= u32::from(plan.ahbpsc) << AHBPSC_SHIFT;
            bits |= u32::from(plan.apb1psc) << APB1PSC_SHIFT;
            bits |= u32::from(plan.apb2psc) << APB2PSC_SHIFT;
            bits |= u32::from(plan.adcpsc & 0b11) << ADCPSC_SHIFT;
            if plan.adcpsc & 0b100 != 0 {
                bits |= ADCPSC_2;
            }
            unsafe { w.bits(bits as _) }
        });

        let scs = plan.source as u32;
        rcu.cfg0
            .modify(|r, w| unsafe { w.bits(((r.bits() & !SCS_MASK) | scs) as _) });
        while (rcu.cfg0.read().bits() >> SCSS_SHIFT) & SCS_MASK != scs {}

        if self.hxtal.is_some() {
            // The internal oscillator is no longer needed once HXTAL drives the system.
            rcu.ctl.modify(|r, w| unsafe { w.bits((r.bits() & !IRC8MEN) as _) });
        }

        plan.clocks
    }

    /// Works out the register values and resulting frequencies of this configuration.
    fn plan(&self) -> Plan {
        let base = self.hxtal.unwrap_or(IRC8M);
        if let Some(hxtal) = self.hxtal {
            assert!((4_000_000..=32_000_000).contains(&hxtal));
        }
        let pll_input = match self.hxtal {
            Some(hxtal) => hxtal,
            None => IRC8M / 2,
        };
        let target = self.sysclk.unwrap_or(base);

        let (source, pllmf, sysclk) = if target == base {
            let source = if self.hxtal.is_some() {
                SystemSource::Hxtal
            } else {
                SystemSource::Irc8m
            };
            (source, None, base)
        } else {
            let (multiplier, field) = pll_multiplier(target / pll_input);
            (
                SystemSource::Pll,
                Some(field),
                pll_input * u32::from(multiplier),
            )
        };
        assert!(sysclk <= MAX_SYSCLK);

        let (ahbpsc, ahb_div) = match self.hclk.map(|hclk| sysclk / hclk).unwrap_or(1) {
            0 | 1 => (0b0000, 1),
            2 => (0b1000, 2),
            3..=5 => (0b1001, 4),
            6..=11 => (0b1010, 8),
            12..=39 => (0b1011, 16),
            40..=95 => (0b1100, 64),
            96..=191 => (0b1101, 128),
            192..=383 => (0b1110, 256),
            _ => (0b1111, 512),
        };
        let hclk = sysclk / ahb_div;

        let pclk1_target = self.pclk1.unwrap_or_else(|| hclk.min(MAX_PCLK1));
        let (apb1psc, apb1_div) = apb_prescaler(hclk, pclk1_target);
        let pclk1 = hclk / apb1_div;
        assert!(pclk1 <= MAX_PCLK1);

        let (apb2psc, apb2_div) = apb_prescaler(hclk, self.pclk2.unwrap_or(hclk));
        let pclk2 = hclk / apb2_div;

        let adc_target = self.adcclk.unwrap_or(MAX_ADCCLK);
        let (adcpsc, adc_div) = match (pclk2 + adc_target - 1) / adc_target {
            0..=2 => (0b000, 2),
            3..=4 => (0b001, 4),
            5..=6 => (0b010, 6),
            7..=8 => (0b011, 8),
            9..=12 => (0b101, 12),
            _ => (0b111, 16),
        };
        let adcclk = pclk2 / adc_div;
        assert!(adcclk <= MAX_ADCCLK);

        Plan {
            source,
            pllmf,
            ahbpsc,
            apb1psc,
            apb2psc,
            adcpsc,
            clocks: Clocks {
                sysclk: Hertz(sysclk),
                hclk: Hertz(hclk),
                pclk1: Hertz(pclk1),
                pclk2: Hertz(pclk2),
                ppre1: apb1_div as u8,
                ppre2: apb2_div as u8,
                adcclk: Hertz(adcclk),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SystemSource {
    Irc8m = 0b00,
    Hxtal = 0b01,
    Pll = 0b10,
}

#[derive(Debug, PartialEq, Eq)]
struct Plan {
    source: SystemSource,
    pllmf: Option<u8>,
    ahbpsc: u8,
    apb1psc: u8,
    apb2psc: u8,
    adcpsc: u8,
    clocks: Clocks,
}

/// Returns the multiplier actually used and its PLLMF field encoding.
///
/// The PLL multiplies by 2..=14 and 16..=32; ×15 is not available and rounds down.
fn pll_multiplier(wanted: u32) -> (u8, u8) {
    let multiplier = wanted.max(2).min(32) as u8;
    match multiplier {
        2..=14 => (multiplier, multiplier - 2),
        15 => (14, 12),
        16 => (16, 0b0_1110),
        _ => (multiplier, (multiplier - 17) | 0b1_0000),
    }
}

fn apb_prescaler(hclk: u32, target: u32) -> (u8, u32) {
    match (hclk + target - 1) / target {
        0 | 1 => (0b000, 1),
        2 => (0b100, 2),
        3..=4 => (0b101, 4),
        5..=8 => (0b110, 8),
        _ => (0b111, 16),
    }
}

/// Frozen clock frequencies
///
/// The existence of this value indicates that the clock configuration can no longer be changed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Clocks {
    sysclk: Hertz,
    hclk: Hertz,
    pclk1: Hertz,
    pclk2: Hertz,
    ppre1: u8,
    ppre2: u8,
    adcclk: Hertz,
}

impl Clocks {
    /// Returns the system (core) frequency
    pub fn sysclk(&self) -> Hertz {
        self.sysclk
    }

    /// Returns the frequency of the AHB
    pub fn hclk(&self) -> Hertz {
        self.hclk
    }

    /// Returns the frequency of the APB1
    pub fn pclk1(&self) -> Hertz {
        self.pclk1
    }

    /// Returns the frequency of the APB2
    pub fn pclk2(&self) -> Hertz {
        self.pclk2
    }

    /// Returns the frequency of the APB1 timers
    pub fn pclk1_tim(&self) -> Hertz {
        Hertz(self.pclk1.0 * if self.ppre1 == 1 { 1 } else { 2 })
    }

    /// Returns the frequency of the APB2 timers
    pub fn pclk2_tim(&self) -> Hertz {
        Hertz(self.pclk2.0 * if self.ppre2 == 1 { 1 } else { 2 })
    }

    /// Returns the ADC clock frequency
    pub fn adcclk(&self) -> Hertz {
        self.adcclk
    }
}

/// Bus associated to peripheral
pub trait RcuBus {
    /// Bus type;
    type Bus;
}

/// Enable/disable peripheral
pub trait Enable: RcuBus {
    fn enable(bus: &mut Self::Bus);
    fn disable(bus: &mut Self::Bus);
}

/// Reset peripheral
pub trait Reset: RcuBus {
    fn reset(bus: &mut Self::Bus);
}

macro_rules! bus_enable {
    ($PER:ident => ($busX:ty, $en:ident, $bit:expr)) => {
        impl RcuBus for crate::pac::$PER {
            type Bus = $busX;
        }
        impl Enable for crate::pac::$PER {
            #[inline(always)]
            fn enable(_bus: &mut Self::Bus) {
                // NOTE(unsafe) the bus token grants exclusive access to this bit
                let rcu = unsafe { &*RCU::ptr() };
                rcu.$en
                    .modify(|r, w| unsafe { w.bits((r.bits() | (1 << $bit)) as _) });
            }

            #[inline(always)]
            fn disable(_bus: &mut Self::Bus) {
                let rcu = unsafe { &*RCU::ptr() };
                rcu.$en
                    .modify(|r, w| unsafe { w.bits((r.bits() & !(1 << $bit)) as _) });
            }
        }
    };
}

macro_rules! bus_reset {
    ($PER:ident => ($rst:ident, $bit:expr)) => {
        impl Reset for crate::pac::$PER {
            #[inline(always)]
            fn reset(_bus: &mut Self::Bus) {
                let rcu = unsafe { &*RCU::ptr() };
                rcu.$rst
                    .modify(|r, w| unsafe { w.bits((r.bits() | (1 << $bit)) as _) });
                rcu.$rst
                    .modify(|r, w| unsafe { w.bits((r.bits() & !(1 << $bit)) as _) });
            }
        }
    };
}

macro_rules! bus {
    ($($PER:ident => ($busX:ty, $en:ident, $rst:ident, $bit:expr),)+) => {
        $(
            bus_enable!($PER => ($busX, $en, $bit));
            bus_reset!($PER => ($rst, $bit));
        )+
    }
}

bus_enable!(DMA0 => (AHB, ahben, 0));
bus_enable!(DMA1 => (AHB, ahben, 1));
bus_enable!(EXMC => (AHB, ahben, 8));

bus! {
    AFIO => (APB2, apb2en, apb2rst, 0),
    GPIOA => (APB2, apb2en, apb2rst, 2),
    GPIOB => (APB2, apb2en, apb2rst, 3),
    GPIOC => (APB2, apb2en, apb2rst, 4),
    GPIOD => (APB2, apb2en, apb2rst, 5),
    GPIOE => (APB2, apb2en, apb2rst, 6),
    ADC0 => (APB2, apb2en, apb2rst, 9),
    ADC1 => (APB2, apb2en, apb2rst, 10),
    TIMER0 => (APB2, apb2en, apb2rst, 11),
    SPI0 => (APB2, apb2en, apb2rst, 12),
    USART0 => (APB2, apb2en, apb2rst, 14),
    TIMER1 => (APB1, apb1en, apb1rst, 0),
    TIMER2 => (APB1, apb1en, apb1rst, 1),
    TIMER3 => (APB1, apb1en, apb1rst, 2),
    TIMER4 => (APB1, apb1en, apb1rst, 3),
    TIMER5 => (APB1, apb1en, apb1rst, 4),
    TIMER6 => (APB1, apb1en, apb1rst, 5),
    WWDGT => (APB1, apb1en, apb1rst, 11),
    SPI1 => (APB1, apb1en, apb1rst, 14),
    SPI2 => (APB1, apb1en, apb1rst, 15),
    USART1 => (APB1, apb1en, apb1rst, 17),
    USART2 => (APB1, apb1en, apb1rst, 18),
    I2C0 => (APB1, apb1en, apb1rst, 21),
    I2C1 => (APB1, apb1en, apb1rst, 22),
    CAN0 => (APB1, apb1en, apb1rst, 25),
    CAN1 => (APB1, apb1en, apb1rst, 26),
    BKP => (APB1, apb1en, apb1rst, 27),
    PMU => (APB1, apb1en, apb1rst, 28),
    DAC => (APB1, apb1en, apb1rst, 29),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_runs_from_irc8m() {
        let plan = CFGR::default().plan();
        assert_eq!(plan.source, SystemSource::Irc8m);
        assert_eq!(plan.pllmf, None);
        assert_eq!(plan.clocks.sysclk(), Hertz(8_000_000));
        assert_eq!(plan.clocks.pclk1(), Hertz(8_000_000));
        assert_eq!(plan.clocks.pclk1_tim(), Hertz(8_000_000));
        // 8 MHz / 2 is the fastest ADC clock available.
        assert_eq!(plan.clocks.adcclk(), Hertz(4_000_000));
    }

    #[test]
    fn hxtal_pll_at_108mhz() {
        let plan = CFGR::default()
            .use_hxtal(Hertz(8_000_000))
            .sysclk(Hertz(108_000_000))
            .plan();
        // 8 MHz * 13.5 is not possible, so the multiplier rounds down to 13.
        assert_eq!(plan.source, SystemSource::Pll);
        assert_eq!(plan.pllmf, Some(11));
        assert_eq!(plan.clocks.sysclk(), Hertz(104_000_000));
        assert_eq!(plan.clocks.pclk1(), Hertz(52_000_000));
        assert_eq!(plan.apb1psc, 0b100);
        assert_eq!(plan.clocks.pclk1_tim(), Hertz(104_000_000));
        assert_eq!(plan.clocks.pclk2_tim(), Hertz(104_000_000));
        // 104 MHz / 8 = 13 MHz <= 14 MHz.
        assert_eq!(plan.clocks.adcclk(), Hertz(13_000_000));
        assert_eq!(plan.adcpsc, 0b011);
    }

    #[test]
    fn irc8m_pll_at_108mhz() {
        let plan = CFGR::default().sysclk(Hertz(108_000_000)).plan();
        // IRC8M / 2 * 27
        assert_eq!(plan.clocks.sysclk(), Hertz(108_000_000));
        assert_eq!(plan.pllmf, Some(0b1_1010));
        assert_eq!(plan.clocks.pclk1(), Hertz(54_000_000));
        assert_eq!(plan.clocks.pclk2(), Hertz(108_000_000));
        assert_eq!(plan.clocks.adcclk(), Hertz(13_500_000));
        assert_eq!(plan.adcpsc, 0b011);
    }

    #[test]
    fn pll_multiplier_encoding() {
        assert_eq!(pll_multiplier(1), (2, 0));
        assert_eq!(pll_multiplier(14), (14, 12));
        assert_eq!(pll_multiplier(15), (14, 12));
        assert_eq!(pll_multiplier(16), (16, 0b0_1110));
        assert_eq!(pll_multiplier(17), (17, 0b1_0000));
        assert_eq!(pll_multiplier(32), (32, 0b1_1111));
        assert_eq!(pll_multiplier(40), (32, 0b1_1111));
    }

    #[test]
    fn bus_prescalers() {
        let plan = CFGR::default()
            .use_hxtal(Hertz(8_000_000))
            .sysclk(Hertz(96_000_000))
            .hclk(Hertz(48_000_000))
            .pclk1(Hertz(12_000_000))
            .pclk2(Hertz(24_000_000))
            .plan();
        assert_eq!(plan.clocks.hclk(), Hertz(48_000_000));
        assert_eq!(plan.ahbpsc, 0b1000);
        assert_eq!(plan.clocks.pclk1(), Hertz(12_000_000));
        assert_eq!(plan.apb1psc, 0b101);
        assert_eq!(plan.clocks.pclk2(), Hertz(24_000_000));
        assert_eq!(plan.clocks.pclk2_tim(), Hertz(48_000_000));
    }

    #[test]
    #[should_panic]
    fn rejects_overclock() {
        CFGR::default()
            .use_hxtal(Hertz(25_000_000))
            .sysclk(Hertz(200_000_000))
            .plan();
    }
}
