// Copyright 2023 The gd32vf103-hal authors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Watchdogs
//!
//! [`FreeWatchdog`] runs from the 40 kHz IRC40K and keeps running once started.
//! [`WindowWatchdog`] runs from the APB1 clock and must be fed inside a window: too early or too
//! late both reset the device.

use cast::u16;
use embedded_hal::watchdog::{Watchdog, WatchdogEnable};

use crate::pac::{FWDGT, RCU, WWDGT};
use crate::rcu::{Clocks, Enable, Reset, IRC40K, APB1};
use crate::time::{Hertz, MicroSeconds, MilliSeconds};

// FWDGT keys
const KEY_RELOAD: u32 = 0xaaaa;
const KEY_START: u32 = 0xcccc;
const KEY_UNLOCK: u32 = 0x5555;

// FWDGT STAT
const PUD: u32 = 1 << 0;
const RUD: u32 = 1 << 1;

const MAX_PSC: u8 = 6;
const MAX_RLD: u16 = 0xfff;

// WWDGT
const WDGTEN: u32 = 1 << 7;
const CNT_MASK: u32 = 0x7f;
const PSC_SHIFT: u32 = 7;
const EWIE: u32 = 1 << 9;

// RCU RSTSCK
const RSTFC: u32 = 1 << 24;
const EPRSTF: u32 = 1 << 26;
const PORRSTF: u32 = 1 << 27;
const SWRSTF: u32 = 1 << 28;
const FWDGTRSTF: u32 = 1 << 29;
const WWDGTRSTF: u32 = 1 << 30;
const LPRSTF: u32 = 1 << 31;

/// Prescaler and reload of the free watchdog for `period`, clamped to the longest interval.
fn fwdgt_config(period: MilliSeconds) -> (u8, u16) {
    let ticks_per_ms = IRC40K / 1_000;
    for psc in 0..=MAX_PSC {
        let divider = 4_u32 << psc;
        let ticks = period.0.saturating_mul(ticks_per_ms) / divider;
        if ticks <= u32::from(MAX_RLD) + 1 {
            let rld = u16(ticks.max(1) - 1).unwrap_or(MAX_RLD);
            return (psc, rld);
        }
    }
    (MAX_PSC, MAX_RLD)
}

fn fwdgt_interval(psc: u8, rld: u16) -> MilliSeconds {
    let divider = 4_u32 << psc;
    MilliSeconds((u32::from(rld) + 1) * divider / (IRC40K / 1_000))
}

/// Free watchdog timer
pub struct FreeWatchdog {
    fwdgt: FWDGT,
}

impl FreeWatchdog {
    /// Wraps the watchdog peripheral
    pub fn new(fwdgt: FWDGT) -> Self {
        FreeWatchdog { fwdgt }
    }

    fn wait_for_update(&self) {
        while self.fwdgt.stat.read().bits() as u32 & (PUD | RUD) != 0 {}
    }

    fn key(&mut self, key: u32) {
        self.fwdgt.ctl.write(|w| unsafe { w.bits(key as _) });
    }

    /// Longest period the free watchdog supports
    pub fn max_interval() -> MilliSeconds {
        fwdgt_interval(MAX_PSC, MAX_RLD)
    }

    /// Period currently programmed
    pub fn interval(&self) -> MilliSeconds {
        self.wait_for_update();
        let psc = (self.fwdgt.psc.read().bits() as u32 & 0b111) as u8;
        let rld = (self.fwdgt.rld.read().bits() as u32 & u32::from(MAX_RLD)) as u16;
        fwdgt_interval(psc.min(MAX_PSC), rld)
    }

    fn setup(&mut self, period: MilliSeconds) {
        let (psc, rld) = fwdgt_config(period);
        self.key(KEY_UNLOCK);
        self.wait_for_update();
        self.fwdgt.psc.write(|w| unsafe { w.bits(u32::from(psc) as _) });
        self.fwdgt.rld.write(|w| unsafe { w.bits(u32::from(rld) as _) });
        self.wait_for_update();
        self.key(KEY_RELOAD);
    }
}

impl WatchdogEnable for FreeWatchdog {
    type Time = MilliSeconds;

    fn start<T: Into<Self::Time>>(&mut self, period: T) {
        self.setup(period.into());
        self.key(KEY_START);
    }
}

impl Watchdog for FreeWatchdog {
    fn feed(&mut self) {
        self.key(KEY_RELOAD);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Counter outside 0x40..=0x7F
    Counter,
    /// Window above the counter or below 0x40
    Window,
}

/// Divider applied to PCLK1 / 4096
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WwdgtPrescaler {
    Div1 = 0,
    Div2 = 1,
    Div4 = 2,
    Div8 = 3,
}

fn check_window(counter: u8, window: u8) -> Result<(), Error> {
    if !(0x40..=0x7f).contains(&counter) {
        Err(Error::Counter)
    } else if window < 0x40 || window > counter {
        Err(Error::Window)
    } else {
        Ok(())
    }
}

/// Time until the counter drops from `counter` to 0x3F and resets the device
fn wwdgt_timeout(pclk1: Hertz, prescaler: WwdgtPrescaler, counter: u8) -> MicroSeconds {
    let steps = u64::from(counter.saturating_sub(0x3f));
    let tick_ns = 4096 * (1_u64 << prescaler as u32) * 1_000_000_000 / u64::from(pclk1.0);
    MicroSeconds((steps * tick_ns / 1_000) as u32)
}

/// Window watchdog timer
pub struct WindowWatchdog {
    wwdgt: WWDGT,
    pclk1: Hertz,
    reload: u8,
    prescaler: WwdgtPrescaler,
}

impl WindowWatchdog {
    pub fn new(wwdgt: WWDGT, apb1: &mut APB1, clocks: &Clocks) -> Self {
        WWDGT::enable(apb1);
        WWDGT::reset(apb1);
        WindowWatchdog {
            wwdgt,
            pclk1: clocks.pclk1(),
            reload: 0x7f,
            prescaler: WwdgtPrescaler::Div8,
        }
    }

    /// Starts counting down from `counter`.
    ///
    /// Feeding is only allowed once the counter has fallen to `window` or below.
    pub fn start(
        &mut self,
        counter: u8,
        window: u8,
        prescaler: WwdgtPrescaler,
    ) -> Result<(), Error> {
        check_window(counter, window)?;
        self.reload = counter;
        self.prescaler = prescaler;
        self.wwdgt.cfg.modify(|r, w| unsafe {
            let keep = r.bits() as u32 & EWIE;
            w.bits((keep | ((prescaler as u32) << PSC_SHIFT) | u32::from(window)) as _)
        });
        self.wwdgt
            .ctl
            .write(|w| unsafe { w.bits((WDGTEN | u32::from(counter)) as _) });
        Ok(())
    }

    /// Reloads the counter
    pub fn feed(&mut self) {
        self.wwdgt
            .ctl
            .write(|w| unsafe { w.bits((WDGTEN | u32::from(self.reload)) as _) });
    }

    /// Current counter value
    pub fn counter(&self) -> u8 {
        (self.wwdgt.ctl.read().bits() as u32 & CNT_MASK) as u8
    }

    /// Whether feeding now is inside the window
    pub fn window_open(&self) -> bool {
        let window = (self.wwdgt.cfg.read().bits() as u32 & CNT_MASK) as u8;
        self.counter() <= window
    }

    /// Time from a feed to the reset
    pub fn timeout(&self) -> MicroSeconds {
        wwdgt_timeout(self.pclk1, self.prescaler, self.reload)
    }

    /// Interrupt when the counter reaches 0x40, one tick before the reset
    pub fn listen_early_wakeup(&mut self) {
        self.wwdgt
            .cfg
            .modify(|r, w| unsafe { w.bits((r.bits() as u32 | EWIE) as _) });
    }

    pub fn is_early_wakeup(&self) -> bool {
        self.wwdgt.stat.read().bits() as u32 & 1 != 0
    }

    pub fn clear_early_wakeup(&mut self) {
        self.wwdgt.stat.write(|w| unsafe { w.bits(0) });
    }
}

/// What caused the last reset
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetCause {
    LowPower,
    WindowWatchdog,
    FreeWatchdog,
    Software,
    PowerOn,
    /// External NRST pin
    Pin,
    Unknown,
}

fn classify_reset(rstsck: u32) -> ResetCause {
    // the pin flag accompanies every internal reset, check it last
    if rstsck & LPRSTF != 0 {
        ResetCause::LowPower
    } else if rstsck & WWDGTRSTF != 0 {
        ResetCause::WindowWatchdog
    } else if rstsck & FWDGTRSTF != 0 {
        ResetCause::FreeWatchdog
    } else if rstsck & SWRSTF != 0 {
        ResetCause::Software
    } else if rstsck & PORRSTF != 0 {
        ResetCause::PowerOn
    } else if rstsck & EPRSTF != 0 {
        ResetCause::Pin
    } else {
        ResetCause::Unknown
    }
}

/// Reads the reset flags and clears them for the next reset
pub fn reset_cause() -> ResetCause {
    // NOTE(unsafe) read and flag clear of RSTSCK only
    let rcu = unsafe { &*RCU::ptr() };
    let cause = classify_reset(rcu.rstsck.read().bits() as u32);
    rcu.rstsck
        .modify(|r, w| unsafe { w.bits((r.bits() as u32 | RSTFC) as _) });
    cause
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_watchdog_periods() {
        assert_eq!(fwdgt_config(MilliSeconds(1_000)), (2, 2_499));
        assert_eq!(fwdgt_interval(2, 2_499), MilliSeconds(1_000));
        assert_eq!(fwdgt_config(MilliSeconds(100)), (0, 999));
        // longer than possible is clamped
        assert_eq!(fwdgt_config(MilliSeconds(60_000)), (6, 0xfff));
        assert_eq!(FreeWatchdog::max_interval(), MilliSeconds(26_214));
        assert_eq!(fwdgt_config(MilliSeconds(0)), (0, 0));
    }

    #[test]
    fn window_validation() {
        assert_eq!(check_window(0x7f, 0x50), Ok(()));
        assert_eq!(check_window(0x40, 0x40), Ok(()));
        assert_eq!(check_window(0x3f, 0x3f), Err(Error::Counter));
        assert_eq!(check_window(0x80, 0x50), Err(Error::Counter));
        assert_eq!(check_window(0x60, 0x70), Err(Error::Window));
        assert_eq!(check_window(0x60, 0x30), Err(Error::Window));
    }

    #[test]
    fn window_watchdog_timeout() {
        // 54 MHz, /8: 606.8 us per tick, 64 ticks
        assert_eq!(
            wwdgt_timeout(Hertz(54_000_000), WwdgtPrescaler::Div8, 0x7f),
            MicroSeconds(38_836)
        );
        assert_eq!(
            wwdgt_timeout(Hertz(54_000_000), WwdgtPrescaler::Div1, 0x40),
            MicroSeconds(75)
        );
    }

    #[test]
    fn reset_flags() {
        assert_eq!(classify_reset(EPRSTF | FWDGTRSTF), ResetCause::FreeWatchdog);
        assert_eq!(classify_reset(EPRSTF | PORRSTF), ResetCause::PowerOn);
        assert_eq!(classify_reset(EPRSTF), ResetCause::Pin);
        assert_eq!(classify_reset(EPRSTF | SWRSTF), ResetCause::Software);
        assert_eq!(classify_reset(0), ResetCause::Unknown);
    }
}
