// Copyright 2023 The gd32vf103-hal authors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Enhanced core-local interrupt controller (ECLIC)
//!
//! The Bumblebee core takes every interrupt through the ECLIC. This module configures the
//! controller in non-vectored mode: all interrupts enter through the `riscv-rt` trap entry, and
//! the `DefaultHandler` installed with the `rt` feature reads the interrupt number from `mcause`
//! and calls the handler registered for it.
//!
//! The trap entry runs handlers with interrupts disabled, so handlers never nest: the level
//! and priority of a line only decide which pending interrupt is taken first.
//!
//! ```ignore
//! fn on_timer() {
//!     // ...
//! }
//!
//! let mut eclic = unsafe { Eclic::new(p.ECLIC, LevelPriorityBits::L3P1) };
//! eclic.register(Irq::TIMER1, on_timer);
//! eclic.setup(Irq::TIMER1, Trigger::Level, Level::L1, Priority::P0)?;
//! unsafe {
//!     eclic.unmask(Irq::TIMER1);
//!     riscv::interrupt::enable();
//! }
//! ```
//!
//! An interrupt that fires without a registered handler is masked and counted, see
//! [`Eclic::unhandled`].

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::pac::ECLIC;

/// ECLIC interrupt numbers, as generated for the device
pub use crate::pac::Interrupt as Irq;

/// Implemented bits of `clicintctl`, the upper nibble.
const CLICINTCTLBITS: u8 = 4;

/// Number of interrupt lines of the device.
pub const NUM_INTERRUPTS: usize = 87;

/// Interrupt number as seen in `mcause`
fn line(irq: Irq) -> usize {
    irq as usize
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Level needs more bits than [`LevelPriorityBits`] gives to levels
    Level,
    /// Priority needs more bits than are left for priorities
    Priority,
}

/// Split of the four `clicintctl` bits between level and priority
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LevelPriorityBits {
    L0P4 = 0,
    L1P3 = 1,
    L2P2 = 2,
    L3P1 = 3,
    L4P0 = 4,
}

/// Trigger type of an interrupt line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    Level = 0b00,
    RisingEdge = 0b01,
    FallingEdge = 0b11,
}

/// Interrupt level; among pending interrupts the highest level is taken first
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    L0 = 0,
    L1 = 1,
    L2 = 2,
    L3 = 3,
    L4 = 4,
    L5 = 5,
    L6 = 6,
    L7 = 7,
    L8 = 8,
    L9 = 9,
    L10 = 10,
    L11 = 11,
    L12 = 12,
    L13 = 13,
    L14 = 14,
    L15 = 15,
}

/// Priority among pending interrupts of the same level
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    P0 = 0,
    P1 = 1,
    P2 = 2,
    P3 = 3,
    P4 = 4,
    P5 = 5,
    P6 = 6,
    P7 = 7,
    P8 = 8,
    P9 = 9,
    P10 = 10,
    P11 = 11,
    P12 = 12,
    P13 = 13,
    P14 = 14,
    P15 = 15,
}

const NO_HANDLER: AtomicUsize = AtomicUsize::new(0);
static HANDLERS: [AtomicUsize; NUM_INTERRUPTS] = [NO_HANDLER; NUM_INTERRUPTS];
static UNHANDLED: AtomicU32 = AtomicU32::new(0);

/// Encodes level and priority into a `clicintctl` value for the given level bit count.
///
/// Values that do not fit the bits of their field are rejected.
fn intctl(nlbits: u8, level: u8, priority: u8) -> Result<u8, Error> {
    let nlbits = nlbits.min(CLICINTCTLBITS);
    let pbits = CLICINTCTLBITS - nlbits;
    if u32::from(level) >= 1 << nlbits {
        return Err(Error::Level);
    }
    if u32::from(priority) >= 1 << pbits {
        return Err(Error::Priority);
    }
    let level_shift = 8 - u32::from(nlbits);
    let priority_shift = 8 - u32::from(CLICINTCTLBITS);
    let level = if nlbits == 0 { 0 } else { u32::from(level) << level_shift };
    Ok((level | (u32::from(priority) << priority_shift) | 0x0f) as u8)
}

fn set_handler(irq: Irq, handler: fn()) {
    HANDLERS[line(irq)].store(handler as usize, Ordering::Release);
}

/// Calls the handler registered for `nr` and returns whether there was one.
pub(crate) fn dispatch(nr: usize) -> bool {
    match HANDLERS.get(nr).map(|slot| slot.load(Ordering::Acquire)) {
        Some(0) | None => {
            UNHANDLED.fetch_add(1, Ordering::Relaxed);
            false
        }
        Some(address) => {
            // NOTE(unsafe) only `fn()` pointers are ever stored in the table
            let handler: fn() = unsafe { core::mem::transmute(address) };
            handler();
            true
        }
    }
}

/// The configured interrupt controller
pub struct Eclic {
    eclic: ECLIC,
    nlbits: u8,
}

impl Eclic {
    /// Resets the controller, selects the level/priority split and switches the core to
    /// ECLIC non-vectored mode.
    ///
    /// # Safety
    ///
    /// Must be called with interrupts disabled, before any interrupt is unmasked.
    pub unsafe fn new(eclic: ECLIC, bits: LevelPriorityBits) -> Self {
        for int in eclic.clicints.iter() {
            int.clicintie.write(|w| w.ie().clear_bit());
            int.clicintip.write(|w| w.ip().clear_bit());
            int.clicintattr.reset();
            int.clicintctl.reset();
        }
        eclic.cliccfg.write(|w| w.nlbits().bits(bits as u8));
        eclic.mth.write(|w| w.mth().bits(0));
        enter_eclic_mode();
        Eclic {
            eclic,
            nlbits: bits as u8,
        }
    }

    /// Sets the interrupt threshold level; interrupts at or below it are not taken.
    pub fn set_threshold(&mut self, level: u8) {
        self.eclic.mth.write(|w| unsafe { w.mth().bits(level) });
    }

    /// Configures trigger, level and priority of an interrupt line.
    pub fn setup(
        &mut self,
        irq: Irq,
        trigger: Trigger,
        level: Level,
        priority: Priority,
    ) -> Result<(), Error> {
        let ctl = intctl(self.nlbits, level as u8, priority as u8)?;
        let int = &self.eclic.clicints[line(irq)];
        int.clicintattr
            .write(|w| unsafe { w.trig().bits(trigger as u8) });
        int.clicintctl
            .write(|w| unsafe { w.level_priority().bits(ctl) });
        Ok(())
    }

    /// Registers the function that runs when `irq` fires.
    ///
    /// Registration replaces any previous handler of the line.
    pub fn register(&mut self, irq: Irq, handler: fn()) {
        set_handler(irq, handler);
    }

    /// Enables the interrupt line.
    ///
    /// # Safety
    ///
    /// Unmasking can break critical sections that rely on the line being masked.
    pub unsafe fn unmask(&mut self, irq: Irq) {
        self.eclic.clicints[line(irq)]
            .clicintie
            .write(|w| w.ie().set_bit());
    }

    /// Disables the interrupt line.
    pub fn mask(&mut self, irq: Irq) {
        mask_nr(line(irq));
    }

    /// Whether the line is enabled
    pub fn is_enabled(&self, irq: Irq) -> bool {
        self.eclic.clicints[line(irq)].clicintie.read().ie().bit_is_set()
    }

    /// Whether the line is pending
    pub fn is_pending(&self, irq: Irq) -> bool {
        self.eclic.clicints[line(irq)].clicintip.read().ip().bit_is_set()
    }

    /// Sets the pending bit of an edge-triggered line.
    pub fn pend(&mut self, irq: Irq) {
        self.eclic.clicints[line(irq)]
            .clicintip
            .write(|w| w.ip().set_bit());
    }

    /// Clears the pending bit of an edge-triggered line.
    pub fn unpend(&mut self, irq: Irq) {
        self.eclic.clicints[line(irq)]
            .clicintip
            .write(|w| w.ip().clear_bit());
    }

    /// Number of interrupts taken without a registered handler since reset.
    pub fn unhandled() -> u32 {
        UNHANDLED.load(Ordering::Relaxed)
    }

    /// Returns the raw peripheral; registered handlers stay in place.
    pub fn free(self) -> ECLIC {
        self.eclic
    }
}

fn mask_nr(nr: usize) {
    // NOTE(unsafe) single byte write to the enable register of one line, also done from the
    // trap handler while `Eclic` is owned elsewhere
    let eclic = unsafe { &*ECLIC::ptr() };
    if let Some(int) = eclic.clicints.get(nr) {
        int.clicintie.write(|w| w.ie().clear_bit());
    }
}

#[cfg(target_arch = "riscv32")]
unsafe fn enter_eclic_mode() {
    #[cfg(feature = "rt")]
    {
        extern "C" {
            fn _start_trap();
        }
        // mtvt2: interrupts enter at `_start_trap`, exceptions keep using mtvec.
        let entry = _start_trap as usize | 1;
        core::arch::asm!("csrw 0x7ec, {0}", in(reg) entry);
    }
    // mtvec.MODE = 0b11 selects the ECLIC
    core::arch::asm!("csrs mtvec, {0}", in(reg) 0b11usize);
}

#[cfg(not(target_arch = "riscv32"))]
unsafe fn enter_eclic_mode() {}

#[cfg(all(feature = "rt", target_arch = "riscv32"))]
#[no_mangle]
#[allow(non_snake_case)]
extern "C" fn DefaultHandler() {
    // In ECLIC mode the low 12 bits of mcause hold the interrupt number.
    let nr = riscv::register::mcause::read().bits() & 0xfff;
    if !dispatch(nr) {
        mask_nr(nr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicBool;

    static CALLED: AtomicBool = AtomicBool::new(false);

    fn handler() {
        CALLED.store(true, Ordering::SeqCst);
    }

    #[test]
    fn dispatches_registered_handler() {
        set_handler(Irq::USART2, handler);
        assert!(dispatch(line(Irq::USART2)));
        assert!(CALLED.load(Ordering::SeqCst));
    }

    #[test]
    fn counts_unhandled_interrupts() {
        let before = Eclic::unhandled();
        assert!(!dispatch(line(Irq::RTC_ALARM)));
        assert!(!dispatch(NUM_INTERRUPTS + 5));
        assert!(Eclic::unhandled() >= before + 2);
    }

    #[test]
    fn level_and_priority_encoding() {
        // all bits for level
        assert_eq!(intctl(4, 0b1010, 0), Ok(0b1010_1111));
        // level in bits 7:5, priority in bit 4
        assert_eq!(intctl(3, 1, 1), Ok(0b0011_1111));
        // two and two
        assert_eq!(intctl(2, 3, 2), Ok(0b1110_1111));
        // all bits for priority
        assert_eq!(intctl(0, 0, 0b1001), Ok(0b1001_1111));
    }

    #[test]
    fn out_of_range_level_or_priority() {
        assert_eq!(intctl(3, Level::L8 as u8, 0), Err(Error::Level));
        assert_eq!(intctl(3, Level::L7 as u8, 1), Ok(0b1111_1111));
        assert_eq!(intctl(3, 1, 2), Err(Error::Priority));
        assert_eq!(intctl(0, 1, 0), Err(Error::Level));
        assert_eq!(intctl(4, 15, 1), Err(Error::Priority));
    }

    #[test]
    fn interrupt_numbers() {
        assert_eq!(line(Irq::WWDGT), 19);
        assert_eq!(line(Irq::USART0), 56);
        assert_eq!(line(Irq::USBFS), 86);
        assert!(line(Irq::USBFS) < NUM_INTERRUPTS);
    }
}
