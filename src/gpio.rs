// Copyright 2023 The gd32vf103-hal authors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # General Purpose I/Os
//!
//! Every pin is a distinct type, `Pin<P, N, MODE>`, where `P` is the port letter, `N` the pin
//! number and `MODE` one of the type-state modes below. Changing the mode consumes the pin and
//! needs the opaque `CTL0`/`CTL1` token of the port (`crl` for pins 0..=7, `crh` for 8..=15).
//!
//! ```ignore
//! let mut gpioc = dp.GPIOC.split(&mut rcu.apb2);
//! let mut led = gpioc.pc0.into_push_pull_output(&mut gpioc.crl);
//! led.set_high();
//! ```
//!
//! Out of reset PA13, PA14, PA15, PB3 and PB4 belong to the JTAG debugger and are typed
//! [`Debugger`].

use core::convert::Infallible;
use core::marker::PhantomData;

use crate::rcu::APB2;
use embedded_hal::digital::v2::{InputPin, OutputPin, StatefulOutputPin, ToggleableOutputPin};

/// Slew rates available for output and alternate function pins
#[derive(Clone, Copy, Debug)]
pub enum Speed {
    Mhz10 = 0b01,
    Mhz2 = 0b10,
    Mhz50 = 0b11,
}

/// Extension trait to split a GPIO peripheral in independent pins and registers
pub trait GpioExt {
    /// The parts to split the GPIO into
    type Parts;

    /// Enables the port clock, resets the port and splits it into independent pins
    fn split(self, apb2: &mut APB2) -> Self::Parts;
}

/// Marker trait for modes a pin can be actively used in.
pub trait Active {}

/// Input mode (type state)
#[derive(Default)]
pub struct Input<MODE = Floating> {
    _mode: PhantomData<MODE>,
}
impl<MODE> Active for Input<MODE> {}

/// Used by the debugger (type state)
#[derive(Default)]
pub struct Debugger;

/// Floating input (type state)
#[derive(Default)]
pub struct Floating;

/// Pulled down input (type state)
#[derive(Default)]
pub struct PullDown;

/// Pulled up input (type state)
#[derive(Default)]
pub struct PullUp;

/// Output mode (type state)
#[derive(Default)]
pub struct Output<MODE = PushPull> {
    _mode: PhantomData<MODE>,
}
impl<MODE> Active for Output<MODE> {}

/// Push pull output (type state)
#[derive(Default)]
pub struct PushPull;

/// Open drain output (type state)
#[derive(Default)]
pub struct OpenDrain;

/// Analog mode (type state)
#[derive(Default)]
pub struct Analog;
impl Active for Analog {}

/// Alternate function
#[derive(Default)]
pub struct Alternate<MODE = PushPull> {
    _mode: PhantomData<MODE>,
}
impl<MODE> Active for Alternate<MODE> {}

/// Digital output pin state
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PinState {
    High,
    Low,
}

impl From<bool> for PinState {
    fn from(high: bool) -> Self {
        if high {
            PinState::High
        } else {
            PinState::Low
        }
    }
}

mod sealed {
    /// CTL register encoding of a mode: `(CNF << 2) | MD` plus the OCTL level selecting the
    /// pull direction of pulled inputs.
    pub trait PinMode: Default {
        const CNF: u32;
        const MD: u32;
        const PULL: Option<bool> = None;
    }
}

use sealed::PinMode;

impl PinMode for Input<Floating> {
    const CNF: u32 = 0b01;
    const MD: u32 = 0b00;
}

impl PinMode for Input<PullDown> {
    const CNF: u32 = 0b10;
    const MD: u32 = 0b00;
    const PULL: Option<bool> = Some(false);
}

impl PinMode for Input<PullUp> {
    const CNF: u32 = 0b10;
    const MD: u32 = 0b00;
    const PULL: Option<bool> = Some(true);
}

impl PinMode for Output<PushPull> {
    const CNF: u32 = 0b00;
    const MD: u32 = 0b11;
}

impl PinMode for Output<OpenDrain> {
    const CNF: u32 = 0b01;
    const MD: u32 = 0b11;
}

impl PinMode for Analog {
    const CNF: u32 = 0b00;
    const MD: u32 = 0b00;
}

impl PinMode for Alternate<PushPull> {
    const CNF: u32 = 0b10;
    const MD: u32 = 0b11;
}

impl PinMode for Alternate<OpenDrain> {
    const CNF: u32 = 0b11;
    const MD: u32 = 0b11;
}

/// 4-bit CTL field value for a mode at a given speed.
const fn ctl_bits(cnf: u32, md: u32) -> u32 {
    (cnf << 2) | md
}

/// Generic pin type
///
/// - `P` is port name: `A` for GPIOA, `B` for GPIOB, etc.
/// - `N` is pin number: from `0` to `15`.
/// - `MODE` is one of the pin modes.
pub struct Pin<const P: char, const N: u8, MODE = Input<Floating>> {
    _mode: PhantomData<MODE>,
}

impl<const P: char, const N: u8, MODE> Pin<P, N, MODE> {
    const OFFSET: u32 = (4 * (N as u32)) % 32;

    fn new() -> Self {
        Self { _mode: PhantomData }
    }

    /// Pin number within the port
    #[inline(always)]
    pub fn pin_id(&self) -> u8 {
        N
    }

    /// Port number, 0 for port A
    #[inline(always)]
    pub fn port_id(&self) -> u8 {
        P as u8 - b'A'
    }
}

/// Opaque CTL register, `H` selects CTL1 (pins 8..=15)
pub struct Ctl<const P: char, const H: bool>(());

/// Relates a pin to the CTL register holding its configuration
pub trait HL {
    /// Configuration register associated to pin
    type Ctl;
}

macro_rules! ctl {
    ($ctl_is_h:literal: [$($pin_number:literal),+]) => {
        $(
            impl<const P: char, MODE> HL for Pin<P, $pin_number, MODE> {
                type Ctl = Ctl<P, $ctl_is_h>;
            }
        )+
    }
}

ctl!(false: [0, 1, 2, 3, 4, 5, 6, 7]);
ctl!(true: [8, 9, 10, 11, 12, 13, 14, 15]);

impl<const P: char, const N: u8> Pin<P, N, Debugger> {
    /// Takes the pin away from the debugger.
    ///
    /// # Safety
    ///
    /// JTAG must have been disabled with [`Afio::disable_jtag`](crate::afio::Afio::disable_jtag)
    /// first, otherwise the debugger keeps driving the pin.
    pub unsafe fn activate(self) -> Pin<P, N, Input<Floating>> {
        Pin::new()
    }
}

// Register helpers; they are callable in any mode, mode checks happen in the public API.
impl<const P: char, const N: u8, MODE> Pin<P, N, MODE> {
    #[inline(always)]
    fn _set_state(&mut self, state: PinState) {
        match state {
            PinState::High => self._set_high(),
            PinState::Low => self._set_low(),
        }
    }

    #[inline(always)]
    fn _set_high(&mut self) {
        // NOTE(unsafe) atomic write to a stateless register
        unsafe { (*port_registers(P)).bop.write(|w| w.bits(1 << N)) }
    }

    #[inline(always)]
    fn _set_low(&mut self) {
        // NOTE(unsafe) atomic write to a stateless register
        unsafe { (*port_registers(P)).bc.write(|w| w.bits(1 << N)) }
    }

    #[inline(always)]
    fn _is_set_low(&self) -> bool {
        // NOTE(unsafe) atomic read with no side effects
        unsafe { (*port_registers(P)).octl.read().bits() & (1 << N) == 0 }
    }

    #[inline(always)]
    fn _is_low(&self) -> bool {
        // NOTE(unsafe) atomic read with no side effects
        unsafe { (*port_registers(P)).istat.read().bits() & (1 << N) == 0 }
    }
}

impl<const P: char, const N: u8, MODE> Pin<P, N, MODE>
where
    Self: HL,
{
    fn mode<NEW: PinMode>(&mut self, _ctl: &mut <Self as HL>::Ctl) {
        let gpio = unsafe { &*port_registers(P) };

        if let Some(pull_up) = NEW::PULL {
            self._set_state(pull_up.into());
        }

        let bits = ctl_bits(NEW::CNF, NEW::MD);
        let offset = Self::OFFSET;
        // NOTE(unsafe) the CTL token gives exclusive access to this half of the port
        if N < 8 {
            gpio.ctl0.modify(|r, w| unsafe {
                w.bits((r.bits() & !(0b1111 << offset)) | (bits << offset))
            });
        } else {
            gpio.ctl1.modify(|r, w| unsafe {
                w.bits((r.bits() & !(0b1111 << offset)) | (bits << offset))
            });
        }
    }

    fn set_md(&mut self, _ctl: &mut <Self as HL>::Ctl, md: u32) {
        let gpio = unsafe { &*port_registers(P) };
        let offset = Self::OFFSET;
        if N < 8 {
            gpio.ctl0.modify(|r, w| unsafe {
                w.bits((r.bits() & !(0b11 << offset)) | (md << offset))
            });
        } else {
            gpio.ctl1.modify(|r, w| unsafe {
                w.bits((r.bits() & !(0b11 << offset)) | (md << offset))
            });
        }
    }
}

impl<const P: char, const N: u8, MODE> Pin<P, N, MODE>
where
    MODE: Active,
    Self: HL,
{
    /// Configures the pin to operate as an alternate function push-pull output pin
    #[inline]
    pub fn into_alternate_push_pull(
        mut self,
        ctl: &mut <Self as HL>::Ctl,
    ) -> Pin<P, N, Alternate<PushPull>> {
        self.mode::<Alternate<PushPull>>(ctl);
        Pin::new()
    }

    /// Configures the pin to operate as an alternate function open-drain output pin
    #[inline]
    pub fn into_alternate_open_drain(
        mut self,
        ctl: &mut <Self as HL>::Ctl,
    ) -> Pin<P, N, Alternate<OpenDrain>> {
        self.mode::<Alternate<OpenDrain>>(ctl);
        Pin::new()
    }

    /// Configures the pin to operate as a floating input pin
    #[inline]
    pub fn into_floating_input(
        mut self,
        ctl: &mut <Self as HL>::Ctl,
    ) -> Pin<P, N, Input<Floating>> {
        self.mode::<Input<Floating>>(ctl);
        Pin::new()
    }

    /// Configures the pin to operate as a pulled down input pin
    #[inline]
    pub fn into_pull_down_input(
        mut self,
        ctl: &mut <Self as HL>::Ctl,
    ) -> Pin<P, N, Input<PullDown>> {
        self.mode::<Input<PullDown>>(ctl);
        Pin::new()
    }

    /// Configures the pin to operate as a pulled up input pin
    #[inline]
    pub fn into_pull_up_input(mut self, ctl: &mut <Self as HL>::Ctl) -> Pin<P, N, Input<PullUp>> {
        self.mode::<Input<PullUp>>(ctl);
        Pin::new()
    }

    /// Configures the pin to operate as an open-drain output pin, initially low
    #[inline]
    pub fn into_open_drain_output(
        self,
        ctl: &mut <Self as HL>::Ctl,
    ) -> Pin<P, N, Output<OpenDrain>> {
        self.into_open_drain_output_with_state(ctl, PinState::Low)
    }

    /// Configures the pin to operate as an open-drain output pin with the given initial state
    #[inline]
    pub fn into_open_drain_output_with_state(
        mut self,
        ctl: &mut <Self as HL>::Ctl,
        initial_state: PinState,
    ) -> Pin<P, N, Output<OpenDrain>> {
        self._set_state(initial_state);
        self.mode::<Output<OpenDrain>>(ctl);
        Pin::new()
    }

    /// Configures the pin to operate as a push-pull output pin, initially low
    #[inline]
    pub fn into_push_pull_output(self, ctl: &mut <Self as HL>::Ctl) -> Pin<P, N, Output<PushPull>> {
        self.into_push_pull_output_with_state(ctl, PinState::Low)
    }

    /// Configures the pin to operate as a push-pull output pin with the given initial state
    #[inline]
    pub fn into_push_pull_output_with_state(
        mut self,
        ctl: &mut <Self as HL>::Ctl,
        initial_state: PinState,
    ) -> Pin<P, N, Output<PushPull>> {
        self._set_state(initial_state);
        self.mode::<Output<PushPull>>(ctl);
        Pin::new()
    }

    /// Configures the pin to operate as an analog input pin
    #[inline]
    pub fn into_analog(mut self, ctl: &mut <Self as HL>::Ctl) -> Pin<P, N, Analog> {
        self.mode::<Analog>(ctl);
        Pin::new()
    }

    /// Erases the port and pin number from the type
    ///
    /// This is useful when you want to collect the pins into an array where you
    /// need all the elements to have the same type
    #[inline]
    pub fn erase(self) -> ErasedPin<MODE> {
        ErasedPin {
            port: P,
            pin: N,
            _mode: PhantomData,
        }
    }
}

impl<const P: char, const N: u8, MODE> Pin<P, N, Output<MODE>>
where
    Self: HL,
{
    /// Sets the slew rate of the output driver
    pub fn set_speed(&mut self, ctl: &mut <Self as HL>::Ctl, speed: Speed) {
        self.set_md(ctl, speed as u32);
    }
}

impl<const P: char, const N: u8, MODE> Pin<P, N, Alternate<MODE>>
where
    Self: HL,
{
    /// Sets the slew rate of the output driver
    pub fn set_speed(&mut self, ctl: &mut <Self as HL>::Ctl, speed: Speed) {
        self.set_md(ctl, speed as u32);
    }
}

impl<const P: char, const N: u8, MODE> Pin<P, N, Output<MODE>> {
    #[inline]
    pub fn set_high(&mut self) {
        self._set_high()
    }

    #[inline]
    pub fn set_low(&mut self) {
        self._set_low()
    }

    #[inline(always)]
    pub fn get_state(&self) -> PinState {
        (!self._is_set_low()).into()
    }

    #[inline(always)]
    pub fn set_state(&mut self, state: PinState) {
        self._set_state(state)
    }

    #[inline]
    pub fn is_set_high(&self) -> bool {
        !self._is_set_low()
    }

    #[inline]
    pub fn is_set_low(&self) -> bool {
        self._is_set_low()
    }

    #[inline]
    pub fn toggle(&mut self) {
        if self._is_set_low() {
            self._set_high()
        } else {
            self._set_low()
        }
    }
}

impl<const P: char, const N: u8, MODE> OutputPin for Pin<P, N, Output<MODE>> {
    type Error = Infallible;

    #[inline]
    fn set_high(&mut self) -> Result<(), Self::Error> {
        self._set_high();
        Ok(())
    }

    #[inline]
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self._set_low();
        Ok(())
    }
}

impl<const P: char, const N: u8, MODE> StatefulOutputPin for Pin<P, N, Output<MODE>> {
    #[inline]
    fn is_set_high(&self) -> Result<bool, Self::Error> {
        Ok(!self._is_set_low())
    }

    #[inline]
    fn is_set_low(&self) -> Result<bool, Self::Error> {
        Ok(self._is_set_low())
    }
}

impl<const P: char, const N: u8, MODE> ToggleableOutputPin for Pin<P, N, Output<MODE>> {
    type Error = Infallible;

    #[inline(always)]
    fn toggle(&mut self) -> Result<(), Self::Error> {
        Pin::toggle(self);
        Ok(())
    }
}

impl<const P: char, const N: u8, MODE> Pin<P, N, Input<MODE>> {
    #[inline]
    pub fn is_high(&self) -> bool {
        !self._is_low()
    }

    #[inline]
    pub fn is_low(&self) -> bool {
        self._is_low()
    }
}

impl<const P: char, const N: u8, MODE> InputPin for Pin<P, N, Input<MODE>> {
    type Error = Infallible;

    #[inline]
    fn is_high(&self) -> Result<bool, Self::Error> {
        Ok(!self._is_low())
    }

    #[inline]
    fn is_low(&self) -> Result<bool, Self::Error> {
        Ok(self._is_low())
    }
}

impl<const P: char, const N: u8> InputPin for Pin<P, N, Output<OpenDrain>> {
    type Error = Infallible;

    #[inline]
    fn is_high(&self) -> Result<bool, Self::Error> {
        Ok(!self._is_low())
    }

    #[inline]
    fn is_low(&self) -> Result<bool, Self::Error> {
        Ok(self._is_low())
    }
}

/// Pin with port and number only known at runtime
pub struct ErasedPin<MODE> {
    port: char,
    pin: u8,
    _mode: PhantomData<MODE>,
}

impl<MODE> ErasedPin<MODE> {
    /// Pin number within the port
    pub fn pin_id(&self) -> u8 {
        self.pin
    }

    /// Port number, 0 for port A
    pub fn port_id(&self) -> u8 {
        self.port as u8 - b'A'
    }

    fn block(&self) -> &crate::pac::gpioa::RegisterBlock {
        // NOTE(unsafe) only stateless or read-only registers are accessed through this
        unsafe { &*port_registers(self.port) }
    }
}

impl<MODE> ErasedPin<Output<MODE>> {
    pub fn set_high(&mut self) {
        self.block().bop.write(|w| unsafe { w.bits(1 << self.pin) });
    }

    pub fn set_low(&mut self) {
        self.block().bc.write(|w| unsafe { w.bits(1 << self.pin) });
    }

    pub fn is_set_low(&self) -> bool {
        self.block().octl.read().bits() & (1 << self.pin) == 0
    }

    pub fn toggle(&mut self) {
        if self.is_set_low() {
            self.set_high()
        } else {
            self.set_low()
        }
    }
}

impl<MODE> OutputPin for ErasedPin<Output<MODE>> {
    type Error = Infallible;

    fn set_high(&mut self) -> Result<(), Self::Error> {
        ErasedPin::set_high(self);
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), Self::Error> {
        ErasedPin::set_low(self);
        Ok(())
    }
}

impl<MODE> InputPin for ErasedPin<Input<MODE>> {
    type Error = Infallible;

    fn is_high(&self) -> Result<bool, Self::Error> {
        self.is_low().map(|low| !low)
    }

    fn is_low(&self) -> Result<bool, Self::Error> {
        Ok(self.block().istat.read().bits() & (1 << self.pin) == 0)
    }
}

macro_rules! gpio {
    ($GPIOX:ident, $gpiox:ident, $port_id:expr, [
        $($PXi:ident: ($pxi:ident, $pin_number:expr $(, $MODE:ty)?),)+
    ]) => {
        /// GPIO
        pub mod $gpiox {
            use crate::pac::$GPIOX;
            use crate::rcu::{APB2, Enable, Reset};
            use super::{Ctl, Floating, GpioExt, Input, Pin};
            #[allow(unused)]
            use super::Debugger;

            /// GPIO parts
            pub struct Parts {
                /// Opaque CTL0 register
                pub crl: Ctl<$port_id, false>,
                /// Opaque CTL1 register
                pub crh: Ctl<$port_id, true>,
                $(
                    /// Pin
                    pub $pxi: $PXi $(<$MODE>)?,
                )+
            }

            $(
                pub type $PXi<MODE = Input<Floating>> = Pin<$port_id, $pin_number, MODE>;
            )+

            impl GpioExt for $GPIOX {
                type Parts = Parts;

                fn split(self, apb2: &mut APB2) -> Parts {
                    $GPIOX::enable(apb2);
                    $GPIOX::reset(apb2);

                    Parts {
                        crl: Ctl::<$port_id, false>(()),
                        crh: Ctl::<$port_id, true>(()),
                        $(
                            $pxi: $PXi::new(),
                        )+
                    }
                }
            }
        }

        pub use $gpiox::{ $($PXi,)+ };
    }
}

gpio!(GPIOA, gpioa, 'A', [
    PA0: (pa0, 0),
    PA1: (pa1, 1),
    PA2: (pa2, 2),
    PA3: (pa3, 3),
    PA4: (pa4, 4),
    PA5: (pa5, 5),
    PA6: (pa6, 6),
    PA7: (pa7, 7),
    PA8: (pa8, 8),
    PA9: (pa9, 9),
    PA10: (pa10, 10),
    PA11: (pa11, 11),
    PA12: (pa12, 12),
    PA13: (pa13, 13, Debugger),
    PA14: (pa14, 14, Debugger),
    PA15: (pa15, 15, Debugger),
]);

gpio!(GPIOB, gpiob, 'B', [
    PB0: (pb0, 0),
    PB1: (pb1, 1),
    PB2: (pb2, 2),
    PB3: (pb3, 3, Debugger),
    PB4: (pb4, 4, Debugger),
    PB5: (pb5, 5),
    PB6: (pb6, 6),
    PB7: (pb7, 7),
    PB8: (pb8, 8),
    PB9: (pb9, 9),
    PB10: (pb10, 10),
    PB11: (pb11, 11),
    PB12: (pb12, 12),
    PB13: (pb13, 13),
    PB14: (pb14, 14),
    PB15: (pb15, 15),
]);

gpio!(GPIOC, gpioc, 'C', [
    PC0: (pc0, 0),
    PC1: (pc1, 1),
    PC2: (pc2, 2),
    PC3: (pc3, 3),
    PC4: (pc4, 4),
    PC5: (pc5, 5),
    PC6: (pc6, 6),
    PC7: (pc7, 7),
    PC8: (pc8, 8),
    PC9: (pc9, 9),
    PC10: (pc10, 10),
    PC11: (pc11, 11),
    PC12: (pc12, 12),
    PC13: (pc13, 13),
    PC14: (pc14, 14),
    PC15: (pc15, 15),
]);

gpio!(GPIOD, gpiod, 'D', [
    PD0: (pd0, 0),
    PD1: (pd1, 1),
    PD2: (pd2, 2),
    PD3: (pd3, 3),
    PD4: (pd4, 4),
    PD5: (pd5, 5),
    PD6: (pd6, 6),
    PD7: (pd7, 7),
    PD8: (pd8, 8),
    PD9: (pd9, 9),
    PD10: (pd10, 10),
    PD11: (pd11, 11),
    PD12: (pd12, 12),
    PD13: (pd13, 13),
    PD14: (pd14, 14),
    PD15: (pd15, 15),
]);

gpio!(GPIOE, gpioe, 'E', [
    PE0: (pe0, 0),
    PE1: (pe1, 1),
    PE2: (pe2, 2),
    PE3: (pe3, 3),
    PE4: (pe4, 4),
    PE5: (pe5, 5),
    PE6: (pe6, 6),
    PE7: (pe7, 7),
    PE8: (pe8, 8),
    PE9: (pe9, 9),
    PE10: (pe10, 10),
    PE11: (pe11, 11),
    PE12: (pe12, 12),
    PE13: (pe13, 13),
    PE14: (pe14, 14),
    PE15: (pe15, 15),
]);

fn port_registers(port: char) -> *const crate::pac::gpioa::RegisterBlock {
    match port {
        'A' => crate::pac::GPIOA::ptr(),
        'B' => crate::pac::GPIOB::ptr() as _,
        'C' => crate::pac::GPIOC::ptr() as _,
        'D' => crate::pac::GPIOD::ptr() as _,
        _ => crate::pac::GPIOE::ptr() as _,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_encoding() {
        assert_eq!(ctl_bits(Input::<Floating>::CNF, Input::<Floating>::MD), 0b0100);
        assert_eq!(ctl_bits(Input::<PullUp>::CNF, Input::<PullUp>::MD), 0b1000);
        assert_eq!(ctl_bits(Output::<PushPull>::CNF, Output::<PushPull>::MD), 0b0011);
        assert_eq!(ctl_bits(Output::<OpenDrain>::CNF, Output::<OpenDrain>::MD), 0b0111);
        assert_eq!(ctl_bits(Alternate::<PushPull>::CNF, Alternate::<PushPull>::MD), 0b1011);
        assert_eq!(ctl_bits(Alternate::<OpenDrain>::CNF, Alternate::<OpenDrain>::MD), 0b1111);
        assert_eq!(ctl_bits(Analog::CNF, Analog::MD), 0b0000);
        assert_eq!(Input::<PullUp>::PULL, Some(true));
        assert_eq!(Input::<PullDown>::PULL, Some(false));
    }

    #[test]
    fn field_offsets_and_ids() {
        assert_eq!(PA3::<Input<Floating>>::OFFSET, 12);
        assert_eq!(PC13::<Input<Floating>>::OFFSET, 20);
        let pin = PE1::<Input<Floating>>::new();
        assert_eq!(pin.port_id(), 4);
        assert_eq!(pin.pin_id(), 1);
        let erased = pin.erase();
        assert_eq!((erased.port_id(), erased.pin_id()), (4, 1));
    }
}
