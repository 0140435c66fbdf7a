// Copyright 2023 The gd32vf103-hal authors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Pulse Width Modulation
//!
//! PWM mode 0 on the general purpose timers, edge aligned and counting up. Pins use the
//! default mapping:
//!
//! | Timer  | CH0 | CH1 | CH2 | CH3 |
//! |--------|-----|-----|-----|-----|
//! | TIMER1 | PA0 | PA1 | PA2 | PA3 |
//! | TIMER2 | PA6 | PA7 | PB0 | PB1 |
//! | TIMER3 | PB6 | PB7 | PB8 | PB9 |
//! | TIMER4 | PA0 | PA1 | PA2 | PA3 |
//!
//! ```ignore
//! let pins = (
//!     gpioa.pa6.into_alternate_push_pull(&mut gpioa.crl),
//!     gpioa.pa7.into_alternate_push_pull(&mut gpioa.crl),
//! );
//! let mut pwm = Timer::timer2(p.TIMER2, &clocks, &mut rcu.apb1).pwm(pins, 1.khz());
//! pwm.set_duty(Channel::C0, pwm.get_max_duty() / 4);
//! pwm.enable(Channel::C0);
//! ```

use core::marker::PhantomData;

use crate::gpio::gpioa::{PA0, PA1, PA2, PA3, PA6, PA7};
use crate::gpio::gpiob::{PB0, PB1, PB6, PB7, PB8, PB9};
use crate::gpio::{Alternate, PushPull};
use crate::pac::{TIMER1, TIMER2, TIMER3, TIMER4};
use crate::time::Hertz;
use crate::timer::{compute_psc_car, Timer};

pub use crate::timer::Channel;

// CTL0
const CEN: u32 = 1 << 0;
const ARSE: u32 = 1 << 7;
// SWEVG
const UPG: u32 = 1 << 0;

/// Output compare mode PWM0 with shadowed compare value, in a channel's `chctl` byte
const PWM0_PRELOAD: u32 = (0b110 << 4) | (1 << 3);

fn chctl_bits(channel: Channel) -> (u32, u32) {
    let shift = (channel as u32 % 2) * 8;
    (0xff << shift, PWM0_PRELOAD << shift)
}

fn chctl2_enable(channel: Channel) -> u32 {
    1 << (4 * channel as u32)
}

/// Pin usable as the output of one timer channel
pub trait PwmPin<TIM> {
    const CHANNEL: Channel;
}

/// One or more PWM pins of a timer
pub trait Pins<TIM> {
    /// Bit n set when channel n has a pin
    const CHANNELS: u8;
}

impl<TIM, A: PwmPin<TIM>, B: PwmPin<TIM>> Pins<TIM> for (A, B) {
    const CHANNELS: u8 = (1 << A::CHANNEL as u8) | (1 << B::CHANNEL as u8);
}

impl<TIM, A: PwmPin<TIM>, B: PwmPin<TIM>, C: PwmPin<TIM>> Pins<TIM> for (A, B, C) {
    const CHANNELS: u8 =
        (1 << A::CHANNEL as u8) | (1 << B::CHANNEL as u8) | (1 << C::CHANNEL as u8);
}

impl<TIM, A: PwmPin<TIM>, B: PwmPin<TIM>, C: PwmPin<TIM>, D: PwmPin<TIM>> Pins<TIM>
    for (A, B, C, D)
{
    const CHANNELS: u8 = (1 << A::CHANNEL as u8)
        | (1 << B::CHANNEL as u8)
        | (1 << C::CHANNEL as u8)
        | (1 << D::CHANNEL as u8);
}

macro_rules! pwm_pins {
    ($($TIMX:ident: [$C0:ident, $C1:ident, $C2:ident, $C3:ident],)+) => {
        $(
            impl PwmPin<$TIMX> for $C0<Alternate<PushPull>> {
                const CHANNEL: Channel = Channel::C0;
            }
            impl Pins<$TIMX> for $C0<Alternate<PushPull>> {
                const CHANNELS: u8 = 0b0001;
            }
            impl Pins<$TIMX> for $C1<Alternate<PushPull>> {
                const CHANNELS: u8 = 0b0010;
            }
            impl Pins<$TIMX> for $C2<Alternate<PushPull>> {
                const CHANNELS: u8 = 0b0100;
            }
            impl Pins<$TIMX> for $C3<Alternate<PushPull>> {
                const CHANNELS: u8 = 0b1000;
            }
            impl PwmPin<$TIMX> for $C1<Alternate<PushPull>> {
                const CHANNEL: Channel = Channel::C1;
            }
            impl PwmPin<$TIMX> for $C2<Alternate<PushPull>> {
                const CHANNEL: Channel = Channel::C2;
            }
            impl PwmPin<$TIMX> for $C3<Alternate<PushPull>> {
                const CHANNEL: Channel = Channel::C3;
            }
        )+
    };
}

pwm_pins! {
    TIMER1: [PA0, PA1, PA2, PA3],
    TIMER2: [PA6, PA7, PB0, PB1],
    TIMER3: [PB6, PB7, PB8, PB9],
    TIMER4: [PA0, PA1, PA2, PA3],
}

/// PWM outputs of a timer
pub struct Pwm<TIM, PINS> {
    tim: TIM,
    clk: Hertz,
    channels: u8,
    _pins: PhantomData<PINS>,
}

macro_rules! pwm {
    ($($TIMX:ident,)+) => {
        $(
            impl Timer<$TIMX> {
                /// Configures every channel that has a pin in PWM mode 0 at `freq`.
                ///
                /// The outputs stay disabled until [`Pwm::enable`].
                pub fn pwm<PINS, T>(self, _pins: PINS, freq: T) -> Pwm<$TIMX, PINS>
                where
                    PINS: Pins<$TIMX>,
                    T: Into<Hertz>,
                {
                    let Timer { tim, clk } = self;
                    let channels = PINS::CHANNELS;
                    for channel in [Channel::C0, Channel::C1, Channel::C2, Channel::C3] {
                        if channels & (1 << channel as u8) == 0 {
                            continue;
                        }
                        let (mask, bits) = chctl_bits(channel);
                        match channel {
                            Channel::C0 | Channel::C1 => tim.chctl0_output().modify(|r, w| unsafe {
                                w.bits(((r.bits() as u32 & !mask) | bits) as _)
                            }),
                            Channel::C2 | Channel::C3 => tim.chctl1_output().modify(|r, w| unsafe {
                                w.bits(((r.bits() as u32 & !mask) | bits) as _)
                            }),
                        }
                    }

                    let mut pwm = Pwm { tim, clk, channels, _pins: PhantomData };
                    pwm.set_period(freq.into());
                    pwm.tim.ctl0.write(|w| unsafe { w.bits((ARSE | CEN) as _) });
                    pwm
                }
            }

            impl<PINS> Pwm<$TIMX, PINS> {
                fn has(&self, channel: Channel) -> bool {
                    self.channels & (1 << channel as u8) != 0
                }

                /// Enables the output of a channel that has a pin
                pub fn enable(&mut self, channel: Channel) {
                    if self.has(channel) {
                        let bit = chctl2_enable(channel);
                        self.tim.chctl2.modify(|r, w| unsafe { w.bits((r.bits() as u32 | bit) as _) });
                    }
                }

                pub fn disable(&mut self, channel: Channel) {
                    let bit = chctl2_enable(channel);
                    self.tim.chctl2.modify(|r, w| unsafe { w.bits((r.bits() as u32 & !bit) as _) });
                }

                pub fn get_duty(&self, channel: Channel) -> u16 {
                    (match channel {
                        Channel::C0 => self.tim.ch0cv.read().bits(),
                        Channel::C1 => self.tim.ch1cv.read().bits(),
                        Channel::C2 => self.tim.ch2cv.read().bits(),
                        Channel::C3 => self.tim.ch3cv.read().bits(),
                    }) as u16
                }

                /// Sets the high time; values above [`get_max_duty`](Self::get_max_duty)
                /// keep the output high.
                pub fn set_duty(&mut self, channel: Channel, duty: u16) {
                    let duty = u32::from(duty);
                    match channel {
                        Channel::C0 => self.tim.ch0cv.write(|w| unsafe { w.bits(duty as _) }),
                        Channel::C1 => self.tim.ch1cv.write(|w| unsafe { w.bits(duty as _) }),
                        Channel::C2 => self.tim.ch2cv.write(|w| unsafe { w.bits(duty as _) }),
                        Channel::C3 => self.tim.ch3cv.write(|w| unsafe { w.bits(duty as _) }),
                    }
                }

                /// Duty value of a permanently high output
                pub fn get_max_duty(&self) -> u16 {
                    (self.tim.car.read().bits() as u16).saturating_add(1)
                }

                pub fn get_period(&self) -> Hertz {
                    let psc = self.tim.psc.read().bits() as u32;
                    let car = self.tim.car.read().bits() as u32;
                    Hertz(self.clk.0 / ((psc + 1) * (car + 1)))
                }

                /// Changes the frequency; duty values are not rescaled.
                pub fn set_period(&mut self, freq: Hertz) {
                    let (psc, car) = compute_psc_car(self.clk, freq);
                    self.tim.psc.write(|w| unsafe { w.bits(u32::from(psc) as _) });
                    self.tim.car.write(|w| unsafe { w.bits(u32::from(car) as _) });
                    self.tim.swevg.write(|w| unsafe { w.bits(UPG as _) });
                }

                /// Stops the timer and returns it
                pub fn release(self) -> Timer<$TIMX> {
                    self.tim.ctl0.write(|w| unsafe { w.bits(0) });
                    self.tim.chctl2.write(|w| unsafe { w.bits(0) });
                    Timer { tim: self.tim, clk: self.clk }
                }
            }

            impl<PINS> embedded_hal::Pwm for Pwm<$TIMX, PINS> {
                type Channel = Channel;
                type Duty = u16;
                type Time = Hertz;

                fn disable(&mut self, channel: Channel) {
                    Pwm::<$TIMX, PINS>::disable(self, channel)
                }

                fn enable(&mut self, channel: Channel) {
                    Pwm::<$TIMX, PINS>::enable(self, channel)
                }

                fn get_duty(&self, channel: Channel) -> u16 {
                    Pwm::<$TIMX, PINS>::get_duty(self, channel)
                }

                fn get_max_duty(&self) -> u16 {
                    Pwm::<$TIMX, PINS>::get_max_duty(self)
                }

                fn get_period(&self) -> Hertz {
                    Pwm::<$TIMX, PINS>::get_period(self)
                }

                fn set_duty(&mut self, channel: Channel, duty: u16) {
                    Pwm::<$TIMX, PINS>::set_duty(self, channel, duty)
                }

                fn set_period<P>(&mut self, period: P)
                where
                    P: Into<Hertz>,
                {
                    Pwm::<$TIMX, PINS>::set_period(self, period.into())
                }
            }
        )+
    };
}

pwm! {
    TIMER1,
    TIMER2,
    TIMER3,
    TIMER4,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ch0;
    struct Ch2;
    struct Tim;

    impl PwmPin<Tim> for Ch0 {
        const CHANNEL: Channel = Channel::C0;
    }

    impl PwmPin<Tim> for Ch2 {
        const CHANNEL: Channel = Channel::C2;
    }

    #[test]
    fn channel_masks() {
        assert_eq!(<(Ch0, Ch2) as Pins<Tim>>::CHANNELS, 0b0101);
        assert_eq!(<(Ch2, Ch0, Ch2) as Pins<Tim>>::CHANNELS, 0b0101);
    }

    #[test]
    fn compare_mode_fields() {
        assert_eq!(chctl_bits(Channel::C0), (0xff, 0x68));
        assert_eq!(chctl_bits(Channel::C3), (0xff00, 0x6800));
        assert_eq!(chctl2_enable(Channel::C2), 1 << 8);
    }
}
