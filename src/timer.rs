// Copyright 2023 The gd32vf103-hal authors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Timers
//!
//! Every timer can count down periodically ([`CountDownTimer`]). The general purpose timers
//! TIMER1 to TIMER4 also capture input edges ([`InputCapture`]) and generate PWM
//! ([`crate::pwm`]).
//!
//! TIMER0 runs on the APB2 timer clock, the others on the APB1 timer clock.
//!
//! ```ignore
//! let mut timer = Timer::timer1(p.TIMER1, &clocks, &mut rcu.apb1).start_count_down(2.hz());
//! timer.listen(Event::Update);
//! ```

use cast::u16;
use embedded_hal::timer::{Cancel, CountDown, Periodic};
use void::Void;

use crate::pac::{TIMER0, TIMER1, TIMER2, TIMER3, TIMER4, TIMER5, TIMER6};
use crate::rcu::{Clocks, Enable, Reset, APB1, APB2};
use crate::time::Hertz;

// CTL0
const CEN: u32 = 1 << 0;
const UPS: u32 = 1 << 2;
const ARSE: u32 = 1 << 7;

// DMAINTEN / INTF
const UPIE: u32 = 1 << 0;
const UPIF: u32 = 1 << 0;

// SWEVG
const UPG: u32 = 1 << 0;

/// Interrupt events
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// Timer timed out / count down ended
    Update,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// Timer is canceled
    Canceled,
}

/// Hardware timers
pub struct Timer<TIM> {
    pub(crate) tim: TIM,
    pub(crate) clk: Hertz,
}

/// Timer counting down to an update event
pub struct CountDownTimer<TIM> {
    tim: TIM,
    clk: Hertz,
}

/// Prescaler and auto-reload values giving `freq` from `clk`.
///
/// Picks the smallest prescaler that fits the reload value in 16 bits.
pub(crate) fn compute_psc_car(clk: Hertz, freq: Hertz) -> (u16, u16) {
    let ticks = (clk.0 / freq.0.max(1)).max(1);
    let psc = u16((ticks - 1) >> 16).unwrap_or(u16::MAX);
    let car = u16(ticks / (u32::from(psc) + 1) - 1).unwrap_or(u16::MAX);
    (psc, car)
}

macro_rules! hal {
    ($($TIMX:ident: ($timX:ident, $APBX:ident, $pclk_tim:ident),)+) => {
        $(
            impl Timer<$TIMX> {
                /// Initialize timer
                pub fn $timX(tim: $TIMX, clocks: &Clocks, apb: &mut $APBX) -> Self {
                    // enable and reset peripheral to a clean slate state
                    $TIMX::enable(apb);
                    $TIMX::reset(apb);

                    Self { tim, clk: clocks.$pclk_tim() }
                }

                /// Starts timer in count down mode at a given frequency
                pub fn start_count_down<T>(self, timeout: T) -> CountDownTimer<$TIMX>
                where
                    T: Into<Hertz>,
                {
                    let Self { tim, clk } = self;
                    let mut timer = CountDownTimer { tim, clk };
                    timer.start(timeout);
                    timer
                }

                /// Timer clock
                pub fn clock(&self) -> Hertz {
                    self.clk
                }

                /// Releases the TIMER peripheral
                pub fn release(self) -> $TIMX {
                    self.tim
                }
            }

            impl CountDownTimer<$TIMX> {
                /// Starts listening for an `event`
                pub fn listen(&mut self, event: Event) {
                    match event {
                        Event::Update => self.tim.dmainten.modify(|r, w| unsafe {
                            w.bits((r.bits() as u32 | UPIE) as _)
                        }),
                    }
                }

                /// Stops listening for an `event`
                pub fn unlisten(&mut self, event: Event) {
                    match event {
                        Event::Update => self.tim.dmainten.modify(|r, w| unsafe {
                            w.bits((r.bits() as u32 & !UPIE) as _)
                        }),
                    }
                }

                /// Clears the update interrupt flag
                pub fn clear_update(&mut self) {
                    self.tim.intf.modify(|r, w| unsafe { w.bits((r.bits() as u32 & !UPIF) as _) });
                }

                /// Whether an update event occurred since the flag was last cleared
                pub fn is_update(&self) -> bool {
                    self.tim.intf.read().bits() as u32 & UPIF != 0
                }

                /// Current counter value
                pub fn counter(&self) -> u16 {
                    self.tim.cnt.read().bits() as u16
                }

                fn stop(&mut self) {
                    self.tim.ctl0.modify(|r, w| unsafe { w.bits((r.bits() as u32 & !CEN) as _) });
                }

                /// Stopping timer in count down mode and returning the `Timer`
                pub fn release(mut self) -> Timer<$TIMX> {
                    self.stop();
                    self.unlisten(Event::Update);
                    Timer { tim: self.tim, clk: self.clk }
                }
            }

            impl CountDown for CountDownTimer<$TIMX> {
                type Time = Hertz;

                fn start<T>(&mut self, timeout: T)
                where
                    T: Into<Hertz>,
                {
                    self.stop();

                    let (psc, car) = compute_psc_car(self.clk, timeout.into());
                    self.tim.psc.write(|w| unsafe { w.bits(u32::from(psc) as _) });
                    self.tim.car.write(|w| unsafe { w.bits(u32::from(car) as _) });

                    // load the prescaler without raising an update interrupt
                    self.tim.ctl0.write(|w| unsafe { w.bits(UPS as _) });
                    self.tim.swevg.write(|w| unsafe { w.bits(UPG as _) });
                    self.clear_update();
                    self.tim.cnt.write(|w| unsafe { w.bits(0) });

                    self.tim.ctl0.write(|w| unsafe { w.bits((ARSE | CEN) as _) });
                }

                fn wait(&mut self) -> nb::Result<(), Void> {
                    if !self.is_update() {
                        Err(nb::Error::WouldBlock)
                    } else {
                        self.clear_update();
                        Ok(())
                    }
                }
            }

            impl Cancel for CountDownTimer<$TIMX> {
                type Error = Error;

                fn cancel(&mut self) -> Result<(), Self::Error> {
                    if self.tim.ctl0.read().bits() as u32 & CEN == 0 {
                        return Err(Error::Canceled);
                    }
                    self.stop();
                    Ok(())
                }
            }

            impl Periodic for CountDownTimer<$TIMX> {}
        )+
    };
}

hal! {
    TIMER0: (timer0, APB2, pclk2_tim),
    TIMER1: (timer1, APB1, pclk1_tim),
    TIMER2: (timer2, APB1, pclk1_tim),
    TIMER3: (timer3, APB1, pclk1_tim),
    TIMER4: (timer4, APB1, pclk1_tim),
    TIMER5: (timer5, APB1, pclk1_tim),
    TIMER6: (timer6, APB1, pclk1_tim),
}

/// Capture/compare channel of a general purpose timer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    C0 = 0,
    C1 = 1,
    C2 = 2,
    C3 = 3,
}

/// Edge latched by an input capture channel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

/// Capture mode field of `chctl0`/`chctl1`: channel input mapped to its own pin.
const CHMS_DIRECT: u32 = 0b01;
/// Digital filter: fDTS, 8 samples
const CHCAPFLT_8: u32 = 0b0011 << 4;

/// Shift of the channel's byte in `chctl0`/`chctl1`
fn chctl_shift(channel: Channel) -> u32 {
    (channel as u32 % 2) * 8
}

/// Bits of the channel in `chctl2`: enable and polarity
fn chctl2_bits(channel: Channel, edge: Edge) -> u32 {
    let polarity = match edge {
        Edge::Rising => 0,
        Edge::Falling => 0b10,
    };
    (0b01 | polarity) << (4 * channel as u32)
}

/// Input capture on one channel of a general purpose timer
///
/// The counter runs freely over the full 16-bit range at the configured tick rate.
pub struct InputCapture<TIM> {
    tim: TIM,
    clk: Hertz,
    channel: Channel,
    tick: Hertz,
}

macro_rules! capture {
    ($($TIMX:ident,)+) => {
        $(
            impl InputCapture<$TIMX> {
                /// Captures `edge` on `channel`, counting at `tick`
                pub fn new(timer: Timer<$TIMX>, channel: Channel, edge: Edge, tick: Hertz) -> Self {
                    let Timer { tim, clk } = timer;
                    let psc = (clk.0 / tick.0.max(1)).max(1) - 1;
                    let psc = u16(psc).unwrap_or(u16::MAX);

                    tim.ctl0.write(|w| unsafe { w.bits(0) });
                    tim.psc.write(|w| unsafe { w.bits(u32::from(psc) as _) });
                    tim.car.write(|w| unsafe { w.bits(0xffff) });

                    let shift = chctl_shift(channel);
                    let mode = (CHMS_DIRECT | CHCAPFLT_8) << shift;
                    let mask = 0xff << shift;
                    match channel {
                        Channel::C0 | Channel::C1 => tim.chctl0_output().modify(|r, w| unsafe {
                            w.bits(((r.bits() as u32 & !mask) | mode) as _)
                        }),
                        Channel::C2 | Channel::C3 => tim.chctl1_output().modify(|r, w| unsafe {
                            w.bits(((r.bits() as u32 & !mask) | mode) as _)
                        }),
                    }
                    let enable_mask = 0b1111 << (4 * channel as u32);
                    tim.chctl2.modify(|r, w| unsafe {
                        w.bits(((r.bits() as u32 & !enable_mask) | chctl2_bits(channel, edge)) as _)
                    });

                    tim.swevg.write(|w| unsafe { w.bits(UPG as _) });
                    tim.intf.write(|w| unsafe { w.bits(0) });
                    tim.ctl0.write(|w| unsafe { w.bits(CEN as _) });

                    let tick = Hertz(clk.0 / (u32::from(psc) + 1));
                    InputCapture { tim, clk, channel, tick }
                }

                fn flag(&self) -> u32 {
                    1 << (self.channel as u32 + 1)
                }

                /// Enables the capture interrupt
                pub fn listen(&mut self) {
                    let bit = self.flag();
                    self.tim.dmainten.modify(|r, w| unsafe { w.bits((r.bits() as u32 | bit) as _) });
                }

                /// Disables the capture interrupt
                pub fn unlisten(&mut self) {
                    let bit = self.flag();
                    self.tim.dmainten.modify(|r, w| unsafe { w.bits((r.bits() as u32 & !bit) as _) });
                }

                /// Whether a new value was captured
                pub fn captured(&self) -> bool {
                    self.tim.intf.read().bits() as u32 & self.flag() != 0
                }

                /// Whether a capture was lost because the previous one was not read
                pub fn overcaptured(&self) -> bool {
                    self.tim.intf.read().bits() as u32 & (self.flag() << 8) != 0
                }

                pub fn clear_overcapture(&mut self) {
                    let bit = self.flag() << 8;
                    self.tim.intf.modify(|r, w| unsafe { w.bits((r.bits() as u32 & !bit) as _) });
                }

                /// Reads the captured counter value, which clears the capture flag
                pub fn read(&mut self) -> u16 {
                    (match self.channel {
                        Channel::C0 => self.tim.ch0cv.read().bits(),
                        Channel::C1 => self.tim.ch1cv.read().bits(),
                        Channel::C2 => self.tim.ch2cv.read().bits(),
                        Channel::C3 => self.tim.ch3cv.read().bits(),
                    }) as u16
                }

                /// Counter rate
                pub fn tick(&self) -> Hertz {
                    self.tick
                }

                /// Stops capturing and returns the timer
                pub fn release(self) -> Timer<$TIMX> {
                    self.tim.ctl0.write(|w| unsafe { w.bits(0) });
                    self.tim.chctl2.write(|w| unsafe { w.bits(0) });
                    self.tim.dmainten.write(|w| unsafe { w.bits(0) });
                    Timer { tim: self.tim, clk: self.clk }
                }
            }
        )+
    };
}

capture! {
    TIMER1,
    TIMER2,
    TIMER3,
    TIMER4,
}

/// Turns successive capture values into a frequency
///
/// The counter is assumed to wrap at most once between two captures.
#[derive(Clone, Copy, Debug)]
pub struct FrequencyMeter {
    tick: Hertz,
    last: Option<u16>,
}

impl FrequencyMeter {
    pub const fn new(tick: Hertz) -> Self {
        Self { tick, last: None }
    }

    /// Feeds a capture; from the second one on returns the frequency of the input.
    pub fn push(&mut self, capture: u16) -> Option<Hertz> {
        let last = self.last.replace(capture)?;
        let period = capture.wrapping_sub(last);
        if period == 0 {
            None
        } else {
            Some(Hertz(self.tick.0 / u32::from(period)))
        }
    }

    /// Forgets the previous capture
    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prescaler_and_reload() {
        assert_eq!(compute_psc_car(Hertz(108_000_000), Hertz(1)), (1647, 65532));
        assert_eq!(compute_psc_car(Hertz(108_000_000), Hertz(1_000)), (1, 53999));
        assert_eq!(compute_psc_car(Hertz(8_000_000), Hertz(10)), (12, 61537));
        // faster than the timer clock degenerates to the shortest period
        assert_eq!(compute_psc_car(Hertz(8_000_000), Hertz(16_000_000)), (0, 0));
    }

    #[test]
    fn capture_channel_fields() {
        assert_eq!(chctl_shift(Channel::C0), 0);
        assert_eq!(chctl_shift(Channel::C1), 8);
        assert_eq!(chctl_shift(Channel::C2), 0);
        assert_eq!(chctl2_bits(Channel::C0, Edge::Rising), 0b01);
        assert_eq!(chctl2_bits(Channel::C3, Edge::Falling), 0b11 << 12);
    }

    #[test]
    fn frequency_from_captures() {
        let mut meter = FrequencyMeter::new(Hertz(1_000_000));
        assert_eq!(meter.push(100), None);
        assert_eq!(meter.push(1_100), Some(Hertz(1_000)));
        // counter wrapped between captures
        assert_eq!(meter.push(600), Some(Hertz(15)));
        assert_eq!(meter.push(600), None);

        meter.reset();
        assert_eq!(meter.push(10), None);
    }
}
