// Copyright 2023 The gd32vf103-hal authors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Controller Area Network (CAN) Interface
//!
//! The CAN cores are driven by [`bxcan`]; this module enables the clocks, routes the pins and
//! computes bit timings.
//!
//! ## Alternate function remapping
//!
//! TX: Alternate Push-Pull Output
//! RX: Input Floating Input
//!
//! ### CAN0
//!
//! | Function | NoRemap |     Remap     |
//! |----------|---------|---------------|
//! | TX       | PA12    | PB9   | PD1   |
//! | RX       | PA11    | PB8   | PD0   |
//!
//! ### CAN1
//!
//! | Function | NoRemap | Remap |
//! |----------|---------|-------|
//! | TX       | PB13    | PB6   |
//! | RX       | PB12    | PB5   |

use bxcan::{Frame, Id};

use crate::afio::Afio;
use crate::gpio::{
    gpioa::{PA11, PA12},
    gpiob::{PB12, PB13, PB5, PB6, PB8, PB9},
    gpiod::{PD0, PD1},
    Alternate, Floating, Input, PushPull,
};
use crate::handoff::{Deadline, ErrorCounter, Slot, Timeout};
use crate::pac::{CAN0, CAN1};
use crate::rcu::APB1;
use crate::time::{Bps, Hertz};

mod sealed {
    pub trait Sealed {}
}

pub trait Pins: sealed::Sealed {
    type Instance;
    fn remap(afio: &mut Afio);
}

macro_rules! pins {
    ($($TX:ident, $RX:ident => $CAN:ident: |$afio:ident| $remap:expr;)+) => {
        $(
            impl sealed::Sealed for ($TX<Alternate<PushPull>>, $RX<Input<Floating>>) {}
            impl Pins for ($TX<Alternate<PushPull>>, $RX<Input<Floating>>) {
                type Instance = $CAN;

                fn remap($afio: &mut Afio) {
                    $remap
                }
            }
        )+
    };
}

pins! {
    PA12, PA11 => CAN0: |afio| afio.remap_can0(0b00);
    PB9, PB8 => CAN0: |afio| afio.remap_can0(0b10);
    PD1, PD0 => CAN0: |afio| afio.remap_can0(0b11);
    PB13, PB12 => CAN1: |afio| afio.remap_can1(false);
    PB6, PB5 => CAN1: |afio| afio.remap_can1(true);
}

/// Interface to the CAN peripheral.
pub struct Can<Instance> {
    _peripheral: Instance,
}

impl<Instance> Can<Instance>
where
    Instance: crate::rcu::Enable<Bus = APB1> + crate::rcu::Reset,
{
    /// Creates a CAN interface.
    pub fn new(can: Instance, apb: &mut APB1) -> Can<Instance> {
        Instance::enable(apb);
        Instance::reset(apb);
        Can { _peripheral: can }
    }

    /// Routes CAN TX signals and RX signals to pins.
    pub fn assign_pins<P>(&self, _pins: P, afio: &mut Afio)
    where
        P: Pins<Instance = Instance>,
    {
        P::remap(afio);
    }
}

unsafe impl bxcan::Instance for Can<CAN0> {
    const REGISTERS: *mut bxcan::RegisterBlock = CAN0::ptr() as *mut _;
}

unsafe impl bxcan::Instance for Can<CAN1> {
    const REGISTERS: *mut bxcan::RegisterBlock = CAN1::ptr() as *mut _;
}

unsafe impl bxcan::FilterOwner for Can<CAN0> {
    const NUM_FILTER_BANKS: u8 = 28;
}

unsafe impl bxcan::MasterInstance for Can<CAN0> {}

/// Bit timing segments, in time quanta
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitTiming {
    pub prescaler: u16,
    /// Time segment before the sample point, propagation included
    pub bs1: u8,
    /// Time segment after the sample point
    pub bs2: u8,
    /// Resynchronization jump width
    pub sjw: u8,
}

impl BitTiming {
    /// Finds the timing with the most time quanta per bit and a sample point near 87.5 %.
    ///
    /// Returns `None` if the bitrate cannot be derived exactly from `pclk1`.
    pub fn for_bitrate(pclk1: Hertz, bitrate: Bps) -> Option<Self> {
        if bitrate.0 == 0 || pclk1.0 % bitrate.0 != 0 {
            return None;
        }
        let quanta = pclk1.0 / bitrate.0;
        (1..=1024_u32)
            .filter(|prescaler| quanta % prescaler == 0)
            .find_map(|prescaler| {
                let tq = quanta / prescaler;
                if !(8..=25).contains(&tq) {
                    return None;
                }
                // the sync segment takes one quantum before BS1
                let bs1 = (tq * 7 + 4) / 8 - 1;
                let bs2 = tq - 1 - bs1;
                if !(1..=16).contains(&bs1) || !(1..=8).contains(&bs2) {
                    return None;
                }
                Some(BitTiming {
                    prescaler: prescaler as u16,
                    bs1: bs1 as u8,
                    bs2: bs2 as u8,
                    sjw: 1,
                })
            })
    }

    /// Value of the bit timing register, for `bxcan::CanBuilder::set_bit_timing`
    pub fn btr(&self) -> u32 {
        (u32::from(self.sjw - 1) << 24)
            | (u32::from(self.bs2 - 1) << 20)
            | (u32::from(self.bs1 - 1) << 16)
            | u32::from(self.prescaler - 1)
    }

    /// Sample point in tenths of a percent
    pub fn sample_point(&self) -> u32 {
        let total = 1 + u32::from(self.bs1) + u32::from(self.bs2);
        (1 + u32::from(self.bs1)) * 1000 / total
    }
}

/// A received frame, copied out of the mailbox
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReceivedFrame {
    /// Raw identifier
    pub id: u32,
    pub extended: bool,
    pub remote: bool,
    pub dlc: u8,
    pub data: [u8; 8],
}

impl ReceivedFrame {
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.dlc.min(8))]
    }
}

impl From<&Frame> for ReceivedFrame {
    fn from(frame: &Frame) -> Self {
        let (id, extended) = match frame.id() {
            Id::Standard(id) => (u32::from(id.as_raw()), false),
            Id::Extended(id) => (id.as_raw(), true),
        };
        let mut data = [0; 8];
        if let Some(payload) = frame.data() {
            data[..payload.len()].copy_from_slice(payload);
        }
        ReceivedFrame {
            id,
            extended,
            remote: frame.is_remote_frame(),
            dlc: frame.dlc(),
            data,
        }
    }
}

/// Frames received by the FIFO0 handler, for the main loop
pub struct RxHandoff {
    frames: Slot<ReceivedFrame>,
    errors: ErrorCounter,
}

impl RxHandoff {
    pub const fn new() -> Self {
        Self {
            frames: Slot::new(),
            errors: ErrorCounter::new(),
        }
    }

    /// Handler side: publishes a received frame.
    pub fn deliver(&self, frame: &Frame) {
        self.frames.put(ReceivedFrame::from(frame));
    }

    /// Handler side: counts a FIFO overrun or another receive error.
    pub fn record_error(&self) {
        self.errors.record();
    }

    pub fn take(&self) -> Option<ReceivedFrame> {
        self.frames.take()
    }

    pub fn wait<D: Deadline + ?Sized>(&self, deadline: &mut D) -> Result<ReceivedFrame, Timeout> {
        self.frames.wait(deadline)
    }

    /// Receive errors counted so far
    pub fn errors(&self) -> u32 {
        self.errors.count()
    }

    /// Frames replaced before the main loop took them
    pub fn overruns(&self) -> u32 {
        self.frames.overruns()
    }
}

impl Default for RxHandoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::Spins;
    use bxcan::{ExtendedId, StandardId};

    #[test]
    fn bit_timing_for_common_rates() {
        let t = BitTiming::for_bitrate(Hertz(54_000_000), Bps(500_000)).unwrap();
        assert_eq!(
            t,
            BitTiming {
                prescaler: 6,
                bs1: 15,
                bs2: 2,
                sjw: 1
            }
        );
        assert_eq!(t.btr(), 0x001e_0005);
        assert_eq!(t.sample_point(), 888);

        let t = BitTiming::for_bitrate(Hertz(54_000_000), Bps(1_000_000)).unwrap();
        assert_eq!(t.btr(), 0x001e_0002);

        let t = BitTiming::for_bitrate(Hertz(8_000_000), Bps(125_000)).unwrap();
        assert_eq!(t.prescaler, 4);
        assert_eq!(t.btr(), 0x001c_0003);
        assert_eq!(t.sample_point(), 875);
    }

    #[test]
    fn unreachable_bitrates() {
        assert_eq!(BitTiming::for_bitrate(Hertz(54_000_000), Bps(0)), None);
        assert_eq!(BitTiming::for_bitrate(Hertz(54_000_000), Bps(33_333)), None);
        // too few quanta per bit
        assert_eq!(BitTiming::for_bitrate(Hertz(4_000_000), Bps(1_000_000)), None);
    }

    #[test]
    fn frames_are_copied() {
        let frame = Frame::new_data(StandardId::new(0x123).unwrap(), [1, 2, 3]);
        let received = ReceivedFrame::from(&frame);
        assert_eq!(received.id, 0x123);
        assert!(!received.extended);
        assert_eq!(received.payload(), &[1, 2, 3]);

        let frame = Frame::new_remote(ExtendedId::new(0x1abc_def0).unwrap(), 4);
        let received = ReceivedFrame::from(&frame);
        assert!(received.extended && received.remote);
        assert_eq!(received.dlc, 4);
    }

    #[test]
    fn handoff_counts_errors_and_overruns() {
        let rx = RxHandoff::new();
        assert_eq!(rx.wait(&mut Spins(3)), Err(Timeout));

        let a = Frame::new_data(StandardId::new(1).unwrap(), [0xaa]);
        let b = Frame::new_data(StandardId::new(2).unwrap(), [0xbb]);
        rx.deliver(&a);
        rx.deliver(&b);
        rx.record_error();

        assert_eq!(rx.take().map(|f| f.id), Some(2));
        assert_eq!(rx.take(), None);
        assert_eq!(rx.overruns(), 1);
        assert_eq!(rx.errors(), 1);
    }
}
