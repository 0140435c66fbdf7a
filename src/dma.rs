// Copyright 2023 The gd32vf103-hal authors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Direct Memory Access
//!
//! DMA0 has seven channels and DMA1 five. Peripheral requests are hard-wired to channels, for
//! example USART0 transmits on DMA0 channel 3 and receives on channel 4.

use core::marker::PhantomData;
use core::sync::atomic::{compiler_fence, Ordering};

use crate::handoff::Deadline;
use crate::rcu::AHB;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The channel reported a bus error and disabled itself.
    Transfer,
}

/// Channel events
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    HalfTransfer,
    TransferComplete,
    Error,
}

impl Event {
    /// Offset of the event flag within the four flags of a channel
    fn flag_offset(self) -> u32 {
        match self {
            Event::TransferComplete => 1,
            Event::HalfTransfer => 2,
            Event::Error => 3,
        }
    }
}

/// Transfer direction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    PeripheralToMemory,
    MemoryToPeripheral,
}

/// Channel arbitration priority
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Priority {
    Low = 0b00,
    Medium = 0b01,
    High = 0b10,
    UltraHigh = 0b11,
}

// CHxCTL
const CHEN: u32 = 1 << 0;
const FTFIE: u32 = 1 << 1;
const HTFIE: u32 = 1 << 2;
const ERRIE: u32 = 1 << 3;
const DIR: u32 = 1 << 4;
const CMEN: u32 = 1 << 5;
const PNAGA: u32 = 1 << 6;
const MNAGA: u32 = 1 << 7;
const PRIO_SHIFT: u32 = 12;

/// Static configuration of a byte-wide channel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    pub direction: Direction,
    pub memory_increment: bool,
    pub peripheral_increment: bool,
    pub circular: bool,
    pub priority: Priority,
}

impl ChannelConfig {
    /// Byte transfers between a peripheral data register and a memory buffer
    pub const fn peripheral(direction: Direction) -> Self {
        Self {
            direction,
            memory_increment: true,
            peripheral_increment: false,
            circular: false,
            priority: Priority::Medium,
        }
    }

    fn ctl_bits(&self) -> u32 {
        let mut bits = (self.priority as u32) << PRIO_SHIFT;
        if self.direction == Direction::MemoryToPeripheral {
            bits |= DIR;
        }
        if self.memory_increment {
            bits |= MNAGA;
        }
        if self.peripheral_increment {
            bits |= PNAGA;
        }
        if self.circular {
            bits |= CMEN;
        }
        bits
    }
}

/// Extension trait to split a DMA peripheral into independent channels
pub trait DmaExt {
    type Channels;

    fn split(self, ahb: &mut AHB) -> Self::Channels;
}

/// Read transfer (peripheral to memory)
pub struct R;

/// Write transfer (memory to peripheral)
pub struct W;

/// Something that moves data with a DMA channel
pub trait TransferPayload {
    fn start(&mut self);
    fn stop(&mut self);
    fn in_progress(&self) -> bool;
    fn error(&self) -> bool;
}

/// DMA transfer in flight
///
/// Holds the buffer and the payload until the transfer completes.
pub struct Transfer<MODE, BUFFER, PAYLOAD>
where
    PAYLOAD: TransferPayload,
{
    _mode: PhantomData<MODE>,
    buffer: BUFFER,
    payload: PAYLOAD,
}

impl<BUFFER, PAYLOAD> Transfer<R, BUFFER, PAYLOAD>
where
    PAYLOAD: TransferPayload,
{
    pub(crate) fn r(buffer: BUFFER, payload: PAYLOAD) -> Self {
        Transfer {
            _mode: PhantomData,
            buffer,
            payload,
        }
    }
}

impl<BUFFER, PAYLOAD> Transfer<W, BUFFER, PAYLOAD>
where
    PAYLOAD: TransferPayload,
{
    pub(crate) fn w(buffer: BUFFER, payload: PAYLOAD) -> Self {
        Transfer {
            _mode: PhantomData,
            buffer,
            payload,
        }
    }
}

impl<MODE, BUFFER, PAYLOAD> Transfer<MODE, BUFFER, PAYLOAD>
where
    PAYLOAD: TransferPayload,
{
    pub fn is_done(&self) -> bool {
        !self.payload.in_progress()
    }

    /// Blocks until the transfer completes and returns the buffer and the payload.
    pub fn wait(self) -> (BUFFER, PAYLOAD) {
        while !self.is_done() {}
        self.finish()
    }

    /// Waits until the transfer completes or the deadline expires.
    ///
    /// On timeout the transfer is handed back, to be waited on again or aborted.
    pub fn wait_for<D: Deadline + ?Sized>(
        self,
        deadline: &mut D,
    ) -> Result<(BUFFER, PAYLOAD), Self> {
        loop {
            if self.is_done() {
                return Ok(self.finish());
            }
            if deadline.expired() {
                return Err(self);
            }
        }
    }

    /// Stops the transfer where it is.
    pub fn abort(self) -> (BUFFER, PAYLOAD) {
        self.finish()
    }

    /// Whether the channel stopped on a bus error
    pub fn has_error(&self) -> bool {
        self.payload.error()
    }

    fn finish(mut self) -> (BUFFER, PAYLOAD) {
        compiler_fence(Ordering::Acquire);
        self.payload.stop();
        (self.buffer, self.payload)
    }
}

/// DMA receiver
pub struct RxDma<PAYLOAD, CHANNEL> {
    pub(crate) payload: PAYLOAD,
    pub channel: CHANNEL,
}

/// DMA transmitter
pub struct TxDma<PAYLOAD, CHANNEL> {
    pub(crate) payload: PAYLOAD,
    pub channel: CHANNEL,
}

macro_rules! dma {
    ($DMAX:ident, $dmax:ident, [
        $($CX:ident: ($chXctl:ident, $chXcnt:ident, $chXpaddr:ident, $chXmaddr:ident, $x:expr),)+
    ]) => {
        pub mod $dmax {
            use core::sync::atomic::{compiler_fence, Ordering};

            use crate::pac::$DMAX;
            use crate::rcu::{Enable, AHB};
            use super::{ChannelConfig, DmaExt, Event, CHEN, ERRIE, FTFIE, HTFIE};

            /// Channels of the controller
            pub struct Channels($(pub $CX),+);

            $(
                /// A single DMA channel
                pub struct $CX {
                    _0: (),
                }

                impl $CX {
                    fn rb(&self) -> &'static <$DMAX as core::ops::Deref>::Target {
                        // NOTE(unsafe) the channel only touches its own registers and writes
                        // its own flag-clear bits
                        unsafe { &*$DMAX::ptr() }
                    }

                    /// Sets the peripheral register address
                    pub fn set_peripheral_address(&mut self, address: u32) {
                        self.rb().$chXpaddr.write(|w| unsafe { w.bits(address) });
                    }

                    /// Sets the memory address
                    pub fn set_memory_address(&mut self, address: u32) {
                        self.rb().$chXmaddr.write(|w| unsafe { w.bits(address) });
                    }

                    /// Number of data items to transfer
                    pub fn set_transfer_length(&mut self, len: usize) {
                        self.rb().$chXcnt.write(|w| unsafe { w.bits(len as u32 & 0xffff) });
                    }

                    /// Remaining data items of the current transfer
                    pub fn remaining(&self) -> u16 {
                        self.rb().$chXcnt.read().bits() as u16
                    }

                    /// Applies direction, increment, circular mode and priority.
                    ///
                    /// Only allowed while the channel is stopped.
                    pub fn configure(&mut self, config: ChannelConfig) {
                        let keep = FTFIE | HTFIE | ERRIE;
                        self.rb().$chXctl.modify(|r, w| unsafe {
                            w.bits((r.bits() & keep) | config.ctl_bits())
                        });
                    }

                    /// Starts the channel
                    pub fn start(&mut self) {
                        self.clear_all_events();
                        compiler_fence(Ordering::Release);
                        self.rb().$chXctl.modify(|r, w| unsafe { w.bits(r.bits() | CHEN) });
                    }

                    /// Stops the channel
                    pub fn stop(&mut self) {
                        self.rb().$chXctl.modify(|r, w| unsafe { w.bits(r.bits() & !CHEN) });
                        self.clear_all_events();
                    }

                    /// Whether the channel is enabled and has not completed
                    pub fn in_progress(&self) -> bool {
                        self.rb().$chXctl.read().bits() & CHEN != 0
                            && !self.event_occurred(Event::TransferComplete)
                    }

                    /// Enables the interrupt of an event
                    pub fn listen(&mut self, event: Event) {
                        let bit = Self::interrupt_bit(event);
                        self.rb().$chXctl.modify(|r, w| unsafe { w.bits(r.bits() | bit) });
                    }

                    /// Disables the interrupt of an event
                    pub fn unlisten(&mut self, event: Event) {
                        let bit = Self::interrupt_bit(event);
                        self.rb().$chXctl.modify(|r, w| unsafe { w.bits(r.bits() & !bit) });
                    }

                    fn interrupt_bit(event: Event) -> u32 {
                        match event {
                            Event::TransferComplete => FTFIE,
                            Event::HalfTransfer => HTFIE,
                            Event::Error => ERRIE,
                        }
                    }

                    /// Whether the event flag is set
                    pub fn event_occurred(&self, event: Event) -> bool {
                        let bit = 1 << (4 * $x + event.flag_offset());
                        self.rb().intf.read().bits() & bit != 0
                    }

                    /// Clears the event flag
                    pub fn clear_event(&mut self, event: Event) {
                        let bit = 1 << (4 * $x + event.flag_offset());
                        self.rb().intc.write(|w| unsafe { w.bits(bit) });
                    }

                    fn clear_all_events(&mut self) {
                        // global flag clears all flags of the channel
                        self.rb().intc.write(|w| unsafe { w.bits(1 << (4 * $x)) });
                    }
                }
            )+

            impl DmaExt for $DMAX {
                type Channels = Channels;

                fn split(self, ahb: &mut AHB) -> Channels {
                    $DMAX::enable(ahb);

                    // reset the DMA control registers (stops all on-going transfers)
                    $(
                        self.$chXctl.reset();
                    )+

                    Channels($($CX { _0: () }),+)
                }
            }
        }
    }
}

dma!(DMA0, dma0, [
    C0: (ch0ctl, ch0cnt, ch0paddr, ch0maddr, 0),
    C1: (ch1ctl, ch1cnt, ch1paddr, ch1maddr, 1),
    C2: (ch2ctl, ch2cnt, ch2paddr, ch2maddr, 2),
    C3: (ch3ctl, ch3cnt, ch3paddr, ch3maddr, 3),
    C4: (ch4ctl, ch4cnt, ch4paddr, ch4maddr, 4),
    C5: (ch5ctl, ch5cnt, ch5paddr, ch5maddr, 5),
    C6: (ch6ctl, ch6cnt, ch6paddr, ch6maddr, 6),
]);

dma!(DMA1, dma1, [
    C0: (ch0ctl, ch0cnt, ch0paddr, ch0maddr, 0),
    C1: (ch1ctl, ch1cnt, ch1paddr, ch1maddr, 1),
    C2: (ch2ctl, ch2cnt, ch2paddr, ch2maddr, 2),
    C3: (ch3ctl, ch3cnt, ch3paddr, ch3maddr, 3),
    C4: (ch4ctl, ch4cnt, ch4paddr, ch4maddr, 4),
]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_bits() {
        let tx = ChannelConfig::peripheral(Direction::MemoryToPeripheral);
        assert_eq!(tx.ctl_bits(), DIR | MNAGA | (0b01 << PRIO_SHIFT));

        let rx = ChannelConfig {
            circular: true,
            priority: Priority::UltraHigh,
            ..ChannelConfig::peripheral(Direction::PeripheralToMemory)
        };
        assert_eq!(rx.ctl_bits(), MNAGA | CMEN | (0b11 << PRIO_SHIFT));
    }

    #[test]
    fn event_flag_offsets() {
        assert_eq!(Event::TransferComplete.flag_offset(), 1);
        assert_eq!(Event::HalfTransfer.flag_offset(), 2);
        assert_eq!(Event::Error.flag_offset(), 3);
    }
}
