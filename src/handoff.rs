// Copyright 2023 The gd32vf103-hal authors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Interrupt to main loop hand-off
//!
//! Types shared between an interrupt handler (the producer) and the polling main loop (the
//! consumer). They live in `static`s and only need `&self`, so no locking is involved:
//!
//! - [`Flag`]: a completion or event flag.
//! - [`ErrorCounter`]: protocol errors counted by a handler.
//! - [`Transfer`]: a fixed-capacity byte buffer moved one byte per interrupt between memory and
//!   a peripheral data register.
//! - [`Slot`]: a single-value mailbox, for example the last received CAN frame.
//!
//! Every wait takes a [`Deadline`], so a lost interrupt surfaces as [`Timeout`] instead of a
//! hang.
//!
//! ```ignore
//! static TX: Transfer<16> = Transfer::new();
//!
//! // main loop
//! TX.start_tx(b"hello\r\n").unwrap();
//! serial.listen(Event::Txe);
//! TX.wait(&mut Spins(1_000_000))?;
//!
//! // USART0 handler
//! match TX.next_tx() {
//!     Some(step) => {
//!         usart.write_data(step.byte);
//!         if step.last {
//!             usart.unlisten(Event::Txe);
//!         }
//!     }
//!     None => usart.unlisten(Event::Txe),
//! }
//! ```

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};

/// A wait ran out of time
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeout;

/// Bounds a busy wait
pub trait Deadline {
    /// Called once per poll; returns `true` once the wait must give up.
    fn expired(&mut self) -> bool;
}

/// Gives up after a fixed number of polls
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Spins(pub u32);

impl Deadline for Spins {
    fn expired(&mut self) -> bool {
        match self.0.checked_sub(1) {
            Some(left) => {
                self.0 = left;
                false
            }
            None => true,
        }
    }
}

/// Never gives up
///
/// Reproduces an unbounded wait where one is really wanted, for example when parking a demo.
#[derive(Clone, Copy, Debug, Default)]
pub struct Forever;

impl Deadline for Forever {
    fn expired(&mut self) -> bool {
        false
    }
}

/// Polls `done` until it returns true or the deadline expires.
pub fn wait_until<D: Deadline + ?Sized>(
    deadline: &mut D,
    mut done: impl FnMut() -> bool,
) -> Result<(), Timeout> {
    loop {
        if done() {
            return Ok(());
        }
        if deadline.expired() {
            return Err(Timeout);
        }
    }
}

/// Event flag set by an interrupt handler and consumed by the main loop
pub struct Flag(AtomicBool);

impl Flag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Raises the flag; everything written before is visible to whoever observes it.
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clears the flag and returns whether it was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    /// Waits for the flag and clears it.
    pub fn wait<D: Deadline + ?Sized>(&self, deadline: &mut D) -> Result<(), Timeout> {
        wait_until(deadline, || self.take())
    }
}

impl Default for Flag {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts errors reported by an interrupt handler
pub struct ErrorCounter(AtomicU32);

impl ErrorCounter {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn record(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns the count and restarts from zero.
    pub fn take(&self) -> u32 {
        self.0.swap(0, Ordering::Relaxed)
    }
}

impl Default for ErrorCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a transfer could not be started or read
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferError {
    /// A transfer is in flight; the interrupt handler owns the buffer.
    Busy,
    /// The requested count exceeds the buffer capacity.
    Capacity,
    /// The transfer has not completed.
    Incomplete,
}

/// Result of handing a received byte to a [`Transfer`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    /// Stored, more bytes are expected.
    More,
    /// Stored, it was the last one: the handler should disable its interrupt source.
    Done,
    /// Not stored; no receive was in flight or it already had all its bytes.
    Overrun,
}

/// Next byte to put in a data register
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Step {
    pub byte: u8,
    /// This is the last byte: the handler should disable its interrupt source.
    pub last: bool,
}

const IDLE: u8 = 0;
const TX_BUSY: u8 = 1;
const RX_BUSY: u8 = 2;
const COMPLETE: u8 = 3;

/// Fixed-capacity byte transfer between a main loop and an interrupt handler
///
/// The main loop arms the transfer with [`start_tx`](Self::start_tx) or
/// [`start_rx`](Self::start_rx). From then on only the handler touches the buffer, one byte per
/// interrupt, through [`next_tx`](Self::next_tx) or [`push_rx`](Self::push_rx). Storing the last
/// byte publishes completion, and ownership of the buffer returns to the main loop.
///
/// The index never goes past the armed count, which never exceeds `N`.
pub struct Transfer<const N: usize> {
    buffer: UnsafeCell<[u8; N]>,
    state: AtomicU8,
    count: AtomicUsize,
    index: AtomicUsize,
    overruns: ErrorCounter,
}

// The state machine gives the buffer a single owner at any time: the main loop while IDLE or
// COMPLETE, the interrupt handler while busy.
unsafe impl<const N: usize> Sync for Transfer<N> {}

impl<const N: usize> Transfer<N> {
    pub const fn new() -> Self {
        Self {
            buffer: UnsafeCell::new([0; N]),
            state: AtomicU8::new(IDLE),
            count: AtomicUsize::new(0),
            index: AtomicUsize::new(0),
            overruns: ErrorCounter::new(),
        }
    }

    /// Capacity of the buffer
    pub const fn capacity(&self) -> usize {
        N
    }

    fn claim(&self) -> Result<(), TransferError> {
        match self.state.load(Ordering::Acquire) {
            TX_BUSY | RX_BUSY => Err(TransferError::Busy),
            _ => Ok(()),
        }
    }

    /// Copies `data` into the buffer and hands it to the interrupt handler for sending.
    pub fn start_tx(&self, data: &[u8]) -> Result<(), TransferError> {
        self.claim()?;
        if data.len() > N {
            return Err(TransferError::Capacity);
        }
        // NOTE(unsafe) not busy, so the handler does not touch the buffer
        let buffer = unsafe { &mut *self.buffer.get() };
        buffer[..data.len()].copy_from_slice(data);
        self.arm(data.len(), TX_BUSY);
        Ok(())
    }

    /// Hands the buffer to the interrupt handler to receive `count` bytes.
    pub fn start_rx(&self, count: usize) -> Result<(), TransferError> {
        self.claim()?;
        if count > N {
            return Err(TransferError::Capacity);
        }
        self.arm(count, RX_BUSY);
        Ok(())
    }

    fn arm(&self, count: usize, state: u8) {
        self.count.store(count, Ordering::Relaxed);
        self.index.store(0, Ordering::Relaxed);
        let state = if count == 0 { COMPLETE } else { state };
        self.state.store(state, Ordering::Release);
    }

    /// Handler side: returns the next byte to send, or `None` if no transmission is in flight.
    pub fn next_tx(&self) -> Option<Step> {
        if self.state.load(Ordering::Acquire) != TX_BUSY {
            return None;
        }
        let index = self.index.load(Ordering::Relaxed);
        let count = self.count.load(Ordering::Relaxed);
        // NOTE(unsafe) TX_BUSY: the handler owns the buffer
        let byte = unsafe { (*self.buffer.get())[index] };
        let next = index + 1;
        self.index.store(next, Ordering::Relaxed);
        let last = next >= count;
        if last {
            self.state.store(COMPLETE, Ordering::Release);
        }
        Some(Step { byte, last })
    }

    /// Handler side: stores a received byte.
    pub fn push_rx(&self, byte: u8) -> Progress {
        if self.state.load(Ordering::Acquire) != RX_BUSY {
            self.overruns.record();
            return Progress::Overrun;
        }
        let index = self.index.load(Ordering::Relaxed);
        let count = self.count.load(Ordering::Relaxed);
        // NOTE(unsafe) RX_BUSY: the handler owns the buffer
        unsafe { (*self.buffer.get())[index] = byte };
        let next = index + 1;
        self.index.store(next, Ordering::Relaxed);
        if next >= count {
            self.state.store(COMPLETE, Ordering::Release);
            Progress::Done
        } else {
            Progress::More
        }
    }

    /// Number of bytes moved so far by the handler
    pub fn progress(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    /// Bytes still expected by the current transfer
    pub fn remaining(&self) -> usize {
        match self.state.load(Ordering::Acquire) {
            TX_BUSY | RX_BUSY => {
                self.count.load(Ordering::Relaxed) - self.index.load(Ordering::Relaxed)
            }
            _ => 0,
        }
    }

    /// Whether a transfer is in flight
    pub fn is_busy(&self) -> bool {
        matches!(self.state.load(Ordering::Acquire), TX_BUSY | RX_BUSY)
    }

    pub fn is_complete(&self) -> bool {
        self.state.load(Ordering::Acquire) == COMPLETE
    }

    /// Waits for the transfer to complete.
    pub fn wait<D: Deadline + ?Sized>(&self, deadline: &mut D) -> Result<(), Timeout> {
        wait_until(deadline, || self.is_complete())
    }

    /// Bytes received after the transfer was full
    pub fn overruns(&self) -> u32 {
        self.overruns.count()
    }

    /// Gives the completed data to `f`.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, TransferError> {
        if !self.is_complete() {
            return Err(TransferError::Incomplete);
        }
        let count = self.count.load(Ordering::Relaxed);
        // NOTE(unsafe) COMPLETE: the main loop owns the buffer
        let buffer = unsafe { &*self.buffer.get() };
        Ok(f(&buffer[..count]))
    }

    /// Copies the completed data into `out` and returns the number of bytes copied.
    pub fn read_into(&self, out: &mut [u8]) -> Result<usize, TransferError> {
        self.with_data(|data| {
            let len = data.len().min(out.len());
            out[..len].copy_from_slice(&data[..len]);
            len
        })
    }

    /// Abandons the current transfer, if any.
    ///
    /// The handler must no longer be able to run, typically because its interrupt source was
    /// disabled, before the buffer is reused.
    pub fn reset(&self) {
        self.state.store(IDLE, Ordering::Release);
        self.index.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
    }
}

impl<const N: usize> Default for Transfer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-value mailbox filled by an interrupt handler
///
/// A value put before the previous one was taken replaces it and counts as an overrun.
pub struct Slot<T: Copy> {
    value: UnsafeCell<Option<T>>,
    // Held by whoever is accessing `value`.
    busy: AtomicBool,
    full: AtomicBool,
    overruns: ErrorCounter,
}

unsafe impl<T: Copy + Send> Sync for Slot<T> {}

impl<T: Copy> Slot<T> {
    pub const fn new() -> Self {
        Self {
            value: UnsafeCell::new(None),
            busy: AtomicBool::new(false),
            full: AtomicBool::new(false),
            overruns: ErrorCounter::new(),
        }
    }

    fn lock(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn unlock(&self) {
        self.busy.store(false, Ordering::Release);
    }

    /// Handler side: stores a value, returns `false` if it could not be stored.
    ///
    /// Storing fails only when the handler interrupted [`take`](Self::take) in the middle of
    /// the copy; the value is then dropped and counted as an overrun.
    pub fn put(&self, value: T) -> bool {
        if !self.lock() {
            self.overruns.record();
            return false;
        }
        // NOTE(unsafe) `busy` is held
        let cell = unsafe { &mut *self.value.get() };
        if cell.is_some() {
            self.overruns.record();
        }
        *cell = Some(value);
        self.full.store(true, Ordering::Relaxed);
        self.unlock();
        true
    }

    /// Main loop side: takes the value, if any.
    pub fn take(&self) -> Option<T> {
        if !self.full.load(Ordering::Relaxed) || !self.lock() {
            return None;
        }
        // NOTE(unsafe) `busy` is held
        let value = unsafe { (*self.value.get()).take() };
        self.full.store(false, Ordering::Relaxed);
        self.unlock();
        value
    }

    /// Waits for a value.
    pub fn wait<D: Deadline + ?Sized>(&self, deadline: &mut D) -> Result<T, Timeout> {
        let mut value = None;
        wait_until(deadline, || {
            value = self.take();
            value.is_some()
        })?;
        value.ok_or(Timeout)
    }

    /// Values dropped or replaced before being taken
    pub fn overruns(&self) -> u32 {
        self.overruns.count()
    }
}

impl<T: Copy> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn spins_expire_after_budget() {
        let mut deadline = Spins(3);
        assert!(!deadline.expired());
        assert!(!deadline.expired());
        assert!(!deadline.expired());
        assert!(deadline.expired());
        assert!(deadline.expired());
    }

    #[test]
    fn flag_wait_times_out() {
        let flag = Flag::new();
        assert_eq!(flag.wait(&mut Spins(10)), Err(Timeout));
        flag.set();
        assert_eq!(flag.wait(&mut Spins(0)), Ok(()));
        // waiting consumed it
        assert!(!flag.is_set());
    }

    #[test]
    fn flag_take_clears() {
        let flag = Flag::new();
        flag.set();
        assert!(flag.is_set());
        assert!(flag.take());
        assert!(!flag.take());
    }

    #[test]
    fn error_counter() {
        let errors = ErrorCounter::new();
        errors.record();
        errors.record();
        assert_eq!(errors.count(), 2);
        assert_eq!(errors.take(), 2);
        assert_eq!(errors.count(), 0);
    }

    #[test]
    fn transmit_yields_each_byte_then_stops() {
        let tx: Transfer<8> = Transfer::new();
        tx.start_tx(b"abc").unwrap();
        assert!(tx.is_busy());
        assert_eq!(tx.remaining(), 3);
        assert_eq!(tx.next_tx(), Some(Step { byte: b'a', last: false }));
        assert_eq!(tx.next_tx(), Some(Step { byte: b'b', last: false }));
        assert_eq!(tx.next_tx(), Some(Step { byte: b'c', last: true }));
        assert_eq!(tx.next_tx(), None);
        assert!(tx.is_complete());
        assert_eq!(tx.progress(), 3);
    }

    #[test]
    fn receive_completes_at_count() {
        let rx: Transfer<4> = Transfer::new();
        rx.start_rx(2).unwrap();
        assert_eq!(rx.read_into(&mut [0; 4]), Err(TransferError::Incomplete));
        assert_eq!(rx.push_rx(0x10), Progress::More);
        assert_eq!(rx.push_rx(0x20), Progress::Done);
        assert_eq!(rx.push_rx(0x30), Progress::Overrun);
        assert_eq!(rx.overruns(), 1);

        let mut out = [0; 4];
        assert_eq!(rx.read_into(&mut out), Ok(2));
        assert_eq!(out, [0x10, 0x20, 0, 0]);
        assert_eq!(rx.with_data(|data| data.len()), Ok(2));
    }

    #[test]
    fn capacity_is_enforced() {
        let transfer: Transfer<2> = Transfer::new();
        assert_eq!(transfer.start_tx(b"abc"), Err(TransferError::Capacity));
        assert_eq!(transfer.start_rx(3), Err(TransferError::Capacity));
        assert!(!transfer.is_busy());
        assert_eq!(transfer.capacity(), 2);
    }

    #[test]
    fn cannot_restart_while_busy() {
        let transfer: Transfer<4> = Transfer::new();
        transfer.start_rx(2).unwrap();
        assert_eq!(transfer.start_tx(b"x"), Err(TransferError::Busy));
        transfer.reset();
        assert_eq!(transfer.start_tx(b"x"), Ok(()));
    }

    #[test]
    fn empty_transfer_is_complete_immediately() {
        let transfer: Transfer<4> = Transfer::new();
        transfer.start_rx(0).unwrap();
        assert!(transfer.is_complete());
        assert_eq!(transfer.next_tx(), None);
        assert_eq!(transfer.wait(&mut Spins(0)), Ok(()));
    }

    #[test]
    fn wait_times_out_when_handler_never_runs() {
        let transfer: Transfer<4> = Transfer::new();
        transfer.start_rx(1).unwrap();
        assert_eq!(transfer.wait(&mut Spins(100)), Err(Timeout));
    }

    #[test]
    fn handler_on_other_thread() {
        let transfer: Arc<Transfer<32>> = Arc::new(Transfer::new());
        transfer.start_rx(32).unwrap();

        let producer = {
            let transfer = Arc::clone(&transfer);
            thread::spawn(move || {
                for byte in 0..32u8 {
                    assert_ne!(transfer.push_rx(byte), Progress::Overrun);
                }
            })
        };

        transfer.wait(&mut Forever).unwrap();
        producer.join().unwrap();
        transfer
            .with_data(|data| {
                assert!(data.iter().enumerate().all(|(i, &b)| b as usize == i));
            })
            .unwrap();
    }

    #[test]
    fn slot_keeps_latest_value() {
        let slot: Slot<u16> = Slot::new();
        assert_eq!(slot.take(), None);
        assert!(slot.put(1));
        assert!(slot.put(2));
        assert_eq!(slot.overruns(), 1);
        assert_eq!(slot.take(), Some(2));
        assert_eq!(slot.take(), None);
        assert_eq!(slot.wait(&mut Spins(5)), Err(Timeout));
        slot.put(7);
        assert_eq!(slot.wait(&mut Spins(5)), Ok(7));
    }

    #[test]
    fn slot_put_while_take_holds_the_lock() {
        let slot: Slot<u16> = Slot::new();
        assert!(slot.put(1));
        // main loop interrupted in the middle of `take`
        assert!(slot.lock());
        assert!(!slot.put(2));
        assert_eq!(slot.overruns(), 1);
        assert_eq!(slot.take(), None);
        slot.unlock();
        // the dropped value did not replace the stored one
        assert_eq!(slot.take(), Some(1));
        assert!(slot.put(3));
        assert_eq!(slot.overruns(), 1);
    }
}
