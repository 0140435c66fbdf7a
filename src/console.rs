// Copyright 2023 The gd32vf103-hal authors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Serial console
//!
//! Blocking text output on a USART transmitter, framed with CR/LF line endings. Once
//! [`init`] has been called, [`sprint!`](crate::sprint) and [`sprintln!`](crate::sprintln) can be
//! used from anywhere, interrupt handlers included.
//!
//! ```ignore
//! let (tx, _rx) = serial.split();
//! console::init(tx);
//! sprintln!("clock: {} Hz", clocks.sysclk().0);
//! ```
//!
//! Output written before `init` is discarded.

use core::fmt::{self, Write};
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::pac::usart0;
use crate::serial::{Instance, Tx};

const TBE: u32 = 1 << 7;

static CONSOLE: AtomicPtr<usart0::RegisterBlock> = AtomicPtr::new(ptr::null_mut());

/// Routes console output to `tx`.
///
/// The transmitter is consumed: nothing else writes to this USART afterwards.
pub fn init<USART: Instance>(tx: Tx<USART>) {
    CONSOLE.store(tx.ptr() as *mut _, Ordering::Release);
}

/// Calls `emit` for every byte of `s`, replacing `\n` by `\r\n`.
pub(crate) fn crlf(s: &str, mut emit: impl FnMut(u8)) {
    for byte in s.bytes() {
        if byte == b'\n' {
            emit(b'\r');
        }
        emit(byte);
    }
}

struct Console(&'static usart0::RegisterBlock);

impl Console {
    fn put(&self, byte: u8) {
        while self.0.stat.read().bits() as u32 & TBE == 0 {}
        self.0.data.write(|w| unsafe { w.bits(u32::from(byte) as _) });
    }
}

impl Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        crlf(s, |byte| self.put(byte));
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    let usart = CONSOLE.load(Ordering::Acquire);
    if usart.is_null() {
        return;
    }
    // NOTE(unsafe) the pointer was taken from a USART instance by `init`
    let mut console = Console(unsafe { &*usart });
    riscv::interrupt::free(|_| console.write_fmt(args)).ok();
}

/// Prints to the serial console
#[macro_export]
macro_rules! sprint {
    ($($arg:tt)*) => {
        $crate::console::_print(format_args!($($arg)*))
    };
}

/// Prints to the serial console, with a newline
#[macro_export]
macro_rules! sprintln {
    () => {
        $crate::console::_print(format_args!("\n"))
    };
    ($fmt:expr) => {
        $crate::console::_print(format_args!(concat!($fmt, "\n")))
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::console::_print(format_args!(concat!($fmt, "\n"), $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::crlf;

    fn framed(s: &str) -> Vec<u8> {
        let mut out = Vec::new();
        crlf(s, |b| out.push(b));
        out
    }

    #[test]
    fn newlines_become_crlf() {
        assert_eq!(framed("ok\n"), b"ok\r\n");
        assert_eq!(framed("a\nb\n\n"), b"a\r\nb\r\n\r\n");
        assert_eq!(framed("no newline"), b"no newline");
    }

    #[test]
    fn discarded_before_init() {
        // no USART registered: printing is a no-op instead of a fault
        super::_print(format_args!("dropped {}\n", 1));
    }
}
