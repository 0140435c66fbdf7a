// Copyright 2023 The gd32vf103-hal authors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # HAL for the GD32VF103 family of microcontrollers
//!
//! This is an implementation of the [`embedded-hal`] traits for the GD32VF103 family of RISC-V
//! microcontrollers, together with the interrupt plumbing its peripheral demos share.
//!
//! [`embedded-hal`]: https://crates.io/crates/embedded-hal
//!
//! # Usage
//!
//! ## Commonly used setup
//! Almost all peripherals require references to some registers in `RCU`. The following
//! code shows how to set up those registers
//!
//! ```ignore
//! // Get access to the device specific peripherals from the peripheral access crate
//! let dp = pac::Peripherals::take().unwrap();
//!
//! // Take ownership over the raw RCU device and convert it into the corresponding HAL struct
//! let mut rcu = dp.RCU.constrain();
//!
//! // Freeze the configuration of all the clocks in the system and store the frozen frequencies in
//! // `clocks`
//! let clocks = rcu.cfgr.use_hxtal(8.mhz()).sysclk(108.mhz()).freeze();
//! ```
//!
//! ## Interrupts
//!
//! Handlers are plain functions registered with [`eclic::Eclic::register`]. State shared
//! between a handler and the main loop lives in the types of [`handoff`]: a [`handoff::Flag`]
//! for completion, a [`handoff::Transfer`] for a fixed-size byte transfer and a
//! [`handoff::Slot`] for the latest value of a reading.
//!
//! ## Usage examples
//!
//! See the `demos` folder. They are built as Cargo examples and need the `rt` feature:
//!
//! ```text
//! cargo build --release --features rt --target riscv32imac-unknown-none-elf --example blinky
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use gd32vf103_pac as pac;

pub mod adc;
pub mod afio;
pub mod backup;
pub mod can;
pub mod console;
pub mod dac;
pub mod delay;
pub mod dma;
pub mod eclic;
pub mod exmc;
pub mod gpio;
pub mod handoff;
pub mod i2c;
pub mod prelude;
pub mod pwm;
pub mod rcu;
pub mod serial;
pub mod spi;
pub mod time;
pub mod timer;
pub mod watchdog;
