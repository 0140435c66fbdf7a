// Copyright 2023 The gd32vf103-hal authors.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

pub use crate::afio::AfioExt as _gd32vf103_hal_afio_AfioExt;
pub use crate::dma::DmaExt as _gd32vf103_hal_dma_DmaExt;
pub use crate::gpio::GpioExt as _gd32vf103_hal_gpio_GpioExt;
pub use crate::rcu::RcuExt as _gd32vf103_hal_rcu_RcuExt;
pub use crate::time::U32Ext as _gd32vf103_hal_time_U32Ext;
pub use embedded_dma::{
    ReadBuffer as _embedded_dma_ReadBuffer, WriteBuffer as _embedded_dma_WriteBuffer,
};
pub use embedded_hal::prelude::*;
