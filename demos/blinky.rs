//! Blinks an LED
//!
//! This assumes that an LED is connected to pc0, as on the GD32VF103V-EVAL board

#![deny(unsafe_code)]
#![no_std]
#![no_main]

use panic_halt as _;

use nb::block;

use gd32vf103_hal::{pac, prelude::*, timer::Timer};
use riscv_rt::entry;

#[entry]
fn main() -> ! {
    // Get access to the device specific peripherals from the peripheral access crate
    let dp = pac::Peripherals::take().unwrap();

    // Take ownership over the raw rcu device and convert it into the corresponding HAL struct
    let mut rcu = dp.RCU.constrain();

    // Freeze the configuration of all the clocks in the system and store the frozen frequencies in
    // `clocks`
    let clocks = rcu.cfgr.use_hxtal(8.mhz()).sysclk(108.mhz()).freeze();

    // Acquire the GPIOC peripheral
    let mut gpioc = dp.GPIOC.split(&mut rcu.apb2);

    // Configure gpio C pin 0 as a push-pull output. The `crl` register is passed to the function
    // in order to configure the port. For pins 8+, crh should be passed instead.
    let mut led = gpioc.pc0.into_push_pull_output(&mut gpioc.crl);
    // Configure TIMER5 to trigger an update every second
    let mut timer = Timer::timer5(dp.TIMER5, &clocks, &mut rcu.apb1).start_count_down(1.hz());

    // Wait for the timer to trigger an update and change the state of the LED
    loop {
        block!(timer.wait()).unwrap();
        led.set_high();
        block!(timer.wait()).unwrap();
        led.set_low();
    }
}
