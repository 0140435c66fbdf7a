//! PWM on three channels of TIMER2
//!
//! Outputs a 1 kHz signal on pa6, pa7 and pb0 whose duty cycles sweep up and down, a quarter
//! period apart.

#![deny(unsafe_code)]
#![no_std]
#![no_main]

use panic_halt as _;

use gd32vf103_hal::{delay::McycleDelay, pac, prelude::*, pwm::Channel, timer::Timer};
use riscv_rt::entry;

const STEPS: u16 = 20;

/// Triangle wave in `0..=max` over `2 * STEPS` steps
fn duty(step: u16, max: u16) -> u16 {
    let phase = step % (2 * STEPS);
    let level = if phase < STEPS { phase } else { 2 * STEPS - phase };
    (u32::from(max) * u32::from(level) / u32::from(STEPS)) as u16
}

#[entry]
fn main() -> ! {
    let dp = pac::Peripherals::take().unwrap();

    let mut rcu = dp.RCU.constrain();
    let clocks = rcu.cfgr.use_hxtal(8.mhz()).sysclk(108.mhz()).freeze();

    let mut gpioa = dp.GPIOA.split(&mut rcu.apb2);
    let mut gpiob = dp.GPIOB.split(&mut rcu.apb2);
    let pins = (
        gpioa.pa6.into_alternate_push_pull(&mut gpioa.crl),
        gpioa.pa7.into_alternate_push_pull(&mut gpioa.crl),
        gpiob.pb0.into_alternate_push_pull(&mut gpiob.crl),
    );

    let mut pwm = Timer::timer2(dp.TIMER2, &clocks, &mut rcu.apb1).pwm(pins, 1.khz());
    let max = pwm.get_max_duty();
    let channels = [Channel::C0, Channel::C1, Channel::C2];
    for channel in channels {
        pwm.set_duty(channel, 0);
        pwm.enable(channel);
    }

    let mut delay = McycleDelay::new(&clocks);
    let mut step: u16 = 0;
    loop {
        for (i, channel) in channels.iter().enumerate() {
            let offset = i as u16 * STEPS / 2;
            pwm.set_duty(*channel, duty(step + offset, max));
        }
        step = (step + 1) % (2 * STEPS);
        delay.delay_ms(50_u32);
    }
}
