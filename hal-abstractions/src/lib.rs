//! Hardware abstraction traits for the agrilink field node
//!
//! This crate defines traits that abstract over hardware differences
//! between boards. BSPs implement these traits; `agrilink-core` consumes
//! them and never touches a peripheral directly.

#![no_std]
#![deny(unsafe_code)]
#![deny(warnings)]

/// Millisecond monotonic clock
///
/// Used by the receive buffer (idle-frame detection) and by the AT
/// transaction engine (deadlines). Must never go backwards.
pub trait Clock {
    /// Milliseconds since an arbitrary, fixed origin (usually boot)
    fn now_ms(&self) -> u64;
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

/// Output side-effects the cloud dispatcher may trigger
///
/// Implementations drive GPIO/PWM; they are infallible from the caller's
/// point of view and must return quickly (they run in the main loop).
pub trait Actuators {
    /// Apply a fan power percentage, already clamped by the caller
    fn set_fan_power(&mut self, percent: u8);

    /// Apply an intervention mode selected by the cloud (0 = none)
    fn apply_intervention(&mut self, mode: i32);

    /// Drive the status indicator LED
    fn set_indicator(&mut self, on: bool);
}

/// One reading of every environmental sensor on the node
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorSample {
    /// Air temperature, probe 1 (°C)
    pub temp1: f32,
    /// Soil temperature, probe 2 (°C)
    pub temp2: f32,
    /// Relative humidity (%)
    pub humidity: f32,
    /// Barometric pressure (kPa)
    pub pressure: f32,
    /// Wind speed (m/s)
    pub wind_speed: f32,
    /// Sprinkler line reports ready
    pub sprinkler_available: bool,
    /// Fan bank reports ready
    pub fan_available: bool,
    /// Heater reports ready
    pub heater_available: bool,
}

/// Periodic sensor acquisition
pub trait Sensors {
    /// Take one sample; `None` when the sensors are not ready yet
    fn sample(&mut self) -> Option<SensorSample>;
}
