//! Device state
//!
//! The node's only long-lived mutable data: latest sensor readings, the
//! cloud-controlled settings and the actuator availability flags. Owned by
//! the main loop; the receive interrupt never touches it.

use core::fmt;

use agrilink_hal::SensorSample;

/// Lowest fan power the hardware runs at reliably (%)
pub const FAN_MIN_POWER: u8 = 20;
/// Highest fan power allowed (%)
pub const FAN_MAX_POWER: u8 = 80;

/// Clamp a requested fan power into `[FAN_MIN_POWER, FAN_MAX_POWER]`
pub fn clamp_fan_power(requested: i32) -> u8 {
    let clamped = requested.clamp(i32::from(FAN_MIN_POWER), i32::from(FAN_MAX_POWER));
    u8::try_from(clamped).unwrap_or(FAN_MIN_POWER)
}

/// Every property name the node reports, in telemetry order
pub const FIELD_NAMES: [&str; 11] = [
    "temp1",
    "temp2",
    "humidity",
    "pressure",
    "wind_speed",
    "crop_stage",
    "intervention_status",
    "fan_power",
    "sprinkler_available",
    "fan_available",
    "heater_available",
];

/// One property value, rendered as a JSON scalar by `Display`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Float(f32),
    Int(i32),
    Bool(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // JSON has no NaN or infinity
            Self::Float(v) if !v.is_finite() => f.write_str("null"),
            Self::Float(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub temp1: f32,
    pub temp2: f32,
    pub humidity: f32,
    pub pressure: f32,
    pub wind_speed: f32,
    pub crop_stage: i32,
    pub intervention_status: i32,
    /// Always within `[FAN_MIN_POWER, FAN_MAX_POWER]`
    pub fan_power: u8,
    pub sprinkler_available: bool,
    pub fan_available: bool,
    pub heater_available: bool,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            temp1: 0.0,
            temp2: 0.0,
            humidity: 0.0,
            pressure: 0.0,
            wind_speed: 0.0,
            crop_stage: 0,
            intervention_status: 0,
            fan_power: FAN_MIN_POWER,
            sprinkler_available: false,
            fan_available: false,
            heater_available: false,
        }
    }
}

impl DeviceState {
    /// Store a clamped fan power and return the stored value
    pub fn set_fan_power(&mut self, requested: i32) -> u8 {
        self.fan_power = clamp_fan_power(requested);
        self.fan_power
    }

    /// Copy a fresh sensor reading in
    pub fn apply_sample(&mut self, sample: &SensorSample) {
        self.temp1 = sample.temp1;
        self.temp2 = sample.temp2;
        self.humidity = sample.humidity;
        self.pressure = sample.pressure;
        self.wind_speed = sample.wind_speed;
        self.sprinkler_available = sample.sprinkler_available;
        self.fan_available = sample.fan_available;
        self.heater_available = sample.heater_available;
    }

    /// Look a property up by its cloud name
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        let value = match name {
            "temp1" => FieldValue::Float(self.temp1),
            "temp2" => FieldValue::Float(self.temp2),
            "humidity" => FieldValue::Float(self.humidity),
            "pressure" => FieldValue::Float(self.pressure),
            "wind_speed" => FieldValue::Float(self.wind_speed),
            "crop_stage" => FieldValue::Int(self.crop_stage),
            "intervention_status" => FieldValue::Int(self.intervention_status),
            "fan_power" => FieldValue::Int(i32::from(self.fan_power)),
            "sprinkler_available" => FieldValue::Bool(self.sprinkler_available),
            "fan_available" => FieldValue::Bool(self.fan_available),
            "heater_available" => FieldValue::Bool(self.heater_available),
            _ => return None,
        };
        Some(value)
    }
}
