//! Blue Pill outputs and inputs behind the `agrilink-hal` traits
//!
//! | Signal              | Pin  | Active |
//! |---------------------|------|--------|
//! | Status LED          | PC13 | low    |
//! | Fan contactor       | PB0  | high   |
//! | Sprinkler valve     | PB1  | high   |
//! | Heater contactor    | PB10 | high   |
//! | Sprinkler ready     | PB12 | low    |
//! | Fan ready           | PB13 | low    |
//! | Heater ready        | PB14 | low    |
//!
//! The board has no analog or I2C sensor front-end. Only the three ready
//! inputs are real: temp1, temp2, humidity, pressure and wind_speed are
//! posted as 0.0, so the threshold alerts never fire on this board.

use agrilink_hal::{Actuators, SensorSample, Sensors};
use defmt::info;
use embassy_stm32::gpio::{Input, Output};

/// Intervention modes the cloud may select; anything else stops both
const INTERVENTION_IRRIGATE: i32 = 1;
const INTERVENTION_HEAT: i32 = 2;

pub struct BoardActuators {
    pub led: Output<'static>,
    pub fan: Output<'static>,
    pub sprinkler: Output<'static>,
    pub heater: Output<'static>,
}

impl Actuators for BoardActuators {
    fn set_fan_power(&mut self, percent: u8) {
        // single-speed contactor: any non-zero power runs the fan
        info!("Fan power {}%", percent);
        if percent > 0 {
            self.fan.set_high();
        } else {
            self.fan.set_low();
        }
    }

    fn apply_intervention(&mut self, mode: i32) {
        info!("Intervention mode {}", mode);
        match mode {
            INTERVENTION_IRRIGATE => {
                self.heater.set_low();
                self.sprinkler.set_high();
            }
            INTERVENTION_HEAT => {
                self.sprinkler.set_low();
                self.heater.set_high();
            }
            _ => {
                self.sprinkler.set_low();
                self.heater.set_low();
            }
        }
    }

    fn set_indicator(&mut self, on: bool) {
        if on {
            self.led.set_low();
        } else {
            self.led.set_high();
        }
    }
}

pub struct BoardSensors {
    pub sprinkler_ready: Input<'static>,
    pub fan_ready: Input<'static>,
    pub heater_ready: Input<'static>,
}

impl Sensors for BoardSensors {
    fn sample(&mut self) -> Option<SensorSample> {
        Some(SensorSample {
            sprinkler_available: self.sprinkler_ready.is_low(),
            fan_available: self.fan_ready.is_low(),
            heater_available: self.heater_ready.is_low(),
            ..SensorSample::default()
        })
    }
}
