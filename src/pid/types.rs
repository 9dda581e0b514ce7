//! Data types for the multi-zone PID heating controller (§3/§4.2).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Floor construction material, each with its own safe maximum temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FloorMaterial {
    /// Max 27°C.
    Wood,
    /// Max 32°C.
    Tile,
    /// Max 32°C.
    Stone,
    /// Max 27°C.
    Vinyl,
}

impl FloorMaterial {
    /// Parse a material name, rejecting unknown values (§4.2 `addZone`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "wood" => Some(Self::Wood),
            "tile" => Some(Self::Tile),
            "stone" => Some(Self::Stone),
            "vinyl" => Some(Self::Vinyl),
            _ => None,
        }
    }

    /// Material's safe maximum floor temperature in °C.
    pub fn max_temp(&self) -> f64 {
        match self {
            Self::Wood | Self::Vinyl => 27.0,
            Self::Tile | Self::Stone => 32.0,
        }
    }
}

/// Heating zone circuit type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneType {
    /// Electric resistive heating element.
    Electric,
    /// Water-based hydronic circuit.
    Water,
}

impl ZoneType {
    /// Parse a zone type name, rejecting unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "electric" => Some(Self::Electric),
            "water" => Some(Self::Water),
            _ => None,
        }
    }
}

/// Behavioural preset for a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Target temperature unmodified.
    Comfort,
    /// Target temperature minus 2K.
    Eco,
    /// Absolute 5°C frost-protection setpoint.
    Frost,
}

/// Fault raised by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultCode {
    /// Floor temperature exceeded the material's safe maximum.
    OverTemp,
    /// No sensor reading received for more than 10 minutes.
    SensorStale,
}

/// Per-zone PID state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PidState {
    /// Accumulated integral term.
    pub integral: f64,
    /// Error from the previous tick, for derivative computation.
    pub last_error: f64,
    /// Millis since epoch of the last tick that advanced the PID.
    pub last_update_millis: u64,
}

impl Default for PidState {
    fn default() -> Self {
        Self {
            integral: 0.0,
            last_error: 0.0,
            last_update_millis: 0,
        }
    }
}

/// Shared PID gains.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PidParams {
    /// Proportional gain.
    pub kp: f64,
    /// Integral gain.
    pub ki: f64,
    /// Derivative gain.
    pub kd: f64,
}

impl Default for PidParams {
    fn default() -> Self {
        Self {
            kp: 8.0,
            ki: 0.05,
            kd: 2.0,
        }
    }
}

/// Day of the week, used as the schedule map's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

/// A half-open `[start, end)` scheduled temperature window, in minutes since
/// midnight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SchedulePeriod {
    /// Window start, inclusive, minutes since midnight.
    pub start_minute: u16,
    /// Window end, exclusive, minutes since midnight.
    pub end_minute: u16,
    /// Target temperature while this window is active.
    pub target_temp: f64,
}

impl SchedulePeriod {
    /// Whether `minute_of_day` falls inside `[start, end)`.
    pub fn contains(&self, minute_of_day: u16) -> bool {
        minute_of_day >= self.start_minute && minute_of_day < self.end_minute
    }
}

/// Seven-day schedule of ordered time windows.
pub type Schedule = HashMap<Weekday, Vec<SchedulePeriod>>;

/// Find the setpoint demanded by the schedule at `minute_of_day` on `day`.
/// Overlapping periods use the latest-defined one (last match in
/// declaration order wins).
pub fn schedule_demand(schedule: &Schedule, day: Weekday, minute_of_day: u16) -> Option<f64> {
    schedule
        .get(&day)
        .into_iter()
        .flatten()
        .filter(|p| p.contains(minute_of_day))
        .last()
        .map(|p| p.target_temp)
}

/// A single heating zone under PID control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatingZone {
    /// Opaque zone id.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Electric or water circuit.
    pub zone_type: ZoneType,
    /// Floor construction material.
    pub floor_material: FloorMaterial,
    /// User-set target temperature, °C, in `[5, 35]`.
    pub target_temp: f64,
    /// Current (sensor-fused) room temperature.
    pub current_temp: f64,
    /// Current floor temperature.
    pub floor_temp: f64,
    /// Current air temperature.
    pub air_temp: f64,
    /// Current relative humidity, percent.
    pub humidity: f64,
    /// Active behavioural preset.
    pub mode: Mode,
    /// Whether the zone is under active control at all.
    pub enabled: bool,
    /// Whether the actuator output is currently > 0.
    pub heating_active: bool,
    /// Active fault, if any.
    pub fault_code: Option<FaultCode>,
    /// PID integrator/derivative state.
    pub pid_state: PidState,
    /// Seven-day schedule.
    pub schedule: Schedule,
    /// Sensor calibration offset applied to all subsequent readings.
    pub sensor_offset: f64,
    /// Energy consumed today, kWh.
    pub energy_today_kwh: f64,
    /// Cumulative heating runtime, seconds.
    pub runtime_seconds: u64,
    /// Number of IDLE->HEATING rising edges.
    pub cycle_count: u64,
    /// Nominal electrical power of this zone's actuator, W (for energy accounting).
    pub nominal_power_w: f64,
    /// Millis since epoch of the last sensor reading.
    pub last_sensor_update_millis: u64,
}

impl HeatingZone {
    /// Validate the cross-field invariants from §3.
    pub fn validate(&self) -> Result<(), String> {
        if !(5.0..=35.0).contains(&self.target_temp) {
            return Err(format!("target temp {} outside [5, 35]", self.target_temp));
        }
        if self.floor_temp > self.floor_material.max_temp() + 0.001 {
            return Err(format!(
                "floor temp {} exceeds material max {}",
                self.floor_temp,
                self.floor_material.max_temp()
            ));
        }
        Ok(())
    }
}
