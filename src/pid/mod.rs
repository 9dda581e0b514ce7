//! Multi-zone PID floor-heating controller — the one genuinely algorithmic
//! control loop in the system; every other domain subsystem follows the same
//! schedule + sampler + actuator + guard envelope and reuses this contract.

pub mod types;

pub use types::{
    schedule_demand, FaultCode, FloorMaterial, HeatingZone, Mode, PidParams, PidState,
    Schedule, SchedulePeriod, Weekday, ZoneType,
};

use crate::device::DeviceCache;
use crate::error::{ErrorMiddleware, HearthError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const SENSOR_STALE_MILLIS: u64 = 10 * 60 * 1000;
const SUMMER_SHUTDOWN_OUTDOOR_C: f64 = 18.0;
const ERROR_DEADBAND: f64 = 0.05;

/// Observed zone lifecycle state, derived from `heating_active`/`fault_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ZoneState {
    /// Not currently demanding heat.
    Idle,
    /// Actuator output > 0.
    Heating,
    /// A fault is active; output forced 0 until `clear_fault`.
    Fault,
}

/// Inputs needed to evaluate one control tick, independent of wall-clock
/// access so the loop is fully deterministic in tests.
#[derive(Debug, Clone)]
pub struct TickContext {
    /// Millis since epoch "now" for this tick.
    pub now_millis: u64,
    /// Minutes since midnight, for schedule/night-setback lookups.
    pub minute_of_day: u16,
    /// Day of week, for schedule lookups.
    pub weekday: Weekday,
    /// Seconds elapsed since the previous tick.
    pub dt_seconds: f64,
    /// Trailing 24h average outdoor temperature, if known.
    pub outdoor_avg_temp_24h: Option<f64>,
    /// Zone ids with an open window currently detected.
    pub open_window: HashSet<String>,
}

/// Options accepted by `add_zone`.
#[derive(Debug, Clone)]
pub struct AddZoneOptions {
    /// Initial target temperature, °C.
    pub target_temp: f64,
    /// Actuator nominal electrical power, W.
    pub nominal_power_w: f64,
}

impl Default for AddZoneOptions {
    fn default() -> Self {
        Self {
            target_temp: 21.0,
            nominal_power_w: 1200.0,
        }
    }
}

/// Read-only status view returned by the query operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneStatus {
    /// The zone's full current record.
    pub zone: HeatingZone,
    /// Derived lifecycle state.
    pub state: ZoneState,
    /// Most recently computed actuator output, percent.
    pub last_output_percent: f64,
}

/// System-wide rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSummary {
    /// Total zones registered.
    pub total_zones: usize,
    /// Zones currently heating.
    pub heating_count: usize,
    /// Zones currently faulted.
    pub fault_count: usize,
    /// Sum of today's energy across all zones, kWh.
    pub total_energy_today_kwh: f64,
}

/// Aggregate statistics across all zones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerStatistics {
    /// Total control ticks executed.
    pub ticks_executed: u64,
    /// Total cycle (idle->heating) transitions across all zones.
    pub total_cycles: u64,
    /// Total accumulated runtime across all zones, seconds.
    pub total_runtime_seconds: u64,
}

/// Reporting period for `get_energy_report`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergyPeriod {
    Day,
    Week,
    Month,
    Total,
}

#[derive(Default, Clone, Copy)]
struct EnergyBuckets {
    day: f64,
    week: f64,
    month: f64,
    total: f64,
}

struct ZoneEntry {
    zone: HeatingZone,
    last_output_percent: f64,
    bathroom_preheat: Option<(u16, u16)>, // (start_minute, duration_minutes)
    energy: EnergyBuckets,
}

/// Multi-zone PID heating controller.
pub struct HeatingController {
    zones: RwLock<HashMap<String, ZoneEntry>>,
    pid_params: RwLock<PidParams>,
    holiday_mode: RwLock<bool>,
    night_setback: RwLock<Option<(u16, u16)>>,
    actuator: Option<Arc<DeviceCache>>,
    errors: Arc<ErrorMiddleware>,
    ticks_executed: RwLock<u64>,
}

impl HeatingController {
    /// Construct a controller with an optional actuator backend (device
    /// cache) and the shared error middleware.
    pub fn new(actuator: Option<Arc<DeviceCache>>, errors: Arc<ErrorMiddleware>) -> Self {
        Self {
            zones: RwLock::new(HashMap::new()),
            pid_params: RwLock::new(PidParams::default()),
            holiday_mode: RwLock::new(false),
            night_setback: RwLock::new(None),
            actuator,
            errors,
            ticks_executed: RwLock::new(0),
        }
    }

    /// Register a new zone.
    pub fn add_zone(
        &self,
        id: &str,
        name: &str,
        zone_type: &str,
        material: &str,
        opts: AddZoneOptions,
    ) -> Result<ZoneStatus, HearthError> {
        let zone_type = ZoneType::parse(zone_type)
            .ok_or_else(|| HearthError::Validation(format!("unknown zone type: {zone_type}")))?;
        let material = FloorMaterial::parse(material)
            .ok_or_else(|| HearthError::Validation(format!("unknown floor material: {material}")))?;
        if !(5.0..=35.0).contains(&opts.target_temp) {
            return Err(HearthError::Validation("target temp outside [5, 35]".into()));
        }

        let mut zones = self.zones.write();
        if zones.contains_key(id) {
            return Err(HearthError::AlreadyExists(format!("zone {id}")));
        }

        let zone = HeatingZone {
            id: id.to_string(),
            display_name: name.to_string(),
            zone_type,
            floor_material: material,
            target_temp: opts.target_temp,
            current_temp: opts.target_temp,
            floor_temp: opts.target_temp,
            air_temp: opts.target_temp,
            humidity: 45.0,
            mode: Mode::Comfort,
            enabled: true,
            heating_active: false,
            fault_code: None,
            pid_state: PidState::default(),
            schedule: Schedule::new(),
            sensor_offset: 0.0,
            energy_today_kwh: 0.0,
            runtime_seconds: 0,
            cycle_count: 0,
            nominal_power_w: opts.nominal_power_w,
            last_sensor_update_millis: 0,
        };

        let status = ZoneStatus {
            zone: zone.clone(),
            state: ZoneState::Idle,
            last_output_percent: 0.0,
        };
        zones.insert(
            id.to_string(),
            ZoneEntry {
                zone,
                last_output_percent: 0.0,
                bathroom_preheat: None,
                energy: EnergyBuckets::default(),
            },
        );
        Ok(status)
    }

    /// Remove a zone. Fails if unknown.
    pub fn remove_zone(&self, id: &str) -> Result<(), HearthError> {
        self.zones
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| HearthError::NotFound(format!("zone {id}")))
    }

    /// Set a zone's user target temperature, rejecting values outside
    /// `[5, 35]`.
    pub fn set_zone_temp(&self, id: &str, temp: f64) -> Result<(), HearthError> {
        if !(5.0..=35.0).contains(&temp) {
            return Err(HearthError::Validation("target temp outside [5, 35]".into()));
        }
        self.with_zone_mut(id, |z| z.target_temp = temp)
    }

    /// Set a zone's behavioural mode.
    pub fn set_mode(&self, id: &str, mode: Mode) -> Result<(), HearthError> {
        self.with_zone_mut(id, |z| z.mode = mode)
    }

    /// Set every zone's mode in one call.
    pub fn set_all_zones_mode(&self, mode: Mode) {
        let mut zones = self.zones.write();
        for entry in zones.values_mut() {
            entry.zone.mode = mode;
        }
    }

    /// Fuse and record new sensor readings. Unknown ids are silently
    /// dropped, matching device-sensor realities (§4.2 explicit exception
    /// to the general "mutations reject unknown ids" rule).
    pub fn update_sensor_readings(
        &self,
        id: &str,
        floor_temp: Option<f64>,
        air_temp: Option<f64>,
        humidity: Option<f64>,
        now_millis: u64,
    ) {
        let mut zones = self.zones.write();
        let Some(entry) = zones.get_mut(id) else {
            return;
        };
        let offset = entry.zone.sensor_offset;
        if let Some(ft) = floor_temp {
            entry.zone.floor_temp = ft + offset;
        }
        if let Some(at) = air_temp {
            entry.zone.air_temp = at + offset;
        }
        if let Some(h) = humidity {
            entry.zone.humidity = h;
        }
        entry.zone.current_temp = 0.7 * entry.zone.air_temp + 0.3 * entry.zone.floor_temp;
        entry.zone.last_sensor_update_millis = now_millis;
    }

    /// Apply a persistent calibration offset: shifts the zone's current
    /// readings immediately and is applied to every subsequent sample (not
    /// a one-shot, and never rewrites historical data).
    pub fn calibrate_sensor(&self, id: &str, offset: f64) -> Result<(), HearthError> {
        self.with_zone_mut(id, |z| {
            z.sensor_offset += offset;
            z.floor_temp += offset;
            z.air_temp += offset;
            z.current_temp = 0.7 * z.air_temp + 0.3 * z.floor_temp;
        })
    }

    /// Replace the schedule for one day.
    pub fn set_schedule(
        &self,
        id: &str,
        day: Weekday,
        periods: Vec<SchedulePeriod>,
    ) -> Result<(), HearthError> {
        self.with_zone_mut(id, |z| {
            z.schedule.insert(day, periods);
        })
    }

    /// Fetch the schedule for one day (empty if none set). Fails for an
    /// unknown zone (observation on a non-existent zone is still a refusal
    /// here since the caller asked for a specific zone id explicitly).
    pub fn get_schedule(&self, id: &str, day: Weekday) -> Result<Vec<SchedulePeriod>, HearthError> {
        let zones = self.zones.read();
        let entry = zones.get(id).ok_or_else(|| HearthError::NotFound(format!("zone {id}")))?;
        Ok(entry.zone.schedule.get(&day).cloned().unwrap_or_default())
    }

    /// Partially update the shared PID gains.
    pub fn set_pid_params(&self, kp: Option<f64>, ki: Option<f64>, kd: Option<f64>) {
        let mut params = self.pid_params.write();
        if let Some(kp) = kp {
            params.kp = kp;
        }
        if let Some(ki) = ki {
            params.ki = ki;
        }
        if let Some(kd) = kd {
            params.kd = kd;
        }
    }

    /// Enable or disable holiday mode (clamps max setpoint to 16°C).
    pub fn set_holiday_mode(&self, enabled: bool) {
        *self.holiday_mode.write() = enabled;
    }

    /// Configure the global night-setback window (minutes since midnight).
    pub fn set_night_setback(&self, start_minute: u16, end_minute: u16) {
        *self.night_setback.write() = Some((start_minute, end_minute));
    }

    /// Configure a per-zone bathroom pre-heat window.
    pub fn set_bathroom_preheat(
        &self,
        id: &str,
        start_minute: u16,
        duration_minutes: u16,
    ) -> Result<(), HearthError> {
        let mut zones = self.zones.write();
        let entry = zones.get_mut(id).ok_or_else(|| HearthError::NotFound(format!("zone {id}")))?;
        entry.bathroom_preheat = Some((start_minute, duration_minutes));
        Ok(())
    }

    /// Clear an active fault, returning the zone to IDLE evaluation.
    pub fn clear_fault(&self, id: &str) -> Result<(), HearthError> {
        self.with_zone_mut(id, |z| z.fault_code = None)
    }

    /// Current status of one zone.
    pub fn get_zone_status(&self, id: &str) -> Result<ZoneStatus, HearthError> {
        let zones = self.zones.read();
        let entry = zones.get(id).ok_or_else(|| HearthError::NotFound(format!("zone {id}")))?;
        Ok(Self::status_of(entry))
    }

    /// Status of every zone.
    pub fn get_all_zone_status(&self) -> Vec<ZoneStatus> {
        self.zones.read().values().map(Self::status_of).collect()
    }

    /// System-wide rollup.
    pub fn get_system_summary(&self) -> SystemSummary {
        let zones = self.zones.read();
        let mut heating_count = 0;
        let mut fault_count = 0;
        let mut total_energy = 0.0;
        for entry in zones.values() {
            if entry.zone.heating_active {
                heating_count += 1;
            }
            if entry.zone.fault_code.is_some() {
                fault_count += 1;
            }
            total_energy += entry.zone.energy_today_kwh;
        }
        SystemSummary {
            total_zones: zones.len(),
            heating_count,
            fault_count,
            total_energy_today_kwh: total_energy,
        }
    }

    /// Aggregate controller statistics.
    pub fn get_statistics(&self) -> ControllerStatistics {
        let zones = self.zones.read();
        let mut total_cycles = 0;
        let mut total_runtime = 0;
        for entry in zones.values() {
            total_cycles += entry.zone.cycle_count;
            total_runtime += entry.zone.runtime_seconds;
        }
        ControllerStatistics {
            ticks_executed: *self.ticks_executed.read(),
            total_cycles,
            total_runtime_seconds: total_runtime,
        }
    }

    /// Energy consumed across all zones over `period`.
    pub fn get_energy_report(&self, period: EnergyPeriod) -> f64 {
        self.zones
            .read()
            .values()
            .map(|e| match period {
                EnergyPeriod::Day => e.energy.day,
                EnergyPeriod::Week => e.energy.week,
                EnergyPeriod::Month => e.energy.month,
                EnergyPeriod::Total => e.energy.total,
            })
            .sum()
    }

    fn with_zone_mut<F: FnOnce(&mut HeatingZone)>(&self, id: &str, f: F) -> Result<(), HearthError> {
        let mut zones = self.zones.write();
        let entry = zones.get_mut(id).ok_or_else(|| HearthError::NotFound(format!("zone {id}")))?;
        f(&mut entry.zone);
        Ok(())
    }

    fn status_of(entry: &ZoneEntry) -> ZoneStatus {
        let state = if entry.zone.fault_code.is_some() {
            ZoneState::Fault
        } else if entry.zone.heating_active {
            ZoneState::Heating
        } else {
            ZoneState::Idle
        };
        ZoneStatus {
            zone: entry.zone.clone(),
            state,
            last_output_percent: entry.last_output_percent,
        }
    }

    /// Run one control tick across every zone, writing actuator outputs
    /// through the device cache when one is configured. CPU-only except for
    /// the actuator write, which is bounded by the device cache's own
    /// timeout and never halts the loop on failure.
    pub async fn tick(&self, ctx: &TickContext) {
        let zone_ids: Vec<String> = self.zones.read().keys().cloned().collect();
        for id in zone_ids {
            self.tick_zone(&id, ctx).await;
        }
        *self.ticks_executed.write() += 1;
    }

    async fn tick_zone(&self, id: &str, ctx: &TickContext) {
        let params = *self.pid_params.read();
        let holiday_mode = *self.holiday_mode.read();
        let night_setback = *self.night_setback.read();

        // Compute everything that needs only the snapshot under the lock,
        // then release it before the (possibly suspending) actuator write.
        let plan = {
            let mut zones = self.zones.write();
            let Some(entry) = zones.get_mut(id) else {
                return;
            };
            Self::plan_zone(entry, ctx, params, holiday_mode, night_setback)
        };

        let Some(plan) = plan else { return };

        if let Some(actuator) = &self.actuator {
            let result = actuator
                .set_capability(id, "heating_output", serde_json::json!(plan.output))
                .await;
            if let Err(e) = result {
                self.errors.record_error("pid-controller", &e);
            }
        }
    }

    fn plan_zone(
        entry: &mut ZoneEntry,
        ctx: &TickContext,
        params: PidParams,
        holiday_mode: bool,
        night_setback: Option<(u16, u16)>,
    ) -> Option<ZonePlan> {
        let zone = &mut entry.zone;

        if zone.fault_code.is_some() {
            zone.heating_active = false;
            entry.last_output_percent = 0.0;
            return Some(ZonePlan { output: 0.0 });
        }

        if !zone.enabled {
            zone.heating_active = false;
            entry.last_output_percent = 0.0;
            return Some(ZonePlan { output: 0.0 });
        }

        if zone.last_sensor_update_millis > 0
            && ctx.now_millis.saturating_sub(zone.last_sensor_update_millis) > SENSOR_STALE_MILLIS
        {
            zone.fault_code = Some(FaultCode::SensorStale);
            zone.heating_active = false;
            entry.last_output_percent = 0.0;
            return Some(ZonePlan { output: 0.0 });
        }

        if ctx.open_window.contains(&zone.id) {
            zone.heating_active = false;
            entry.last_output_percent = 0.0;
            return Some(ZonePlan { output: 0.0 });
        }

        // 1. Effective setpoint.
        let mut setpoint = zone.target_temp;
        match zone.mode {
            Mode::Eco => setpoint -= 2.0,
            Mode::Frost => setpoint = 5.0,
            Mode::Comfort => {}
        }
        if let Some((start, end)) = night_setback {
            if in_window(ctx.minute_of_day, start, end) {
                setpoint -= 2.0;
            }
        }
        if let Some((start, duration)) = entry.bathroom_preheat {
            if in_window(ctx.minute_of_day, start, start.wrapping_add(duration)) {
                setpoint = zone.target_temp;
            }
        }
        if holiday_mode {
            setpoint = setpoint.min(16.0);
        }
        if let Some(outdoor) = ctx.outdoor_avg_temp_24h {
            if outdoor > SUMMER_SHUTDOWN_OUTDOOR_C {
                zone.heating_active = false;
                entry.last_output_percent = 0.0;
                return Some(ZonePlan { output: 0.0 });
            }
        }

        // 2 (covered above for open-window). 3-4. PID advance.
        let error = setpoint - zone.current_temp;
        let mut output;
        if error.abs() < ERROR_DEADBAND {
            output = 0.0;
        } else {
            let dt = ctx.dt_seconds.max(0.0);
            zone.pid_state.integral += error * dt;
            if params.ki > 0.0 {
                let limit = 100.0 / params.ki;
                zone.pid_state.integral = zone.pid_state.integral.clamp(-limit, limit);
            }
            let derivative = if dt > 0.0 {
                (error - zone.pid_state.last_error) / dt
            } else {
                0.0
            };
            output = params.kp * error + params.ki * zone.pid_state.integral + params.kd * derivative;
            output = output.clamp(0.0, 100.0);
            zone.pid_state.last_error = error;
            zone.pid_state.last_update_millis = ctx.now_millis;
        }

        // 5. Floor protection.
        let material_max = zone.floor_material.max_temp();
        if zone.floor_temp > material_max {
            output = 0.0;
            zone.fault_code = Some(FaultCode::OverTemp);
        } else if zone.floor_temp > material_max - 1.0 {
            let scale = ((material_max - zone.floor_temp) / 1.0).clamp(0.0, 1.0);
            output *= scale;
        }

        // 6. Bookkeeping.
        let was_heating = zone.heating_active;
        zone.heating_active = output > 0.0;
        if !was_heating && zone.heating_active {
            zone.cycle_count += 1;
        }
        let dt = ctx.dt_seconds.max(0.0);
        if zone.heating_active {
            zone.runtime_seconds += dt as u64;
        }
        let energy_kwh = (output / 100.0) * zone.nominal_power_w * dt / 3_600_000.0;
        zone.energy_today_kwh += energy_kwh;
        entry.energy.day += energy_kwh;
        entry.energy.week += energy_kwh;
        entry.energy.month += energy_kwh;
        entry.energy.total += energy_kwh;
        entry.last_output_percent = output;

        Some(ZonePlan { output })
    }
}

struct ZonePlan {
    output: f64,
}

fn in_window(minute_of_day: u16, start: u16, end: u16) -> bool {
    if start <= end {
        minute_of_day >= start && minute_of_day < end
    } else {
        // Window wraps past midnight.
        minute_of_day >= start || minute_of_day < end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceManager, InMemoryDeviceManager};
    use std::collections::HashSet as StdHashSet;

    fn ctx(now_millis: u64, dt_seconds: f64) -> TickContext {
        TickContext {
            now_millis,
            minute_of_day: 600,
            weekday: Weekday::Monday,
            dt_seconds,
            outdoor_avg_temp_24h: None,
            open_window: StdHashSet::new(),
        }
    }

    fn controller() -> HeatingController {
        HeatingController::new(None, Arc::new(ErrorMiddleware::new()))
    }

    #[test]
    fn add_zone_rejects_unknown_material() {
        let c = controller();
        let err = c.add_zone("z1", "Bath", "electric", "marble", AddZoneOptions::default());
        assert!(err.is_err());
    }

    #[test]
    fn set_zone_temp_enforces_bounds() {
        let c = controller();
        c.add_zone("z1", "Bath", "electric", "wood", AddZoneOptions::default()).unwrap();
        assert!(c.set_zone_temp("z1", 5.0).is_ok());
        assert!(c.set_zone_temp("z1", 35.0).is_ok());
        assert!(c.set_zone_temp("z1", 4.999).is_err());
        assert!(c.set_zone_temp("z1", 35.001).is_err());
    }

    #[test]
    fn set_zone_temp_round_trips() {
        let c = controller();
        c.add_zone("z1", "Bath", "electric", "wood", AddZoneOptions::default()).unwrap();
        c.set_zone_temp("z1", 22.5).unwrap();
        assert_eq!(c.get_zone_status("z1").unwrap().zone.target_temp, 22.5);
    }

    #[test]
    fn remove_unknown_zone_fails() {
        let c = controller();
        assert!(c.remove_zone("ghost").is_err());
    }

    #[tokio::test]
    async fn floor_protection_scenario_from_spec() {
        let c = controller();
        c.add_zone("z1", "Bath", "electric", "wood", AddZoneOptions::default()).unwrap();
        c.set_zone_temp("z1", 24.0).unwrap();
        c.update_sensor_readings("z1", Some(26.5), Some(20.0), None, 1_000);
        // current_temp fused from air/floor; force it directly below target
        // by re-reading air at 20 so fused temp sits well under target.
        c.tick(&ctx(2_000, 30.0)).await;
        let status = c.get_zone_status("z1").unwrap();
        assert!(status.last_output_percent < 100.0);
        assert!(status.zone.fault_code.is_none());

        c.update_sensor_readings("z1", Some(27.1), None, None, 3_000);
        c.tick(&ctx(4_000, 30.0)).await;
        let status = c.get_zone_status("z1").unwrap();
        assert_eq!(status.last_output_percent, 0.0);
        assert_eq!(status.zone.fault_code, Some(FaultCode::OverTemp));

        c.clear_fault("z1").unwrap();
        c.update_sensor_readings("z1", Some(25.0), Some(20.0), None, 5_000);
        c.tick(&ctx(6_000, 30.0)).await;
        let status = c.get_zone_status("z1").unwrap();
        assert!(status.last_output_percent > 0.0);
    }

    #[tokio::test]
    async fn open_window_forces_zero_output_without_fault() {
        let c = controller();
        c.add_zone("z1", "Hall", "water", "tile", AddZoneOptions::default()).unwrap();
        c.set_zone_temp("z1", 24.0).unwrap();
        c.update_sensor_readings("z1", Some(20.0), Some(10.0), None, 1_000);
        let mut tc = ctx(2_000, 30.0);
        tc.open_window.insert("z1".to_string());
        c.tick(&tc).await;
        let status = c.get_zone_status("z1").unwrap();
        assert_eq!(status.last_output_percent, 0.0);
        assert!(status.zone.fault_code.is_none());
    }

    #[tokio::test]
    async fn summer_shutdown_forces_zero_output() {
        let c = controller();
        c.add_zone("z1", "Hall", "water", "tile", AddZoneOptions::default()).unwrap();
        c.set_zone_temp("z1", 24.0).unwrap();
        c.update_sensor_readings("z1", Some(20.0), Some(10.0), None, 1_000);
        let mut tc = ctx(2_000, 30.0);
        tc.outdoor_avg_temp_24h = Some(19.0);
        c.tick(&tc).await;
        let status = c.get_zone_status("z1").unwrap();
        assert_eq!(status.last_output_percent, 0.0);
    }

    #[tokio::test]
    async fn sensor_stale_raises_fault() {
        let c = controller();
        c.add_zone("z1", "Hall", "water", "tile", AddZoneOptions::default()).unwrap();
        c.update_sensor_readings("z1", Some(20.0), Some(20.0), None, 500);
        c.tick(&ctx(SENSOR_STALE_MILLIS + 1_000, 30.0)).await;
        let status = c.get_zone_status("z1").unwrap();
        assert_eq!(status.zone.fault_code, Some(FaultCode::SensorStale));
    }

    #[tokio::test]
    async fn unknown_sensor_update_is_silently_dropped() {
        let c = controller();
        c.update_sensor_readings("ghost", Some(1.0), None, None, 0);
        assert!(c.get_zone_status("ghost").is_err());
    }

    #[tokio::test]
    async fn disabled_zone_stays_idle() {
        let c = controller();
        c.add_zone("z1", "Hall", "water", "tile", AddZoneOptions::default()).unwrap();
        c.with_zone_mut("z1", |z| z.enabled = false).unwrap();
        c.tick(&ctx(1_000, 30.0)).await;
        let status = c.get_zone_status("z1").unwrap();
        assert_eq!(status.state, ZoneState::Idle);
    }

    #[tokio::test]
    async fn actuator_writes_go_through_device_cache() {
        let backend = Arc::new(InMemoryDeviceManager::new());
        let mut caps = StdHashSet::new();
        caps.insert("heating_output".to_string());
        backend
            .upsert_device(Device {
                id: "z1".to_string(),
                name: "Zone 1 actuator".to_string(),
                zone_id: "z1".to_string(),
                class: "thermostat".to_string(),
                capabilities: caps,
                capability_values: HashMap::new(),
            })
            .unwrap();
        let cache = Arc::new(DeviceCache::new(backend.clone()));
        cache.refresh().await.unwrap();

        let c = HeatingController::new(Some(cache.clone()), Arc::new(ErrorMiddleware::new()));
        c.add_zone("z1", "Zone 1", "electric", "tile", AddZoneOptions::default()).unwrap();
        c.set_zone_temp("z1", 30.0).unwrap();
        c.update_sensor_readings("z1", Some(20.0), Some(15.0), None, 1_000);
        c.tick(&ctx(2_000, 30.0)).await;

        let value = backend.get_device_capability("z1", "heating_output").await.unwrap();
        assert!(value.as_f64().unwrap() > 0.0);
    }
}
