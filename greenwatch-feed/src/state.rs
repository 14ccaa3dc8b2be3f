use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use greenwatch_core::{
    ControlDevice, DeviceCode, Environment, LOG_CAPACITY, LogEntry, LogId, LogKind, ParameterKind,
    Reading, SensorReadings, StatusValue, Threshold, Thresholds,
};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

/// Everything the dashboard renders, as one immutable snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardState {
    pub env_list: Vec<Environment>,
    pub current_env: Option<Environment>,
    pub control_devices: Vec<ControlDevice>,
    /// Control (on/off) status per actuator.
    pub device_work_status: BTreeMap<DeviceCode, StatusValue>,
    /// Online/offline status per sensor device.
    pub sensor_online_status: BTreeMap<DeviceCode, StatusValue>,
    pub sensor_data: SensorReadings,
    pub thresholds: Thresholds,
    /// Newest first, at most `LOG_CAPACITY` entries.
    pub system_logs: VecDeque<LogEntry>,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            env_list: Vec::new(),
            current_env: None,
            control_devices: Vec::new(),
            device_work_status: BTreeMap::new(),
            sensor_online_status: BTreeMap::new(),
            sensor_data: SensorReadings::default(),
            thresholds: Thresholds::standard(),
            system_logs: VecDeque::with_capacity(LOG_CAPACITY),
        }
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

fn merge_statuses(
    map: &mut BTreeMap<DeviceCode, StatusValue>,
    updates: impl IntoIterator<Item = (DeviceCode, StatusValue)>,
) -> bool {
    let mut changed = false;
    for (device, status) in updates {
        changed |= map.insert(device, status) != Some(status);
    }
    changed
}

/// Shared state store for the dashboard.
///
/// Every mutator swaps in a complete new snapshot in one step, so a
/// subscriber never observes a half-applied update. Subscribers are only
/// woken when the snapshot actually changed.
#[derive(Clone)]
pub struct Store {
    inner: Arc<watch::Sender<DashboardState>>,
}

impl Store {
    pub fn new() -> Self {
        Self::with_state(DashboardState::default())
    }

    pub fn with_state(state: DashboardState) -> Self {
        let (tx, _rx) = watch::channel(state);
        Self {
            inner: Arc::new(tx),
        }
    }

    /// Receive every future snapshot.
    pub fn subscribe(&self) -> watch::Receiver<DashboardState> {
        self.inner.subscribe()
    }

    /// A copy of the current snapshot.
    pub fn snapshot(&self) -> DashboardState {
        self.inner.borrow().clone()
    }

    /// Run `f` against the current snapshot without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&DashboardState) -> R) -> R {
        f(&self.inner.borrow())
    }

    pub fn current_env(&self) -> Option<Environment> {
        self.read(|state| state.current_env.clone())
    }

    pub fn sensor_data(&self) -> SensorReadings {
        self.read(|state| state.sensor_data)
    }

    fn modify(&self, f: impl FnOnce(&mut DashboardState) -> bool) -> bool {
        self.inner.send_if_modified(f)
    }

    /// Replace the whole reading set.
    pub fn update_sensor_data(&self, readings: SensorReadings) {
        self.modify(|state| replace(&mut state.sensor_data, readings));
    }

    /// Overwrite the given parameters on a copy of the current readings and
    /// swap it in. Parameters not mentioned keep their previous value.
    pub fn merge_sensor_data(&self, updates: impl IntoIterator<Item = (ParameterKind, Reading)>) {
        self.modify(|state| {
            let mut next = state.sensor_data;
            for (kind, reading) in updates {
                next.set(kind, reading);
            }
            replace(&mut state.sensor_data, next)
        });
    }

    /// Set the control status of one actuator.
    pub fn update_device_work_status(&self, device: DeviceCode, status: StatusValue) {
        self.update_device_work_statuses([(device, status)]);
    }

    /// Set the control status of several actuators as one snapshot.
    pub fn update_device_work_statuses(
        &self,
        statuses: impl IntoIterator<Item = (DeviceCode, StatusValue)>,
    ) {
        self.modify(|state| merge_statuses(&mut state.device_work_status, statuses));
    }

    /// Merge online statuses into the current map. Devices that are not
    /// mentioned keep their last known status.
    pub fn update_sensor_online_status(
        &self,
        statuses: impl IntoIterator<Item = (DeviceCode, StatusValue)>,
    ) {
        self.modify(|state| {
            let mut next = state.sensor_online_status.clone();
            merge_statuses(&mut next, statuses) && replace(&mut state.sensor_online_status, next)
        });
    }

    /// Prepend an entry to the rolling log, evicting the oldest beyond
    /// `LOG_CAPACITY`.
    pub fn add_log(&self, kind: LogKind, message: &str, source: Option<&str>) -> LogId {
        let entry = LogEntry::new(kind, message, source);
        let id = entry.id;

        self.modify(|state| {
            state.system_logs.push_front(entry);
            state.system_logs.truncate(LOG_CAPACITY);
            true
        });

        id
    }

    pub fn update_threshold(&self, kind: ParameterKind, min: f64, max: f64) {
        self.modify(|state| replace(state.thresholds.get_mut(kind), Threshold::new(min, max)));
    }

    /// Select the environment whose frames are accepted. Readings are reset
    /// to the zero baseline in the same update.
    pub fn set_current_env(&self, env: Option<Environment>) {
        info!(env = ?env.as_ref().map(|e| e.code.as_str()), "Switching environment");

        self.modify(|state| {
            let env_changed = replace(&mut state.current_env, env);
            let readings_reset = replace(&mut state.sensor_data, SensorReadings::default());
            env_changed || readings_reset
        });
    }

    pub fn set_env_list(&self, envs: Vec<Environment>) {
        self.modify(|state| replace(&mut state.env_list, envs));
    }

    /// Record the authoritative actuator list and seed control statuses from
    /// it. Statuses of devices not in the list are kept.
    pub fn set_control_devices(&self, devices: Vec<ControlDevice>) {
        self.modify(|state| {
            let seeded = devices
                .iter()
                .map(|device| (device.device_code.clone(), device.status.unwrap_or(0)));
            let statuses_changed = merge_statuses(&mut state.device_work_status, seeded);
            let list_changed = replace(&mut state.control_devices, devices);
            statuses_changed || list_changed
        });
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
