// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The power mode transition engine and the public facade.
//!
//! All inbound operations land here. The engine serialises requests to
//! change the power state, runs the pre-change acknowledgement protocol,
//! drives the HAL and the settings store, and emits notifications outside
//! of every lock. Transitions with registered pre-change clients run on a
//! dedicated worker thread that parks in the acknowledgement controller;
//! zero-window transitions commit inline on the caller.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use log::debug;
use log::error;
use log::info;
use log::warn;

use crate::ack::AckController;
use crate::ack::Completion;
use crate::config;
use crate::config::ConfigStore;
use crate::deepsleep;
use crate::events::Notifier;
use crate::hal::PowerHal;
use crate::pwrutil::PwrMgrError;
use crate::reboot;
use crate::reboot::ShellRunner;
use crate::settings::Settings;
use crate::thermal;
use crate::thermal::ThermalState;
use crate::types::PowerState;
use crate::types::WakeupReason;
use crate::types::WakeupSource;
use crate::types::WakeupSourceSet;
use crate::wakeup::WakeupRegistry;

/// Well-known filesystem locations the manager touches. `with_root` lets
/// tests relocate the whole tree under a tempdir.
#[derive(Clone, Debug)]
pub struct Paths {
    pub settings_file: PathBuf,
    pub restarted_marker: PathBuf,
    pub ignore_deep_sleep: PathBuf,
    pub deep_sleep_timer_gate: PathBuf,
    pub deep_sleep_timer_val: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        Self::with_root(Path::new("/"))
    }

    pub fn with_root(root: &Path) -> Self {
        Paths {
            settings_file: root.join("opt/uimgr_settings.bin"),
            restarted_marker: root.join("tmp/pwrmgr_restarted"),
            ignore_deep_sleep: root.join("tmp/ignoredeepsleep"),
            deep_sleep_timer_gate: root.join("tmp/deepSleepTimer"),
            deep_sleep_timer_val: root.join("tmp/deepSleepTimerVal"),
        }
    }
}

impl Default for Paths {
    fn default() -> Self {
        Paths::new()
    }
}

/// Tunables of the manager. The defaults match the shipped behaviour.
pub struct ManagerOptions {
    pub paths: Paths,
    /// Snap cold boots to STANDBY instead of the persisted state.
    pub boot_to_standby: bool,
    /// Initial pre-change window granted when clients are registered.
    pub pre_change_window_secs: u32,
    /// Ceiling on any single client delay request.
    pub max_pre_change_delay_secs: u32,
    /// How many times deep sleep entry is attempted before giving up.
    pub deep_sleep_attempts: u32,
    /// Whether the HAL wakeup call still runs after every entry attempt
    /// failed. The legacy stack always ran it to unstick the device.
    pub wakeup_on_deep_sleep_failure: bool,
    /// Gates the thermal poll thread as a whole; the configuration store
    /// can also disable it.
    pub run_thermal_monitor: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        ManagerOptions {
            paths: Paths::new(),
            boot_to_standby: cfg!(feature = "boot-to-standby"),
            pre_change_window_secs: 1,
            max_pre_change_delay_secs: 1800,
            deep_sleep_attempts: 5,
            wakeup_on_deep_sleep_failure: true,
            run_thermal_monitor: true,
        }
    }
}

/// Where a transition request came from. Deep-sleep wakeups commit without
/// waiting on acknowledgements; queued requests bypass the deep-sleep gate
/// they were parked behind.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    External,
    DeepSleepWake,
    Queued,
}

struct EngineState {
    current: PowerState,
    previous: PowerState,
    active: Option<Arc<AckController>>,
}

struct ClientTable {
    next_id: u32,
    clients: BTreeMap<u32, String>,
}

impl ClientTable {
    fn snapshot(&self) -> Vec<(u32, String)> {
        self.clients
            .iter()
            .map(|(id, name)| (*id, name.clone()))
            .collect()
    }
}

pub(crate) struct PendingRequest {
    pub(crate) key_code: i32,
    pub(crate) target: PowerState,
    pub(crate) reason: String,
}

pub(crate) struct DeepSleepTask {
    pub(crate) running: bool,
    pub(crate) handle: Option<thread::JoinHandle<()>>,
    pub(crate) pending: Option<PendingRequest>,
}

/// Everything the worker threads share with the facade.
pub(crate) struct Shared {
    pub(crate) hal: Arc<dyn PowerHal>,
    pub(crate) runner: Arc<dyn ShellRunner>,
    pub(crate) opts: ManagerOptions,
    pub(crate) notifier: Notifier,
    pub(crate) settings: Mutex<Settings>,
    pub(crate) wakeup: WakeupRegistry,
    pub(crate) thermal: ThermalState,
    pub(crate) deep_sleep: Mutex<DeepSleepTask>,
    clients: Mutex<ClientTable>,
    engine: Mutex<EngineState>,
    next_transaction: AtomicU32,
}

/// The power manager facade. One instance per process; an RPC layer wraps
/// these synchronous entry points.
pub struct PowerManager {
    shared: Arc<Shared>,
    thermal_worker: Option<thread::JoinHandle<()>>,
}

impl PowerManager {
    /// Bring the platform up, load persisted state, and start the thermal
    /// monitor. The injected capabilities replace the legacy global
    /// singletons; tests substitute fakes for all three.
    pub fn new(
        hal: Arc<dyn PowerHal>,
        config_store: Arc<dyn ConfigStore>,
        runner: Arc<dyn ShellRunner>,
        opts: ManagerOptions,
    ) -> Result<PowerManager, PwrMgrError> {
        hal.init()
            .map_err(|e| PwrMgrError::Unavailable(format!("platform init failed: {:#}", e)))?;

        let restarted = opts.paths.restarted_marker.exists();
        let settings = Settings::load(&opts.paths.settings_file, restarted, opts.boot_to_standby)
            .map_err(|e| PwrMgrError::general(format!("cannot load settings: {:#}", e)))?;

        match hal.power_state() {
            Ok(state) => debug!("Platform reports power state {}", state),
            Err(e) => warn!("Cannot read platform power state: {:#}", e),
        }

        let current = settings.power_state();
        if let Err(e) = hal.set_power_state(current) {
            warn!("Cannot apply initial power state {}: {:#}", current, e);
        }

        let wakeup = WakeupRegistry::new(Arc::clone(&hal));
        wakeup.seed_network_standby(settings.nw_standby_mode());

        if let Err(e) = hal.set_temperature_thresholds(
            thermal::DEFAULT_TEMPERATURE_HIGH,
            thermal::DEFAULT_TEMPERATURE_CRITICAL,
        ) {
            warn!("Cannot apply default temperature thresholds: {:#}", e);
        }

        let grace = config::get_or(
            config_store.as_ref(),
            config::KEY_THERMAL_DEEPSLEEP_GRACE_INTERVAL,
            thermal::DEFAULT_DEEPSLEEP_GRACE_SECS,
        );
        let thermal_enabled = config::get_bool_or(
            config_store.as_ref(),
            config::KEY_THERMAL_PROTECTION_ENABLED,
            true,
        );
        let poll_secs = config::get_or(
            config_store.as_ref(),
            config::KEY_THERMAL_POLL_INTERVAL,
            thermal::DEFAULT_POLL_INTERVAL_SECS,
        );

        let shared = Arc::new(Shared {
            hal,
            runner,
            notifier: Notifier::new(),
            settings: Mutex::new(settings),
            wakeup,
            thermal: ThermalState::new(grace),
            deep_sleep: Mutex::new(DeepSleepTask {
                running: false,
                handle: None,
                pending: None,
            }),
            clients: Mutex::new(ClientTable {
                next_id: 1,
                clients: BTreeMap::new(),
            }),
            engine: Mutex::new(EngineState {
                current,
                previous: current,
                active: None,
            }),
            next_transaction: AtomicU32::new(1),
            opts,
        });

        let mut thermal_worker = None;
        if shared.opts.run_thermal_monitor && thermal_enabled {
            let task = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name("pwrmgr-thermal".to_string())
                .spawn(move || thermal::run(task, Duration::from_secs(poll_secs)))
                .map_err(|e| {
                    PwrMgrError::general(format!("cannot spawn thermal monitor: {}", e))
                })?;
            thermal_worker = Some(handle);
            info!("Thermal protection enabled, polling every {}s", poll_secs);
        } else {
            info!("Thermal protection disabled");
        }

        info!("Power manager ready in state {}", current);
        Ok(PowerManager {
            shared,
            thermal_worker,
        })
    }

    /// The subscriber registries.
    pub fn events(&self) -> &Notifier {
        &self.shared.notifier
    }

    /// Request a transition to `target`. Returns once the transition has
    /// been accepted (and, when no clients need consulting, committed);
    /// notifications are always delivered out of band.
    pub fn set_power_state(
        &self,
        key_code: i32,
        target: PowerState,
        reason: &str,
    ) -> Result<(), PwrMgrError> {
        if !target.is_settable() {
            return Err(PwrMgrError::invalid(format!(
                "power state {} is not a settable target",
                target
            )));
        }
        info!(
            "Power state {} requested by \"{}\" (key code {})",
            target, reason, key_code
        );
        request_power_state(&self.shared, key_code, target, reason, Origin::External)
    }

    /// Snapshot of the committed `(current, previous)` pair. Never reflects
    /// a mid-transition value.
    pub fn power_state(&self) -> Result<(PowerState, PowerState), PwrMgrError> {
        let engine = self.shared.engine.lock().unwrap();
        Ok((engine.current, engine.previous))
    }

    /// The power state that was persisted when this process last started.
    pub fn power_state_before_reboot(&self) -> Result<PowerState, PwrMgrError> {
        Ok(self
            .shared
            .settings
            .lock()
            .unwrap()
            .power_state_before_reboot())
    }

    /// Register a pre-change client. The id is non-zero and unique for the
    /// process lifetime.
    pub fn add_pre_change_client(&self, name: &str) -> Result<u32, PwrMgrError> {
        let mut table = self.shared.clients.lock().unwrap();
        let id = table.next_id;
        table.next_id += 1;
        table.clients.insert(id, name.to_string());
        info!("Added pre-change client \"{}\" with id {}", name, id);
        Ok(id)
    }

    /// Remove a pre-change client. If it held the last outstanding
    /// acknowledgement of the active transition, the transition completes
    /// promptly.
    pub fn remove_pre_change_client(&self, client_id: u32) -> Result<(), PwrMgrError> {
        let name = self
            .shared
            .clients
            .lock()
            .unwrap()
            .clients
            .remove(&client_id)
            .ok_or_else(|| PwrMgrError::invalid(format!("unknown client id {}", client_id)))?;
        info!("Removed pre-change client \"{}\" ({})", name, client_id);

        let active = self.shared.engine.lock().unwrap().active.clone();
        if let Some(active) = active {
            active.remove_client(client_id);
        }
        Ok(())
    }

    /// Acknowledge the active pre-change on behalf of `client_id`.
    pub fn pre_change_complete(
        &self,
        client_id: u32,
        transaction_id: u32,
    ) -> Result<(), PwrMgrError> {
        let active = self.active_controller()?;
        active.acknowledge(client_id, transaction_id)
    }

    /// Replace `client_id`'s requested delay for the active pre-change.
    pub fn delay_pre_change_by(
        &self,
        client_id: u32,
        transaction_id: u32,
        secs: u32,
    ) -> Result<(), PwrMgrError> {
        let active = self.active_controller()?;
        active.extend_delay(client_id, transaction_id, secs)
    }

    /// Update the enabled bit of every source in `sources` from `config`.
    pub fn set_wakeup_src_config(
        &self,
        power_mode: u32,
        sources: WakeupSourceSet,
        config: WakeupSourceSet,
    ) -> Result<(), PwrMgrError> {
        debug!("Wakeup source update for power mode {}", power_mode);
        let change = self.shared.wakeup.apply(sources, config)?;
        self.shared.publish_network_standby(change);
        Ok(())
    }

    /// Read the enabled bits of the requested sources back from the HAL.
    pub fn wakeup_src_config(
        &self,
        sources: WakeupSourceSet,
    ) -> Result<WakeupSourceSet, PwrMgrError> {
        self.shared.wakeup.query(sources)
    }

    /// Convenience: drive the Wifi and Lan wakeup sources together.
    pub fn set_network_standby_mode(&self, enabled: bool) -> Result<(), PwrMgrError> {
        let mask = WakeupSourceSet::of(&[WakeupSource::Wifi, WakeupSource::Lan]);
        let bits = if enabled {
            mask
        } else {
            WakeupSourceSet::empty()
        };
        let change = self.shared.wakeup.apply(mask, bits)?;
        self.shared.publish_network_standby(change);
        Ok(())
    }

    pub fn network_standby_mode(&self) -> Result<bool, PwrMgrError> {
        Ok(self.shared.wakeup.network_standby())
    }

    /// Begin a reboot: flag it, tell the subscribers, run the script.
    pub fn reboot(
        &self,
        requestor: &str,
        reason_custom: &str,
        reason_other: &str,
    ) -> Result<(), PwrMgrError> {
        let custom = reboot::normalize_reason(reason_custom);
        let other = reboot::normalize_reason(reason_other);
        info!(
            "Reboot requested by \"{}\" ({} / {})",
            requestor, custom, other
        );

        if let Err(e) = reboot::write_reboot_flag(self.shared.runner.as_ref()) {
            warn!("Failed to write reboot flag: {:#}", e);
        }
        self.shared.notifier.reboot_begin(custom, other, requestor);
        reboot::spawn_reboot(self.shared.runner.as_ref(), custom, other, requestor)
            .map_err(|e| PwrMgrError::general(format!("failed to spawn reboot: {:#}", e)))
    }

    /// Current core temperature in degrees Celsius.
    pub fn core_temperature(&self) -> Result<f32, PwrMgrError> {
        self.shared
            .hal
            .temperature()
            .map_err(|e| PwrMgrError::general(format!("cannot read temperature: {:#}", e)))
    }

    pub fn set_temperature_thresholds(&self, high: f32, critical: f32) -> Result<(), PwrMgrError> {
        if !high.is_finite() || !critical.is_finite() || high >= critical {
            return Err(PwrMgrError::invalid(format!(
                "bad temperature thresholds {} / {}",
                high, critical
            )));
        }
        self.shared
            .hal
            .set_temperature_thresholds(high, critical)
            .map_err(|e| PwrMgrError::general(format!("cannot set thresholds: {:#}", e)))?;
        self.shared.thermal.set_thresholds(high, critical);
        info!("Temperature thresholds set to {} / {}", high, critical);
        Ok(())
    }

    pub fn temperature_thresholds(&self) -> Result<(f32, f32), PwrMgrError> {
        self.shared
            .hal
            .temperature_thresholds()
            .map_err(|e| PwrMgrError::general(format!("cannot read thresholds: {:#}", e)))
    }

    /// Current logical thermal level, as seen by the monitor.
    pub fn thermal_level(&self) -> Result<crate::types::ThermalLevel, PwrMgrError> {
        Ok(self.shared.thermal.level())
    }

    pub fn set_overtemp_grace_interval(&self, secs: u32) -> Result<(), PwrMgrError> {
        if secs == 0 {
            return Err(PwrMgrError::invalid("grace interval must be non-zero"));
        }
        self.shared.thermal.set_grace_secs(secs.into());
        Ok(())
    }

    pub fn overtemp_grace_interval(&self) -> Result<u32, PwrMgrError> {
        Ok(self.shared.thermal.grace_secs() as u32)
    }

    /// Persist a new deep sleep timeout.
    pub fn set_deep_sleep_timer(&self, secs: u32) -> Result<(), PwrMgrError> {
        let mut settings = self.shared.settings.lock().unwrap();
        settings.set_deep_sleep_timeout_secs(secs);
        if let Err(e) = settings.save(&self.shared.opts.paths.settings_file) {
            warn!("Failed to persist deep sleep timeout: {:#}", e);
        }
        Ok(())
    }

    pub fn deep_sleep_timer(&self) -> Result<u32, PwrMgrError> {
        Ok(self.shared.settings.lock().unwrap().deep_sleep_timeout_secs())
    }

    pub fn last_wakeup_reason(&self) -> Result<WakeupReason, PwrMgrError> {
        self.shared
            .hal
            .last_wakeup_reason()
            .map_err(|e| PwrMgrError::general(format!("cannot read wakeup reason: {:#}", e)))
    }

    pub fn last_wakeup_key_code(&self) -> Result<i32, PwrMgrError> {
        self.shared
            .hal
            .last_wakeup_key_code()
            .map_err(|e| PwrMgrError::general(format!("cannot read wakeup key code: {:#}", e)))
    }

    fn active_controller(&self) -> Result<Arc<AckController>, PwrMgrError> {
        self.shared
            .engine
            .lock()
            .unwrap()
            .active
            .clone()
            .ok_or_else(|| PwrMgrError::invalid("no transition in progress"))
    }
}

impl Drop for PowerManager {
    fn drop(&mut self) {
        self.shared.thermal.request_stop();
        if let Some(handle) = self.thermal_worker.take() {
            let _ = handle.join();
        }

        let active = self.shared.engine.lock().unwrap().active.take();
        if let Some(active) = active {
            active.cancel();
        }

        // Reap the deep sleep task when it already wound down. One still
        // blocking inside the HAL cannot be aborted; it keeps its own
        // reference to the shared state.
        let handle = {
            let mut ds = self.shared.deep_sleep.lock().unwrap();
            if ds.running {
                None
            } else {
                ds.handle.take()
            }
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        if let Err(e) = self.shared.hal.term() {
            warn!("Platform teardown failed: {:#}", e);
        }
    }
}

impl Shared {
    /// Persist and announce a change of the derived network standby mode.
    pub(crate) fn publish_network_standby(&self, change: Option<bool>) {
        let Some(enabled) = change else {
            return;
        };
        {
            let mut settings = self.settings.lock().unwrap();
            settings.set_nw_standby_mode(enabled);
            if let Err(e) = settings.save(&self.opts.paths.settings_file) {
                warn!("Failed to persist network standby mode: {:#}", e);
            }
        }
        info!(
            "Network standby mode {}",
            if enabled { "enabled" } else { "disabled" }
        );
        self.notifier.network_standby_changed(enabled);
    }
}

/// The transition algorithm. Runs under the engine lock up to the point
/// where the request either resolves trivially, commits inline, or is
/// handed to a worker.
pub(crate) fn request_power_state(
    shared: &Arc<Shared>,
    key_code: i32,
    target: PowerState,
    reason: &str,
    origin: Origin,
) -> Result<(), PwrMgrError> {
    if origin == Origin::External {
        // While the deep sleep task runs, requests queue behind it;
        // a finished task is reaped before the next transition starts.
        loop {
            let handle = {
                let mut ds = shared.deep_sleep.lock().unwrap();
                if ds.running {
                    if target == PowerState::StandbyDeepSleep {
                        // Already there; nothing to queue.
                        return Ok(());
                    }
                    info!("Deep sleep in progress, queueing request for {}", target);
                    ds.pending = Some(PendingRequest {
                        key_code,
                        target,
                        reason: reason.to_string(),
                    });
                    return Ok(());
                }
                ds.handle.take()
            };
            match handle {
                Some(handle) => {
                    let _ = handle.join();
                }
                None => break,
            }
        }
    }

    let mut engine = shared.engine.lock().unwrap();

    if let Some(active) = &engine.active {
        if active.target() == target {
            debug!("Transition to {} already in progress, coalescing", target);
            return Ok(());
        }
    }
    if target == engine.current {
        if engine.active.is_some() {
            // A request for the state we are leaving does not disturb the
            // in-flight transition.
            debug!(
                "Request for current state {} during a transition, ignoring",
                target
            );
        }
        return Ok(());
    }
    if let Some(active) = engine.active.take() {
        info!("Superseding in-flight transition to {}", active.target());
        active.cancel();
    }

    let transaction_id = shared.next_transaction.fetch_add(1, Ordering::SeqCst);
    let clients = shared.clients.lock().unwrap().snapshot();
    let window = if origin == Origin::DeepSleepWake || clients.is_empty() {
        0
    } else {
        shared.opts.pre_change_window_secs
    };
    let current = engine.current;

    if window == 0 {
        drop(engine);
        shared
            .notifier
            .mode_pre_change(current, target, transaction_id, 0);
        commit(shared, target, None);
        return Ok(());
    }

    let controller = Arc::new(AckController::new(
        transaction_id,
        target,
        clients,
        window,
        shared.opts.max_pre_change_delay_secs,
    ));
    engine.active = Some(Arc::clone(&controller));
    drop(engine);

    let worker = Arc::clone(shared);
    thread::Builder::new()
        .name("pwrmgr-transition".to_string())
        .spawn(move || {
            worker
                .notifier
                .mode_pre_change(current, target, transaction_id, window);
            match controller.wait() {
                Completion::Ready => commit(&worker, target, Some(controller)),
                Completion::Cancelled => {
                    debug!("Transition {} to {} superseded", transaction_id, target)
                }
            }
        })
        .map_err(|e| PwrMgrError::general(format!("cannot spawn transition: {}", e)))?;
    Ok(())
}

/// Atomically commit `target`: persist, write the HAL, advance the state
/// pair, then notify. `controller` is the acknowledgement controller the
/// worker waited on, None for inline commits; a commit whose controller has
/// been superseded is dropped.
fn commit(shared: &Arc<Shared>, target: PowerState, controller: Option<Arc<AckController>>) {
    let previous;
    {
        let mut engine = shared.engine.lock().unwrap();
        if let Some(controller) = &controller {
            match &engine.active {
                Some(active) if Arc::ptr_eq(active, controller) => engine.active = None,
                _ => {
                    debug!("Transition to {} superseded before commit", target);
                    return;
                }
            }
        }

        {
            let mut settings = shared.settings.lock().unwrap();
            settings.set_power_state(target);
            if let Err(e) = settings.save(&shared.opts.paths.settings_file) {
                // Non-fatal: the in-memory state still advances.
                warn!("Failed to persist power state: {:#}", e);
            }
        }

        if let Err(e) = shared.hal.set_power_state(target) {
            // The device must never wedge because the platform rejected the
            // write; the cached state still advances.
            error!("Platform rejected power state {}: {:#}", target, e);
        }

        previous = engine.current;
        engine.previous = previous;
        engine.current = target;
    }

    info!("Power mode changed: {} -> {}", previous, target);
    shared.notifier.mode_changed(previous, target);

    if target == PowerState::StandbyDeepSleep {
        deepsleep::start(shared);
    }
}
