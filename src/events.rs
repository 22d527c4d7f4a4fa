// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fan-out of power manager notifications to registered subscribers.
//!
//! Each notification kind has its own registry of listeners. Registration
//! returns an opaque handle; delivery walks a snapshot of the registry taken
//! under its lock and invokes listeners with no lock held, so a listener may
//! call back into the manager freely. A listener unregistered concurrently
//! with an in-flight delivery may still observe that delivery, but receives
//! nothing once `unregister` has returned.

use std::sync::Arc;
use std::sync::Mutex;

use crate::types::PowerState;
use crate::types::ThermalLevel;

/// Opaque handle identifying one registered listener.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SubscriberId(u64);

/// Advance notice of a power mode transition. `state_change_after_secs` is
/// the initial window before the engine commits, absent delay requests.
pub trait ModePreChangeListener: Send + Sync {
    fn on_power_mode_pre_change(
        &self,
        current: PowerState,
        new_state: PowerState,
        transaction_id: u32,
        state_change_after_secs: u32,
    );
}

/// A committed power mode transition.
pub trait ModeChangedListener: Send + Sync {
    fn on_power_mode_changed(&self, previous: PowerState, current: PowerState);
}

/// Deep sleep ended because its timer expired.
pub trait DeepSleepTimeoutListener: Send + Sync {
    fn on_deep_sleep_timeout(&self, timeout_secs: u32);
}

/// A reboot is about to be carried out.
pub trait RebootListener: Send + Sync {
    fn on_reboot_begin(&self, reason_custom: &str, reason_other: &str, requestor: &str);
}

/// The derived network standby mode flipped.
pub trait NetworkStandbyListener: Send + Sync {
    fn on_network_standby_mode_changed(&self, enabled: bool);
}

/// The thermal protection level changed.
pub trait ThermalListener: Send + Sync {
    fn on_thermal_mode_changed(&self, level: ThermalLevel, temperature: f32);
}

struct RegistryInner<L: ?Sized> {
    next_id: u64,
    entries: Vec<(u64, Arc<L>)>,
}

/// One subscriber set. `L` is a listener trait object type.
pub struct Registry<L: ?Sized> {
    inner: Mutex<RegistryInner<L>>,
}

impl<L: ?Sized> Registry<L> {
    pub fn new() -> Self {
        Registry {
            inner: Mutex::new(RegistryInner {
                next_id: 1,
                entries: Vec::new(),
            }),
        }
    }

    /// Add a listener, returning the handle used to remove it again.
    pub fn register(&self, listener: Arc<L>) -> SubscriberId {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push((id, listener));
        SubscriberId(id)
    }

    /// Remove a listener. Returns false when the handle is unknown.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.entries.len();
        inner.entries.retain(|(entry_id, _)| *entry_id != id.0);
        inner.entries.len() != before
    }

    /// Snapshot the current listener set for delivery outside the lock.
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        let inner = self.inner.lock().unwrap();
        inner.entries.iter().map(|(_, l)| Arc::clone(l)).collect()
    }
}

impl<L: ?Sized> Default for Registry<L> {
    fn default() -> Self {
        Registry::new()
    }
}

/// The full set of subscriber registries.
#[derive(Default)]
pub struct Notifier {
    pub pre_change: Registry<dyn ModePreChangeListener>,
    pub mode_changed: Registry<dyn ModeChangedListener>,
    pub deep_sleep_timeout: Registry<dyn DeepSleepTimeoutListener>,
    pub reboot: Registry<dyn RebootListener>,
    pub network_standby: Registry<dyn NetworkStandbyListener>,
    pub thermal: Registry<dyn ThermalListener>,
}

impl Notifier {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn mode_pre_change(
        &self,
        current: PowerState,
        new_state: PowerState,
        transaction_id: u32,
        state_change_after_secs: u32,
    ) {
        for listener in self.pre_change.snapshot() {
            listener.on_power_mode_pre_change(
                current,
                new_state,
                transaction_id,
                state_change_after_secs,
            );
        }
    }

    pub fn mode_changed(&self, previous: PowerState, current: PowerState) {
        for listener in self.mode_changed.snapshot() {
            listener.on_power_mode_changed(previous, current);
        }
    }

    pub fn deep_sleep_timeout(&self, timeout_secs: u32) {
        for listener in self.deep_sleep_timeout.snapshot() {
            listener.on_deep_sleep_timeout(timeout_secs);
        }
    }

    pub fn reboot_begin(&self, reason_custom: &str, reason_other: &str, requestor: &str) {
        for listener in self.reboot.snapshot() {
            listener.on_reboot_begin(reason_custom, reason_other, requestor);
        }
    }

    pub fn network_standby_changed(&self, enabled: bool) {
        for listener in self.network_standby.snapshot() {
            listener.on_network_standby_mode_changed(enabled);
        }
    }

    pub fn thermal_changed(&self, level: ThermalLevel, temperature: f32) {
        for listener in self.thermal.snapshot() {
            listener.on_thermal_mode_changed(level, temperature);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use super::*;

    struct Counter {
        count: AtomicU32,
    }

    impl ModeChangedListener for Counter {
        fn on_power_mode_changed(&self, _previous: PowerState, _current: PowerState) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_register_deliver_unregister() {
        let notifier = Notifier::new();
        let counter = Arc::new(Counter {
            count: AtomicU32::new(0),
        });

        let id = notifier
            .mode_changed
            .register(counter.clone() as Arc<dyn ModeChangedListener>);

        notifier.mode_changed(PowerState::On, PowerState::Standby);
        assert_eq!(counter.count.load(Ordering::SeqCst), 1);

        assert!(notifier.mode_changed.unregister(id));
        notifier.mode_changed(PowerState::Standby, PowerState::On);
        assert_eq!(counter.count.load(Ordering::SeqCst), 1);

        // Unregistering twice reports the handle as unknown.
        assert!(!notifier.mode_changed.unregister(id));
    }

    #[test]
    fn test_multiple_listeners_all_delivered() {
        let notifier = Notifier::new();
        let a = Arc::new(Counter {
            count: AtomicU32::new(0),
        });
        let b = Arc::new(Counter {
            count: AtomicU32::new(0),
        });

        notifier
            .mode_changed
            .register(a.clone() as Arc<dyn ModeChangedListener>);
        notifier
            .mode_changed
            .register(b.clone() as Arc<dyn ModeChangedListener>);

        notifier.mode_changed(PowerState::On, PowerState::Off);
        assert_eq!(a.count.load(Ordering::SeqCst), 1);
        assert_eq!(b.count.load(Ordering::SeqCst), 1);
    }
}
