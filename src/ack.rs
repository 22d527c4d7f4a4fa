// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-transition acknowledgement bookkeeping for pre-change clients.
//!
//! One controller exists per in-flight pre-change window. It tracks the
//! snapshot of clients taken when the transition began, each client's
//! acknowledgement and requested delay, and a single absolute deadline. The
//! transition worker parks in [`AckController::wait`] until every client has
//! acknowledged (or been removed), the deadline passes, or the controller is
//! cancelled by a superseding transition.

use std::collections::BTreeMap;
use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use crate::pwrutil::PwrMgrError;
use crate::types::PowerState;

/// How a wait on the controller ended.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Completion {
    /// Every client acknowledged, or the deadline passed. Commit.
    Ready,
    /// Superseded. No completion notification, no commit.
    Cancelled,
}

struct ClientAck {
    name: String,
    acknowledged: bool,
    delay_secs: Option<u32>,
}

struct AckState {
    clients: BTreeMap<u32, ClientAck>,
    deadline: Instant,
    cancelled: bool,
}

pub struct AckController {
    transaction_id: u32,
    target: PowerState,
    started: Instant,
    max_delay: Duration,
    state: Mutex<AckState>,
    cond: Condvar,
}

impl AckController {
    pub fn new(
        transaction_id: u32,
        target: PowerState,
        clients: Vec<(u32, String)>,
        window_secs: u32,
        max_delay_secs: u32,
    ) -> Self {
        let started = Instant::now();
        let clients = clients
            .into_iter()
            .map(|(id, name)| {
                (
                    id,
                    ClientAck {
                        name,
                        acknowledged: false,
                        delay_secs: None,
                    },
                )
            })
            .collect();
        AckController {
            transaction_id,
            target,
            started,
            max_delay: Duration::from_secs(max_delay_secs.into()),
            state: Mutex::new(AckState {
                clients,
                deadline: started + Duration::from_secs(window_secs.into()),
                cancelled: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn transaction_id(&self) -> u32 {
        self.transaction_id
    }

    pub fn target(&self) -> PowerState {
        self.target
    }

    /// Record that `client_id` needs no more time. Its requested delay is
    /// dropped. Fails when the pair does not name a client of this
    /// transaction.
    pub fn acknowledge(&self, client_id: u32, transaction_id: u32) -> Result<(), PwrMgrError> {
        let mut state = self.validate(client_id, transaction_id)?;
        let client = state.clients.get_mut(&client_id).unwrap();
        client.acknowledged = true;
        client.delay_secs = None;
        self.cond.notify_all();
        Ok(())
    }

    /// Replace `client_id`'s requested delay with `secs`, clamped by the
    /// configured ceiling. The deadline only ever moves outward; a smaller
    /// value never shortens an already granted wait.
    pub fn extend_delay(
        &self,
        client_id: u32,
        transaction_id: u32,
        secs: u32,
    ) -> Result<(), PwrMgrError> {
        let mut state = self.validate(client_id, transaction_id)?;
        let clamped = Duration::from_secs(secs.into()).min(self.max_delay);
        let client = state.clients.get_mut(&client_id).unwrap();
        client.delay_secs = Some(secs);
        let requested = self.started + clamped;
        if requested > state.deadline {
            state.deadline = requested;
        }
        self.cond.notify_all();
        Ok(())
    }

    /// Drop `client_id` from the transaction entirely, as on client
    /// unregistration. Returns true when the client was part of it; if it
    /// held the last outstanding acknowledgement the controller completes
    /// promptly.
    pub fn remove_client(&self, client_id: u32) -> bool {
        let mut state = self.state.lock().unwrap();
        let removed = state.clients.remove(&client_id).is_some();
        if removed {
            self.cond.notify_all();
        }
        removed
    }

    /// Abandon the controller. The waiter observes the flag under the lock
    /// and exits without committing or notifying.
    pub fn cancel(&self) {
        let mut state = self.state.lock().unwrap();
        state.cancelled = true;
        self.cond.notify_all();
    }

    /// Park until the transaction resolves.
    pub fn wait(&self) -> Completion {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.cancelled {
                return Completion::Cancelled;
            }
            if state.clients.values().all(|c| c.acknowledged) {
                return Completion::Ready;
            }
            let now = Instant::now();
            if now >= state.deadline {
                return Completion::Ready;
            }
            let timeout = state.deadline - now;
            let (guard, _) = self.cond.wait_timeout(state, timeout).unwrap();
            state = guard;
        }
    }

    /// Diagnostic summary of the outstanding clients.
    pub fn outstanding(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .clients
            .values()
            .filter(|c| !c.acknowledged)
            .map(|c| c.name.clone())
            .collect()
    }

    fn validate(
        &self,
        client_id: u32,
        transaction_id: u32,
    ) -> Result<std::sync::MutexGuard<'_, AckState>, PwrMgrError> {
        if transaction_id != self.transaction_id {
            return Err(PwrMgrError::invalid(format!(
                "unknown transaction id {}",
                transaction_id
            )));
        }
        let state = self.state.lock().unwrap();
        if !state.clients.contains_key(&client_id) {
            return Err(PwrMgrError::invalid(format!(
                "unknown client id {}",
                client_id
            )));
        }
        Ok(state)
    }

    #[cfg(test)]
    fn deadline(&self) -> Instant {
        self.state.lock().unwrap().deadline
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn controller(clients: &[(u32, &str)], window_secs: u32) -> AckController {
        AckController::new(
            7,
            PowerState::StandbyLightSleep,
            clients
                .iter()
                .map(|(id, name)| (*id, name.to_string()))
                .collect(),
            window_secs,
            1800,
        )
    }

    #[test]
    fn test_all_acknowledged_completes_early() {
        let ctl = Arc::new(controller(&[(1, "a"), (2, "b")], 30));
        let waiter = {
            let ctl = ctl.clone();
            thread::spawn(move || ctl.wait())
        };

        ctl.acknowledge(1, 7).unwrap();
        ctl.acknowledge(2, 7).unwrap();

        assert_eq!(waiter.join().unwrap(), Completion::Ready);
    }

    #[test]
    fn test_deadline_elapses_without_acks() {
        let ctl = controller(&[(1, "a")], 0);
        assert_eq!(ctl.wait(), Completion::Ready);
        assert_eq!(ctl.outstanding(), vec!["a".to_string()]);
    }

    #[test]
    fn test_smaller_delay_does_not_shorten_deadline() {
        let ctl = controller(&[(1, "a")], 1);
        ctl.extend_delay(1, 7, 10).unwrap();
        let extended = ctl.deadline();
        ctl.extend_delay(1, 7, 5).unwrap();
        assert_eq!(ctl.deadline(), extended);
    }

    #[test]
    fn test_delay_is_clamped_by_ceiling() {
        let ctl = AckController::new(
            7,
            PowerState::StandbyLightSleep,
            vec![(1, "a".to_string())],
            1,
            20,
        );
        ctl.extend_delay(1, 7, 10_000).unwrap();
        assert!(ctl.deadline() <= Instant::now() + Duration::from_secs(20));
    }

    #[test]
    fn test_remove_last_client_completes() {
        let ctl = Arc::new(controller(&[(1, "a")], 30));
        let waiter = {
            let ctl = ctl.clone();
            thread::spawn(move || ctl.wait())
        };

        assert!(ctl.remove_client(1));
        assert_eq!(waiter.join().unwrap(), Completion::Ready);
        assert!(!ctl.remove_client(1));
    }

    #[test]
    fn test_cancel_suppresses_completion() {
        let ctl = Arc::new(controller(&[(1, "a")], 30));
        let waiter = {
            let ctl = ctl.clone();
            thread::spawn(move || ctl.wait())
        };

        ctl.cancel();
        assert_eq!(waiter.join().unwrap(), Completion::Cancelled);
    }

    #[test]
    fn test_unknown_ids_are_rejected() {
        let ctl = controller(&[(1, "a")], 1);
        assert!(matches!(
            ctl.acknowledge(2, 7),
            Err(PwrMgrError::InvalidParameter(_))
        ));
        assert!(matches!(
            ctl.acknowledge(1, 8),
            Err(PwrMgrError::InvalidParameter(_))
        ));
        assert!(matches!(
            ctl.extend_delay(9, 7, 10),
            Err(PwrMgrError::InvalidParameter(_))
        ));
        // The valid pair still works afterwards.
        ctl.acknowledge(1, 7).unwrap();
    }
}
