use std::{
    future::Future,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::broadcast;

use super::ClientError;

pub type RefreshOutcome = Result<String, ClientError>;

type Slot = Mutex<Option<broadcast::Sender<RefreshOutcome>>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<broadcast::Sender<RefreshOutcome>>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// RefreshCoordinator
///
/// Collapses concurrent session refreshes into one. The first caller of `run` leads and
/// performs the refresh; callers arriving while it is in flight subscribe to its
/// outcome. Everyone receives the same result.
///
/// The slot is cleared whatever way the leader finishes. If the leading future is
/// dropped before completing, followers get `RefreshAbandoned`.
#[derive(Default)]
pub struct RefreshCoordinator {
    in_flight: Slot,
    started: AtomicUsize,
}

/// Clears the slot if the leader is dropped mid-refresh. Dropping the sender wakes
/// every follower with a closed channel.
struct InFlight<'a> {
    slot: &'a Slot,
    armed: bool,
}

impl InFlight<'_> {
    fn complete(mut self, outcome: &RefreshOutcome) {
        self.armed = false;
        // Publish and clear under the lock so no late follower subscribes to a sender
        // that has already sent.
        if let Some(tx) = lock(self.slot).take() {
            let _ = tx.send(outcome.clone());
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(self.slot).take();
        }
    }
}

enum Participation {
    Leader,
    Follower(broadcast::Receiver<RefreshOutcome>),
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// run
    ///
    /// Performs `refresh` unless a refresh is already in flight, in which case it waits
    /// for that one. Both roles give up after `timeout` with `RefreshTimedOut`.
    pub async fn run<F, Fut>(&self, timeout: Duration, refresh: F) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RefreshOutcome>,
    {
        let participation = {
            let mut slot = lock(&self.in_flight);
            match slot.as_ref() {
                Some(tx) => Participation::Follower(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    *slot = Some(tx);
                    Participation::Leader
                }
            }
        };

        match participation {
            Participation::Follower(mut rx) => {
                tracing::debug!("joining in-flight session refresh");
                match tokio::time::timeout(timeout, rx.recv()).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(_)) => Err(ClientError::RefreshAbandoned),
                    Err(_) => Err(ClientError::RefreshTimedOut),
                }
            }
            Participation::Leader => {
                self.started.fetch_add(1, Ordering::SeqCst);
                let guard = InFlight {
                    slot: &self.in_flight,
                    armed: true,
                };

                let outcome = tokio::time::timeout(timeout, refresh())
                    .await
                    .unwrap_or(Err(ClientError::RefreshTimedOut));

                if let Err(e) = &outcome {
                    tracing::warn!(error = %e, "session refresh failed");
                }
                guard.complete(&outcome);
                outcome
            }
        }
    }

    pub fn is_refreshing(&self) -> bool {
        lock(&self.in_flight).is_some()
    }

    /// Number of refreshes actually performed (followers excluded).
    pub fn refreshes_started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}
