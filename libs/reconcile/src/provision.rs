//! Provisioning reconciler.
//!
//! Drives a create through the VM's boot until it reports an address:
//!
//! ```text
//! Submitting ──► Polling ──► Ready
//!                   │
//!                   └──► TimedOut ──► Compensating ──► Done
//!                                          └─────────► CompensationFailed
//! ```
//!
//! A failed create ends the run without cleanup since nothing exists yet.
//! A failed read while polling also ends the run without cleanup: the VM's
//! state is unknown, so it is left alone. Only an exhausted poll budget
//! triggers the compensating delete, and the delete's outcome is known
//! before the timeout is returned.

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::api::ControlPlane;
use crate::error::{Cleanup, ReconcileError};
use crate::model::{ObservedState, ResourceSpec};

/// Default interval between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default poll budget (5 minutes at the default interval).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 300;

/// Default number of attempts between progress events.
pub const DEFAULT_PROGRESS_EVERY: u32 = 30;

/// Bounded polling parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionPolicy {
    /// Wait between two polls.
    pub poll_interval: Duration,

    /// Maximum number of polls.
    pub max_attempts: u32,

    /// Emit a progress event every this many attempts.
    pub progress_every: u32,
}

impl Default for ProvisionPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

impl ProvisionPolicy {
    /// Configured maximum wait, as reported to users.
    pub fn max_wait(&self) -> Duration {
        self.poll_interval.saturating_mul(self.max_attempts)
    }
}

/// A VM that reached the ready state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    /// Id assigned by the control plane.
    pub id: String,

    /// State read on the final poll.
    pub observed: ObservedState,

    /// Number of polls made (1-indexed).
    pub attempts: u32,
}

/// Phases of a provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Submitting,
    Polling,
    Ready,
    TimedOut,
    Compensating,
    Done,
    CompensationFailed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitting => "submitting",
            Self::Polling => "polling",
            Self::Ready => "ready",
            Self::TimedOut => "timed_out",
            Self::Compensating => "compensating",
            Self::Done => "done",
            Self::CompensationFailed => "compensation_failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine state, carrying what each phase needs.
#[derive(Debug)]
enum State {
    Submitting,
    Polling {
        id: String,
        attempt: u32,
        last: Option<ObservedState>,
    },
    Ready {
        id: String,
        observed: ObservedState,
        attempts: u32,
    },
    TimedOut {
        id: String,
        last: Option<ObservedState>,
    },
    Compensating {
        id: String,
        last: Option<ObservedState>,
    },
    Done {
        id: String,
        last: Option<ObservedState>,
    },
    CompensationFailed {
        id: String,
        last: Option<ObservedState>,
        reason: String,
    },
}

impl State {
    fn phase(&self) -> Phase {
        match self {
            Self::Submitting => Phase::Submitting,
            Self::Polling { .. } => Phase::Polling,
            Self::Ready { .. } => Phase::Ready,
            Self::TimedOut { .. } => Phase::TimedOut,
            Self::Compensating { .. } => Phase::Compensating,
            Self::Done { .. } => Phase::Done,
            Self::CompensationFailed { .. } => Phase::CompensationFailed,
        }
    }
}

/// Create a VM from `spec` and wait until it reports an address.
///
/// `shutdown` aborts the wait between polls with
/// [`ReconcileError::Cancelled`]. Cancellation does not delete the VM.
pub async fn provision<C>(
    client: &C,
    spec: &ResourceSpec,
    policy: &ProvisionPolicy,
    shutdown: Option<watch::Receiver<bool>>,
) -> Result<Provisioned, ReconcileError>
where
    C: ControlPlane + ?Sized,
{
    spec.validate()?;

    let mut run = Run {
        client,
        spec,
        policy,
        shutdown,
    };

    let mut state = State::Submitting;
    loop {
        let from = state.phase();
        state = match state {
            State::Submitting => run.submit().await?,
            State::Polling { id, attempt, last } => run.poll(id, attempt, last).await?,
            State::Ready {
                id,
                observed,
                attempts,
            } => {
                return Ok(Provisioned {
                    id,
                    observed,
                    attempts,
                })
            }
            State::TimedOut { id, last } => {
                warn!(
                    name = %spec.name,
                    id = %id,
                    max_seconds = policy.max_wait().as_secs(),
                    "Attempting to delete VM due to timeout"
                );
                State::Compensating { id, last }
            }
            State::Compensating { id, last } => run.compensate(id, last).await,
            State::Done { id, last } => return Err(run.timeout(id, last, Cleanup::Deleted)),
            State::CompensationFailed { id, last, reason } => {
                return Err(run.timeout(id, last, Cleanup::Failed(reason)))
            }
        };

        let to = state.phase();
        if from != to {
            debug!(name = %spec.name, from = %from, to = %to, "Provisioning transition");
        }
    }
}

struct Run<'a, C: ?Sized> {
    client: &'a C,
    spec: &'a ResourceSpec,
    policy: &'a ProvisionPolicy,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<C> Run<'_, C>
where
    C: ControlPlane + ?Sized,
{
    async fn submit(&mut self) -> Result<State, ReconcileError> {
        let request = self.spec.to_create_request();
        info!(
            name = %request.name,
            vcpus = request.vcpus,
            memory_mb = request.memory_mb,
            base_image = %request.base_image,
            ssh_user = request.ssh_user.is_some(),
            ssh_key = request.ssh_public_key.is_some(),
            "Creating VM"
        );

        let created = self
            .client
            .create_vm(&request)
            .await
            .map_err(|source| ReconcileError::CreateFailed {
                name: self.spec.name.clone(),
                source,
            })?;

        debug!(id = %created.id, state = %created.state, "Created VM");

        Ok(State::Polling {
            id: created.id,
            attempt: 0,
            last: None,
        })
    }

    async fn poll(
        &mut self,
        id: String,
        attempt: u32,
        last: Option<ObservedState>,
    ) -> Result<State, ReconcileError> {
        let max = self.policy.max_attempts;
        if attempt >= max {
            return Ok(State::TimedOut { id, last });
        }

        let info = match self.client.get_vm(&id).await {
            Ok(info) => info,
            Err(source) => {
                error!(
                    name = %self.spec.name,
                    id = %id,
                    attempt = attempt + 1,
                    error = %source,
                    "Unable to read VM after creation"
                );
                return Err(ReconcileError::ReadDuringProvisioningFailed {
                    name: self.spec.name.clone(),
                    id,
                    attempts: attempt + 1,
                    source,
                });
            }
        };

        let observed = ObservedState::from(info);
        if observed.is_ready() {
            info!(
                name = %self.spec.name,
                id = %id,
                ip = observed.ip_address.as_deref().unwrap_or_default(),
                attempts = attempt + 1,
                elapsed_seconds = attempt + 1,
                "VM acquired IP address"
            );
            return Ok(State::Ready {
                id,
                observed,
                attempts: attempt + 1,
            });
        }

        let every = self.policy.progress_every;
        if attempt > 0 && every > 0 && attempt % every == 0 {
            info!(
                name = %self.spec.name,
                id = %id,
                state = %observed.state,
                elapsed_seconds = attempt,
                max_seconds = max,
                "Still waiting for VM IP address"
            );
        }

        // No wait after the last attempt.
        if attempt + 1 < max {
            debug!(attempt = attempt + 1, max, "Waiting for VM IP address");
            if self.wait().await {
                warn!(name = %self.spec.name, id = %id, attempts = attempt + 1, "Provisioning cancelled");
                return Err(ReconcileError::Cancelled {
                    name: self.spec.name.clone(),
                    id,
                    attempts: attempt + 1,
                });
            }
        }

        Ok(State::Polling {
            id,
            attempt: attempt + 1,
            last: Some(observed),
        })
    }

    async fn compensate(&mut self, id: String, last: Option<ObservedState>) -> State {
        match self.client.delete_vm(&id).await {
            Ok(()) => {
                info!(id = %id, "Deleted VM after timeout");
                State::Done { id, last }
            }
            Err(e) => {
                error!(id = %id, error = %e, "Failed to clean up VM after timeout");
                State::CompensationFailed {
                    id,
                    last,
                    reason: e.to_string(),
                }
            }
        }
    }

    fn timeout(&self, id: String, last: Option<ObservedState>, cleanup: Cleanup) -> ReconcileError {
        ReconcileError::ProvisioningTimeout {
            name: self.spec.name.clone(),
            id,
            max_wait: self.policy.max_wait(),
            last_state: last.map(|o| o.state),
            cleanup,
        }
    }

    /// Sleep one poll interval. Returns true if shutdown was signalled.
    async fn wait(&mut self) -> bool {
        let interval = self.policy.poll_interval;
        let Some(shutdown) = self.shutdown.as_mut() else {
            tokio::time::sleep(interval).await;
            return false;
        };

        if *shutdown.borrow() {
            return true;
        }

        let sleep = tokio::time::sleep(interval);
        tokio::pin!(sleep);

        loop {
            let changed = tokio::select! {
                _ = &mut sleep => return false,
                changed = shutdown.changed() => changed,
            };

            match changed {
                Ok(()) if *shutdown.borrow() => return true,
                Ok(()) => continue,
                // Sender gone, nobody can cancel any more.
                Err(_) => {
                    (&mut sleep).await;
                    return false;
                }
            }
        }
    }
}
