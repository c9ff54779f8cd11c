//! VM provisioning reconciliation engine.
//!
//! Reconciles a declaratively managed VM resource against a remote compute
//! control plane. Key concepts:
//!
//! - **Spec**: the desired attributes of a VM ([`ResourceSpec`]).
//! - **Observed state**: what the control plane last reported ([`ObservedState`]).
//! - **Readiness**: a new VM counts as usable once it reports an IP address.
//!
//! # Invariants
//!
//! - Creation strictly precedes the first poll.
//! - Polling is bounded; the compensating delete runs only after the poll
//!   budget is exhausted and completes before the timeout is returned.
//! - A read failure while polling aborts without touching the VM.
//! - Update never performs a remote call.
//! - Refresh never carries a stale IP address forward.

pub mod api;
pub mod classify;
pub mod error;
pub mod mock;
pub mod model;
pub mod provision;
pub mod reconciler;

pub use api::{ControlPlane, ControlPlaneError, CreateVmRequest, CreateVmResponse, VmInfo, VmList};
pub use classify::{Attribute, ChangeClass, Classification, Mutability, MutabilityPolicy};
pub use error::{Cleanup, ReconcileError};
pub use mock::MockControlPlane;
pub use model::{ObservedState, ResourceSpec};
pub use provision::{provision, Phase, ProvisionPolicy, Provisioned};
pub use reconciler::VmReconciler;
