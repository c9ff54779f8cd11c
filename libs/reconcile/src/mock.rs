//! In-memory control plane for tests and dry runs.
//!
//! Behaviour is scripted up front; every call is counted so tests can
//! assert on exactly which remote operations happened.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::api::{ControlPlane, ControlPlaneError, CreateVmRequest, CreateVmResponse, VmInfo};

#[derive(Debug, Clone)]
struct MockVm {
    info: VmInfo,
    polls: u32,
    /// Created through the mock, so the boot script applies.
    booting: bool,
}

#[derive(Debug, Default)]
struct Calls {
    created: Vec<CreateVmRequest>,
    deleted: Vec<String>,
}

/// Mock control plane.
#[derive(Debug)]
pub struct MockControlPlane {
    /// Poll (1-indexed) on which a created VM reports an address.
    ip_on_poll: Option<u32>,

    fail_create: Option<ControlPlaneError>,

    /// Poll (1-indexed) that fails, with its error.
    fail_get: Option<(u32, ControlPlaneError)>,

    fail_delete: Option<ControlPlaneError>,

    vms: Mutex<BTreeMap<String, MockVm>>,
    calls: Mutex<Calls>,

    id_counter: AtomicU32,
    create_calls: AtomicU32,
    get_calls: AtomicU32,
    delete_calls: AtomicU32,
}

impl Default for MockControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl MockControlPlane {
    /// A control plane whose VMs get an address on the first poll.
    pub fn new() -> Self {
        Self {
            ip_on_poll: Some(1),
            fail_create: None,
            fail_get: None,
            fail_delete: None,
            vms: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Calls::default()),
            id_counter: AtomicU32::new(0),
            create_calls: AtomicU32::new(0),
            get_calls: AtomicU32::new(0),
            delete_calls: AtomicU32::new(0),
        }
    }

    /// Created VMs report an address on poll `k` (1-indexed).
    pub fn ip_on_poll(mut self, k: u32) -> Self {
        self.ip_on_poll = Some(k);
        self
    }

    /// Created VMs never report an address.
    pub fn never_ready(mut self) -> Self {
        self.ip_on_poll = None;
        self
    }

    pub fn failing_create(mut self, err: ControlPlaneError) -> Self {
        self.fail_create = Some(err);
        self
    }

    /// Poll `n` (1-indexed, counted per VM) fails with `err`.
    pub fn failing_get_on_poll(mut self, n: u32, err: ControlPlaneError) -> Self {
        self.fail_get = Some((n, err));
        self
    }

    pub fn failing_delete(mut self, err: ControlPlaneError) -> Self {
        self.fail_delete = Some(err);
        self
    }

    /// Seed an existing VM.
    pub fn with_vm(self, info: VmInfo) -> Self {
        lock(&self.vms).insert(
            info.id.clone(),
            MockVm {
                info,
                polls: 0,
                booting: false,
            },
        );
        self
    }

    /// Overwrite the address reported for an existing VM.
    pub fn set_ip(&self, id: &str, ip: Option<&str>) {
        if let Some(vm) = lock(&self.vms).get_mut(id) {
            vm.info.ip_address = ip.map(str::to_string);
        }
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> u32 {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Total remote calls of any kind.
    pub fn total_calls(&self) -> u32 {
        self.create_calls() + self.get_calls() + self.delete_calls()
    }

    /// Create requests received, in order.
    pub fn created_requests(&self) -> Vec<CreateVmRequest> {
        lock(&self.calls).created.clone()
    }

    /// Ids passed to delete, in order.
    pub fn deleted_ids(&self) -> Vec<String> {
        lock(&self.calls).deleted.clone()
    }

    /// Whether the VM currently exists.
    pub fn contains(&self, id: &str) -> bool {
        lock(&self.vms).contains_key(id)
    }

    fn next_id(&self) -> String {
        let n = self.id_counter.fetch_add(1, Ordering::SeqCst);
        format!("mock-vm-{:04}", n)
    }

    fn set_state(&self, id: &str, state: &str) -> Result<(), ControlPlaneError> {
        let mut vms = lock(&self.vms);
        let vm = vms.get_mut(id).ok_or_else(|| ControlPlaneError::NotFound {
            id: id.to_string(),
        })?;
        vm.info.state = state.to_string();
        if state == "shutoff" {
            vm.info.ip_address = None;
        }
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn create_vm(
        &self,
        request: &CreateVmRequest,
    ) -> Result<CreateVmResponse, ControlPlaneError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.calls).created.push(request.clone());

        if let Some(err) = &self.fail_create {
            return Err(err.clone());
        }

        let id = self.next_id();
        let info = VmInfo {
            id: id.clone(),
            name: request.name.clone(),
            state: "running".to_string(),
            vcpus: request.vcpus,
            memory_mb: request.memory_mb,
            ip_address: None,
        };
        lock(&self.vms).insert(
            id.clone(),
            MockVm {
                info,
                polls: 0,
                booting: true,
            },
        );
        debug!(id = %id, "[MOCK] Created VM");

        Ok(CreateVmResponse {
            id,
            name: request.name.clone(),
            state: "creating".to_string(),
        })
    }

    async fn get_vm(&self, id: &str) -> Result<VmInfo, ControlPlaneError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);

        let mut vms = lock(&self.vms);
        let vm = vms.get_mut(id).ok_or_else(|| ControlPlaneError::NotFound {
            id: id.to_string(),
        })?;
        vm.polls += 1;

        if let Some((n, err)) = &self.fail_get {
            if vm.polls == *n {
                return Err(err.clone());
            }
        }

        if vm.booting && vm.info.state == "running" && vm.info.ip_address.is_none() {
            if let Some(k) = self.ip_on_poll {
                if vm.polls >= k {
                    vm.booting = false;
                    vm.info.ip_address = Some(format!("192.168.122.{}", 10 + vm.polls % 200));
                }
            }
        }

        Ok(vm.info.clone())
    }

    async fn delete_vm(&self, id: &str) -> Result<(), ControlPlaneError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.calls).deleted.push(id.to_string());

        if let Some(err) = &self.fail_delete {
            return Err(err.clone());
        }

        lock(&self.vms)
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ControlPlaneError::NotFound { id: id.to_string() })
    }

    async fn start_vm(&self, id: &str) -> Result<(), ControlPlaneError> {
        self.set_state(id, "running")
    }

    async fn stop_vm(&self, id: &str) -> Result<(), ControlPlaneError> {
        self.set_state(id, "shutoff")
    }
}
