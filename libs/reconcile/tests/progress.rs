//! Provisioning progress events.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use rcloud_reconcile::{MockControlPlane, ResourceSpec, VmReconciler};

/// In-memory log sink shared with the subscriber.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Captured {
    fn lines(&self, message: &str) -> Vec<String> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .filter(|line| line.contains(message))
            .map(str::to_string)
            .collect()
    }
}

fn capture() -> (Captured, tracing::subscriber::DefaultGuard) {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (captured, guard)
}

fn elapsed_seconds(line: &str) -> u32 {
    line.split_whitespace()
        .find_map(|field| field.strip_prefix("elapsed_seconds="))
        .and_then(|value| value.parse().ok())
        .unwrap_or_else(|| panic!("no elapsed_seconds in {line:?}"))
}

fn spec() -> ResourceSpec {
    ResourceSpec {
        name: "kdevops-1".to_string(),
        vcpus: 2,
        memory_gb: 4,
        base_image: "debian-13.qcow2".to_string(),
        root_disk_gb: 20,
        ssh_user: None,
        ssh_public_key: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_progress_logged_every_thirty_attempts() {
    let (captured, _guard) = capture();
    let reconciler = VmReconciler::new(MockControlPlane::new().never_ready());

    reconciler.provision(&spec(), None).await.unwrap_err();

    let progress: Vec<u32> = captured
        .lines("Still waiting for VM IP address")
        .iter()
        .map(|line| elapsed_seconds(line))
        .collect();
    assert_eq!(progress, (1..=9).map(|n| n * 30).collect::<Vec<u32>>());
    assert!(captured.lines("VM acquired IP address").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_ready_logs_one_indexed_elapsed_seconds() {
    let (captured, _guard) = capture();
    let reconciler = VmReconciler::new(MockControlPlane::new().ip_on_poll(1));

    reconciler.provision(&spec(), None).await.unwrap();

    let ready = captured.lines("VM acquired IP address");
    assert_eq!(ready.len(), 1);
    assert_eq!(elapsed_seconds(&ready[0]), 1);
    assert!(captured.lines("Still waiting for VM IP address").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_ready_after_progress_reports_attempt_count() {
    let (captured, _guard) = capture();
    let reconciler = VmReconciler::new(MockControlPlane::new().ip_on_poll(45));

    reconciler.provision(&spec(), None).await.unwrap();

    let progress = captured.lines("Still waiting for VM IP address");
    assert_eq!(progress.len(), 1);
    assert_eq!(elapsed_seconds(&progress[0]), 30);

    let ready = captured.lines("VM acquired IP address");
    assert_eq!(elapsed_seconds(&ready[0]), 45);
}
