use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use super::{EventSource, SourceError};
use crate::event::{Event, EventBus, EventCategory, Metadata};
use crate::shutdown::ShutdownSignal;
use crate::tracking::{ActivityKey, DifferentialTracker};

const MAX_VIDEO_DEVICES: usize = 10;

/// Reports which processes hold a video capture device open
///
/// Camera use that predates the daemon is reported on the first poll.
pub struct CameraSource {
    tracker: Arc<Mutex<DifferentialTracker>>,
    poll_interval: Duration,
    dev_root: PathBuf,
    proc_root: PathBuf,
}

impl CameraSource {
    pub fn new(poll_interval: Duration) -> Self {
        Self::with_roots(poll_interval, "/dev", "/proc")
    }

    /// Looks for devices and processes under different roots
    pub fn with_roots(
        poll_interval: Duration,
        dev_root: impl Into<PathBuf>,
        proc_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tracker: Arc::new(Mutex::new(DifferentialTracker::new())),
            poll_interval,
            dev_root: dev_root.into(),
            proc_root: proc_root.into(),
        }
    }

    async fn video_devices(dev_root: &Path) -> Vec<PathBuf> {
        let mut devices = Vec::new();
        for index in 0..MAX_VIDEO_DEVICES {
            let path = dev_root.join(format!("video{index}"));
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                devices.push(path);
            }
        }
        devices
    }

    /// Every (process, device) pair where the process has the device open
    async fn holders(proc_root: &Path, devices: &[PathBuf]) -> Vec<(ActivityKey, Metadata)> {
        let mut holders = Vec::new();

        let mut entries = match tokio::fs::read_dir(proc_root).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(error = %e, "Cannot read process table");
                return holders;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };

            let Some(device) = Self::open_device(&entry.path(), devices).await else {
                continue;
            };

            let Some(app_name) = process_name(&entry.path()).await else {
                continue;
            };

            let mut metadata = Metadata::new();
            metadata.insert("device".to_string(), "camera".into());
            metadata.insert(
                "device_path".to_string(),
                device.to_string_lossy().into_owned().into(),
            );
            holders.push((ActivityKey::new(app_name, pid), metadata));
        }

        holders
    }

    async fn open_device<'a>(process_dir: &Path, devices: &'a [PathBuf]) -> Option<&'a PathBuf> {
        // other users' fd tables are unreadable; those processes are skipped
        let mut fds = tokio::fs::read_dir(process_dir.join("fd")).await.ok()?;

        while let Ok(Some(fd)) = fds.next_entry().await {
            if let Ok(target) = tokio::fs::read_link(fd.path()).await {
                if let Some(device) = devices.iter().find(|d| **d == target) {
                    return Some(device);
                }
            }
        }
        None
    }

    async fn poll(
        tracker: &Mutex<DifferentialTracker>,
        proc_root: &Path,
        devices: &[PathBuf],
    ) -> Vec<Event> {
        let snapshot = Self::holders(proc_root, devices).await;
        tracker
            .lock()
            .await
            .observe(snapshot)
            .into_iter()
            .map(|t| t.into_event(EventCategory::CameraStart, EventCategory::CameraStop))
            .collect()
    }

    async fn check_and_publish(
        tracker: &Mutex<DifferentialTracker>,
        proc_root: &Path,
        devices: &[PathBuf],
        bus: &EventBus,
    ) {
        for event in Self::poll(tracker, proc_root, devices).await {
            bus.publish(event);
        }
    }
}

/// `comm`, replaced by the basename of `argv[0]` when that differs
async fn process_name(process_dir: &Path) -> Option<String> {
    let comm = tokio::fs::read_to_string(process_dir.join("comm")).await.ok()?;
    let mut name = comm.trim().to_string();

    if let Ok(raw) = tokio::fs::read(process_dir.join("cmdline")).await {
        let argv0 = raw.split(|b| *b == 0).next().unwrap_or_default();
        let argv0 = String::from_utf8_lossy(argv0);
        if let Some(exec_name) = argv0.trim().rsplit('/').next() {
            if !exec_name.is_empty() && exec_name != name {
                name = exec_name.to_string();
            }
        }
    }

    Some(name)
}

#[async_trait]
impl EventSource for CameraSource {
    fn name(&self) -> &'static str {
        "camera"
    }

    #[instrument(skip(self, bus, shutdown), fields(source = "camera"))]
    async fn start(
        &self,
        bus: EventBus,
        mut shutdown: ShutdownSignal,
    ) -> Result<JoinHandle<()>, SourceError> {
        let devices = Self::video_devices(&self.dev_root).await;

        if devices.is_empty() {
            info!("No video devices found, camera monitoring disabled");
            return Ok(tokio::spawn(async move { shutdown.recv().await }));
        }

        info!(devices = ?devices, "Monitoring video devices");

        let tracker = Arc::clone(&self.tracker);
        let proc_root = self.proc_root.clone();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        Self::check_and_publish(&tracker, &proc_root, &devices, &bus).await;
                    }
                }
            }
            info!("Camera source stopped");
        }))
    }
}
