use anyhow::{anyhow, Context};
use memmap2::Mmap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::catalog::ChipGeometry;
use crate::geometry::{Aabb, Point};
use crate::model::FeatureRecord;

/// Chip description as served by the backend. Only the geometry is used;
/// the rest is carried for display.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ChipDto {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub barcodes: u32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub x1_border: f32,
    pub y1_border: f32,
    pub x2_border: f32,
    pub y2_border: f32,
}

impl ChipDto {
    pub fn geometry(&self) -> ChipGeometry {
        ChipGeometry {
            border: Aabb::from_points(
                Point::new(self.x1_border, self.y1_border),
                Point::new(self.x2_border, self.y2_border),
            ),
            inner: Aabb::from_points(Point::new(self.x1, self.y1), Point::new(self.x2, self.y2)),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct DatasetPayload {
    #[serde(default)]
    pub chip: Option<ChipDto>,
    pub features: Vec<FeatureRecord>,
}

pub fn parse_dataset(bytes: &[u8]) -> anyhow::Result<DatasetPayload> {
    serde_json::from_slice(bytes).context("parse dataset json")
}

pub fn load_dataset_file(path: &Path) -> anyhow::Result<DatasetPayload> {
    let file = File::open(path).with_context(|| format!("open: {}", path.display()))?;
    let len = file.metadata().with_context(|| format!("stat: {}", path.display()))?.len();
    if len == 0 {
        return Err(anyhow!("empty dataset file: {}", path.display()));
    }
    let mmap = unsafe { Mmap::map(&file).context("mmap")? };
    let payload = parse_dataset(&mmap).with_context(|| format!("load: {}", path.display()))?;
    log::info!(
        "read {} features from {} ({} bytes)",
        payload.features.len(),
        path.display(),
        len
    );
    Ok(payload)
}

pub fn write_dataset_file(path: &Path, payload: &DatasetPayload) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("create: {}", path.display()))?;
    serde_json::to_writer(std::io::BufWriter::new(file), payload).context("write dataset json")?;
    Ok(())
}

pub enum JobOutcome {
    Loaded(DatasetPayload),
    Failed(anyhow::Error),
    Cancelled,
}

impl std::fmt::Debug for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOutcome::Loaded(p) => write!(f, "Loaded({} features)", p.features.len()),
            JobOutcome::Failed(e) => write!(f, "Failed({e:#})"),
            JobOutcome::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Fetch + parse running on a worker thread. The consuming thread polls it
/// and hands the finished payload to the catalog itself.
pub struct DownloadJob {
    cancel: Arc<AtomicBool>,
    stage: Arc<Mutex<String>>,
    handle: Option<JoinHandle<anyhow::Result<Option<DatasetPayload>>>>,
}

impl DownloadJob {
    /// `fetch` produces the raw payload bytes (network, cache or disk).
    pub fn spawn(fetch: impl FnOnce() -> anyhow::Result<Vec<u8>> + Send + 'static) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let stage = Arc::new(Mutex::new("queued".to_string()));
        let (job_cancel, job_stage) = (cancel.clone(), stage.clone());

        let handle = thread::spawn(move || {
            *job_stage.lock() = "fetching".to_string();
            let bytes = fetch()?;
            if job_cancel.load(Ordering::Acquire) {
                return Ok(None);
            }
            *job_stage.lock() = format!("parsing {} bytes", bytes.len());
            let payload = parse_dataset(&bytes)?;
            if job_cancel.load(Ordering::Acquire) {
                return Ok(None);
            }
            *job_stage.lock() = "done".to_string();
            Ok(Some(payload))
        });

        Self {
            cancel,
            stage,
            handle: Some(handle),
        }
    }

    pub fn spawn_file(path: PathBuf) -> Self {
        Self::spawn(move || std::fs::read(&path).with_context(|| format!("read: {}", path.display())))
    }

    /// Ask the worker to drop its result. Takes effect at the next stage
    /// boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub fn stage(&self) -> String {
        self.stage.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Non-blocking. Returns the outcome once, when the worker is done.
    pub fn poll(&mut self) -> Option<JobOutcome> {
        let handle = self.handle.as_ref()?;
        if !handle.is_finished() {
            return None;
        }
        let handle = self.handle.take()?;
        Some(self.collect(handle))
    }

    /// Block until the worker is done.
    pub fn wait(mut self) -> JobOutcome {
        match self.handle.take() {
            Some(handle) => self.collect(handle),
            None => JobOutcome::Failed(anyhow!("job outcome already taken")),
        }
    }

    fn collect(&self, handle: JoinHandle<anyhow::Result<Option<DatasetPayload>>>) -> JobOutcome {
        let outcome = match handle.join() {
            Ok(Ok(Some(_))) | Ok(Ok(None)) if self.is_cancelled() => JobOutcome::Cancelled,
            Ok(Ok(Some(payload))) => JobOutcome::Loaded(payload),
            Ok(Ok(None)) => JobOutcome::Cancelled,
            Ok(Err(e)) => JobOutcome::Failed(e),
            Err(_) => JobOutcome::Failed(anyhow!("download thread panicked")),
        };
        if matches!(outcome, JobOutcome::Cancelled) {
            log::warn!("download job cancelled, result dropped");
        }
        outcome
    }
}

impl Drop for DownloadJob {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel();
        }
    }
}
