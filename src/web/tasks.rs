//! In-memory registry of web download tasks.
//!
//! A task is created `pending`, moves through `downloading`/`processing`
//! as yt-dlp reports progress and ends `completed` or `failed`. Finished
//! tasks are never updated again, so a cancelled task (failed with
//! "Cancelled by user") keeps that state even if the worker returns later.
//! They stay queryable for [`FINISHED_TASK_TTL`] before eviction.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::downloader::models::{DownloadProgress, ProgressEvent, TaskStatus};
use crate::downloader::traits::ProgressSink;

pub const CANCELLED_MESSAGE: &str = "Cancelled by user";

/// How long a finished task is kept for progress queries
pub const FINISHED_TASK_TTL: Duration = Duration::from_secs(60 * 60);

struct TaskEntry {
    progress: DownloadProgress,
    cancel: CancellationToken,
    finished_at: Option<Instant>,
}

impl TaskEntry {
    fn mark_if_finished(&mut self) {
        if self.finished_at.is_none() && self.progress.status.is_finished() {
            self.finished_at = Some(Instant::now());
        }
    }
}

#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, TaskEntry>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending task
    pub fn create(&self) -> (String, CancellationToken) {
        let id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        self.tasks.lock().insert(
            id.clone(),
            TaskEntry {
                progress: DownloadProgress::pending(id.clone()),
                cancel: cancel.clone(),
                finished_at: None,
            },
        );
        (id, cancel)
    }

    pub fn get(&self, id: &str) -> Option<DownloadProgress> {
        self.tasks.lock().get(id).map(|t| t.progress.clone())
    }

    pub fn snapshot(&self) -> BTreeMap<String, DownloadProgress> {
        self.tasks
            .lock()
            .iter()
            .map(|(id, t)| (id.clone(), t.progress.clone()))
            .collect()
    }

    /// Apply `f` unless the task is unknown or already finished
    fn update(&self, id: &str, f: impl FnOnce(&mut DownloadProgress)) {
        if let Some(task) = self.tasks.lock().get_mut(id) {
            if !task.progress.status.is_finished() {
                f(&mut task.progress);
                task.mark_if_finished();
            }
        }
    }

    pub fn apply_event(&self, id: &str, event: &ProgressEvent) {
        self.update(id, |p| p.apply(event));
    }

    pub fn set_status(&self, id: &str, status: TaskStatus) {
        self.update(id, |p| p.status = status);
    }

    pub fn complete(&self, id: &str, filename: Option<String>) {
        self.update(id, |p| {
            p.status = TaskStatus::Completed;
            p.progress = 100.0;
            if filename.is_some() {
                p.filename = filename;
            }
        });
    }

    pub fn fail(&self, id: &str, error: impl Into<String>) {
        let error = error.into();
        self.update(id, |p| {
            p.status = TaskStatus::Failed;
            p.error = Some(error);
        });
    }

    /// Stop the task's download. `false` when the id is unknown.
    pub fn cancel(&self, id: &str) -> bool {
        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.get_mut(id) else {
            return false;
        };
        task.cancel.cancel();
        if !task.progress.status.is_finished() {
            task.progress.status = TaskStatus::Failed;
            task.progress.error = Some(CANCELLED_MESSAGE.to_string());
            task.mark_if_finished();
        }
        true
    }

    /// Drop tasks finished at least `ttl` ago. Returns how many were removed.
    pub fn evict_finished(&self, ttl: Duration) -> usize {
        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|_, t| t.finished_at.map_or(true, |at| at.elapsed() < ttl));
        before - tasks.len()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Progress sink feeding one task
    pub fn sink(self: &Arc<Self>, id: &str) -> TaskSink {
        TaskSink {
            registry: Arc::clone(self),
            task_id: id.to_string(),
        }
    }
}

pub struct TaskSink {
    registry: Arc<TaskRegistry>,
    task_id: String,
}

impl ProgressSink for TaskSink {
    fn on_event(&self, event: &ProgressEvent) {
        self.registry.apply_event(&self.task_id, event);
    }
}
