//! Registry of in-flight tasks and their observable status.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Length of the text preview kept for generation tasks.
const TEXT_PREVIEW_CHARS: usize = 50;

/// Task stages in the order they are passed through.
///
/// Not every task visits every stage (a cache hit skips `ComputingPrompt`,
/// a model load ends after `LoadingModel`), but a task never moves to an
/// earlier stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Downloading,
    LoadingModel,
    CheckingCache,
    CacheHit,
    ComputingPrompt,
    GeneratingAudio,
    Saving,
    Complete,
    Error,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::Downloading => "downloading",
            Stage::LoadingModel => "loading_model",
            Stage::CheckingCache => "checking_cache",
            Stage::CacheHit => "cache_hit",
            Stage::ComputingPrompt => "computing_prompt",
            Stage::GeneratingAudio => "generating_audio",
            Stage::Saving => "saving",
            Stage::Complete => "complete",
            Stage::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Error)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a task is doing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    Generation {
        profile_id: String,
        text_preview: String,
    },
    ModelLoad {
        model: String,
    },
}

impl TaskKind {
    /// Generation task with the text truncated to a short preview.
    pub fn generation(profile_id: impl Into<String>, text: &str) -> Self {
        let mut text_preview: String = text.chars().take(TEXT_PREVIEW_CHARS).collect();
        if text.chars().count() > TEXT_PREVIEW_CHARS {
            text_preview.push_str("...");
        }

        TaskKind::Generation {
            profile_id: profile_id.into(),
            text_preview,
        }
    }

    pub fn model_load(model: impl Into<String>) -> Self {
        TaskKind::ModelLoad {
            model: model.into(),
        }
    }
}

/// Point-in-time view of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub kind: TaskKind,
    pub stage: Stage,
    /// 0 to 100
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Informational notices, e.g. a model variant substitution.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

struct TaskEntry {
    snapshot: TaskSnapshot,
    /// Bumped on every change; subscribers compare against it.
    version: u64,
    finished_at: Option<Instant>,
}

struct Inner {
    tasks: Mutex<HashMap<String, TaskEntry>>,
    changed: Condvar,
    retention: Duration,
}

/// Process-wide task registry.
///
/// Cloning is cheap and every clone observes the same tasks. Terminal tasks
/// stay visible for the retention period and are pruned after that.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<Inner>,
}

impl TaskRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: Mutex::new(HashMap::new()),
                changed: Condvar::new(),
                retention,
            }),
        }
    }

    fn prune_locked(&self, tasks: &mut HashMap<String, TaskEntry>) -> usize {
        let retention = self.inner.retention;
        let before = tasks.len();
        tasks.retain(|_, entry| {
            entry
                .finished_at
                .is_none_or(|finished| finished.elapsed() < retention)
        });
        before - tasks.len()
    }

    /// Register a task in the `Queued` stage.
    ///
    /// Returns false if a live task with this id already exists; that task is
    /// left untouched. A finished task with the same id is replaced.
    pub fn start_task(&self, task_id: &str, kind: TaskKind) -> bool {
        let mut tasks = self.inner.tasks.lock();
        self.prune_locked(&mut tasks);

        if tasks
            .get(task_id)
            .is_some_and(|entry| !entry.snapshot.stage.is_terminal())
        {
            return false;
        }

        let now = Utc::now();
        tasks.insert(
            task_id.to_string(),
            TaskEntry {
                snapshot: TaskSnapshot {
                    task_id: task_id.to_string(),
                    kind,
                    stage: Stage::Queued,
                    progress: 0,
                    error: None,
                    notes: Vec::new(),
                    started_at: now,
                    updated_at: now,
                },
                version: 1,
                finished_at: None,
            },
        );
        drop(tasks);

        self.inner.changed.notify_all();
        true
    }

    fn transition(
        &self,
        task_id: &str,
        stage: Stage,
        progress: u8,
        error: Option<String>,
    ) -> bool {
        let mut tasks = self.inner.tasks.lock();
        let Some(entry) = tasks.get_mut(task_id) else {
            return false;
        };

        let current = entry.snapshot.stage;
        if current.is_terminal() || stage < current {
            debug!(task_id, from = %current, to = %stage, "Ignoring stage regression");
            return false;
        }

        let progress = progress.min(100);
        // A failure keeps the progress reached so far.
        if stage == current {
            entry.snapshot.progress = entry.snapshot.progress.max(progress);
        } else if stage != Stage::Error {
            entry.snapshot.progress = progress;
        }
        entry.snapshot.stage = stage;
        entry.snapshot.updated_at = Utc::now();
        if stage.is_terminal() {
            entry.snapshot.error = error;
            entry.finished_at = Some(Instant::now());
        }
        entry.version += 1;
        drop(tasks);

        self.inner.changed.notify_all();
        true
    }

    /// Move a task to `stage` with `progress` percent.
    ///
    /// Returns false, changing nothing, if the task is unknown, already
    /// finished, or `stage` is earlier than its current stage. Within one
    /// stage progress never decreases.
    pub fn update(&self, task_id: &str, stage: Stage, progress: u8) -> bool {
        match stage {
            Stage::Complete => self.complete(task_id),
            Stage::Error => self.fail(task_id, "failed"),
            _ => self.transition(task_id, stage, progress, None),
        }
    }

    /// Mark a task finished successfully.
    pub fn complete(&self, task_id: &str) -> bool {
        self.transition(task_id, Stage::Complete, 100, None)
    }

    /// Mark a task failed.
    pub fn fail(&self, task_id: &str, error: impl Into<String>) -> bool {
        self.transition(task_id, Stage::Error, 0, Some(error.into()))
    }

    /// Attach an informational notice to a live task.
    pub fn note(&self, task_id: &str, message: impl Into<String>) -> bool {
        let mut tasks = self.inner.tasks.lock();
        let Some(entry) = tasks.get_mut(task_id) else {
            return false;
        };
        if entry.snapshot.stage.is_terminal() {
            return false;
        }

        entry.snapshot.notes.push(message.into());
        entry.snapshot.updated_at = Utc::now();
        entry.version += 1;
        drop(tasks);

        self.inner.changed.notify_all();
        true
    }

    /// Current status of a task, if it is still retained.
    pub fn snapshot(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.inner
            .tasks
            .lock()
            .get(task_id)
            .map(|entry| entry.snapshot.clone())
    }

    /// Tasks that have not finished, oldest first.
    pub fn active_tasks(&self) -> Vec<TaskSnapshot> {
        let mut tasks = self.inner.tasks.lock();
        self.prune_locked(&mut tasks);

        let mut active: Vec<TaskSnapshot> = tasks
            .values()
            .filter(|entry| !entry.snapshot.stage.is_terminal())
            .map(|entry| entry.snapshot.clone())
            .collect();
        active.sort_by_key(|s| s.started_at);
        active
    }

    /// Remove all finished tasks now, returning how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut tasks = self.inner.tasks.lock();
        let before = tasks.len();
        tasks.retain(|_, entry| !entry.snapshot.stage.is_terminal());
        let cleared = before - tasks.len();
        drop(tasks);

        self.inner.changed.notify_all();
        cleared
    }

    /// Remove finished tasks older than the retention period.
    pub fn prune(&self) -> usize {
        let mut tasks = self.inner.tasks.lock();
        let pruned = self.prune_locked(&mut tasks);
        drop(tasks);

        self.inner.changed.notify_all();
        pruned
    }

    /// Follow a task's status changes.
    ///
    /// Each subscription is independent. It yields the current snapshot
    /// immediately, then one snapshot per observed change, and ends after the
    /// terminal snapshot. Changes that happen between two reads are coalesced
    /// into the latest snapshot. A subscription to an unknown task is empty.
    pub fn subscribe(&self, task_id: &str) -> Subscription {
        Subscription {
            inner: Arc::clone(&self.inner),
            task_id: task_id.to_string(),
            seen: 0,
            done: false,
        }
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_TASK_RETENTION)
    }
}

/// Blocking iterator over a task's snapshots.
///
/// Dropping it has no effect on the task itself.
pub struct Subscription {
    inner: Arc<Inner>,
    task_id: String,
    seen: u64,
    done: bool,
}

/// Result of waiting on a subscription with a timeout.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    Update(TaskSnapshot),
    /// The terminal snapshot was already delivered, or the task is gone.
    Ended,
    /// Nothing changed before the timeout; the subscription is still live.
    TimedOut,
}

impl Subscription {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Like [`Iterator::next`], but gives up after `timeout` without a change.
    pub fn next_timeout(&mut self, timeout: Duration) -> SubscriptionEvent {
        self.next_until(Some(Instant::now() + timeout))
    }

    fn next_until(&mut self, deadline: Option<Instant>) -> SubscriptionEvent {
        if self.done {
            return SubscriptionEvent::Ended;
        }

        let mut tasks = self.inner.tasks.lock();
        let mut timed_out = false;
        loop {
            match tasks.get(&self.task_id) {
                None => {
                    self.done = true;
                    return SubscriptionEvent::Ended;
                }
                Some(entry) if entry.version > self.seen => {
                    self.seen = entry.version;
                    let snapshot = entry.snapshot.clone();
                    if snapshot.stage.is_terminal() {
                        self.done = true;
                    }
                    return SubscriptionEvent::Update(snapshot);
                }
                Some(_) if timed_out => return SubscriptionEvent::TimedOut,
                Some(_) => match deadline {
                    Some(deadline) => {
                        timed_out = self
                            .inner
                            .changed
                            .wait_until(&mut tasks, deadline)
                            .timed_out();
                    }
                    None => self.inner.changed.wait(&mut tasks),
                },
            }
        }
    }
}

impl Iterator for Subscription {
    type Item = TaskSnapshot;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_until(None) {
            SubscriptionEvent::Update(snapshot) => Some(snapshot),
            SubscriptionEvent::Ended | SubscriptionEvent::TimedOut => None,
        }
    }
}
