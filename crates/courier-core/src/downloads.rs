//! File download state machine with admission control, backoff retry and
//! stall detection.
//!
//! [`DownloadManager`] performs no I/O. Every operation returns the
//! [`DownloadEffect`]s the caller must carry out (backend calls, timers, UI
//! queue pushes) after releasing whatever lock guards the manager.

use std::{
    collections::HashMap,
    path::PathBuf,
    time::{Duration, Instant},
};

use tracing::{debug, trace, warn};

use crate::{
    error::BackendError,
    retry::RetryPolicy,
    types::{CompletedDownload, DownloadProgress, FileId, FileState, StartedDownload},
};

/// Tuning values for the download pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadConfig {
    /// Automatic retries allowed after the first failure.
    pub max_retries: u32,
    /// Maximum time a `Downloading` entry may go without progress, and an
    /// issued request may go without an acknowledgement.
    pub timeout: Duration,
    /// Period of the stall sweep.
    pub sweep_interval: Duration,
    pub retry_policy: RetryPolicy,
    /// Cap on `Pending` + `Downloading` entries for normal-priority requests.
    pub max_concurrent: usize,
    /// Requests at or above this priority bypass the concurrency cap.
    pub high_priority_threshold: u8,
    /// Table size above which terminal entries are evicted.
    pub max_tracked_entries: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(10),
            retry_policy: RetryPolicy::default(),
            max_concurrent: 20,
            high_priority_threshold: 16,
            max_tracked_entries: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    /// Accepted locally; backend call issued or waiting for backoff.
    Pending,
    /// Backend acknowledged or reported progress.
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadState {
    /// Counts toward the concurrency cap and blocks duplicate requests.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Downloading)
    }

    /// Eligible for eviction.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadEntry {
    pub file_id: FileId,
    pub name: String,
    pub priority: u8,
    pub state: DownloadState,
    pub retry_count: u32,
    pub started_at: Instant,
    /// Liveness stamp checked by the stall sweep.
    pub last_progress_at: Instant,
    /// A backend request was issued for the current attempt and not answered.
    pub awaiting_ack: bool,
    pub downloaded_size: u64,
    pub total_size: u64,
    pub local_path: Option<PathBuf>,
    pub error: Option<BackendError>,
}

/// Work the caller must perform on behalf of the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEffect {
    /// Send a download request to the backend. `attempt` tags the reply.
    Issue {
        file_id: FileId,
        priority: u8,
        attempt: u32,
    },
    /// Tell the backend to stop transferring the file.
    CancelRemote { file_id: FileId },
    /// Call [`DownloadManager::fire_retry`] after `delay`.
    ScheduleRetry {
        file_id: FileId,
        delay: Duration,
        attempt: u32,
    },
    /// Push to `StartedDownloads`.
    Started(StartedDownload),
    /// Push to `ProgressUpdates`.
    Progress(DownloadProgress),
    /// Push to `CompletedDownloads`.
    Finished(CompletedDownload),
}

impl DownloadEffect {
    /// Whether the effect changes UI-visible download state.
    pub fn marks_dirty(&self) -> bool {
        matches!(
            self,
            Self::Started(_) | Self::Progress(_) | Self::Finished(_)
        )
    }
}

#[derive(Debug, Default)]
pub struct DownloadManager {
    config: DownloadConfig,
    entries: HashMap<FileId, DownloadEntry>,
}

impl DownloadManager {
    pub fn new(config: DownloadConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
        }
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Accept a download request unless it is a duplicate or over capacity.
    pub fn request_download(
        &mut self,
        file_id: FileId,
        priority: u8,
        name: impl Into<String>,
        size: u64,
        now: Instant,
    ) -> Vec<DownloadEffect> {
        if file_id == 0 {
            return Vec::new();
        }

        if let Some(existing) = self.entries.get(&file_id)
            && (existing.state.is_active() || existing.state == DownloadState::Completed)
        {
            trace!(file_id, state = ?existing.state, "download already tracked");
            return Vec::new();
        }

        if self.active_count() >= self.config.max_concurrent
            && priority < self.config.high_priority_threshold
        {
            debug!(
                file_id,
                priority,
                active = self.active_count(),
                "download rejected: concurrency cap reached"
            );
            return Vec::new();
        }

        let name = name.into();
        self.entries.insert(
            file_id,
            DownloadEntry {
                file_id,
                name: name.clone(),
                priority,
                state: DownloadState::Pending,
                retry_count: 0,
                started_at: now,
                last_progress_at: now,
                awaiting_ack: true,
                downloaded_size: 0,
                total_size: size,
                local_path: None,
                error: None,
            },
        );
        self.evict_terminal();
        debug!(file_id, priority, size, "download requested");

        vec![
            DownloadEffect::Started(StartedDownload {
                file_id,
                name,
                total_size: size,
            }),
            DownloadEffect::Issue {
                file_id,
                priority,
                attempt: 0,
            },
        ]
    }

    /// Backend accepted the download request for `attempt`.
    pub fn on_ack_success(
        &mut self,
        file_id: FileId,
        attempt: u32,
        file: FileState,
        now: Instant,
    ) -> Vec<DownloadEffect> {
        let Some(entry) = self.current_attempt(file_id, attempt) else {
            return Vec::new();
        };

        if file.is_downloading_completed {
            return self.complete(file_id, file);
        }

        entry.state = DownloadState::Downloading;
        entry.awaiting_ack = false;
        entry.last_progress_at = now;
        entry.downloaded_size = entry.downloaded_size.max(file.downloaded_size);
        if file.total_size > 0 {
            entry.total_size = file.total_size;
        }
        trace!(file_id, attempt, "download acknowledged");
        Vec::new()
    }

    /// Backend rejected the download request for `attempt`.
    pub fn on_ack_error(
        &mut self,
        file_id: FileId,
        attempt: u32,
        error: BackendError,
    ) -> Vec<DownloadEffect> {
        if self.current_attempt(file_id, attempt).is_none() {
            return Vec::new();
        }
        self.fail(file_id, error)
    }

    /// Apply a file-state push event.
    pub fn on_file_update(&mut self, file: FileState, now: Instant) -> Vec<DownloadEffect> {
        let file_id = file.file_id;
        let Some(entry) = self.entries.get_mut(&file_id) else {
            trace!(file_id, "file update for untracked download");
            return Vec::new();
        };

        match entry.state {
            DownloadState::Cancelled => {
                debug!(file_id, "ignoring file update for cancelled download");
                return Vec::new();
            }
            DownloadState::Completed => return Vec::new(),
            DownloadState::Failed if !file.is_downloading_completed => return Vec::new(),
            _ => {}
        }

        if file.is_downloading_completed {
            return self.complete(file_id, file);
        }
        if !file.is_downloading_active {
            trace!(file_id, "file update without active transfer");
            return Vec::new();
        }

        entry.state = DownloadState::Downloading;
        entry.awaiting_ack = false;
        entry.last_progress_at = now;
        entry.downloaded_size = file.downloaded_size;
        if file.total_size > 0 {
            entry.total_size = file.total_size;
        }

        vec![DownloadEffect::Progress(DownloadProgress {
            file_id,
            downloaded_size: entry.downloaded_size,
            total_size: entry.total_size,
        })]
    }

    /// Schedule a backoff retry for a failed download.
    ///
    /// No-op when the file is untracked, not `Failed`, or out of retries.
    pub fn retry_download(&mut self, file_id: FileId) -> Vec<DownloadEffect> {
        let max_retries = self.config.max_retries;
        let policy = self.config.retry_policy;
        let Some(entry) = self.entries.get_mut(&file_id) else {
            return Vec::new();
        };
        if entry.state != DownloadState::Failed || entry.retry_count >= max_retries {
            return Vec::new();
        }

        let hint = entry.error.as_ref().and_then(|err| err.retry_after_ms);
        let delay = policy.delay_for_attempt(entry.retry_count, hint);
        entry.retry_count += 1;
        entry.state = DownloadState::Pending;
        entry.awaiting_ack = false;
        debug!(
            file_id,
            attempt = entry.retry_count,
            delay_ms = delay.as_millis() as u64,
            "download retry scheduled"
        );

        vec![DownloadEffect::ScheduleRetry {
            file_id,
            delay,
            attempt: entry.retry_count,
        }]
    }

    /// Backoff timer for `attempt` expired.
    ///
    /// Ignored when the entry was cancelled, replaced, or already resumed.
    pub fn fire_retry(
        &mut self,
        file_id: FileId,
        attempt: u32,
        now: Instant,
    ) -> Vec<DownloadEffect> {
        let Some(entry) = self.entries.get_mut(&file_id) else {
            return Vec::new();
        };
        if entry.state != DownloadState::Pending || entry.retry_count != attempt {
            trace!(file_id, attempt, state = ?entry.state, "stale retry timer");
            return Vec::new();
        }

        entry.last_progress_at = now;
        entry.awaiting_ack = true;
        vec![DownloadEffect::Issue {
            file_id,
            priority: entry.priority,
            attempt,
        }]
    }

    /// Fail every `Downloading` entry without progress for longer than the
    /// timeout, and every `Pending` entry whose issued request went
    /// unacknowledged for as long.
    ///
    /// Entries waiting out a backoff delay are left alone.
    pub fn sweep_timeouts(&mut self, now: Instant) -> Vec<DownloadEffect> {
        let timeout = self.config.timeout;
        let stalled: Vec<(FileId, Duration)> = self
            .entries
            .values()
            .filter(|entry| match entry.state {
                DownloadState::Downloading => true,
                DownloadState::Pending => entry.awaiting_ack,
                _ => false,
            })
            .filter_map(|entry| {
                let idle = now.saturating_duration_since(entry.last_progress_at);
                (idle > timeout).then_some((entry.file_id, idle))
            })
            .collect();

        let mut effects = Vec::new();
        for (file_id, idle) in stalled {
            warn!(file_id, idle_secs = idle.as_secs(), "download stalled");
            effects.extend(self.fail(file_id, BackendError::download_timeout(idle)));
        }
        effects
    }

    /// Mark an active download cancelled and ask the backend to stop it.
    pub fn cancel_download(&mut self, file_id: FileId) -> Vec<DownloadEffect> {
        let Some(entry) = self.entries.get_mut(&file_id) else {
            return Vec::new();
        };
        if !entry.state.is_active() {
            return Vec::new();
        }
        entry.state = DownloadState::Cancelled;
        debug!(file_id, "download cancelled");
        vec![DownloadEffect::CancelRemote { file_id }]
    }

    pub fn state(&self, file_id: FileId) -> Option<DownloadState> {
        self.entries.get(&file_id).map(|entry| entry.state)
    }

    pub fn entry(&self, file_id: FileId) -> Option<DownloadEntry> {
        self.entries.get(&file_id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.state.is_active())
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn current_attempt(&mut self, file_id: FileId, attempt: u32) -> Option<&mut DownloadEntry> {
        let entry = self.entries.get_mut(&file_id)?;
        if !entry.state.is_active() || entry.retry_count != attempt {
            debug!(file_id, attempt, state = ?entry.state, "ignoring stale download ack");
            return None;
        }
        Some(entry)
    }

    fn complete(&mut self, file_id: FileId, file: FileState) -> Vec<DownloadEffect> {
        let Some(entry) = self.entries.get_mut(&file_id) else {
            return Vec::new();
        };
        entry.state = DownloadState::Completed;
        entry.error = None;
        entry.local_path = file.local_path;
        if file.total_size > 0 {
            entry.total_size = file.total_size;
        }
        entry.downloaded_size = entry.total_size.max(file.downloaded_size);
        debug!(file_id, "download completed");

        vec![DownloadEffect::Finished(CompletedDownload {
            file_id,
            local_path: entry.local_path.clone(),
            success: true,
            error: None,
        })]
    }

    fn fail(&mut self, file_id: FileId, error: BackendError) -> Vec<DownloadEffect> {
        let max_retries = self.config.max_retries;
        let Some(entry) = self.entries.get_mut(&file_id) else {
            return Vec::new();
        };
        warn!(
            file_id,
            attempt = entry.retry_count,
            error = %error,
            "download failed"
        );
        entry.state = DownloadState::Failed;
        entry.awaiting_ack = false;
        let message = error.message.clone();
        entry.error = Some(error);
        let budget_left = entry.retry_count < max_retries;

        let mut effects = vec![DownloadEffect::Finished(CompletedDownload {
            file_id,
            local_path: None,
            success: false,
            error: Some(message),
        })];
        if budget_left {
            effects.extend(self.retry_download(file_id));
        }
        effects
    }

    fn evict_terminal(&mut self) {
        if self.entries.len() <= self.config.max_tracked_entries {
            return;
        }
        let mut terminal: Vec<(Instant, FileId)> = self
            .entries
            .values()
            .filter(|entry| entry.state.is_terminal())
            .map(|entry| (entry.started_at, entry.file_id))
            .collect();
        terminal.sort_unstable();

        let excess = self.entries.len() - self.config.max_tracked_entries;
        for (_, file_id) in terminal.into_iter().take(excess) {
            self.entries.remove(&file_id);
        }
        trace!(tracked = self.entries.len(), "evicted terminal downloads");
    }
}
