use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock, Weak},
    time::{Duration, Instant},
};

use courier_core::{
    AuthState, BackendError, BackendEvent, BackendRequest, ChatId, ChatSummary, CompletedDownload,
    CorrelationTable, DirtyFlags, DirtyPublisher, DownloadEffect, DownloadManager,
    DownloadProgress, DrainQueue, ErrorContext, ErrorReport, FileId, KeyedDrainQueue,
    LoopLifecycle, Message, MessageCache, StartedDownload, UserId, UserPresence,
    normalization::{error_report, file_state_from_reply},
    sync::{lock, read},
};
use tracing::{debug, trace, warn};

use crate::{
    backend::{Backend, request_kind},
    config::ClientConfig,
    timers::Timers,
};

/// State shared by the UI-facing façade, the receive loop and timer tasks.
///
/// Each field carries its own lock. Reply handlers and timer callbacks hold a
/// [`Weak`] reference so pending work never keeps the client alive.
pub(crate) struct Shared {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) config: ClientConfig,
    pub(crate) lifecycle: LoopLifecycle,
    pub(crate) correlation: CorrelationTable,
    pub(crate) dirty: DirtyPublisher,
    pub(crate) timers: Timers,

    pub(crate) cache: MessageCache,
    pub(crate) downloads: Mutex<DownloadManager>,
    pub(crate) chats: RwLock<HashMap<ChatId, ChatSummary>>,
    pub(crate) presence: RwLock<HashMap<UserId, UserPresence>>,
    pub(crate) auth: RwLock<AuthState>,
    pub(crate) active_chat: RwLock<Option<ChatId>>,

    pub(crate) new_messages: KeyedDrainQueue<ChatId, Message>,
    pub(crate) updated_messages: KeyedDrainQueue<ChatId, Message>,
    pub(crate) started_downloads: DrainQueue<StartedDownload>,
    pub(crate) progress_updates: DrainQueue<DownloadProgress>,
    pub(crate) completed_downloads: DrainQueue<CompletedDownload>,
    pub(crate) errors: DrainQueue<ErrorReport>,
}

impl Shared {
    pub(crate) fn new(
        backend: Arc<dyn Backend>,
        config: ClientConfig,
        dirty: DirtyPublisher,
        timers: Timers,
    ) -> Self {
        Self {
            backend,
            config,
            lifecycle: LoopLifecycle::default(),
            correlation: CorrelationTable::new(),
            dirty,
            timers,
            cache: MessageCache::new(config.max_messages_per_chat),
            downloads: Mutex::new(DownloadManager::new(config.downloads)),
            chats: RwLock::new(HashMap::new()),
            presence: RwLock::new(HashMap::new()),
            auth: RwLock::new(AuthState::default()),
            active_chat: RwLock::new(None),
            new_messages: KeyedDrainQueue::with_max_per_key(config.max_messages_per_chat),
            updated_messages: KeyedDrainQueue::with_max_per_key(config.max_messages_per_chat),
            started_downloads: DrainQueue::new(),
            progress_updates: DrainQueue::new(),
            completed_downloads: DrainQueue::new(),
            errors: DrainQueue::new(),
        }
    }

    /// Register `handler` and hand `request` to the backend.
    ///
    /// The handler receives the reply together with a live reference to the
    /// shared state; replies arriving after the client is gone are dropped.
    pub(crate) fn send_tracked<F>(self: &Arc<Self>, request: BackendRequest, handler: F)
    where
        F: FnOnce(&Arc<Shared>, BackendEvent) + Send + 'static,
    {
        let weak: Weak<Shared> = Arc::downgrade(self);
        let request_id = self.correlation.register(move |event| {
            if let Some(shared) = weak.upgrade() {
                handler(&shared, event);
            }
        });
        trace!(
            request_id,
            request = request_kind(&request),
            "sending tracked request"
        );
        self.backend.send(request_id, request);
    }

    /// Hand `request` to the backend without waiting for a reply.
    pub(crate) fn send_untracked(&self, request: BackendRequest) {
        let request_id = self.correlation.next_untracked_id();
        trace!(
            request_id,
            request = request_kind(&request),
            "sending untracked request"
        );
        self.backend.send(request_id, request);
    }

    pub(crate) fn report_error(&self, context: ErrorContext, error: BackendError) {
        warn!(?context, error = %error, "backend request failed");
        let flag = match context {
            ErrorContext::LoadChats => DirtyFlags::CHAT_LIST,
            _ => DirtyFlags::MESSAGES,
        };
        self.errors.push(error_report(context, error));
        self.dirty.set_dirty(flag);
    }

    pub(crate) fn is_active_chat(&self, chat_id: ChatId) -> bool {
        *read(&self.active_chat) == Some(chat_id)
    }

    /// Carry out download effects produced under the manager lock.
    ///
    /// Must be called with the lock released.
    pub(crate) fn apply_download_effects(self: &Arc<Self>, effects: Vec<DownloadEffect>) {
        if effects.is_empty() {
            return;
        }
        let mut touched_ui = false;
        for effect in effects {
            touched_ui |= effect.marks_dirty();
            match effect {
                DownloadEffect::Issue {
                    file_id,
                    priority,
                    attempt,
                } => self.issue_download(file_id, priority, attempt),
                DownloadEffect::CancelRemote { file_id } => {
                    self.send_untracked(BackendRequest::CancelDownloadFile { file_id });
                }
                DownloadEffect::ScheduleRetry {
                    file_id,
                    delay,
                    attempt,
                } => self.schedule_retry(file_id, delay, attempt),
                DownloadEffect::Started(started) => self.started_downloads.push(started),
                DownloadEffect::Progress(progress) => self.progress_updates.push(progress),
                DownloadEffect::Finished(finished) => self.completed_downloads.push(finished),
            }
        }
        if touched_ui {
            self.dirty.set_dirty(DirtyFlags::DOWNLOADS);
        }
    }

    /// Periodic stall check driven by the sweep timer.
    pub(crate) fn sweep_downloads(self: &Arc<Self>) {
        let effects = lock(&self.downloads).sweep_timeouts(Instant::now());
        self.apply_download_effects(effects);
    }

    fn issue_download(self: &Arc<Self>, file_id: FileId, priority: u8, attempt: u32) {
        if !self.lifecycle.is_running() {
            debug!(file_id, "download not issued: client stopping");
            return;
        }
        self.send_tracked(
            BackendRequest::DownloadFile { file_id, priority },
            move |shared, event| {
                let now = Instant::now();
                let effects = match file_state_from_reply(event) {
                    Ok(file) => lock(&shared.downloads).on_ack_success(file_id, attempt, file, now),
                    Err(error) => lock(&shared.downloads).on_ack_error(file_id, attempt, error),
                };
                shared.apply_download_effects(effects);
            },
        );
    }

    fn schedule_retry(self: &Arc<Self>, file_id: FileId, delay: Duration, attempt: u32) {
        let weak = Arc::downgrade(self);
        self.timers.after(delay, move || {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let effects = lock(&shared.downloads).fire_retry(file_id, attempt, Instant::now());
            shared.apply_download_effects(effects);
        });
    }
}
