//! UI-facing façade: fire-and-forget commands plus the dirty-flag poll API.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    thread::JoinHandle,
    time::Instant,
};

use courier_core::{
    AuthState, BackendRequest, ChatId, ChatSummary, ClientError, CompletedDownload, DirtyFlags,
    DirtyPublisher, DownloadEntry, DownloadProgress, DownloadState, ErrorContext, ErrorReport,
    FileId, LoopState, Message, MessageId, StartedDownload, UserId, UserPresence, WakeCallback,
    normalization::{ack_from_reply, chats_from_reply, messages_from_reply},
    sync::{lock, read, write},
};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::{backend::Backend, config::ClientConfig, receive_loop, shared::Shared, timers::Timers};

/// Failure to bring up a [`ChatClient`].
#[derive(Debug, Error)]
pub enum StartError {
    #[error("failed to spawn receive loop thread: {0}")]
    SpawnThread(#[from] std::io::Error),
}

/// Coordination layer between a blocking chat backend and a single UI thread.
///
/// Commands never block on the backend. Results surface through drain queues
/// announced by [`DirtyFlags`]; the wake callback fires at most once per
/// batch of changes and the UI answers it by calling
/// [`ChatClient::get_and_clear_dirty_flags`].
pub struct ChatClient {
    shared: Arc<Shared>,
    receive_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ChatClient {
    /// Spawn the receive loop and the download stall sweep.
    ///
    /// Timers run on `runtime`; `wake` must only schedule a UI refresh.
    pub fn start(
        backend: Arc<dyn Backend>,
        config: ClientConfig,
        runtime: Handle,
        wake: WakeCallback,
    ) -> Result<Self, StartError> {
        info!(
            poll_timeout_ms = config.poll_timeout.as_millis() as u64,
            history_page_size = config.history_page_size,
            max_concurrent_downloads = config.downloads.max_concurrent,
            "starting chat client"
        );
        let shared = Arc::new(Shared::new(
            backend,
            config,
            DirtyPublisher::new(wake),
            Timers::new(runtime),
        ));

        let weak = Arc::downgrade(&shared);
        shared.timers.every(config.downloads.sweep_interval, move || {
            if let Some(shared) = weak.upgrade() {
                shared.sweep_downloads();
            }
        });

        let receive_thread = match receive_loop::spawn(Arc::clone(&shared)) {
            Ok(handle) => handle,
            Err(err) => {
                shared.timers.cancel_all();
                return Err(err.into());
            }
        };

        Ok(Self {
            shared,
            receive_thread: Mutex::new(Some(receive_thread)),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn loop_state(&self) -> LoopState {
        self.shared.lifecycle.state()
    }

    // Commands

    pub fn send_message(
        &self,
        chat_id: ChatId,
        text: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.ensure_running()?;
        let text = text.into();
        if chat_id == 0 {
            return Err(ClientError::InvalidInput("chat id must be non-zero"));
        }
        if text.trim().is_empty() {
            return Err(ClientError::InvalidInput("message text must not be empty"));
        }

        debug!(chat_id, len = text.len(), "sending message");
        self.shared.send_tracked(
            send_message_request(chat_id, text),
            move |shared, event| {
                if let Err(error) = ack_from_reply(event) {
                    shared.report_error(ErrorContext::SendMessage { chat_id }, error);
                }
            },
        );
        Ok(())
    }

    pub fn send_file(
        &self,
        chat_id: ChatId,
        path: impl Into<PathBuf>,
        caption: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.ensure_running()?;
        let path = path.into();
        if chat_id == 0 {
            return Err(ClientError::InvalidInput("chat id must be non-zero"));
        }
        if path.as_os_str().is_empty() {
            return Err(ClientError::InvalidInput("file path must not be empty"));
        }

        debug!(chat_id, path = %path.display(), "sending file");
        self.shared.send_tracked(
            BackendRequest::SendFile {
                chat_id,
                path,
                caption: caption.into(),
            },
            move |shared, event| {
                if let Err(error) = ack_from_reply(event) {
                    shared.report_error(ErrorContext::SendFile { chat_id }, error);
                }
            },
        );
        Ok(())
    }

    /// Fetch the newest history page and replace the cached conversation.
    pub fn load_messages(&self, chat_id: ChatId) -> Result<(), ClientError> {
        self.ensure_running()?;
        if chat_id == 0 {
            return Err(ClientError::InvalidInput("chat id must be non-zero"));
        }

        debug!(chat_id, "loading newest history page");
        self.shared.send_tracked(
            history_request(chat_id, 0, self.shared.config.history_page_size),
            move |shared, event| match messages_from_reply(event) {
                Ok(messages) => {
                    shared.cache.replace_all(chat_id, messages);
                    shared.dirty.set_dirty(DirtyFlags::MESSAGES);
                }
                Err(error) => shared.report_error(ErrorContext::LoadMessages { chat_id }, error),
            },
        );
        Ok(())
    }

    /// Fetch the page before the oldest cached message and merge it in.
    pub fn load_more_messages(&self, chat_id: ChatId) -> Result<(), ClientError> {
        self.ensure_running()?;
        if chat_id == 0 {
            return Err(ClientError::InvalidInput("chat id must be non-zero"));
        }

        let from_message_id = self.shared.cache.oldest_id(chat_id).unwrap_or(0);
        let page_size = self.shared.config.history_page_size;
        debug!(chat_id, from_message_id, "loading older history page");
        self.shared.send_tracked(
            history_request(chat_id, from_message_id, page_size),
            move |shared, event| match messages_from_reply(event) {
                Ok(older) => {
                    let inserted = shared.cache.merge_older(chat_id, older);
                    if inserted > 0 {
                        shared.dirty.set_dirty(DirtyFlags::MESSAGES);
                    }
                }
                Err(error) => shared.report_error(ErrorContext::LoadMessages { chat_id }, error),
            },
        );
        Ok(())
    }

    /// Request a file download; duplicates and over-capacity requests are dropped.
    pub fn download_file(
        &self,
        file_id: FileId,
        priority: u8,
        name: impl Into<String>,
        size: u64,
    ) -> Result<(), ClientError> {
        self.ensure_running()?;
        let effects = lock(&self.shared.downloads).request_download(
            file_id,
            priority,
            name,
            size,
            Instant::now(),
        );
        self.shared.apply_download_effects(effects);
        Ok(())
    }

    pub fn cancel_download(&self, file_id: FileId) -> Result<(), ClientError> {
        self.ensure_running()?;
        let effects = lock(&self.shared.downloads).cancel_download(file_id);
        self.shared.apply_download_effects(effects);
        Ok(())
    }

    /// Schedule a backoff retry for a failed download with budget left.
    pub fn retry_download(&self, file_id: FileId) -> Result<(), ClientError> {
        self.ensure_running()?;
        let effects = lock(&self.shared.downloads).retry_download(file_id);
        self.shared.apply_download_effects(effects);
        Ok(())
    }

    /// Mark every cached message of `chat_id` as viewed and clear its unread badge.
    pub fn mark_chat_as_read(&self, chat_id: ChatId) -> Result<(), ClientError> {
        self.ensure_running()?;
        if chat_id == 0 {
            return Err(ClientError::InvalidInput("chat id must be non-zero"));
        }

        let message_ids = self.shared.cache.message_ids(chat_id);
        let had_unread = write(&self.shared.chats)
            .get_mut(&chat_id)
            .map(|chat| std::mem::replace(&mut chat.unread_count, 0) > 0)
            .unwrap_or(false);
        if had_unread {
            self.shared.dirty.set_dirty(DirtyFlags::CHAT_LIST);
        }
        if message_ids.is_empty() {
            debug!(chat_id, "nothing loaded to mark as read");
            return Ok(());
        }

        self.shared.send_tracked(
            view_messages_request(chat_id, message_ids),
            move |shared, event| {
                if let Err(error) = ack_from_reply(event) {
                    shared.report_error(ErrorContext::MarkRead { chat_id }, error);
                }
            },
        );
        Ok(())
    }

    /// Chat whose media is auto-downloaded at the higher priority.
    pub fn set_active_chat(&self, chat_id: Option<ChatId>) -> Result<(), ClientError> {
        self.ensure_running()?;
        debug!(?chat_id, "active chat changed");
        *write(&self.shared.active_chat) = chat_id;
        Ok(())
    }

    /// Fetch the chat list and merge it into the directory.
    pub fn request_chats(&self, limit: u32) -> Result<(), ClientError> {
        self.ensure_running()?;
        if limit == 0 {
            return Err(ClientError::InvalidInput("chat limit must be non-zero"));
        }

        self.shared.send_tracked(
            BackendRequest::GetChats { limit },
            move |shared, event| match chats_from_reply(event) {
                Ok(chats) => {
                    let mut directory = write(&shared.chats);
                    for chat in chats {
                        directory.insert(chat.chat_id, chat);
                    }
                    drop(directory);
                    shared.dirty.set_dirty(DirtyFlags::CHAT_LIST);
                }
                Err(error) => shared.report_error(ErrorContext::LoadChats, error),
            },
        );
        Ok(())
    }

    /// Close the backend, join the receive loop and drop pending work.
    ///
    /// Idempotent; also runs on drop. Must not be called from a reply handler.
    pub fn stop(&self) {
        if self.shared.lifecycle.begin_stop().is_err() {
            return;
        }
        info!("stopping chat client");
        self.shared.send_untracked(BackendRequest::Close);

        if let Some(handle) = lock(&self.receive_thread).take()
            && handle.join().is_err()
        {
            error!("receive loop thread panicked");
        }

        self.shared.timers.cancel_all();
        let dropped = self.shared.correlation.clear();
        if dropped > 0 {
            debug!(dropped, "dropped pending reply handlers");
        }
        if let Err(err) = self.shared.lifecycle.finish_stop() {
            warn!(error = %err, "unexpected lifecycle state after join");
        }
        info!("chat client stopped");
    }

    // Poll API

    /// Take every flag raised since the previous call and re-arm the wake-up.
    pub fn get_and_clear_dirty_flags(&self) -> DirtyFlags {
        self.shared.dirty.get_and_clear_dirty_flags()
    }

    pub fn get_new_messages(&self, chat_id: ChatId) -> Vec<Message> {
        self.shared.new_messages.drain(&chat_id)
    }

    pub fn get_updated_messages(&self, chat_id: ChatId) -> Vec<Message> {
        self.shared.updated_messages.drain(&chat_id)
    }

    pub fn get_completed_downloads(&self) -> Vec<CompletedDownload> {
        self.shared.completed_downloads.drain()
    }

    pub fn get_started_downloads(&self) -> Vec<StartedDownload> {
        self.shared.started_downloads.drain()
    }

    pub fn get_progress_updates(&self) -> Vec<DownloadProgress> {
        self.shared.progress_updates.drain()
    }

    pub fn get_errors(&self) -> Vec<ErrorReport> {
        self.shared.errors.drain()
    }

    /// Cached conversation in ascending ID order.
    pub fn messages(&self, chat_id: ChatId) -> Vec<Message> {
        self.shared.cache.messages(chat_id)
    }

    pub fn message_ids(&self, chat_id: ChatId) -> Vec<MessageId> {
        self.shared.cache.message_ids(chat_id)
    }

    /// Known chats, highest `order` first.
    pub fn chats(&self) -> Vec<ChatSummary> {
        let mut chats: Vec<ChatSummary> = read(&self.shared.chats).values().cloned().collect();
        chats.sort_by(|a, b| b.order.cmp(&a.order).then(a.chat_id.cmp(&b.chat_id)));
        chats
    }

    pub fn user_status(&self, user_id: UserId) -> Option<UserPresence> {
        read(&self.shared.presence).get(&user_id).cloned()
    }

    pub fn auth_state(&self) -> AuthState {
        *read(&self.shared.auth)
    }

    pub fn download_state(&self, file_id: FileId) -> Option<DownloadState> {
        lock(&self.shared.downloads).state(file_id)
    }

    pub fn download_entry(&self, file_id: FileId) -> Option<DownloadEntry> {
        lock(&self.shared.downloads).entry(file_id)
    }

    fn ensure_running(&self) -> Result<(), ClientError> {
        if self.shared.lifecycle.is_running() {
            Ok(())
        } else {
            Err(ClientError::Stopped)
        }
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.stop();
    }
}

fn send_message_request(chat_id: ChatId, text: String) -> BackendRequest {
    BackendRequest::SendMessage { chat_id, text }
}

fn history_request(chat_id: ChatId, from_message_id: MessageId, limit: u32) -> BackendRequest {
    BackendRequest::GetChatHistory {
        chat_id,
        from_message_id,
        limit,
    }
}

fn view_messages_request(chat_id: ChatId, message_ids: Vec<MessageId>) -> BackendRequest {
    BackendRequest::ViewMessages {
        chat_id,
        message_ids,
    }
}
