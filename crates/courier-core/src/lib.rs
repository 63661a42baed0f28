//! Protocol types and thread-safe coordination primitives for the Courier
//! chat client.
//!
//! Nothing in this crate spawns threads or timers. The client crate wires
//! these pieces to the backend receive loop and the UI poll API.

/// Auto-download size ceilings and priorities.
pub mod auto_download;
/// Request ID to one-shot reply handler map.
pub mod correlation;
/// Coalescing change-flag publisher for UI wake-ups.
pub mod dirty;
/// File download state machine.
pub mod downloads;
/// Stable backend error types and status classification.
pub mod error;
/// Receive loop lifecycle state machine.
pub mod lifecycle;
/// Per-chat ordered message store.
pub mod message_cache;
/// Reply payload extraction helpers.
pub mod normalization;
/// Swap-out buffers drained by the UI thread.
pub mod queue;
/// Backoff policy used by retry timers.
pub mod retry;
/// Poison-tolerant lock helpers.
pub mod sync;
/// Backend protocol and UI queue entry types.
pub mod types;

pub use auto_download::{
    ACTIVE_CHAT_PRIORITY, AutoDownloadPolicy, BACKGROUND_PRIORITY, should_auto_download,
};
pub use correlation::{CorrelationTable, ReplyHandler};
pub use dirty::{DirtyFlags, DirtyPublisher, WakeCallback};
pub use downloads::{DownloadConfig, DownloadEffect, DownloadEntry, DownloadManager, DownloadState};
pub use error::{BackendError, BackendErrorCategory, ClientError, classify_status};
pub use lifecycle::{LifecycleError, LoopLifecycle, LoopState};
pub use message_cache::{DEFAULT_MAX_MESSAGES_PER_CHAT, MessageCache};
pub use normalization::{error_report, event_kind, reply_into_result};
pub use queue::{DrainQueue, KeyedDrainQueue};
pub use retry::RetryPolicy;
pub use types::{
    AuthState, BackendEvent, BackendRequest, ChatId, ChatSummary, CompletedDownload,
    DownloadProgress, ErrorContext, ErrorReport, FileId, FileState, Incoming, MediaAttachment,
    MediaKind, Message, MessageId, MessagePatch, PUSH_EVENT_ID, RequestId, StartedDownload,
    UserId, UserPresence,
};
