use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// Backend chat identifier. Group chats use negative values.
pub type ChatId = i64;
/// Server-assigned message identifier, strictly increasing within a chat.
pub type MessageId = i64;
/// Backend file identifier. `0` means "no file".
pub type FileId = i32;
/// Backend user identifier.
pub type UserId = i64;
/// Correlation ID attached to outgoing requests.
///
/// `0` is reserved for unsolicited push events.
pub type RequestId = u64;

/// Request ID carried by every push event.
pub const PUSH_EVENT_ID: RequestId = 0;

/// Kind of media attached to a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Photo,
    Sticker,
    /// Looping GIF/MPEG-4 animation.
    Animation,
    Video,
    VoiceNote,
    Audio,
    /// Arbitrary file attachment.
    Document,
}

/// File reference attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaAttachment {
    /// Media category used by the auto-download policy.
    pub kind: MediaKind,
    /// Backend file handle.
    pub file_id: FileId,
    /// Display file name.
    pub file_name: String,
    /// Expected size in bytes (`0` when unknown).
    pub size: u64,
}

/// Canonical message record stored by the message cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Server-assigned ID.
    pub id: MessageId,
    /// Owning chat.
    pub chat_id: ChatId,
    /// Sender user ID.
    pub sender_id: UserId,
    /// Display-ready text (caption for media messages).
    pub text: String,
    /// Send time in seconds since Unix epoch.
    pub date: i64,
    /// Whether the message was sent by the local account.
    pub is_outgoing: bool,
    /// Whether the message has been edited after sending.
    pub edited: bool,
    /// Optional media attachment.
    pub media: Option<MediaAttachment>,
}

/// In-place edit applied to a cached message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePatch {
    /// Replacement text.
    pub text: String,
    /// Replacement edited flag.
    pub edited: bool,
}

/// Lightweight chat metadata for the chat list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatSummary {
    pub chat_id: ChatId,
    pub title: String,
    pub unread_count: u32,
    pub last_message_id: Option<MessageId>,
    /// Backend sort key; higher sorts first.
    pub order: i64,
}

/// Online status of a user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserPresence {
    pub user_id: UserId,
    pub online: bool,
    /// Last-seen time in seconds since Unix epoch, when disclosed.
    pub last_seen: Option<i64>,
}

/// Authorization state reported by the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum AuthState {
    /// Backend has not reported anything yet or needs library parameters.
    #[default]
    WaitParameters,
    WaitPhoneNumber,
    WaitCode,
    WaitPassword,
    /// Session is authorized; requests can be served.
    Ready,
    LoggingOut,
    Closing,
    /// Backend instance is closed and will not emit further events.
    Closed,
}

/// Snapshot of a backend file as reported by acks and push updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FileState {
    pub file_id: FileId,
    /// Bytes available locally.
    pub downloaded_size: u64,
    /// Total size in bytes (`0` when unknown).
    pub total_size: u64,
    /// Local path once any part of the file is on disk.
    pub local_path: Option<PathBuf>,
    /// Backend is actively transferring the file.
    pub is_downloading_active: bool,
    /// File is fully present locally.
    pub is_downloading_completed: bool,
}

/// Request payload accepted by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackendRequest {
    /// Send a text message.
    SendMessage { chat_id: ChatId, text: String },
    /// Upload and send a local file as a document.
    SendFile {
        chat_id: ChatId,
        path: PathBuf,
        caption: String,
    },
    /// Fetch history older than `from_message_id` (`0` = newest page).
    GetChatHistory {
        chat_id: ChatId,
        from_message_id: MessageId,
        limit: u32,
    },
    /// Fetch the main chat list.
    GetChats { limit: u32 },
    /// Mark messages as viewed.
    ViewMessages {
        chat_id: ChatId,
        message_ids: Vec<MessageId>,
    },
    /// Start (or re-prioritize) a file download.
    DownloadFile { file_id: FileId, priority: u8 },
    /// Stop a running download.
    CancelDownloadFile { file_id: FileId },
    /// Close the backend instance.
    Close,
}

/// Body of one item returned by the backend `receive` call.
///
/// Reply variants answer a tracked request; update variants are push events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackendEvent {
    /// Generic success reply.
    Ok,
    /// Error reply.
    Error(BackendError),
    /// Message list reply (history page).
    Messages {
        chat_id: ChatId,
        messages: Vec<Message>,
    },
    /// Single message reply (send acknowledgement).
    Message(Message),
    /// File reply (download acknowledgement).
    File(FileState),
    /// Chat list reply.
    Chats { chats: Vec<ChatSummary> },
    /// Authorization state changed.
    AuthStateUpdated { state: AuthState },
    /// A new message arrived or was sent.
    NewMessage(Message),
    /// Message content was edited.
    MessageEdited {
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
    },
    /// Chat metadata changed.
    ChatUpdated(ChatSummary),
    /// User presence changed.
    UserStatusUpdated(UserPresence),
    /// Download/upload progress or completion for a file.
    FileUpdated(FileState),
}

/// One item returned by the backend `receive` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Incoming {
    /// Correlation ID of the request being answered, or [`PUSH_EVENT_ID`].
    pub request_id: RequestId,
    pub event: BackendEvent,
}

impl Incoming {
    /// Build a reply to a tracked request.
    pub fn reply(request_id: RequestId, event: BackendEvent) -> Self {
        Self { request_id, event }
    }

    /// Build an unsolicited push event.
    pub fn push(event: BackendEvent) -> Self {
        Self {
            request_id: PUSH_EVENT_ID,
            event,
        }
    }

    /// Whether this item is an unsolicited push event.
    pub fn is_push(&self) -> bool {
        self.request_id == PUSH_EVENT_ID
    }
}

/// `StartedDownloads` queue entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartedDownload {
    pub file_id: FileId,
    pub name: String,
    pub total_size: u64,
}

/// `ProgressUpdates` queue entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadProgress {
    pub file_id: FileId,
    pub downloaded_size: u64,
    pub total_size: u64,
}

/// `CompletedDownloads` queue entry; failures are reported with `success == false`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletedDownload {
    pub file_id: FileId,
    pub local_path: Option<PathBuf>,
    pub success: bool,
    pub error: Option<String>,
}

/// Request that produced an [`ErrorReport`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorContext {
    SendMessage { chat_id: ChatId },
    SendFile { chat_id: ChatId },
    LoadMessages { chat_id: ChatId },
    LoadChats,
    MarkRead { chat_id: ChatId },
}

/// `Errors` queue entry for failed non-download requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorReport {
    pub context: ErrorContext,
    pub error: BackendError,
}
