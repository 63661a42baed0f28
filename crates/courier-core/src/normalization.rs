use crate::{
    error::{BackendError, BackendErrorCategory},
    types::{BackendEvent, ChatSummary, ErrorContext, ErrorReport, FileState, Message},
};

/// Split a reply into success payload or backend error.
pub fn reply_into_result(event: BackendEvent) -> Result<BackendEvent, BackendError> {
    match event {
        BackendEvent::Error(error) => Err(error),
        other => Ok(other),
    }
}

/// Error recorded when a reply carries a payload of the wrong kind.
pub fn unexpected_reply(expected: &'static str, event: &BackendEvent) -> BackendError {
    BackendError::new(
        BackendErrorCategory::Internal,
        "unexpected_reply",
        format!("expected {expected}, got {}", event_kind(event)),
    )
}

/// Extract a history page from a `GetChatHistory` reply.
pub fn messages_from_reply(event: BackendEvent) -> Result<Vec<Message>, BackendError> {
    match reply_into_result(event)? {
        BackendEvent::Messages { messages, .. } => Ok(messages),
        other => Err(unexpected_reply("messages", &other)),
    }
}

/// Extract the file snapshot from a `DownloadFile` reply.
pub fn file_state_from_reply(event: BackendEvent) -> Result<FileState, BackendError> {
    match reply_into_result(event)? {
        BackendEvent::File(file) => Ok(file),
        other => Err(unexpected_reply("file", &other)),
    }
}

/// Extract the chat list from a `GetChats` reply.
pub fn chats_from_reply(event: BackendEvent) -> Result<Vec<ChatSummary>, BackendError> {
    match reply_into_result(event)? {
        BackendEvent::Chats { chats } => Ok(chats),
        other => Err(unexpected_reply("chats", &other)),
    }
}

/// Reduce a reply to success or failure, ignoring any payload.
pub fn ack_from_reply(event: BackendEvent) -> Result<(), BackendError> {
    reply_into_result(event).map(|_| ())
}

pub fn error_report(context: ErrorContext, error: BackendError) -> ErrorReport {
    ErrorReport { context, error }
}

/// Stable name of an event variant for logs.
pub fn event_kind(event: &BackendEvent) -> &'static str {
    match event {
        BackendEvent::Ok => "ok",
        BackendEvent::Error(_) => "error",
        BackendEvent::Messages { .. } => "messages",
        BackendEvent::Message(_) => "message",
        BackendEvent::File(_) => "file",
        BackendEvent::Chats { .. } => "chats",
        BackendEvent::AuthStateUpdated { .. } => "auth_state_updated",
        BackendEvent::NewMessage(_) => "new_message",
        BackendEvent::MessageEdited { .. } => "message_edited",
        BackendEvent::ChatUpdated(_) => "chat_updated",
        BackendEvent::UserStatusUpdated(_) => "user_status_updated",
        BackendEvent::FileUpdated(_) => "file_updated",
    }
}
