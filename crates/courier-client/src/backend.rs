use std::time::Duration;

use courier_core::{BackendRequest, Incoming, RequestId};

/// External messaging backend driven by the client.
///
/// `send` is called from the UI thread and from timer tasks; `receive` is
/// only ever called from the receive loop thread.
pub trait Backend: Send + Sync + 'static {
    /// Enqueue `request` tagged with `request_id`. Must not block.
    fn send(&self, request_id: RequestId, request: BackendRequest);

    /// Wait up to `timeout` for the next reply or push event.
    fn receive(&self, timeout: Duration) -> Option<Incoming>;
}

/// Stable name of a request variant for logs.
pub fn request_kind(request: &BackendRequest) -> &'static str {
    match request {
        BackendRequest::SendMessage { .. } => "send_message",
        BackendRequest::SendFile { .. } => "send_file",
        BackendRequest::GetChatHistory { .. } => "get_chat_history",
        BackendRequest::GetChats { .. } => "get_chats",
        BackendRequest::ViewMessages { .. } => "view_messages",
        BackendRequest::DownloadFile { .. } => "download_file",
        BackendRequest::CancelDownloadFile { .. } => "cancel_download_file",
        BackendRequest::Close => "close",
    }
}
