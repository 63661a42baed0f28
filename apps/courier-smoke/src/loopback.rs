//! In-process backend that answers requests from a seeded chat directory.

use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    sync::{Condvar, Mutex},
    time::Duration,
};

use courier_client::{Backend, request_kind};
use courier_core::{
    AuthState, BackendError, BackendEvent, BackendRequest, ChatId, ChatSummary, FileId, FileState,
    Incoming, MediaAttachment, MediaKind, Message, MessageId, RequestId, UserPresence,
    sync::lock,
};
use tracing::{debug, trace};

pub const MAIN_CHAT: ChatId = -1_001;
pub const SIDE_CHAT: ChatId = 42;
/// File whose first download attempt is rejected as a transient failure.
pub const FLAKY_FILE: FileId = 9_001;
pub const FLAKY_FILE_SIZE: u64 = 64 * 1_024;

const SELF_USER: i64 = 1;
const PEER_USER: i64 = 2;
const PROGRESS_CHUNKS: u64 = 4;

#[derive(Default)]
struct World {
    history: HashMap<ChatId, Vec<Message>>,
    chats: HashMap<ChatId, ChatSummary>,
    files: HashMap<FileId, u64>,
    download_attempts: HashMap<FileId, u32>,
    next_message_id: MessageId,
    next_file_id: FileId,
}

impl World {
    fn post(
        &mut self,
        chat_id: ChatId,
        sender_id: i64,
        text: String,
        media: Option<MediaAttachment>,
    ) -> Message {
        self.next_message_id += 1;
        let message = Message {
            id: self.next_message_id,
            chat_id,
            sender_id,
            text,
            date: 1_731_000_000 + self.next_message_id,
            is_outgoing: sender_id == SELF_USER,
            edited: false,
            media,
        };
        self.history
            .entry(chat_id)
            .or_default()
            .push(message.clone());
        if let Some(chat) = self.chats.get_mut(&chat_id) {
            chat.last_message_id = Some(message.id);
            if sender_id != SELF_USER {
                chat.unread_count += 1;
            }
        }
        message
    }

    fn attach(&mut self, kind: MediaKind, file_name: &str, size: u64) -> MediaAttachment {
        self.next_file_id += 1;
        self.files.insert(self.next_file_id, size);
        MediaAttachment {
            kind,
            file_id: self.next_file_id,
            file_name: file_name.to_owned(),
            size,
        }
    }

    fn page(&self, chat_id: ChatId, from_message_id: MessageId, limit: u32) -> Vec<Message> {
        let Some(history) = self.history.get(&chat_id) else {
            return Vec::new();
        };
        let older: Vec<&Message> = history
            .iter()
            .filter(|msg| from_message_id == 0 || msg.id < from_message_id)
            .collect();
        let skip = older.len().saturating_sub(limit as usize);
        older.into_iter().skip(skip).cloned().collect()
    }
}

/// Loopback implementation of [`Backend`].
///
/// Replies and the push events they cause are queued synchronously inside
/// `send`, so the receive loop sees them in causal order.
pub struct LoopbackBackend {
    world: Mutex<World>,
    inbox: Mutex<VecDeque<Incoming>>,
    ready: Condvar,
}

impl LoopbackBackend {
    /// Build a backend with two chats and `seed_messages` history entries in the main chat.
    pub fn seeded(seed_messages: usize) -> Self {
        let mut world = World {
            next_file_id: 100,
            ..World::default()
        };
        world.files.insert(FLAKY_FILE, FLAKY_FILE_SIZE);
        for (chat_id, title, order) in [(MAIN_CHAT, "Release crew", 20), (SIDE_CHAT, "Alice", 10)] {
            world.chats.insert(
                chat_id,
                ChatSummary {
                    chat_id,
                    title: title.to_owned(),
                    unread_count: 0,
                    last_message_id: None,
                    order,
                },
            );
        }
        for index in 0..seed_messages {
            world.post(MAIN_CHAT, PEER_USER, format!("history #{index}"), None);
        }

        let backend = Self {
            world: Mutex::new(world),
            inbox: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        };
        backend.push(BackendEvent::AuthStateUpdated {
            state: AuthState::WaitPhoneNumber,
        });
        backend.push(BackendEvent::AuthStateUpdated {
            state: AuthState::Ready,
        });
        backend.push(BackendEvent::UserStatusUpdated(UserPresence {
            user_id: PEER_USER,
            online: true,
            last_seen: None,
        }));
        backend
    }

    /// Simulate the peer posting a message, optionally with media.
    pub fn incoming_message(
        &self,
        chat_id: ChatId,
        text: &str,
        media: Option<(MediaKind, &str, u64)>,
    ) {
        let (message, chat) = {
            let mut world = lock(&self.world);
            let media = media.map(|(kind, name, size)| world.attach(kind, name, size));
            let message = world.post(chat_id, PEER_USER, text.to_owned(), media);
            (message, world.chats.get(&chat_id).cloned())
        };
        self.push(BackendEvent::NewMessage(message));
        if let Some(chat) = chat {
            self.push(BackendEvent::ChatUpdated(chat));
        }
    }

    /// Simulate the peer editing one of their messages.
    pub fn edit_message(&self, chat_id: ChatId, message_id: MessageId, text: &str) {
        let edited = {
            let mut world = lock(&self.world);
            world
                .history
                .get_mut(&chat_id)
                .and_then(|msgs| msgs.iter_mut().find(|msg| msg.id == message_id))
                .map(|msg| {
                    msg.text = text.to_owned();
                    msg.edited = true;
                })
                .is_some()
        };
        if edited {
            self.push(BackendEvent::MessageEdited {
                chat_id,
                message_id,
                text: text.to_owned(),
            });
        }
    }

    pub fn newest_message_id(&self, chat_id: ChatId) -> Option<MessageId> {
        lock(&self.world)
            .history
            .get(&chat_id)
            .and_then(|history| history.last())
            .map(|msg| msg.id)
    }

    fn push(&self, event: BackendEvent) {
        self.deliver(Incoming::push(event));
    }

    fn deliver(&self, incoming: Incoming) {
        lock(&self.inbox).push_back(incoming);
        self.ready.notify_one();
    }

    fn reply(&self, request_id: RequestId, event: BackendEvent) {
        self.deliver(Incoming::reply(request_id, event));
    }

    fn download(&self, request_id: RequestId, file_id: FileId) {
        let (size, attempt) = {
            let mut world = lock(&self.world);
            let size = world.files.get(&file_id).copied();
            let attempt = world.download_attempts.entry(file_id).or_insert(0);
            *attempt += 1;
            (size, *attempt)
        };
        let Some(size) = size else {
            self.reply(
                request_id,
                BackendEvent::Error(BackendError::from_status(400, "FILE_ID_INVALID")),
            );
            return;
        };
        if file_id == FLAKY_FILE && attempt == 1 {
            debug!(file_id, "loopback rejecting first download attempt");
            let error = BackendError::from_status(503, "FILE_TEMPORARILY_UNAVAILABLE");
            self.reply(request_id, BackendEvent::Error(error));
            return;
        }

        self.reply(request_id, BackendEvent::File(file_state(file_id, 0, size)));
        let chunk = (size / PROGRESS_CHUNKS).max(1);
        let mut downloaded = 0;
        while downloaded + chunk < size {
            downloaded += chunk;
            let progress = file_state(file_id, downloaded, size);
            self.push(BackendEvent::FileUpdated(progress));
        }
        self.push(BackendEvent::FileUpdated(file_state(file_id, size, size)));
    }
}

impl Backend for LoopbackBackend {
    fn send(&self, request_id: RequestId, request: BackendRequest) {
        trace!(
            request_id,
            request = request_kind(&request),
            "loopback request"
        );
        match request {
            BackendRequest::SendMessage { chat_id, text } => {
                let message = lock(&self.world).post(chat_id, SELF_USER, text, None);
                self.reply(request_id, BackendEvent::Message(message.clone()));
                self.push(BackendEvent::NewMessage(message));
            }
            BackendRequest::SendFile {
                chat_id,
                path,
                caption,
            } => {
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "upload.bin".to_owned());
                let message = {
                    let mut world = lock(&self.world);
                    let media = world.attach(MediaKind::Document, &name, 4_096);
                    world.post(chat_id, SELF_USER, caption, Some(media))
                };
                self.reply(request_id, BackendEvent::Message(message.clone()));
                self.push(BackendEvent::NewMessage(message));
            }
            BackendRequest::GetChatHistory {
                chat_id,
                from_message_id,
                limit,
            } => {
                let messages = lock(&self.world).page(chat_id, from_message_id, limit);
                self.reply(request_id, BackendEvent::Messages { chat_id, messages });
            }
            BackendRequest::GetChats { limit } => {
                let mut chats: Vec<ChatSummary> =
                    lock(&self.world).chats.values().cloned().collect();
                chats.sort_by(|a, b| b.order.cmp(&a.order));
                chats.truncate(limit as usize);
                self.reply(request_id, BackendEvent::Chats { chats });
            }
            BackendRequest::ViewMessages { chat_id, .. } => {
                let chat = {
                    let mut world = lock(&self.world);
                    world.chats.get_mut(&chat_id).map(|chat| {
                        chat.unread_count = 0;
                        chat.clone()
                    })
                };
                self.reply(request_id, BackendEvent::Ok);
                if let Some(chat) = chat {
                    self.push(BackendEvent::ChatUpdated(chat));
                }
            }
            BackendRequest::DownloadFile { file_id, .. } => self.download(request_id, file_id),
            BackendRequest::CancelDownloadFile { .. } => self.reply(request_id, BackendEvent::Ok),
            BackendRequest::Close => {
                self.push(BackendEvent::AuthStateUpdated {
                    state: AuthState::Closing,
                });
                self.push(BackendEvent::AuthStateUpdated {
                    state: AuthState::Closed,
                });
            }
        }
    }

    fn receive(&self, timeout: Duration) -> Option<Incoming> {
        let inbox = lock(&self.inbox);
        let (mut inbox, _) = self
            .ready
            .wait_timeout_while(inbox, timeout, |queue| queue.is_empty())
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inbox.pop_front()
    }
}

fn file_state(file_id: FileId, downloaded: u64, total: u64) -> FileState {
    let complete = downloaded >= total;
    FileState {
        file_id,
        downloaded_size: downloaded,
        total_size: total,
        local_path: complete.then(|| PathBuf::from(format!("/tmp/courier-smoke/{file_id}"))),
        is_downloading_active: !complete,
        is_downloading_completed: complete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(backend: &LoopbackBackend) -> Vec<Incoming> {
        std::iter::from_fn(|| backend.receive(Duration::ZERO)).collect()
    }

    fn download_request(file_id: FileId) -> BackendRequest {
        BackendRequest::DownloadFile {
            file_id,
            priority: 5,
        }
    }

    #[test]
    fn seeded_backend_announces_ready_session() {
        let backend = LoopbackBackend::seeded(3);
        let events = drain(&backend);
        assert!(events.iter().all(Incoming::is_push));
        let ready = Incoming::push(BackendEvent::AuthStateUpdated {
            state: AuthState::Ready,
        });
        assert!(events.contains(&ready));
        assert_eq!(backend.newest_message_id(MAIN_CHAT), Some(3));
    }

    #[test]
    fn history_pages_walk_backwards() {
        let backend = LoopbackBackend::seeded(5);
        drain(&backend);

        backend.send(
            7,
            BackendRequest::GetChatHistory {
                chat_id: MAIN_CHAT,
                from_message_id: 4,
                limit: 2,
            },
        );
        let events = drain(&backend);
        let Some(Incoming {
            request_id: 7,
            event: BackendEvent::Messages { messages, .. },
        }) = events.into_iter().next()
        else {
            panic!("expected history reply");
        };
        let ids: Vec<MessageId> = messages.iter().map(|msg| msg.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn flaky_file_fails_once_then_streams_progress() {
        let backend = LoopbackBackend::seeded(0);
        drain(&backend);

        backend.send(1, download_request(FLAKY_FILE));
        let first = drain(&backend);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].request_id, 1);
        assert!(matches!(first[0].event, BackendEvent::Error(_)));

        backend.send(2, download_request(FLAKY_FILE));
        let second = drain(&backend);
        assert_eq!(second[0].request_id, 2);
        assert!(matches!(second[0].event, BackendEvent::File(_)));
        let last = second.last().map(|incoming| &incoming.event);
        assert!(matches!(
            last,
            Some(BackendEvent::FileUpdated(file)) if file.is_downloading_completed
        ));
    }

    #[test]
    fn unknown_file_is_rejected() {
        let backend = LoopbackBackend::seeded(0);
        drain(&backend);
        backend.send(3, download_request(5));
        let events = drain(&backend);
        assert!(matches!(
            events.as_slice(),
            [Incoming { event: BackendEvent::Error(BackendError { code, .. }), .. }]
                if code == "backend_status_400"
        ));
    }
}
