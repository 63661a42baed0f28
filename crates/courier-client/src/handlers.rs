//! Push-event handlers run on the receive loop thread.
//!
//! Each handler updates its store under that store's lock, queues the change
//! for the UI and raises the matching dirty flag.

use std::{sync::Arc, time::Instant};

use courier_core::{
    AuthState, BackendEvent, ChatId, ChatSummary, DirtyFlags, FileState, Message, MessageId,
    MessagePatch, UserPresence,
    normalization::event_kind,
    sync::{lock, write},
};
use tracing::{debug, info, trace};

use crate::shared::Shared;

pub(crate) fn handle_push(shared: &Arc<Shared>, event: BackendEvent) {
    trace!(event = event_kind(&event), "dispatching push event");
    match event {
        BackendEvent::AuthStateUpdated { state } => on_auth_state(shared, state),
        BackendEvent::NewMessage(message) => on_new_message(shared, message),
        BackendEvent::MessageEdited {
            chat_id,
            message_id,
            text,
        } => on_message_edited(shared, chat_id, message_id, text),
        BackendEvent::ChatUpdated(chat) => on_chat_updated(shared, chat),
        BackendEvent::UserStatusUpdated(presence) => on_user_status(shared, presence),
        BackendEvent::FileUpdated(file) => on_file_updated(shared, file),
        other => debug!(
            event = event_kind(&other),
            "ignoring reply-only event pushed without request"
        ),
    }
}

fn on_auth_state(shared: &Shared, state: AuthState) {
    let previous = std::mem::replace(&mut *write(&shared.auth), state);
    if previous != state {
        info!(?previous, ?state, "auth state changed");
    }
    shared.dirty.set_dirty(DirtyFlags::AUTH);
}

fn on_new_message(shared: &Arc<Shared>, message: Message) {
    let chat_id = message.chat_id;
    let media = message.media.clone();
    if !shared.cache.append(chat_id, message.clone()) {
        trace!(chat_id, message_id = message.id, "duplicate live message");
        return;
    }

    if let Some(chat) = write(&shared.chats).get_mut(&chat_id) {
        chat.last_message_id = Some(message.id);
    }
    if shared.new_messages.push(chat_id, message) {
        trace!(chat_id, "new message queue full; dropped oldest");
    }
    shared.dirty.set_dirty(DirtyFlags::MESSAGES);

    let Some(media) = media else {
        return;
    };
    let policy = shared.config.auto_download;
    if !policy.should_auto_download(media.kind, media.size) {
        trace!(
            file_id = media.file_id,
            kind = ?media.kind,
            size = media.size,
            "auto-download skipped"
        );
        return;
    }
    let priority = policy.priority_for(shared.is_active_chat(chat_id));
    let effects = lock(&shared.downloads).request_download(
        media.file_id,
        priority,
        media.file_name,
        media.size,
        Instant::now(),
    );
    shared.apply_download_effects(effects);
}

fn on_message_edited(shared: &Shared, chat_id: ChatId, message_id: MessageId, text: String) {
    let patch = MessagePatch { text, edited: true };
    let Some(updated) = shared.cache.patch(chat_id, message_id, patch) else {
        trace!(chat_id, message_id, "edit for message not loaded locally");
        return;
    };
    if shared.updated_messages.push(chat_id, updated) {
        trace!(chat_id, "updated message queue full; dropped oldest");
    }
    shared.dirty.set_dirty(DirtyFlags::MESSAGES);
}

fn on_chat_updated(shared: &Shared, chat: ChatSummary) {
    write(&shared.chats).insert(chat.chat_id, chat);
    shared.dirty.set_dirty(DirtyFlags::CHAT_LIST);
}

fn on_user_status(shared: &Shared, presence: UserPresence) {
    write(&shared.presence).insert(presence.user_id, presence);
    shared.dirty.set_dirty(DirtyFlags::PRESENCE);
}

fn on_file_updated(shared: &Arc<Shared>, file: FileState) {
    let effects = lock(&shared.downloads).on_file_update(file, Instant::now());
    shared.apply_download_effects(effects);
}
