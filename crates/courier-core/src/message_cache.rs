use std::{
    collections::{HashMap, HashSet},
    sync::RwLock,
};

use tracing::trace;

use crate::{
    sync::{read, write},
    types::{ChatId, Message, MessageId, MessagePatch},
};

/// Messages retained per chat unless configured otherwise.
pub const DEFAULT_MAX_MESSAGES_PER_CHAT: usize = 1_200;

/// Per-chat message store kept sorted ascending by ID with no duplicates.
///
/// One reader-writer lock guards every chat. Mutations take the write lock,
/// readers take the read lock and receive copies. Each chat keeps at most
/// `max_per_chat` messages; the oldest IDs are dropped first.
#[derive(Debug)]
pub struct MessageCache {
    chats: RwLock<HashMap<ChatId, Vec<Message>>>,
    max_per_chat: usize,
}

impl Default for MessageCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES_PER_CHAT)
    }
}

impl MessageCache {
    /// Create a cache retaining at most `max_per_chat` messages per chat (`>= 1`).
    pub fn new(max_per_chat: usize) -> Self {
        Self {
            chats: RwLock::new(HashMap::new()),
            max_per_chat: max_per_chat.max(1),
        }
    }

    pub fn max_per_chat(&self) -> usize {
        self.max_per_chat
    }

    /// Append a live message.
    ///
    /// Falls back to a merge when `msg` does not sort after the current tail,
    /// so a push racing with a history load cannot break ordering. Returns
    /// `false` when the ID was already cached or is older than everything the
    /// cap retains.
    pub fn append(&self, chat_id: ChatId, msg: Message) -> bool {
        let mut chats = write(&self.chats);
        let list = chats.entry(chat_id).or_default();
        let id = msg.id;
        let inserted = match list.last() {
            Some(last) if last.id >= id => !merge_into(list, vec![msg]).is_empty(),
            _ => {
                list.push(msg);
                true
            }
        };
        trim_to_max(list, self.max_per_chat);
        inserted && list.first().is_some_and(|oldest| oldest.id <= id)
    }

    /// Replace a chat's history with a freshly loaded page.
    pub fn replace_all(&self, chat_id: ChatId, mut msgs: Vec<Message>) {
        msgs.sort_by_key(|msg| msg.id);
        msgs.dedup_by_key(|msg| msg.id);
        trim_to_max(&mut msgs, self.max_per_chat);
        trace!(chat_id, count = msgs.len(), "replacing cached history");
        write(&self.chats).insert(chat_id, msgs);
    }

    /// Merge an older history page, skipping IDs already cached.
    ///
    /// Returns the number of inserted messages still retained under the cap.
    /// Applying the same page twice inserts nothing the second time.
    pub fn merge_older(&self, chat_id: ChatId, older: Vec<Message>) -> usize {
        let mut chats = write(&self.chats);
        let list = chats.entry(chat_id).or_default();
        let inserted = merge_into(list, older);
        let trimmed = trim_to_max(list, self.max_per_chat);
        let retained = match list.first() {
            Some(oldest) => inserted.iter().filter(|id| **id >= oldest.id).count(),
            None => 0,
        };
        trace!(
            chat_id,
            inserted = inserted.len(),
            retained,
            trimmed,
            total = list.len(),
            "merged older history"
        );
        retained
    }

    /// Patch a cached message in place and return the updated copy.
    ///
    /// Returns `None` when the message is not loaded locally.
    pub fn patch(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        patch: MessagePatch,
    ) -> Option<Message> {
        let mut chats = write(&self.chats);
        let msg = chats
            .get_mut(&chat_id)?
            .iter_mut()
            .find(|msg| msg.id == message_id)?;
        msg.text = patch.text;
        msg.edited = patch.edited;
        Some(msg.clone())
    }

    /// Copy of a chat's history in ascending ID order.
    pub fn messages(&self, chat_id: ChatId) -> Vec<Message> {
        read(&self.chats).get(&chat_id).cloned().unwrap_or_default()
    }

    pub fn message_ids(&self, chat_id: ChatId) -> Vec<MessageId> {
        read(&self.chats)
            .get(&chat_id)
            .map(|list| list.iter().map(|msg| msg.id).collect())
            .unwrap_or_default()
    }

    pub fn oldest_id(&self, chat_id: ChatId) -> Option<MessageId> {
        read(&self.chats)
            .get(&chat_id)
            .and_then(|list| list.first())
            .map(|msg| msg.id)
    }

    pub fn len(&self, chat_id: ChatId) -> usize {
        read(&self.chats).get(&chat_id).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, chat_id: ChatId) -> bool {
        self.len(chat_id) == 0
    }
}

/// Insert unseen messages, keep the list sorted and return the new IDs.
fn merge_into(list: &mut Vec<Message>, incoming: Vec<Message>) -> Vec<MessageId> {
    let mut seen: HashSet<MessageId> = list.iter().map(|msg| msg.id).collect();
    let before = list.len();
    list.extend(incoming.into_iter().filter(|msg| seen.insert(msg.id)));
    let inserted: Vec<MessageId> = list[before..].iter().map(|msg| msg.id).collect();
    if !inserted.is_empty() {
        list.sort_by_key(|msg| msg.id);
    }
    inserted
}

fn trim_to_max(list: &mut Vec<Message>, max_items: usize) -> usize {
    if list.len() <= max_items {
        return 0;
    }

    let excess = list.len() - max_items;
    list.drain(0..excess);
    excess
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const CHAT: ChatId = -100_200;

    fn msg(id: MessageId, text: &str) -> Message {
        Message {
            id,
            chat_id: CHAT,
            sender_id: 7,
            text: text.to_owned(),
            date: 1_731_000_000 + id,
            is_outgoing: false,
            edited: false,
            media: None,
        }
    }

    fn ids(cache: &MessageCache) -> Vec<MessageId> {
        cache.message_ids(CHAT)
    }

    #[test]
    fn replace_all_sorts_and_dedups() {
        let cache = MessageCache::default();
        cache.replace_all(
            CHAT,
            vec![msg(30, "c"), msg(10, "a"), msg(20, "b"), msg(10, "a")],
        );
        assert_eq!(ids(&cache), vec![10, 20, 30]);
        assert_eq!(cache.oldest_id(CHAT), Some(10));
    }

    #[test]
    fn merge_older_skips_known_ids() {
        let cache = MessageCache::default();
        cache.replace_all(CHAT, vec![msg(40, "d"), msg(50, "e")]);

        let inserted = cache.merge_older(CHAT, vec![msg(10, "a"), msg(40, "dup"), msg(20, "b")]);
        assert_eq!(inserted, 2);
        assert_eq!(ids(&cache), vec![10, 20, 40, 50]);
        assert_eq!(cache.messages(CHAT)[2].text, "d");
    }

    #[test]
    fn append_pushes_newer_messages() {
        let cache = MessageCache::default();
        assert!(cache.append(CHAT, msg(1, "first")));
        assert!(cache.append(CHAT, msg(2, "second")));
        assert_eq!(ids(&cache), vec![1, 2]);
    }

    #[test]
    fn append_out_of_order_keeps_invariant() {
        let cache = MessageCache::default();
        cache.replace_all(CHAT, vec![msg(10, "a"), msg(30, "c")]);

        assert!(cache.append(CHAT, msg(20, "late")));
        assert!(!cache.append(CHAT, msg(30, "again")));
        assert_eq!(ids(&cache), vec![10, 20, 30]);
    }

    #[test]
    fn patch_updates_in_place() {
        let cache = MessageCache::default();
        cache.replace_all(CHAT, vec![msg(1, "old"), msg(2, "other")]);

        let patched = cache
            .patch(
                CHAT,
                1,
                MessagePatch {
                    text: "new".into(),
                    edited: true,
                },
            )
            .expect("message should be cached");
        assert_eq!(patched.text, "new");
        assert!(patched.edited);
        assert_eq!(cache.messages(CHAT)[0], patched);
    }

    #[test]
    fn patch_of_unloaded_message_is_noop() {
        let cache = MessageCache::default();
        cache.replace_all(CHAT, vec![msg(1, "old")]);
        let patch = MessagePatch {
            text: "x".into(),
            edited: true,
        };

        assert!(cache.patch(CHAT, 404, patch.clone()).is_none());
        assert!(cache.patch(999, 1, patch).is_none());
        assert_eq!(cache.messages(CHAT)[0].text, "old");
    }

    #[test]
    fn appends_past_cap_drop_oldest_messages() {
        let cache = MessageCache::new(3);
        for id in 1..=5 {
            assert!(cache.append(CHAT, msg(id, "live")));
        }
        assert_eq!(ids(&cache), vec![3, 4, 5]);

        assert!(!cache.append(CHAT, msg(2, "too old to keep")));
        assert_eq!(ids(&cache), vec![3, 4, 5]);
    }

    #[test]
    fn older_page_beyond_cap_is_not_retained() {
        let cache = MessageCache::new(3);
        cache.replace_all(
            CHAT,
            vec![msg(10, "a"), msg(20, "b"), msg(30, "c"), msg(40, "d")],
        );
        assert_eq!(ids(&cache), vec![20, 30, 40]);

        assert_eq!(cache.merge_older(CHAT, vec![msg(1, "x"), msg(2, "y")]), 0);
        assert_eq!(cache.merge_older(CHAT, vec![msg(25, "gap")]), 1);
        assert_eq!(ids(&cache), vec![25, 30, 40]);
    }

    #[test]
    fn unknown_chat_reads_empty() {
        let cache = MessageCache::default();
        assert!(cache.messages(CHAT).is_empty());
        assert!(cache.is_empty(CHAT));
        assert_eq!(cache.oldest_id(CHAT), None);
    }

    proptest! {
        #[test]
        fn merge_older_is_idempotent_and_sorted(
            initial in proptest::collection::vec(1i64..500, 0..40),
            page in proptest::collection::vec(1i64..500, 0..40),
        ) {
            let once = MessageCache::default();
            once.replace_all(CHAT, initial.iter().map(|id| msg(*id, "x")).collect());
            once.merge_older(CHAT, page.iter().map(|id| msg(*id, "y")).collect());

            let twice = MessageCache::default();
            twice.replace_all(CHAT, initial.iter().map(|id| msg(*id, "x")).collect());
            twice.merge_older(CHAT, page.iter().map(|id| msg(*id, "y")).collect());
            let second = twice.merge_older(CHAT, page.iter().map(|id| msg(*id, "y")).collect());

            prop_assert_eq!(second, 0);
            prop_assert_eq!(once.messages(CHAT), twice.messages(CHAT));

            let merged = ids(&twice);
            prop_assert!(merged.windows(2).all(|pair| pair[0] < pair[1]));
        }
    }
}
