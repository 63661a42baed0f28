use crate::types::MediaKind;

const MIB: u64 = 1_024 * 1_024;

/// Priority for files in the chat currently open in the UI.
pub const ACTIVE_CHAT_PRIORITY: u8 = 32;
/// Priority for files in background chats.
pub const BACKGROUND_PRIORITY: u8 = 1;

/// Per-kind size ceilings for automatic media fetching.
///
/// `None` means the kind is never fetched automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoDownloadPolicy {
    pub photo_max_bytes: Option<u64>,
    pub sticker_max_bytes: Option<u64>,
    pub animation_max_bytes: Option<u64>,
    pub video_max_bytes: Option<u64>,
    pub voice_note_max_bytes: Option<u64>,
    pub audio_max_bytes: Option<u64>,
    pub document_max_bytes: Option<u64>,
    pub active_chat_priority: u8,
    pub background_priority: u8,
}

impl Default for AutoDownloadPolicy {
    fn default() -> Self {
        Self {
            photo_max_bytes: Some(10 * MIB),
            sticker_max_bytes: Some(2 * MIB),
            animation_max_bytes: Some(10 * MIB),
            video_max_bytes: Some(50 * MIB),
            voice_note_max_bytes: Some(5 * MIB),
            audio_max_bytes: None,
            document_max_bytes: None,
            active_chat_priority: ACTIVE_CHAT_PRIORITY,
            background_priority: BACKGROUND_PRIORITY,
        }
    }
}

impl AutoDownloadPolicy {
    pub fn ceiling(&self, kind: MediaKind) -> Option<u64> {
        match kind {
            MediaKind::Photo => self.photo_max_bytes,
            MediaKind::Sticker => self.sticker_max_bytes,
            MediaKind::Animation => self.animation_max_bytes,
            MediaKind::Video => self.video_max_bytes,
            MediaKind::VoiceNote => self.voice_note_max_bytes,
            MediaKind::Audio => self.audio_max_bytes,
            MediaKind::Document => self.document_max_bytes,
        }
    }

    /// Whether a file of `kind` and `byte_size` should be fetched without user action.
    pub fn should_auto_download(&self, kind: MediaKind, byte_size: u64) -> bool {
        self.ceiling(kind).is_some_and(|max| byte_size <= max)
    }

    /// Download priority for an automatically triggered fetch.
    ///
    /// The chat open in the UI wins over background chats.
    pub fn priority_for(&self, is_active_chat: bool) -> u8 {
        if is_active_chat {
            self.active_chat_priority
        } else {
            self.background_priority
        }
    }
}

/// [`AutoDownloadPolicy::should_auto_download`] with default ceilings.
pub fn should_auto_download(kind: MediaKind, byte_size: u64) -> bool {
    AutoDownloadPolicy::default().should_auto_download(kind, byte_size)
}
