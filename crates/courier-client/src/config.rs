use std::time::Duration;

use courier_core::{AutoDownloadPolicy, DEFAULT_MAX_MESSAGES_PER_CHAT, DownloadConfig};

/// Runtime tuning for [`crate::ChatClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Upper bound on one backend `receive` call; also bounds shutdown latency.
    pub poll_timeout: Duration,
    /// Messages requested per history page.
    pub history_page_size: u32,
    /// Retention cap for each chat's cached history and undrained UI queues.
    pub max_messages_per_chat: usize,
    pub downloads: DownloadConfig,
    pub auto_download: AutoDownloadPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            history_page_size: 50,
            max_messages_per_chat: DEFAULT_MAX_MESSAGES_PER_CHAT,
            downloads: DownloadConfig::default(),
            auto_download: AutoDownloadPolicy::default(),
        }
    }
}
