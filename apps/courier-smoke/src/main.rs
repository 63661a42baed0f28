//! Headless smoke driver: runs the client core against the loopback backend
//! with a UI-style refresh loop and prints a JSON summary on stdout.

mod config;
mod logging;
mod loopback;

use std::{sync::Arc, time::Duration};

use courier_client::{Backend, ChatClient};
use courier_core::{AuthState, ChatId, ChatSummary, ClientError, DirtyFlags, MediaKind};
use serde::Serialize;
use tokio::{runtime::Handle, sync::mpsc};
use tracing::{debug, error, info, warn};

use crate::{
    config::SmokeConfig,
    loopback::{FLAKY_FILE, FLAKY_FILE_SIZE, LoopbackBackend, MAIN_CHAT, SIDE_CHAT},
};

const STEP_PAUSE: Duration = Duration::from_millis(100);
const WATCHED_CHATS: [ChatId; 2] = [MAIN_CHAT, SIDE_CHAT];
const MIB: u64 = 1_024 * 1_024;

/// What the UI side observed while draining the client.
#[derive(Debug, Default, Serialize)]
struct SmokeSummary {
    auth_state: AuthState,
    refresh_ticks: usize,
    flags_seen: DirtyFlags,
    chats: Vec<String>,
    cached_messages: usize,
    new_messages: usize,
    edited_messages: usize,
    downloads_started: usize,
    progress_updates: usize,
    downloads_completed: usize,
    downloads_failed: usize,
    errors: Vec<String>,
    flaky_download: Option<String>,
}

#[tokio::main]
async fn main() {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(2);
        }
    };
    info!(
        seed_messages = config.seed_messages,
        idle_exit_ms = config.idle_exit.as_millis() as u64,
        "starting courier smoke run"
    );

    let backend = Arc::new(LoopbackBackend::seeded(config.seed_messages));
    let (wake_tx, mut wake_rx) = mpsc::unbounded_channel::<()>();
    let client = match ChatClient::start(
        Arc::clone(&backend) as Arc<dyn Backend>,
        config.client,
        Handle::current(),
        Arc::new(move || {
            let _ = wake_tx.send(());
        }),
    ) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("Failed to start client: {err}");
            std::process::exit(1);
        }
    };

    let (script, mut summary) = tokio::join!(
        run_script(&client, &backend),
        ui_loop(&client, &mut wake_rx, config.idle_exit),
    );
    if let Err(err) = &script {
        error!(error = %err, "smoke script aborted");
    }

    client.stop();
    summary.auth_state = client.auth_state();
    summary.cached_messages = WATCHED_CHATS
        .iter()
        .map(|chat_id| client.messages(*chat_id).len())
        .sum();
    summary.flaky_download = client
        .download_state(FLAKY_FILE)
        .map(|state| format!("{state:?}"));

    match serde_json::to_string_pretty(&summary) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            eprintln!("Failed to encode summary: {err}");
            std::process::exit(1);
        }
    }
    if script.is_err() {
        std::process::exit(1);
    }
}

/// Issue the commands a user session would, pausing between phases.
async fn run_script(client: &ChatClient, backend: &LoopbackBackend) -> Result<(), ClientError> {
    client.request_chats(20)?;
    client.set_active_chat(Some(MAIN_CHAT))?;
    client.load_messages(MAIN_CHAT)?;
    tokio::time::sleep(STEP_PAUSE).await;

    client.load_more_messages(MAIN_CHAT)?;
    client.send_message(MAIN_CHAT, "smoke check")?;
    client.send_file(MAIN_CHAT, "/tmp/nightly-report.pdf", "nightly report")?;
    backend.incoming_message(
        MAIN_CHAT,
        "photo from the field",
        Some((MediaKind::Photo, "field.jpg", MIB / 2)),
    );
    backend.incoming_message(
        SIDE_CHAT,
        "wave",
        Some((MediaKind::Sticker, "wave.webp", 40 * 1_024)),
    );
    backend.incoming_message(
        SIDE_CHAT,
        "raw footage",
        Some((MediaKind::Video, "raw.mov", 400 * MIB)),
    );
    tokio::time::sleep(STEP_PAUSE).await;

    if let Some(message_id) = backend.newest_message_id(MAIN_CHAT) {
        backend.edit_message(MAIN_CHAT, message_id, "photo from the field (cropped)");
    }
    client.download_file(FLAKY_FILE, 8, "flaky.bin", FLAKY_FILE_SIZE)?;
    match client.send_message(MAIN_CHAT, "   ") {
        Err(ClientError::InvalidInput(reason)) => debug!(reason, "blank message rejected locally"),
        other => warn!(?other, "blank message was not rejected"),
    }
    client.mark_chat_as_read(MAIN_CHAT)?;
    Ok(())
}

/// Refresh on every wake-up until the client goes quiet for `idle_exit`.
async fn ui_loop(
    client: &ChatClient,
    wake_rx: &mut mpsc::UnboundedReceiver<()>,
    idle_exit: Duration,
) -> SmokeSummary {
    let mut summary = SmokeSummary::default();
    while let Ok(Some(())) = tokio::time::timeout(idle_exit, wake_rx.recv()).await {
        refresh(client, &mut summary);
    }
    info!(ticks = summary.refresh_ticks, "ui loop idle; finishing");
    summary
}

fn refresh(client: &ChatClient, summary: &mut SmokeSummary) {
    let flags = client.get_and_clear_dirty_flags();
    summary.refresh_ticks += 1;
    summary.flags_seen |= flags;
    debug!(?flags, "refresh tick");

    if flags.contains(DirtyFlags::AUTH) {
        info!(state = ?client.auth_state(), "auth state");
    }
    if flags.contains(DirtyFlags::CHAT_LIST) {
        summary.chats = client
            .chats()
            .into_iter()
            .map(|chat| chat_line(&chat))
            .collect();
    }
    if flags.contains(DirtyFlags::MESSAGES) {
        for chat_id in WATCHED_CHATS {
            summary.new_messages += client.get_new_messages(chat_id).len();
            summary.edited_messages += client.get_updated_messages(chat_id).len();
        }
        summary.errors.extend(
            client
                .get_errors()
                .into_iter()
                .map(|report| format!("{:?}: {}", report.context, report.error)),
        );
    }
    if flags.contains(DirtyFlags::DOWNLOADS) {
        summary.downloads_started += client.get_started_downloads().len();
        summary.progress_updates += client.get_progress_updates().len();
        for done in client.get_completed_downloads() {
            if done.success {
                summary.downloads_completed += 1;
            } else {
                summary.downloads_failed += 1;
                warn!(file_id = done.file_id, error = ?done.error, "download attempt failed");
            }
        }
    }
}

fn chat_line(chat: &ChatSummary) -> String {
    format!("{} ({} unread)", chat.title, chat.unread_count)
}
