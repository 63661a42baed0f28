use std::{
    io,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    thread::{self, JoinHandle},
};

use courier_core::{Incoming, PUSH_EVENT_ID, normalization::event_kind};
use tracing::{error, info, trace};

use crate::{handlers, shared::Shared};

pub(crate) const THREAD_NAME: &str = "courier-receive";

pub(crate) fn spawn(shared: Arc<Shared>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(THREAD_NAME.to_owned())
        .spawn(move || run(&shared))
}

/// Poll the backend until the lifecycle leaves `Running`.
fn run(shared: &Arc<Shared>) {
    info!(
        poll_timeout_ms = shared.config.poll_timeout.as_millis() as u64,
        "receive loop started"
    );
    while shared.lifecycle.is_running() {
        if let Some(incoming) = shared.backend.receive(shared.config.poll_timeout) {
            dispatch(shared, incoming);
        }
    }
    info!("receive loop exited");
}

fn dispatch(shared: &Arc<Shared>, incoming: Incoming) {
    let Incoming { request_id, event } = incoming;
    let kind = event_kind(&event);

    let outcome = if request_id == PUSH_EVENT_ID {
        catch_unwind(AssertUnwindSafe(|| handlers::handle_push(shared, event)))
    } else {
        match shared.correlation.resolve(request_id) {
            Some(handler) => catch_unwind(AssertUnwindSafe(move || handler(event))),
            None => {
                trace!(request_id, event = kind, "dropping reply without handler");
                Ok(())
            }
        }
    };

    if outcome.is_err() {
        error!(request_id, event = kind, "event handler panicked");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use courier_core::{
        BackendEvent, BackendRequest, ChatSummary, DirtyFlags, DirtyPublisher, RequestId,
        sync::read,
    };
    use tokio::runtime::Handle;

    use super::*;
    use crate::{backend::Backend, config::ClientConfig, timers::Timers};

    struct IdleBackend;

    impl Backend for IdleBackend {
        fn send(&self, _request_id: RequestId, _request: BackendRequest) {}

        fn receive(&self, _timeout: Duration) -> Option<Incoming> {
            None
        }
    }

    fn shared_state(wakes: &Arc<AtomicUsize>) -> Arc<Shared> {
        let wakes = Arc::clone(wakes);
        Arc::new(Shared::new(
            Arc::new(IdleBackend),
            ClientConfig::default(),
            DirtyPublisher::new(Arc::new(move || {
                wakes.fetch_add(1, Ordering::SeqCst);
            })),
            Timers::new(Handle::current()),
        ))
    }

    #[tokio::test]
    async fn panicking_reply_handler_does_not_stop_dispatch() {
        let wakes = Arc::new(AtomicUsize::new(0));
        let shared = shared_state(&wakes);

        let request_id = shared
            .correlation
            .register(|_| panic!("reply handler failed"));
        dispatch(&shared, Incoming::reply(request_id, BackendEvent::Ok));
        assert!(shared.correlation.is_empty());

        let chat = ChatSummary {
            chat_id: 5,
            title: "after panic".into(),
            unread_count: 1,
            last_message_id: None,
            order: 1,
        };
        dispatch(&shared, Incoming::push(BackendEvent::ChatUpdated(chat)));

        assert!(read(&shared.chats).contains_key(&5));
        assert_eq!(
            shared.dirty.get_and_clear_dirty_flags(),
            DirtyFlags::CHAT_LIST
        );
        assert_eq!(wakes.load(Ordering::SeqCst), 1);
    }
}
