use std::time::Duration;

use tokio::{runtime::Handle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// One-shot and periodic callbacks on the embedder's Tokio runtime.
///
/// Every timer shares one cancellation token, so [`Timers::cancel_all`]
/// stops pending and future callbacks at once.
#[derive(Debug)]
pub(crate) struct Timers {
    handle: Handle,
    token: CancellationToken,
}

impl Timers {
    pub(crate) fn new(handle: Handle) -> Self {
        Self {
            handle,
            token: CancellationToken::new(),
        }
    }

    /// Run `task` once after `delay` unless cancelled first.
    pub(crate) fn after<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.token.is_cancelled() {
            trace!("timer not scheduled: timers cancelled");
            return;
        }
        let token = self.token.clone();
        self.handle.spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => task(),
            }
        });
    }

    /// Run `task` every `period`, first after one full period.
    pub(crate) fn every<F>(&self, period: Duration, mut task: F)
    where
        F: FnMut() + Send + 'static,
    {
        if self.token.is_cancelled() {
            return;
        }
        let token = self.token.clone();
        self.handle.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => task(),
                }
            }
        });
    }

    pub(crate) fn cancel_all(&self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        (Arc::clone(&count), count)
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_after_delay() {
        let timers = Timers::new(Handle::current());
        let (count, seen) = counter();
        timers.after(Duration::from_millis(500), move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(499)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_voids_pending_one_shots() {
        let timers = Timers::new(Handle::current());
        let (count, seen) = counter();
        timers.after(Duration::from_secs(1), move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        timers.cancel_all();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_timer_ticks_until_cancelled() {
        let timers = Timers::new(Handle::current());
        let (count, seen) = counter();
        timers.every(Duration::from_secs(10), move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(35_000)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 3);

        timers.cancel_all();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timers_scheduled_after_cancel_never_run() {
        let timers = Timers::new(Handle::current());
        timers.cancel_all();
        let (count, seen) = counter();
        timers.after(Duration::from_millis(1), move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
