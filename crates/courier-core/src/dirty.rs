use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::{error, trace};

bitflags! {
    /// Categories of state that changed since the UI last refreshed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct DirtyFlags: u32 {
        const CHAT_LIST = 1 << 0;
        const MESSAGES = 1 << 1;
        const DOWNLOADS = 1 << 2;
        const PRESENCE = 1 << 3;
        const AUTH = 1 << 4;
    }
}

/// Callback that schedules one UI refresh tick on the UI thread.
///
/// It must only enqueue work (for example post to the UI event loop); it runs
/// on whichever producer thread won the latch. A panicking callback releases
/// the latch so the next change retries the wake-up.
pub type WakeCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Coalesces change notifications into at most one outstanding UI wake-up.
///
/// Producers call [`DirtyPublisher::set_dirty`]; the UI thread calls
/// [`DirtyPublisher::get_and_clear_dirty_flags`] at the start of each refresh
/// tick and then pulls the queues named by the returned flags.
pub struct DirtyPublisher {
    flags: AtomicU32,
    refresh_pending: AtomicBool,
    wake: WakeCallback,
}

impl std::fmt::Debug for DirtyPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirtyPublisher")
            .field("flags", &self.peek())
            .field("refresh_pending", &self.is_refresh_pending())
            .finish()
    }
}

impl DirtyPublisher {
    pub fn new(wake: WakeCallback) -> Self {
        Self {
            flags: AtomicU32::new(0),
            refresh_pending: AtomicBool::new(false),
            wake,
        }
    }

    /// Record `flags` and wake the UI unless a wake-up is already outstanding.
    pub fn set_dirty(&self, flags: DirtyFlags) {
        if flags.is_empty() {
            return;
        }
        self.flags.fetch_or(flags.bits(), Ordering::SeqCst);
        if self
            .refresh_pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            trace!(?flags, "scheduling ui refresh");
            if catch_unwind(AssertUnwindSafe(|| (self.wake)())).is_err() {
                self.refresh_pending.store(false, Ordering::SeqCst);
                error!(?flags, "ui wake callback panicked; latch released");
            }
        }
    }

    /// Take every flag set since the previous call.
    ///
    /// The latch is released before the mask is swapped out: a producer that
    /// races with this call either lands its bits before the swap (and they
    /// are returned now) or wins the latch afterwards and schedules a
    /// follow-up refresh.
    pub fn get_and_clear_dirty_flags(&self) -> DirtyFlags {
        self.refresh_pending.store(false, Ordering::SeqCst);
        DirtyFlags::from_bits_truncate(self.flags.swap(0, Ordering::SeqCst))
    }

    /// Current flags without clearing them.
    pub fn peek(&self) -> DirtyFlags {
        DirtyFlags::from_bits_truncate(self.flags.load(Ordering::SeqCst))
    }

    pub fn is_refresh_pending(&self) -> bool {
        self.refresh_pending.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use proptest::prelude::*;

    use super::*;

    fn counting_publisher() -> (DirtyPublisher, Arc<AtomicUsize>) {
        let wakes = Arc::new(AtomicUsize::new(0));
        let wakes_for_callback = Arc::clone(&wakes);
        let publisher = DirtyPublisher::new(Arc::new(move || {
            wakes_for_callback.fetch_add(1, Ordering::SeqCst);
        }));
        (publisher, wakes)
    }

    #[test]
    fn burst_of_sets_wakes_once() {
        let (publisher, wakes) = counting_publisher();
        for _ in 0..1_000 {
            publisher.set_dirty(DirtyFlags::MESSAGES);
        }
        publisher.set_dirty(DirtyFlags::DOWNLOADS);

        assert_eq!(wakes.load(Ordering::SeqCst), 1);
        assert_eq!(
            publisher.get_and_clear_dirty_flags(),
            DirtyFlags::MESSAGES | DirtyFlags::DOWNLOADS
        );
        assert_eq!(publisher.get_and_clear_dirty_flags(), DirtyFlags::empty());
    }

    #[test]
    fn set_after_drain_schedules_follow_up() {
        let (publisher, wakes) = counting_publisher();
        publisher.set_dirty(DirtyFlags::CHAT_LIST);
        assert_eq!(publisher.get_and_clear_dirty_flags(), DirtyFlags::CHAT_LIST);
        assert!(!publisher.is_refresh_pending());

        publisher.set_dirty(DirtyFlags::PRESENCE);
        assert_eq!(wakes.load(Ordering::SeqCst), 2);
        assert_eq!(publisher.peek(), DirtyFlags::PRESENCE);
    }

    #[test]
    fn panicking_wake_releases_latch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_callback = Arc::clone(&calls);
        let publisher = DirtyPublisher::new(Arc::new(move || {
            if calls_for_callback.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("ui event loop is gone");
            }
        }));

        publisher.set_dirty(DirtyFlags::MESSAGES);
        assert!(!publisher.is_refresh_pending());
        assert_eq!(publisher.peek(), DirtyFlags::MESSAGES);

        publisher.set_dirty(DirtyFlags::DOWNLOADS);
        publisher.set_dirty(DirtyFlags::AUTH);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(publisher.is_refresh_pending());
        assert_eq!(
            publisher.get_and_clear_dirty_flags(),
            DirtyFlags::MESSAGES | DirtyFlags::DOWNLOADS | DirtyFlags::AUTH
        );
    }

    #[test]
    fn empty_set_is_ignored() {
        let (publisher, wakes) = counting_publisher();
        publisher.set_dirty(DirtyFlags::empty());
        assert_eq!(wakes.load(Ordering::SeqCst), 0);
        assert!(!publisher.is_refresh_pending());
    }

    #[test]
    fn concurrent_producers_lose_no_flags() {
        let (publisher, wakes) = counting_publisher();
        let publisher = Arc::new(publisher);
        let all = [
            DirtyFlags::CHAT_LIST,
            DirtyFlags::MESSAGES,
            DirtyFlags::DOWNLOADS,
            DirtyFlags::PRESENCE,
            DirtyFlags::AUTH,
        ];

        let producers: Vec<_> = all
            .iter()
            .copied()
            .map(|flag| {
                let publisher = Arc::clone(&publisher);
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        publisher.set_dirty(flag);
                    }
                })
            })
            .collect();

        let mut seen = DirtyFlags::empty();
        let mut drains = 0usize;
        while producers.iter().any(|p| !p.is_finished()) {
            seen |= publisher.get_and_clear_dirty_flags();
            drains += 1;
        }
        for producer in producers {
            producer.join().expect("producer should finish");
        }
        seen |= publisher.get_and_clear_dirty_flags();

        assert_eq!(seen, DirtyFlags::all());
        assert!(wakes.load(Ordering::SeqCst) >= 1);
        assert!(wakes.load(Ordering::SeqCst) <= drains + 1);
    }

    proptest! {
        #[test]
        fn drains_return_union_and_wake_once_per_batch(
            ops in proptest::collection::vec(proptest::option::of(0u32..32), 1..128)
        ) {
            let (publisher, wakes) = counting_publisher();
            let mut expected = DirtyFlags::empty();
            let mut batches_with_sets = 0usize;

            for op in ops {
                match op {
                    Some(bits) => {
                        let flags = DirtyFlags::from_bits_truncate(bits);
                        if expected.is_empty() && !flags.is_empty() {
                            batches_with_sets += 1;
                        }
                        expected |= flags;
                        publisher.set_dirty(flags);
                    }
                    None => {
                        prop_assert_eq!(publisher.get_and_clear_dirty_flags(), expected);
                        expected = DirtyFlags::empty();
                    }
                }
            }

            prop_assert_eq!(wakes.load(Ordering::SeqCst), batches_with_sets);
        }
    }
}
