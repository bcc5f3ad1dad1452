//! Inbound pacing: classify each message into a delay bucket, debounce
//! rapid-fire messages into one dispatch, and hand the survivor to the
//! engine. Receipts and web-order payloads skip all of it — they dispatch
//! immediately and never cancel (or get canceled by) unrelated pending
//! dispatches.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;

use crate::channels::InboundMessage;
use crate::engine::{intents, Engine};
use crate::timers::TimerHandle;

/// Window over which rapid messages are considered one burst.
pub const BATCH_WINDOW: Duration = Duration::from_secs(30);
/// How long arrivals are remembered per user.
pub const ARRIVAL_WINDOW: Duration = Duration::from_secs(60);
/// A gap longer than this makes the next message dispatch immediately.
pub const IMMEDIATE_GAP: Duration = Duration::from_secs(120);
pub const DEFAULT_DELAY: Duration = Duration::from_millis(8_000);
pub const BATCHED_DELAY: Duration = Duration::from_millis(12_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayBucket {
    Immediate,
    Default,
    Batched,
}

impl DelayBucket {
    pub fn delay(self) -> Duration {
        match self {
            Self::Immediate => Duration::ZERO,
            Self::Default => DEFAULT_DELAY,
            Self::Batched => BATCHED_DELAY,
        }
    }
}

/// Pure bucket decision: menu digits and long-idle users go straight
/// through, bursts get coalesced, everything else gets the default pause.
pub fn classify(
    gap_since_last: Option<Duration>,
    recent_in_window: usize,
    text: &str,
) -> DelayBucket {
    if intents::is_menu_digit(text) {
        return DelayBucket::Immediate;
    }
    match gap_since_last {
        None => return DelayBucket::Immediate,
        Some(gap) if gap > IMMEDIATE_GAP => return DelayBucket::Immediate,
        _ => {}
    }
    if recent_in_window > 1 {
        DelayBucket::Batched
    } else {
        DelayBucket::Default
    }
}

#[derive(Default)]
struct ArrivalEntry {
    arrivals: VecDeque<Instant>,
    pending_seq: u64,
    pending: Option<TimerHandle>,
}

/// Per-user arrival window plus the single pending dispatch slot. The
/// debounce timer here is distinct from the escalation timers owned by the
/// conversation state.
#[derive(Default)]
pub struct MessageTracker {
    users: Mutex<HashMap<String, ArrivalEntry>>,
}

impl MessageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one arrival. Returns the gap since the previous message and
    /// how many messages (including this one) fell within the batch window.
    pub fn record(&self, user: &str, now: Instant) -> (Option<Duration>, usize) {
        let mut users = self.users.lock();
        let entry = users.entry(user.to_string()).or_default();
        let gap = entry.arrivals.back().map(|t| now.duration_since(*t));
        entry.arrivals.push_back(now);
        while let Some(front) = entry.arrivals.front() {
            if now.duration_since(*front) > ARRIVAL_WINDOW {
                entry.arrivals.pop_front();
            } else {
                break;
            }
        }
        let recent = entry
            .arrivals
            .iter()
            .filter(|t| now.duration_since(**t) <= BATCH_WINDOW)
            .count();
        (gap, recent)
    }

    /// Open a new pending-dispatch slot, invalidating any previous one.
    /// Returns the new sequence number and the displaced timer handle.
    fn begin_pending(&self, user: &str) -> (u64, Option<TimerHandle>) {
        let mut users = self.users.lock();
        let entry = users.entry(user.to_string()).or_default();
        entry.pending_seq += 1;
        (entry.pending_seq, entry.pending.take())
    }

    /// Attach the scheduled handle to the slot, unless a newer message
    /// already displaced it.
    fn attach_handle(&self, user: &str, seq: u64, handle: TimerHandle) -> bool {
        let mut users = self.users.lock();
        match users.get_mut(user) {
            Some(entry) if entry.pending_seq == seq => {
                entry.pending = Some(handle);
                true
            }
            _ => false,
        }
    }

    /// A fired dispatch claims its slot. False means the slot was replaced
    /// or the tracker was cleared — the dispatch must no-op.
    fn claim(&self, user: &str, seq: u64) -> bool {
        let mut users = self.users.lock();
        match users.get_mut(user) {
            Some(entry) if entry.pending_seq == seq => {
                entry.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Cancel every pending dispatch and forget all arrival history.
    pub fn clear_all(&self, timers: &crate::timers::Timers) {
        let mut users = self.users.lock();
        for entry in users.values_mut() {
            if let Some(handle) = entry.pending.take() {
                timers.cancel(handle);
            }
        }
        users.clear();
    }
}

pub struct Scheduler {
    engine: Arc<Engine>,
    tracker: MessageTracker,
    // Deferred dispatches reach back through this without extending the
    // scheduler's lifetime.
    weak: Weak<Scheduler>,
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            engine,
            tracker: MessageTracker::new(),
            weak: weak.clone(),
        })
    }

    /// Intake operation: classify, debounce, and eventually dispatch.
    pub async fn ingest(&self, msg: InboundMessage) {
        // Receipts and complete order payloads are never delayed or
        // coalesced: a receipt must cancel payment ladders right now, and an
        // order payload must not be lost to a later debounce.
        if msg.attachment.is_some() || intents::is_web_order_payload(&msg.text) {
            self.dispatch(msg).await;
            return;
        }

        let (gap, recent) = self.tracker.record(&msg.user_id, msg.arrival);
        let bucket = classify(gap, recent, &msg.text);
        tracing::debug!(
            user = %msg.user_id,
            ?bucket,
            gap = ?gap,
            recent,
            "inbound message classified"
        );

        let (seq, displaced) = self.tracker.begin_pending(&msg.user_id);
        if let Some(old) = displaced {
            self.engine.timers().cancel(old);
        }

        if bucket == DelayBucket::Immediate {
            self.dispatch(msg).await;
            return;
        }

        let weak = self.weak.clone();
        let user = msg.user_id.clone();
        let handle = self.engine.timers().schedule(bucket.delay(), async move {
            let Some(this) = weak.upgrade() else { return };
            if !this.tracker.claim(&msg.user_id, seq) {
                tracing::debug!(user = %msg.user_id, "stale dispatch skipped");
                return;
            }
            this.dispatch(msg).await;
        });
        self.tracker.attach_handle(&user, seq, handle);
    }

    async fn dispatch(&self, msg: InboundMessage) {
        let user = msg.user_id.clone();
        if let Some(reply) = self.engine.handle_inbound(msg).await {
            self.engine.outbound().deliver(&user, reply).await;
        }
    }

    /// Drop all pending dispatches and arrival history (daily reset).
    pub fn clear_all(&self) {
        self.tracker.clear_all(self.engine.timers());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_digits_dispatch_immediately() {
        assert_eq!(
            classify(Some(Duration::from_secs(5)), 3, "3"),
            DelayBucket::Immediate
        );
    }

    #[test]
    fn long_idle_gap_dispatches_immediately() {
        assert_eq!(
            classify(Some(Duration::from_secs(121)), 1, "hola"),
            DelayBucket::Immediate
        );
        assert_eq!(classify(None, 1, "hola"), DelayBucket::Immediate);
    }

    #[test]
    fn burst_messages_get_batched() {
        assert_eq!(
            classify(Some(Duration::from_secs(10)), 2, "quiero ayuda"),
            DelayBucket::Batched
        );
    }

    #[test]
    fn everything_else_gets_default_delay() {
        assert_eq!(
            classify(Some(Duration::from_secs(60)), 1, "quiero ayuda"),
            DelayBucket::Default
        );
    }

    #[test]
    fn classifier_is_pure() {
        for _ in 0..3 {
            assert_eq!(
                classify(Some(Duration::from_secs(10)), 2, "hola"),
                DelayBucket::Batched
            );
        }
    }

    #[test]
    fn bucket_delays_match_contract() {
        assert_eq!(DelayBucket::Immediate.delay(), Duration::ZERO);
        assert_eq!(DelayBucket::Default.delay(), Duration::from_millis(8_000));
        assert_eq!(DelayBucket::Batched.delay(), Duration::from_millis(12_000));
    }

    #[tokio::test(start_paused = true)]
    async fn tracker_counts_only_the_batch_window() {
        let tracker = MessageTracker::new();
        let start = Instant::now();

        let (gap, recent) = tracker.record("u", start);
        assert!(gap.is_none());
        assert_eq!(recent, 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        let (gap, recent) = tracker.record("u", Instant::now());
        assert_eq!(gap, Some(Duration::from_secs(10)));
        assert_eq!(recent, 2);

        // 40 s later the first two are outside the 30 s batch window.
        tokio::time::advance(Duration::from_secs(40)).await;
        let (_, recent) = tracker.record("u", Instant::now());
        assert_eq!(recent, 1);
    }

    #[test]
    fn pending_slot_sequencing() {
        let tracker = MessageTracker::new();
        let (seq1, old) = tracker.begin_pending("u");
        assert!(old.is_none());
        assert!(tracker.attach_handle("u", seq1, TimerHandle::from_raw_for_test(1)));

        // A newer message displaces the slot; the stale seq can no longer
        // claim or attach.
        let (seq2, displaced) = tracker.begin_pending("u");
        assert!(displaced.is_some());
        assert!(!tracker.claim("u", seq1));
        assert!(!tracker.attach_handle("u", seq1, TimerHandle::from_raw_for_test(2)));
        assert!(tracker.claim("u", seq2));
    }
}
