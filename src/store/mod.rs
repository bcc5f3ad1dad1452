//! Per-user conversation records and their lifecycle.
//!
//! Records are created lazily on first contact, live only in process memory,
//! and are destroyed by the daily reset or process restart. Mutation within
//! one processing turn is synchronous; handlers that suspend on a
//! collaborator must re-fetch through [`ConversationStore::mutate`] on
//! resume instead of trusting a pre-suspension snapshot.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

use crate::timers::{TimerHandle, Timers};

/// Where a conversation currently sits in its lifecycle. Exactly one phase
/// is active per user; the orthogonal flags on [`ConversationState`] carry
/// the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    /// No interaction yet beyond record creation.
    Start,
    /// The five-option assistance menu is live.
    AssistanceMenu,
    /// The user was pointed at the web order form and we expect a payload.
    AwaitingWebOrder,
    /// A non-cash order was confirmed; a receipt is expected.
    WaitingForPayment,
    /// Human help requested, operator not yet engaged.
    WaitingForHumanHelp,
    /// Human help requested; automated replies are suppressed.
    PausedAfterEscalation,
    /// The 10-minute apology menu is live (keep waiting / automated / callback).
    AwaitingFallbackChoice,
    /// Waiting for the user to type a callback phone number.
    AwaitingCallbackNumber,
    /// Conversation wrapped up; next message reopens the menu.
    Closed,
}

impl LifecyclePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::AssistanceMenu => "assistance_menu",
            Self::AwaitingWebOrder => "awaiting_web_order",
            Self::WaitingForPayment => "waiting_for_payment",
            Self::WaitingForHumanHelp => "waiting_for_human_help",
            Self::PausedAfterEscalation => "paused_after_escalation",
            Self::AwaitingFallbackChoice => "awaiting_fallback_choice",
            Self::AwaitingCallbackNumber => "awaiting_callback_number",
            Self::Closed => "closed",
        }
    }

    /// Phases in which the human-help ladder steps are still justified.
    pub fn waiting_for_human_help(self) -> bool {
        matches!(self, Self::PausedAfterEscalation | Self::WaitingForHumanHelp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Nequi,
    Daviplata,
    Bancolombia,
    Unknown,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cash => "Efectivo",
            Self::Nequi => "Nequi",
            Self::Daviplata => "Daviplata",
            Self::Bancolombia => "Bancolombia",
            Self::Unknown => "Desconocido",
        }
    }

    /// Classify the label printed on the order summary line.
    pub fn from_label(label: &str) -> Self {
        let lower = label.to_lowercase();
        if lower.contains("efectivo") {
            Self::Cash
        } else if lower.contains("nequi") {
            Self::Nequi
        } else if lower.contains("daviplata") || lower.contains("davi") {
            Self::Daviplata
        } else if lower.contains("bancolombia") {
            Self::Bancolombia
        } else {
            Self::Unknown
        }
    }

    /// Whether a transfer receipt is expected for this method.
    pub fn expects_receipt(self) -> bool {
        matches!(self, Self::Nequi | Self::Daviplata | Self::Bancolombia)
    }
}

/// Timer handles owned by one conversation, one slot per ladder. At most one
/// payment-ladder timer exists per user at any instant.
#[derive(Debug, Clone, Copy, Default)]
pub struct LadderTimers {
    pub payment: Option<TimerHandle>,
    pub help_first: Option<TimerHandle>,
    pub help_second: Option<TimerHandle>,
    pub menu_nudge: Option<TimerHandle>,
}

impl LadderTimers {
    /// Take every armed handle, leaving all slots empty.
    pub fn drain(&mut self) -> Vec<TimerHandle> {
        [
            self.payment.take(),
            self.help_first.take(),
            self.help_second.take(),
            self.menu_nudge.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Take only the help-ladder handles.
    pub fn drain_help(&mut self) -> Vec<TimerHandle> {
        [self.help_first.take(), self.help_second.take()]
            .into_iter()
            .flatten()
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationState {
    pub phase: LifecyclePhase,
    pub generic_message_count: u32,
    pub order_count: u32,
    pub payment_reminder_count: u32,
    pub paused_reminder_count: u32,
    pub last_order_time: Option<DateTime<Utc>>,
    pub payment_timestamp: Option<DateTime<Utc>>,
    pub human_help_timestamp: Option<DateTime<Utc>>,
    pub payment_method: PaymentMethod,
    pub order_amount: Option<u64>,
    pub web_order_received: bool,
    pub payment_received: bool,
    pub payment_verified: bool,
    pub pending_manual_review: bool,
    pub duplicate_warning_shown: bool,
    /// The one-time re-explanation in `AwaitingWebOrder` was already sent.
    pub explanation_sent: bool,
    pub menu_nudge_sent: bool,
    pub callback_number: Option<String>,
    #[serde(skip)]
    pub timers: LadderTimers,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            phase: LifecyclePhase::Start,
            generic_message_count: 0,
            order_count: 0,
            payment_reminder_count: 0,
            paused_reminder_count: 0,
            last_order_time: None,
            payment_timestamp: None,
            human_help_timestamp: None,
            payment_method: PaymentMethod::Unknown,
            order_amount: None,
            web_order_received: false,
            payment_received: false,
            payment_verified: false,
            pending_manual_review: false,
            duplicate_warning_shown: false,
            explanation_sent: false,
            menu_nudge_sent: false,
            callback_number: None,
            timers: LadderTimers::default(),
        }
    }
}

impl ConversationState {
    /// Flip `payment_received` to true (it never goes back) and hand out the
    /// payment-ladder handle so the caller can cancel it in the same turn.
    pub fn mark_payment_received(&mut self) -> Option<TimerHandle> {
        self.payment_received = true;
        self.timers.payment.take()
    }
}

/// In-memory table of conversation records keyed by opaque user id.
#[derive(Default)]
pub struct ConversationStore {
    inner: Mutex<HashMap<String, ConversationState>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the live record for `user`, creating it if absent.
    /// The lock is held only for the duration of `f`; never await inside.
    pub fn mutate<R>(&self, user: &str, f: impl FnOnce(&mut ConversationState) -> R) -> R {
        let mut map = self.inner.lock();
        let state = map.entry(user.to_string()).or_default();
        f(state)
    }

    /// Snapshot of the record for `user`, creating it if absent.
    pub fn get_or_create(&self, user: &str) -> ConversationState {
        self.mutate(user, |state| state.clone())
    }

    /// Snapshot without creating.
    pub fn snapshot(&self, user: &str) -> Option<ConversationState> {
        self.inner.lock().get(user).cloned()
    }

    pub fn contains(&self, user: &str) -> bool {
        self.inner.lock().contains_key(user)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Cancel every timer handle owned by any record, then discard all
    /// records. Cancellation comes first so no leaked callback can act on
    /// freed state.
    pub fn clear_all(&self, timers: &Timers) {
        let mut map = self.inner.lock();
        let mut canceled = 0usize;
        for state in map.values_mut() {
            for handle in state.timers.drain() {
                if timers.cancel(handle) {
                    canceled += 1;
                }
            }
        }
        let dropped = map.len();
        map.clear();
        tracing::info!(conversations = dropped, timers = canceled, "cleared all conversations");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn mutate_creates_record_lazily() {
        let store = ConversationStore::new();
        assert!(!store.contains("u1"));
        store.mutate("u1", |state| state.generic_message_count += 1);
        assert!(store.contains("u1"));
        assert_eq!(store.get_or_create("u1").generic_message_count, 1);
    }

    #[test]
    fn snapshot_does_not_create() {
        let store = ConversationStore::new();
        assert!(store.snapshot("ghost").is_none());
        assert!(!store.contains("ghost"));
    }

    #[test]
    fn payment_received_is_monotonic_and_drains_ladder() {
        let mut state = ConversationState::default();
        state.timers.payment = Some(TimerHandle::from_raw_for_test(7));
        let handle = state.mark_payment_received();
        assert!(state.payment_received);
        assert!(handle.is_some());
        assert!(state.timers.payment.is_none());

        // A second call changes nothing and yields no handle.
        assert!(state.mark_payment_received().is_none());
        assert!(state.payment_received);
    }

    #[test]
    fn payment_method_labels() {
        assert_eq!(PaymentMethod::from_label("Efectivo"), PaymentMethod::Cash);
        assert_eq!(PaymentMethod::from_label("NEQUI"), PaymentMethod::Nequi);
        assert_eq!(PaymentMethod::from_label("davi"), PaymentMethod::Daviplata);
        assert_eq!(
            PaymentMethod::from_label("Bancolombia"),
            PaymentMethod::Bancolombia
        );
        assert_eq!(PaymentMethod::from_label("tarjeta"), PaymentMethod::Unknown);
        assert!(PaymentMethod::Nequi.expects_receipt());
        assert!(!PaymentMethod::Cash.expects_receipt());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_all_cancels_owned_timers_before_dropping_records() {
        let timers = Arc::new(Timers::new());
        let store = ConversationStore::new();

        let handle = timers.schedule(Duration::from_secs(300), async {
            panic!("timer survived clear_all");
        });
        store.mutate("u1", |state| state.timers.payment = Some(handle));
        store.mutate("u2", |state| state.generic_message_count = 3);

        store.clear_all(&timers);
        assert!(store.is_empty());
        assert_eq!(timers.pending(), 0);

        tokio::time::advance(Duration::from_secs(600)).await;
        tokio::task::yield_now().await;
    }
}
