//! Reminder ladders: fixed payment reminders, the unbounded long-wait
//! ladder, the human-help escalation pair, and the short menu nudge.
//!
//! Every step re-checks live state at fire time instead of trusting the
//! snapshot captured when it was scheduled — the user or an operator may
//! have changed the conversation in the interim, and a step whose
//! justifying condition no longer holds must be a silent no-op.

use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::engine::replies;
use crate::outbound::Outbound;
use crate::store::{ConversationStore, LifecyclePhase};
use crate::timers::Timers;

#[derive(Debug, Clone, Copy)]
pub struct PaymentLadderPlan {
    pub first_delay: Duration,
    pub interval: Duration,
    pub max_steps: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct LongWaitPlan {
    pub pause: Duration,
    pub resume_interval: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct HelpLadderPlan {
    pub first_delay: Duration,
    pub second_delay: Duration,
}

/// Immutable ladder timings, shared by every conversation.
#[derive(Debug, Clone, Copy)]
pub struct ReminderPlan {
    pub payment: PaymentLadderPlan,
    pub long_wait: LongWaitPlan,
    pub help: HelpLadderPlan,
    pub menu_nudge_delay: Duration,
}

impl Default for ReminderPlan {
    fn default() -> Self {
        Self {
            payment: PaymentLadderPlan {
                first_delay: Duration::from_secs(60),
                interval: Duration::from_secs(5 * 60),
                max_steps: 3,
            },
            long_wait: LongWaitPlan {
                pause: Duration::from_secs(30 * 60),
                resume_interval: Duration::from_secs(30 * 60),
            },
            help: HelpLadderPlan {
                first_delay: Duration::from_secs(5 * 60),
                second_delay: Duration::from_secs(10 * 60),
            },
            menu_nudge_delay: Duration::from_secs(15),
        }
    }
}

pub struct Escalations {
    store: Arc<ConversationStore>,
    timers: Arc<Timers>,
    outbound: Arc<Outbound>,
    plan: ReminderPlan,
    // Handed to timer callbacks so a fired step can reach back here without
    // keeping the subsystem alive past its owner.
    weak: Weak<Escalations>,
}

impl Escalations {
    pub fn new(
        store: Arc<ConversationStore>,
        timers: Arc<Timers>,
        outbound: Arc<Outbound>,
        plan: ReminderPlan,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            store,
            timers,
            outbound,
            plan,
            weak: weak.clone(),
        })
    }

    pub fn plan(&self) -> &ReminderPlan {
        &self.plan
    }

    // ─── Payment ladder ───────────────────────────────────────────────────────

    /// Arm the fixed payment ladder. Any prior payment timer is canceled
    /// first, so at most one exists per user at any instant.
    pub fn arm_payment_ladder(&self, user: &str) {
        self.cancel_payment_timer(user);
        tracing::info!(user, "payment ladder armed");
        self.schedule_payment_step(user.to_string(), 1, self.plan.payment.first_delay);
    }

    fn schedule_payment_step(&self, user: String, step: u32, delay: Duration) {
        let weak = self.weak.clone();
        let timer_user = user.clone();
        let handle = self.timers.schedule(delay, async move {
            let Some(this) = weak.upgrade() else { return };
            this.run_payment_step(timer_user, step).await;
        });
        self.store
            .mutate(&user, |state| state.timers.payment = Some(handle));
    }

    fn payment_ladder_live(&self, user: &str) -> bool {
        self.store
            .snapshot(user)
            .map(|s| s.phase == LifecyclePhase::WaitingForPayment && !s.payment_received)
            .unwrap_or(false)
    }

    async fn run_payment_step(&self, user: String, step: u32) {
        if !self.payment_ladder_live(&user) {
            tracing::debug!(user, step, "payment reminder no longer justified, skipping");
            return;
        }
        self.store.mutate(&user, |state| {
            state.payment_reminder_count = step;
            state.timers.payment = None;
        });
        tracing::info!(user, step, max = self.plan.payment.max_steps, "payment reminder");
        self.outbound.send_text(&user, replies::PAYMENT_REMINDER).await;

        // The send suspended; only the live state decides whether the ladder
        // continues.
        if step < self.plan.payment.max_steps && self.payment_ladder_live(&user) {
            self.schedule_payment_step(user, step + 1, self.plan.payment.interval);
        }
    }

    /// Replace the fixed ladder with the long-wait one: pause, then repeat
    /// indefinitely until a receipt arrives or the conversation is reset.
    pub fn switch_to_long_wait(&self, user: &str) {
        self.cancel_payment_timer(user);
        let pauses = self
            .store
            .mutate(user, |state| {
                state.paused_reminder_count += 1;
                state.paused_reminder_count
            });
        tracing::info!(user, pauses, "payment reminders paused for long wait");
        self.schedule_long_wait_tick(user.to_string(), self.plan.long_wait.pause);
    }

    fn schedule_long_wait_tick(&self, user: String, delay: Duration) {
        let weak = self.weak.clone();
        let timer_user = user.clone();
        let handle = self.timers.schedule(delay, async move {
            let Some(this) = weak.upgrade() else { return };
            this.run_long_wait_tick(timer_user).await;
        });
        self.store
            .mutate(&user, |state| state.timers.payment = Some(handle));
    }

    async fn run_long_wait_tick(&self, user: String) {
        if !self.payment_ladder_live(&user) {
            tracing::debug!(user, "long-wait reminder no longer justified, skipping");
            return;
        }
        self.store
            .mutate(&user, |state| state.timers.payment = None);
        tracing::info!(user, "long-wait payment reminder");
        self.outbound
            .send_text(&user, replies::LONG_WAIT_REMINDER)
            .await;

        if self.payment_ladder_live(&user) {
            self.schedule_long_wait_tick(user, self.plan.long_wait.resume_interval);
        }
    }

    /// Cancel whatever payment-ladder timer is pending for `user`.
    pub fn cancel_payment_timer(&self, user: &str) {
        if let Some(handle) = self
            .store
            .mutate(user, |state| state.timers.payment.take())
        {
            self.timers.cancel(handle);
            tracing::debug!(user, "payment timer canceled");
        }
    }

    /// Cancel every pending timer owned by `user` (receipt arrival).
    pub fn cancel_all_for(&self, user: &str) {
        let handles = self.store.mutate(user, |state| state.timers.drain());
        let count = handles.len();
        for handle in handles {
            self.timers.cancel(handle);
        }
        if count > 0 {
            tracing::debug!(user, count, "all timers canceled");
        }
    }

    // ─── Human-help ladder ────────────────────────────────────────────────────

    /// Arm the 5/10-minute human-help pair. Steps no-op once the user is no
    /// longer waiting for a human.
    pub fn arm_help_ladder(&self, user: &str) {
        let old = self.store.mutate(user, |state| state.timers.drain_help());
        for handle in old {
            self.timers.cancel(handle);
        }

        let weak = self.weak.clone();
        let first_user = user.to_string();
        let first = self.timers.schedule(self.plan.help.first_delay, async move {
            let Some(this) = weak.upgrade() else { return };
            this.run_help_first(first_user).await;
        });

        let weak = self.weak.clone();
        let second_user = user.to_string();
        let second = self
            .timers
            .schedule(self.plan.help.second_delay, async move {
                let Some(this) = weak.upgrade() else { return };
                this.run_help_second(second_user).await;
            });

        self.store.mutate(user, |state| {
            state.timers.help_first = Some(first);
            state.timers.help_second = Some(second);
        });
        tracing::info!(user, "human-help ladder armed");
    }

    fn help_ladder_live(&self, user: &str) -> bool {
        self.store
            .snapshot(user)
            .map(|s| s.phase.waiting_for_human_help())
            .unwrap_or(false)
    }

    async fn run_help_first(&self, user: String) {
        if !self.help_ladder_live(&user) {
            tracing::debug!(user, "help ladder first step skipped");
            return;
        }
        self.store
            .mutate(&user, |state| state.timers.help_first = None);
        tracing::info!(user, "human-help still-trying notice");
        self.outbound.send_text(&user, replies::STILL_TRYING).await;
    }

    async fn run_help_second(&self, user: String) {
        if !self.help_ladder_live(&user) {
            tracing::debug!(user, "help ladder second step skipped");
            return;
        }
        self.store.mutate(&user, |state| {
            state.phase = LifecyclePhase::AwaitingFallbackChoice;
            state.timers.help_first = None;
            state.timers.help_second = None;
        });
        tracing::info!(user, "human-help timed out, offering fallback menu");
        self.outbound
            .send_text(&user, replies::HELP_TIMEOUT_APOLOGY)
            .await;
        self.outbound.send_text(&user, replies::FALLBACK_MENU).await;
    }

    /// Cancel both help steps (operator unpause).
    pub fn cancel_help_ladder(&self, user: &str) {
        let handles = self.store.mutate(user, |state| state.timers.drain_help());
        for handle in handles {
            self.timers.cancel(handle);
        }
    }

    // ─── Menu nudge ───────────────────────────────────────────────────────────

    /// Short reminder when the user was pointed at the order form but went
    /// quiet. Replaces any pending nudge.
    pub fn arm_menu_nudge(&self, user: &str) {
        if let Some(old) = self
            .store
            .mutate(user, |state| state.timers.menu_nudge.take())
        {
            self.timers.cancel(old);
        }
        let weak = self.weak.clone();
        let timer_user = user.to_string();
        let handle = self.timers.schedule(self.plan.menu_nudge_delay, async move {
            let Some(this) = weak.upgrade() else { return };
            this.run_menu_nudge(timer_user).await;
        });
        self.store
            .mutate(user, |state| {
                state.menu_nudge_sent = false;
                state.timers.menu_nudge = Some(handle);
            });
    }

    async fn run_menu_nudge(&self, user: String) {
        let live = self
            .store
            .snapshot(&user)
            .map(|s| {
                s.phase == LifecyclePhase::AwaitingWebOrder
                    && !s.web_order_received
                    && !s.menu_nudge_sent
            })
            .unwrap_or(false);
        if !live {
            tracing::debug!(user, "menu nudge skipped");
            return;
        }
        self.store.mutate(&user, |state| {
            state.menu_nudge_sent = true;
            state.phase = LifecyclePhase::AssistanceMenu;
            state.explanation_sent = false;
            state.timers.menu_nudge = None;
        });
        self.outbound.send_text(&user, replies::MENU_NUDGE).await;
        self.outbound
            .send_text(&user, replies::MENU_NUDGE_OPTIONS)
            .await;
    }
}
