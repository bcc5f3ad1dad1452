//! Text-message handling: one dispatcher over the lifecycle phase plus the
//! cross-phase checks (order payloads, "paying shortly" notices, farewells)
//! that outrank it.

use chrono::Utc;

use crate::ai::ReplyPhase;
use crate::channels::MediaRef;
use crate::outbound::{EngineReply, OutboundItem};
use crate::store::{ConversationState, LifecyclePhase, PaymentMethod};

use super::{intents, replies, Engine};

/// Media message when the link is configured, plain text otherwise.
fn media_item(link: &Option<String>, caption: &str) -> OutboundItem {
    match link {
        Some(link) => OutboundItem::Media {
            media: MediaRef::new(link.clone()),
            caption: caption.to_string(),
        },
        None => OutboundItem::Text(caption.to_string()),
    }
}

fn media_or_text(link: &Option<String>, caption: &str) -> EngineReply {
    EngineReply::Sequence(vec![media_item(link, caption)])
}

impl Engine {
    /// Handle one text message, returning the reply for the transport (or
    /// nothing while the conversation is paused for a human).
    pub async fn handle_message(&self, user: &str, raw: &str) -> Option<EngineReply> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let norm = intents::normalize(raw);

        // A pasted order payload outranks every other check: it must never
        // be swallowed by a menu state or trigger a stale nudge.
        if intents::is_web_order_payload(raw) {
            return self.confirm_web_order(user, raw).await;
        }

        let snapshot = self.store.get_or_create(user);

        // "Paying shortly" swaps the fixed ladder for the long-wait one.
        if snapshot.phase == LifecyclePhase::WaitingForPayment
            && !snapshot.payment_received
            && self.payment_intent.is_paying_shortly(raw)
        {
            tracing::info!(user, "user announced payment is coming");
            self.escalations.switch_to_long_wait(user);
            return Some(EngineReply::text(replies::payment_intent_ack(
                snapshot.paused_reminder_count,
            )));
        }

        match snapshot.phase {
            // No automated replies while a human is expected.
            LifecyclePhase::PausedAfterEscalation | LifecyclePhase::WaitingForHumanHelp => None,
            LifecyclePhase::AwaitingFallbackChoice => {
                Some(self.handle_fallback_choice(user, raw))
            }
            LifecyclePhase::AwaitingCallbackNumber => {
                Some(self.handle_callback_number(user, raw).await)
            }
            LifecyclePhase::AwaitingWebOrder => Some(self.handle_awaiting_order(user, raw, &snapshot).await),
            LifecyclePhase::AssistanceMenu => match intents::normalize_option(raw) {
                Some(option) => Some(self.handle_menu_option(user, option, raw, &snapshot).await),
                None => Some(EngineReply::text(replies::OPTION_HELP)),
            },
            LifecyclePhase::Start
            | LifecyclePhase::WaitingForPayment
            | LifecyclePhase::Closed => {
                self.handle_loose_message(user, raw, &norm, &snapshot).await
            }
        }
    }

    /// Messages outside any menu flow: farewells, thanks, reopening a closed
    /// conversation, and the very first contact.
    async fn handle_loose_message(
        &self,
        user: &str,
        raw: &str,
        norm: &str,
        snapshot: &ConversationState,
    ) -> Option<EngineReply> {
        if intents::is_farewell(raw) && snapshot.phase != LifecyclePhase::WaitingForPayment {
            let nudge = self.store.mutate(user, |state| {
                state.generic_message_count = 0;
                state.explanation_sent = false;
                state.phase = LifecyclePhase::Closed;
                state.timers.menu_nudge.take()
            });
            if let Some(handle) = nudge {
                self.timers.cancel(handle);
            }
            return Some(EngineReply::text(replies::FAREWELL));
        }

        if norm.contains("gracias") && snapshot.web_order_received {
            let ai = self.ai.generate(user, ReplyPhase::Thanks, raw, snapshot).await;
            return Some(EngineReply::text(
                ai.unwrap_or_else(|| replies::FAREWELL.to_string()),
            ));
        }

        if snapshot.phase == LifecyclePhase::Closed && !snapshot.web_order_received {
            self.store
                .mutate(user, |state| state.phase = LifecyclePhase::AssistanceMenu);
            let ai = self
                .ai
                .generate(user, ReplyPhase::Assistance, raw, snapshot)
                .await;
            return Some(EngineReply::text(
                ai.unwrap_or_else(|| replies::ASSISTANCE_OPTIONS.to_string()),
            ));
        }

        if snapshot.phase == LifecyclePhase::Start {
            self.store.mutate(user, |state| {
                state.generic_message_count += 1;
                state.phase = LifecyclePhase::AssistanceMenu;
            });
            let ai = self
                .ai
                .generate(user, ReplyPhase::Assistance, raw, snapshot)
                .await;
            return Some(EngineReply::text(
                ai.unwrap_or_else(|| replies::ASSISTANCE_OPTIONS.to_string()),
            ));
        }

        let ai = self.ai.generate(user, ReplyPhase::Default, raw, snapshot).await;
        Some(EngineReply::text(
            ai.unwrap_or_else(|| replies::FAREWELL.to_string()),
        ))
    }

    /// The pasted order form confirmation: record the order, detect amount
    /// and payment method, and arm the payment ladder for transfers.
    async fn confirm_web_order(&self, user: &str, raw: &str) -> Option<EngineReply> {
        let total = intents::parse_order_total(raw);
        let label = intents::parse_payment_label(raw);
        let method = label
            .as_deref()
            .map(PaymentMethod::from_label)
            .unwrap_or(PaymentMethod::Unknown);
        if method == PaymentMethod::Unknown {
            tracing::warn!(user, "could not detect payment method in order payload");
        }

        let nudge = self
            .store
            .mutate(user, |state| state.timers.menu_nudge.take());
        if let Some(handle) = nudge {
            self.timers.cancel(handle);
        }

        let now = Utc::now();
        let (duplicate, snapshot) = self.store.mutate(user, |state| {
            state.web_order_received = true;
            state.order_count += 1;
            state.last_order_time = Some(now);
            state.explanation_sent = false;
            state.menu_nudge_sent = true;
            if total.is_some() {
                state.order_amount = total;
            }
            state.payment_method = method;
            let duplicate = state.order_count >= 2 && !state.duplicate_warning_shown;
            if duplicate {
                state.duplicate_warning_shown = true;
            }
            if method.expects_receipt() {
                state.phase = LifecyclePhase::WaitingForPayment;
                state.payment_timestamp = Some(now);
            } else {
                state.phase = LifecyclePhase::Closed;
            }
            (duplicate, state.clone())
        });

        tracing::info!(
            user,
            order_count = snapshot.order_count,
            amount = ?snapshot.order_amount,
            method = method.as_str(),
            duplicate,
            "web order received"
        );

        let ai = self
            .ai
            .generate(user, ReplyPhase::ConfirmWeb, raw, &snapshot)
            .await;
        let confirmation = ai.unwrap_or_else(|| replies::WEB_ORDER_CONFIRMATION.to_string());

        // The model call suspended; arm reminders only if the live state
        // still expects a receipt (it may already have arrived).
        let still_waiting = self
            .store
            .snapshot(user)
            .map(|s| s.phase == LifecyclePhase::WaitingForPayment && !s.payment_received)
            .unwrap_or(false);
        if still_waiting {
            self.escalations.arm_payment_ladder(user);
        }

        if duplicate {
            Some(EngineReply::Sequence(vec![
                OutboundItem::Text(confirmation),
                media_item(&self.media.duplicate_video, replies::DUPLICATE_ORDER_TUTORIAL),
            ]))
        } else {
            Some(EngineReply::text(confirmation))
        }
    }

    /// The three-way menu offered after the 10-minute human-help timeout.
    fn handle_fallback_choice(&self, user: &str, raw: &str) -> EngineReply {
        match intents::normalize_option(raw) {
            Some(1) => {
                self.store.mutate(user, |state| {
                    state.phase = LifecyclePhase::WaitingForHumanHelp;
                    state.human_help_timestamp = Some(Utc::now());
                });
                self.escalations.arm_help_ladder(user);
                EngineReply::text(replies::KEEP_WAITING_ACK)
            }
            Some(2) => {
                self.store.mutate(user, |state| {
                    state.phase = LifecyclePhase::AssistanceMenu;
                    state.generic_message_count = 0;
                });
                EngineReply::Sequence(vec![
                    OutboundItem::Text(replies::AUTOMATED_OPTIONS_ACK.to_string()),
                    OutboundItem::Text(replies::ASSISTANCE_OPTIONS.to_string()),
                ])
            }
            Some(3) => {
                self.store.mutate(user, |state| {
                    state.phase = LifecyclePhase::AwaitingCallbackNumber;
                });
                EngineReply::text(replies::CALLBACK_PROMPT)
            }
            _ => EngineReply::text(replies::OPTION_HELP),
        }
    }

    /// Capture a callback phone number and hand it to the operator.
    async fn handle_callback_number(&self, user: &str, raw: &str) -> EngineReply {
        match intents::extract_callback_number(raw) {
            Some(number) => {
                self.store.mutate(user, |state| {
                    state.callback_number = Some(number.clone());
                    state.phase = LifecyclePhase::Start;
                    state.generic_message_count = 0;
                });
                tracing::info!(user, number, "callback number registered");
                if let Some(operator) = &self.operator_id {
                    self.outbound
                        .send_text(operator, &replies::callback_operator_notice(user, &number))
                        .await;
                }
                EngineReply::text(replies::callback_registered(&number))
            }
            None => EngineReply::text(replies::CALLBACK_INVALID),
        }
    }

    /// Texts while we expect the web-order payload: one re-explanation, then
    /// back to the options menu.
    async fn handle_awaiting_order(
        &self,
        user: &str,
        raw: &str,
        snapshot: &ConversationState,
    ) -> EngineReply {
        if !snapshot.explanation_sent {
            self.store.mutate(user, |state| state.explanation_sent = true);
            self.escalations.arm_menu_nudge(user);
            let ai = self
                .ai
                .generate(user, ReplyPhase::Explanation, raw, snapshot)
                .await;
            let text = ai.unwrap_or_else(|| replies::EXPLANATION.to_string());
            return media_or_text(&self.media.support_video, &text);
        }

        let nudge = self.store.mutate(user, |state| {
            state.phase = LifecyclePhase::AssistanceMenu;
            state.timers.menu_nudge.take()
        });
        if let Some(handle) = nudge {
            self.timers.cancel(handle);
        }
        let ai = self
            .ai
            .generate(user, ReplyPhase::Assistance, raw, snapshot)
            .await;
        EngineReply::text(ai.unwrap_or_else(|| replies::TROUBLE_ASSISTANCE_OPTIONS.to_string()))
    }

    /// One of the five assistance-menu options.
    async fn handle_menu_option(
        &self,
        user: &str,
        option: u8,
        raw: &str,
        snapshot: &ConversationState,
    ) -> EngineReply {
        let nudge = self
            .store
            .mutate(user, |state| state.timers.menu_nudge.take());
        if let Some(handle) = nudge {
            self.timers.cancel(handle);
        }
        tracing::info!(user, option, "assistance option selected");

        match option {
            1 => {
                self.store.mutate(user, |state| {
                    state.phase = LifecyclePhase::PausedAfterEscalation;
                    state.human_help_timestamp = Some(Utc::now());
                });
                self.escalations.arm_help_ladder(user);
                let mut text = replies::HUMAN_HELP_ACK.to_string();
                if let Some(extra) = self
                    .ai
                    .generate(user, ReplyPhase::HumanHelp, raw, snapshot)
                    .await
                {
                    text.push_str("\n\n");
                    text.push_str(&extra);
                }
                EngineReply::text(text)
            }
            2 => {
                self.point_at_order_form(user);
                media_or_text(&self.media.troubleshoot_video, replies::TROUBLESHOOT_SENDING)
            }
            3 => {
                self.point_at_order_form(user);
                media_or_text(&self.media.duplicate_video, replies::MULTIPLE_ORDERS_TUTORIAL)
            }
            4 => {
                self.point_at_order_form(user);
                let mut answer = replies::COVERAGE_ANSWER.to_string();
                if let Some(extra) = self
                    .ai
                    .generate(user, ReplyPhase::Coverage, raw, snapshot)
                    .await
                {
                    answer.push_str("\n\n");
                    answer.push_str(&extra);
                }
                EngineReply::Sequence(vec![
                    OutboundItem::Text(answer),
                    media_item(&self.media.welcome_video, replies::GREETING),
                ])
            }
            _ => {
                self.point_at_order_form(user);
                let ai = self
                    .ai
                    .generate(user, ReplyPhase::Greeting, raw, snapshot)
                    .await;
                let text = ai.unwrap_or_else(|| replies::GREETING.to_string());
                media_or_text(&self.media.welcome_video, &text)
            }
        }
    }

    /// Move the user toward the web order form and arm the short nudge that
    /// re-offers the menu if they go quiet.
    fn point_at_order_form(&self, user: &str) {
        self.store.mutate(user, |state| {
            state.phase = LifecyclePhase::AwaitingWebOrder;
            state.explanation_sent = false;
        });
        self.escalations.arm_menu_nudge(user);
    }
}
