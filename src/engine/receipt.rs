//! Receipt-image handling. Any receipt flips `payment_received` and tears
//! down the payment ladder in the same turn, before anything suspends; the
//! verification verdict then decides what the user hears.

use chrono::Local;

use crate::outbound::EngineReply;
use crate::store::{ConversationState, LifecyclePhase, PaymentMethod};
use crate::verify::{self, VerifyOutcome};

use super::{replies, Engine};

/// Lunch price used when the order payload carried no total.
const FALLBACK_EXPECTED_AMOUNT: u64 = 13_000;

impl Engine {
    /// Handle an incoming image for `user`. Returns nothing when no
    /// conversation expects a receipt (stray images are ignored).
    pub async fn handle_receipt(&self, user: &str, image: &[u8]) -> Option<EngineReply> {
        let snapshot = self.store.snapshot(user)?;

        if snapshot.pending_manual_review {
            return Some(self.reverify_receipt(user, image, &snapshot).await);
        }
        if snapshot.phase == LifecyclePhase::WaitingForPayment {
            return Some(self.receipt_while_waiting(user, image, &snapshot).await);
        }
        if snapshot.payment_method == PaymentMethod::Cash && snapshot.web_order_received {
            return Some(self.receipt_after_cash_order(user, image, &snapshot).await);
        }
        tracing::debug!(user, "image received outside any payment flow, ignoring");
        None
    }

    async fn notify_operator(&self, text: &str) {
        if let Some(operator) = &self.operator_id {
            self.outbound.send_text(operator, text).await;
        }
    }

    /// The expected transfer arrived. Cancel every timer first, then verify.
    async fn receipt_while_waiting(
        &self,
        user: &str,
        image: &[u8],
        snapshot: &ConversationState,
    ) -> EngineReply {
        // Monotonic flip; the ladder handle comes back for synchronous
        // cancellation before anything can suspend.
        let handle = self.store.mutate(user, |state| state.mark_payment_received());
        if let Some(handle) = handle {
            self.timers.cancel(handle);
        }
        self.escalations.cancel_all_for(user);
        tracing::info!(user, "payment receipt received");

        let Some(ocr) = self.ocr.clone() else {
            self.store
                .mutate(user, |state| state.phase = LifecyclePhase::Closed);
            return EngineReply::text(replies::RECEIPT_RECEIVED_MANUAL);
        };

        let expected = snapshot.order_amount.unwrap_or(FALLBACK_EXPECTED_AMOUNT);
        let expected_method = snapshot
            .payment_method
            .expects_receipt()
            .then(|| snapshot.payment_method.as_str());
        let today = Local::now().date_naive();
        let outcome =
            verify::verify_receipt(ocr.as_ref(), image, expected, expected_method, today).await;

        // OCR suspended us; the conversation may have been reset meanwhile.
        if !self.store.contains(user) {
            tracing::debug!(user, "conversation cleared during verification, dropping result");
            return EngineReply::text(replies::RECEIPT_RECEIVED_MANUAL);
        }

        match outcome {
            VerifyOutcome::Report(report) if report.verified => {
                self.store.mutate(user, |state| {
                    state.payment_verified = true;
                    state.pending_manual_review = false;
                    state.phase = LifecyclePhase::Closed;
                });
                tracing::info!(user, "receipt verified automatically");
                self.notify_operator(&replies::manual_review_operator_notice(
                    user,
                    "comprobante verificado automáticamente",
                ))
                .await;
                EngineReply::text(replies::verified_receipt(&report))
            }
            VerifyOutcome::Report(report) if report.transfer_not_finalized() => {
                // Still waiting for a finished transfer; a corrected
                // screenshot re-enters the pipeline.
                self.store
                    .mutate(user, |state| state.pending_manual_review = true);
                tracing::info!(user, "receipt lacks a date, transfer likely unfinished");
                EngineReply::text(replies::transfer_not_finalized())
            }
            VerifyOutcome::Report(report) => {
                self.store.mutate(user, |state| {
                    state.pending_manual_review = true;
                    state.phase = LifecyclePhase::Closed;
                });
                tracing::warn!(user, reason = %report.reason, "receipt routed to manual review");
                self.notify_operator(&replies::manual_review_operator_notice(user, &report.reason))
                    .await;
                EngineReply::text(replies::manual_review(&report, expected))
            }
            VerifyOutcome::Unreadable => {
                self.store.mutate(user, |state| {
                    state.pending_manual_review = true;
                    state.phase = LifecyclePhase::Closed;
                });
                self.notify_operator(&replies::manual_review_operator_notice(
                    user,
                    "no se pudo leer el comprobante",
                ))
                .await;
                EngineReply::text(replies::manual_review_generic())
            }
        }
    }

    /// A cash order whose customer sent a transfer receipt anyway: switch
    /// the order to transfer handling and verify with no expected provider.
    async fn receipt_after_cash_order(
        &self,
        user: &str,
        image: &[u8],
        snapshot: &ConversationState,
    ) -> EngineReply {
        let handle = self.store.mutate(user, |state| state.mark_payment_received());
        if let Some(handle) = handle {
            self.timers.cancel(handle);
        }
        tracing::info!(user, "cash order switched to transfer by receipt");

        let Some(ocr) = self.ocr.clone() else {
            self.store
                .mutate(user, |state| state.phase = LifecyclePhase::Closed);
            return EngineReply::text(replies::cash_switch_generic());
        };

        let expected = snapshot.order_amount.unwrap_or(FALLBACK_EXPECTED_AMOUNT);
        let today = Local::now().date_naive();
        let outcome = verify::verify_receipt(ocr.as_ref(), image, expected, None, today).await;

        if !self.store.contains(user) {
            return EngineReply::text(replies::cash_switch_generic());
        }

        match outcome {
            VerifyOutcome::Report(report) if report.verified => {
                let bank = report.bank.clone().unwrap_or_else(|| "Transferencia".to_string());
                self.store.mutate(user, |state| {
                    state.payment_method = PaymentMethod::from_label(&bank);
                    state.payment_verified = true;
                    state.phase = LifecyclePhase::Closed;
                });
                EngineReply::text(replies::cash_switch_verified(&report, &bank))
            }
            VerifyOutcome::Report(report) if report.transfer_not_finalized() => {
                self.store.mutate(user, |state| {
                    state.pending_manual_review = true;
                    state.phase = LifecyclePhase::WaitingForPayment;
                });
                EngineReply::text(replies::transfer_not_finalized())
            }
            VerifyOutcome::Report(report) => {
                self.store.mutate(user, |state| {
                    state.pending_manual_review = true;
                    state.phase = LifecyclePhase::Closed;
                });
                self.notify_operator(&replies::manual_review_operator_notice(user, &report.reason))
                    .await;
                EngineReply::text(replies::cash_switch_manual(&report, expected))
            }
            VerifyOutcome::Unreadable => {
                self.store
                    .mutate(user, |state| state.phase = LifecyclePhase::Closed);
                EngineReply::text(replies::cash_switch_generic())
            }
        }
    }

    /// A conversation already in manual review resubmits: the pipeline runs
    /// again from the top — a prior "not yet finalized" verdict is not
    /// sticky.
    async fn reverify_receipt(
        &self,
        user: &str,
        image: &[u8],
        snapshot: &ConversationState,
    ) -> EngineReply {
        tracing::info!(user, "re-verifying resubmitted receipt");
        let Some(ocr) = self.ocr.clone() else {
            return EngineReply::text(replies::manual_review_generic());
        };

        let expected = snapshot.order_amount.unwrap_or(FALLBACK_EXPECTED_AMOUNT);
        let expected_method = snapshot
            .payment_method
            .expects_receipt()
            .then(|| snapshot.payment_method.as_str());
        let today = Local::now().date_naive();
        let outcome =
            verify::verify_receipt(ocr.as_ref(), image, expected, expected_method, today).await;

        if !self.store.contains(user) {
            return EngineReply::text(replies::manual_review_generic());
        }

        match outcome {
            VerifyOutcome::Report(report) if report.verified => {
                self.store.mutate(user, |state| {
                    state.pending_manual_review = false;
                    state.payment_verified = true;
                    state.phase = LifecyclePhase::Closed;
                });
                tracing::info!(user, "resubmitted receipt verified");
                EngineReply::text(replies::verified_receipt(&report))
            }
            VerifyOutcome::Report(report) if report.transfer_not_finalized() => {
                EngineReply::text(replies::transfer_still_not_finalized())
            }
            VerifyOutcome::Report(report) => {
                tracing::warn!(user, reason = %report.reason, "resubmitted receipt still needs review");
                EngineReply::text(replies::manual_review(&report, expected))
            }
            VerifyOutcome::Unreadable => EngineReply::text(replies::manual_review_generic()),
        }
    }
}
