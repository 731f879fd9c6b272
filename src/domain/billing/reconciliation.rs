//! Pure reconciliation: `(agreement, input) -> decision`.
//!
//! Nothing here performs I/O. The application layer reads the agreement,
//! asks [`reconcile`] what to do, commits the decision with one
//! compare-and-swap and only then dispatches the effects. Re-running the
//! function on an already-updated agreement yields no further change.

use chrono::Duration;

use crate::domain::foundation::{AgreementId, Timestamp};

use super::{
    Agreement, AgreementStatus, BillingEvent, Effect, InvoiceFact, InvoiceMarker,
    NotificationKind, Payment, PaymentKey, PaymentOutcome, SubscriptionMatch, SubscriptionRef,
};

/// Tunable parts of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// Time a failing agreement gets to recover, measured from the
    /// failed invoice's creation time.
    pub grace_window: Duration,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            grace_window: Duration::days(7),
        }
    }
}

/// Something that may move an agreement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileInput {
    /// Gateway ack or `customer.subscription.created` webhook.
    SubscriptionAcknowledged(SubscriptionRef),
    /// An invoice outcome reported by the processor.
    Invoice {
        fact: InvoiceFact,
        outcome: PaymentOutcome,
    },
    /// Remote cancellation.
    SubscriptionCanceled {
        subscription_id: String,
        customer_id: Option<String>,
        occurred_at: Timestamp,
    },
    /// Locally requested termination, after any remote cancel succeeded.
    ///
    /// `expected_subscription` is the subscription the caller dealt with
    /// (`None` for a draft). If a different one is bound by now the input
    /// is deferred, so the caller re-reads and cancels it remotely first.
    LocalTermination {
        expected_subscription: Option<String>,
    },
    /// Internal grace window check.
    GraceCheck,
}

impl ReconcileInput {
    /// Maps a decoded processor event. Remote status changes and `Unknown`
    /// have no input.
    pub fn from_event(event: &BillingEvent) -> Option<Self> {
        match event {
            BillingEvent::SubscriptionCreated(fact) => {
                Some(ReconcileInput::SubscriptionAcknowledged(SubscriptionRef {
                    subscription_id: fact.subscription_id.clone(),
                    customer_id: fact.customer_id.clone().unwrap_or_default(),
                    attached_at: fact.occurred_at,
                }))
            }
            BillingEvent::InvoiceSucceeded(fact) => Some(ReconcileInput::Invoice {
                fact: fact.clone(),
                outcome: PaymentOutcome::Succeeded,
            }),
            BillingEvent::InvoiceFailed(fact) => Some(ReconcileInput::Invoice {
                fact: fact.clone(),
                outcome: PaymentOutcome::Failed,
            }),
            BillingEvent::InvoiceActionRequired(fact) => Some(ReconcileInput::Invoice {
                fact: fact.clone(),
                outcome: PaymentOutcome::Pending,
            }),
            BillingEvent::SubscriptionCanceled(fact) => Some(ReconcileInput::SubscriptionCanceled {
                subscription_id: fact.subscription_id.clone(),
                customer_id: fact.customer_id.clone(),
                occurred_at: fact.occurred_at,
            }),
            BillingEvent::SubscriptionStatusChanged { .. } | BillingEvent::Unknown { .. } => None,
        }
    }

    /// Payment the input would append, used for the idempotency lookup.
    pub fn payment_key(&self) -> Option<PaymentKey> {
        match self {
            ReconcileInput::Invoice { fact, outcome } => Some(PaymentKey {
                invoice_id: fact.invoice_id.clone(),
                outcome: *outcome,
            }),
            _ => None,
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileInput::SubscriptionAcknowledged(_) => "subscription_acknowledged",
            ReconcileInput::Invoice { outcome, .. } => match outcome {
                PaymentOutcome::Succeeded => "invoice_succeeded",
                PaymentOutcome::Failed => "invoice_failed",
                PaymentOutcome::Pending => "invoice_action_required",
            },
            ReconcileInput::SubscriptionCanceled { .. } => "subscription_canceled",
            ReconcileInput::LocalTermination { .. } => "local_termination",
            ReconcileInput::GraceCheck => "grace_check",
        }
    }
}

/// How the decision relates to the stored agreement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// Status changed.
    Transitioned {
        from: AgreementStatus,
        to: AgreementStatus,
    },
    /// Persisted without a status change (marker, grace or payment only).
    Updated,
    /// Nothing to write.
    Unchanged { reason: &'static str },
    /// Cannot be applied yet; the sender should redeliver.
    Deferred { reason: &'static str },
    /// The transition table forbids this input in the current status.
    Rejected { reason: String },
}

/// Result of one reconciliation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// New agreement state, already at `version + 1`.
    pub next: Option<Agreement>,
    /// Payment to append in the same write.
    pub payment: Option<Payment>,
    pub effects: Vec<Effect>,
    pub outcome: DecisionOutcome,
}

impl Decision {
    fn unchanged(reason: &'static str) -> Self {
        Self::without_write(DecisionOutcome::Unchanged { reason })
    }

    fn deferred(reason: &'static str) -> Self {
        Self::without_write(DecisionOutcome::Deferred { reason })
    }

    fn rejected(reason: String) -> Self {
        Self::without_write(DecisionOutcome::Rejected { reason })
    }

    fn effects_only(reason: &'static str, effects: Vec<Effect>) -> Self {
        Self {
            effects,
            ..Self::unchanged(reason)
        }
    }

    fn without_write(outcome: DecisionOutcome) -> Self {
        Self {
            next: None,
            payment: None,
            effects: Vec::new(),
            outcome,
        }
    }

    fn write(
        from: AgreementStatus,
        next: Agreement,
        payment: Option<Payment>,
        effects: Vec<Effect>,
    ) -> Self {
        let outcome = if from == next.status {
            DecisionOutcome::Updated
        } else {
            DecisionOutcome::Transitioned {
                from,
                to: next.status,
            }
        };
        Self {
            next: Some(next),
            payment,
            effects,
            outcome,
        }
    }

    /// Returns true if the decision must be committed.
    pub fn requires_write(&self) -> bool {
        self.next.is_some()
    }
}

/// Computes the next state of `current` for `input`.
///
/// `payment_recorded` tells whether the ledger already holds the payment
/// keyed by [`ReconcileInput::payment_key`].
pub fn reconcile(
    current: &Agreement,
    input: &ReconcileInput,
    payment_recorded: bool,
    policy: &ReconcilePolicy,
    now: Timestamp,
) -> Decision {
    if current.status == AgreementStatus::Terminated {
        return Decision::unchanged("agreement terminated");
    }

    match input {
        ReconcileInput::SubscriptionAcknowledged(subscription) => {
            acknowledge(current, subscription, now)
        }
        ReconcileInput::Invoice { fact, outcome } => {
            invoice(current, fact, *outcome, payment_recorded, policy, now)
        }
        ReconcileInput::SubscriptionCanceled {
            subscription_id,
            customer_id,
            occurred_at,
        } => canceled(current, subscription_id, customer_id.as_deref(), *occurred_at, now),
        ReconcileInput::LocalTermination {
            expected_subscription,
        } => local_termination(current, expected_subscription.as_deref(), now),
        ReconcileInput::GraceCheck => grace_check(current, now),
    }
}

fn acknowledge(current: &Agreement, subscription: &SubscriptionRef, now: Timestamp) -> Decision {
    match current.subscription_match(&subscription.subscription_id) {
        SubscriptionMatch::Current => return Decision::unchanged("subscription already acknowledged"),
        SubscriptionMatch::Historical => return Decision::unchanged("subscription retired"),
        SubscriptionMatch::Unrelated => {}
    }
    if current.status != AgreementStatus::Draft {
        return Decision::unchanged("agreement already bound to another subscription");
    }

    let mut next = current.next_revision(now);
    match next.attach_subscription(subscription.clone()) {
        Ok(()) => Decision::write(current.status, next, None, Vec::new()),
        Err(err) => Decision::rejected(err.message),
    }
}

fn invoice(
    current: &Agreement,
    fact: &InvoiceFact,
    outcome: PaymentOutcome,
    payment_recorded: bool,
    policy: &ReconcilePolicy,
    now: Timestamp,
) -> Decision {
    if current.status == AgreementStatus::Draft {
        return Decision::deferred("subscription not yet acknowledged");
    }
    match current.subscription_match(&fact.subscription_id) {
        SubscriptionMatch::Current => {}
        SubscriptionMatch::Historical => return Decision::unchanged("invoice for a retired subscription"),
        SubscriptionMatch::Unrelated => {
            return Decision::unchanged("invoice for an unrelated subscription")
        }
    }

    let payment = (!payment_recorded).then(|| payment_from(current.id, fact, outcome, now));
    let mut next = current.next_revision(now);
    let from = current.status;

    let marker = match outcome {
        PaymentOutcome::Pending => {
            return match payment {
                Some(payment) => Decision::write(
                    from,
                    next,
                    Some(payment),
                    vec![Effect::Notify(NotificationKind::PaymentActionRequired)],
                ),
                None => Decision::unchanged("payment already recorded"),
            };
        }
        PaymentOutcome::Succeeded | PaymentOutcome::Failed => {
            InvoiceMarker::new(fact.invoice_id.clone(), fact.created_at, outcome)
        }
    };

    let is_newer = current
        .latest_invoice
        .as_ref()
        .map_or(true, |latest| marker.is_newer_than(latest));
    if !is_newer {
        // The failure that opened the grace window: dunning is re-requested
        // so a lost schedule is restored on redelivery
        let effects = match (current.grace_deadline, &current.latest_invoice) {
            (Some(grace_deadline), Some(latest))
                if from == AgreementStatus::PastDue && *latest == marker =>
            {
                vec![Effect::ScheduleDunning { grace_deadline }]
            }
            _ => Vec::new(),
        };
        // Older facts still belong in the payment history
        return match payment {
            Some(payment) => Decision::write(from, next, Some(payment), effects),
            None if effects.is_empty() => Decision::unchanged("stale invoice"),
            None => Decision::effects_only("failed invoice redelivered", effects),
        };
    }

    let mut effects = Vec::new();
    let applied = if outcome == PaymentOutcome::Succeeded {
        next.settle(marker).map(|()| match from {
            AgreementStatus::PendingActivation => {
                effects.push(Effect::Notify(NotificationKind::AgreementActivated));
            }
            AgreementStatus::PastDue | AgreementStatus::Suspended => {
                effects.push(Effect::ClearDunning);
                effects.push(Effect::Notify(NotificationKind::PaymentRecovered));
            }
            _ => {
                if payment.is_some() {
                    effects.push(Effect::Notify(NotificationKind::PaymentSucceeded));
                }
            }
        })
    } else if from == AgreementStatus::Suspended {
        next.observe_invoice(marker);
        Ok(())
    } else {
        let grace_deadline = fact.created_at.plus(policy.grace_window);
        next.mark_past_due(marker, grace_deadline).map(|()| {
            effects.push(Effect::Notify(NotificationKind::PaymentFailed));
            effects.push(Effect::ScheduleDunning { grace_deadline });
        })
    };

    match applied {
        Ok(()) => Decision::write(from, next, payment, effects),
        Err(err) => Decision::rejected(err.message),
    }
}

fn canceled(
    current: &Agreement,
    subscription_id: &str,
    customer_id: Option<&str>,
    occurred_at: Timestamp,
    now: Timestamp,
) -> Decision {
    let mut next = current.next_revision(now);
    match current.subscription_match(subscription_id) {
        SubscriptionMatch::Current => {}
        SubscriptionMatch::Historical => return Decision::unchanged("subscription retired"),
        SubscriptionMatch::Unrelated if current.status == AgreementStatus::Draft => {
            // Cancellation raced the gateway ack; keep the ref for audit
            next.subscription_history.push(SubscriptionRef {
                subscription_id: subscription_id.to_string(),
                customer_id: customer_id.unwrap_or_default().to_string(),
                attached_at: occurred_at,
            });
        }
        SubscriptionMatch::Unrelated => {
            return Decision::unchanged("cancellation for an unrelated subscription")
        }
    }
    terminate(current, next, now)
}

fn local_termination(
    current: &Agreement,
    expected_subscription: Option<&str>,
    now: Timestamp,
) -> Decision {
    let bound = current
        .subscription
        .as_ref()
        .map(|s| s.subscription_id.as_str());
    if bound != expected_subscription {
        return Decision::deferred("subscription bound since cancellation was requested");
    }
    terminate(current, current.next_revision(now), now)
}

fn terminate(current: &Agreement, mut next: Agreement, now: Timestamp) -> Decision {
    match next.terminate(now) {
        Ok(()) => Decision::write(
            current.status,
            next,
            None,
            vec![
                Effect::ClearDunning,
                Effect::Notify(NotificationKind::AgreementTerminated),
            ],
        ),
        Err(err) => Decision::rejected(err.message),
    }
}

fn grace_check(current: &Agreement, now: Timestamp) -> Decision {
    if current.status != AgreementStatus::PastDue {
        return Decision::unchanged("not past due");
    }
    if !current.grace_expired(now) {
        return Decision::unchanged("grace window open");
    }

    let mut next = current.next_revision(now);
    match next.suspend() {
        Ok(()) => Decision::write(
            current.status,
            next,
            None,
            vec![
                Effect::ClearDunning,
                Effect::Notify(NotificationKind::AgreementSuspended),
            ],
        ),
        Err(err) => Decision::rejected(err.message),
    }
}

fn payment_from(
    agreement_id: AgreementId,
    fact: &InvoiceFact,
    outcome: PaymentOutcome,
    now: Timestamp,
) -> Payment {
    Payment {
        agreement_id,
        invoice_id: fact.invoice_id.clone(),
        amount_minor: fact.amount_minor,
        currency: fact.currency.clone(),
        outcome,
        failure_reason: fact.failure_reason.clone(),
        provider_created_at: fact.created_at,
        recorded_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::BillingTerms;
    use crate::domain::foundation::{PropertyId, TenantId};

    const DAY: i64 = 86_400;

    fn at(secs: i64) -> Timestamp {
        Timestamp::from_unix_secs(secs).unwrap()
    }

    fn policy() -> ReconcilePolicy {
        ReconcilePolicy {
            grace_window: Duration::days(5),
        }
    }

    fn draft() -> Agreement {
        Agreement::draft(
            AgreementId::new(),
            TenantId::new(),
            PropertyId::new(),
            BillingTerms::new(150_000, "usd", 1).unwrap(),
            at(0),
        )
    }

    fn sub_ref(id: &str) -> SubscriptionRef {
        SubscriptionRef {
            subscription_id: id.to_string(),
            customer_id: "cus_1".to_string(),
            attached_at: at(10),
        }
    }

    fn pending() -> Agreement {
        apply(&draft(), &ReconcileInput::SubscriptionAcknowledged(sub_ref("sub_1")))
    }

    fn fact(invoice_id: &str, created: i64) -> InvoiceFact {
        InvoiceFact {
            agreement_id: None,
            subscription_id: "sub_1".to_string(),
            customer_id: Some("cus_1".to_string()),
            invoice_id: invoice_id.to_string(),
            amount_minor: 150_000,
            currency: "usd".to_string(),
            created_at: at(created),
            failure_reason: None,
        }
    }

    fn succeeded(invoice_id: &str, created: i64) -> ReconcileInput {
        ReconcileInput::Invoice {
            fact: fact(invoice_id, created),
            outcome: PaymentOutcome::Succeeded,
        }
    }

    fn failed(invoice_id: &str, created: i64) -> ReconcileInput {
        ReconcileInput::Invoice {
            fact: fact(invoice_id, created),
            outcome: PaymentOutcome::Failed,
        }
    }

    fn decide(agreement: &Agreement, input: &ReconcileInput) -> Decision {
        reconcile(agreement, input, false, &policy(), at(100 * DAY))
    }

    fn apply(agreement: &Agreement, input: &ReconcileInput) -> Agreement {
        decide(agreement, input)
            .next
            .unwrap_or_else(|| agreement.clone())
    }

    // ══════════════════════════════════════════════════════════════
    // Activation
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn ack_moves_draft_to_pending_activation() {
        let decision = decide(&draft(), &ReconcileInput::SubscriptionAcknowledged(sub_ref("sub_1")));

        assert_eq!(
            decision.outcome,
            DecisionOutcome::Transitioned {
                from: AgreementStatus::Draft,
                to: AgreementStatus::PendingActivation
            }
        );
        assert!(decision.effects.is_empty());
        assert_eq!(decision.next.unwrap().version, 2);
    }

    #[test]
    fn repeated_ack_is_a_no_op() {
        let decision = decide(&pending(), &ReconcileInput::SubscriptionAcknowledged(sub_ref("sub_1")));
        assert!(!decision.requires_write());
    }

    #[test]
    fn ack_of_other_subscription_is_ignored_once_bound() {
        let decision = decide(&pending(), &ReconcileInput::SubscriptionAcknowledged(sub_ref("sub_2")));
        assert!(matches!(decision.outcome, DecisionOutcome::Unchanged { .. }));
    }

    #[test]
    fn first_success_activates() {
        let decision = decide(&pending(), &succeeded("in_1", 1_000));

        let next = decision.next.unwrap();
        assert_eq!(next.status, AgreementStatus::Active);
        assert_eq!(decision.payment.unwrap().outcome, PaymentOutcome::Succeeded);
        assert_eq!(
            decision.effects,
            vec![Effect::Notify(NotificationKind::AgreementActivated)]
        );
    }

    #[test]
    fn invoice_before_ack_is_deferred() {
        let decision = decide(&draft(), &succeeded("in_1", 1_000));

        assert!(matches!(decision.outcome, DecisionOutcome::Deferred { .. }));
        assert!(decision.payment.is_none());
    }

    // ══════════════════════════════════════════════════════════════
    // Failures and grace
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn failure_starts_grace_from_invoice_creation() {
        let decision = decide(&pending(), &failed("in_1", 1_000));

        let next = decision.next.unwrap();
        let deadline = at(1_000 + 5 * DAY);
        assert_eq!(next.status, AgreementStatus::PastDue);
        assert_eq!(next.grace_deadline, Some(deadline));
        assert_eq!(
            decision.effects,
            vec![
                Effect::Notify(NotificationKind::PaymentFailed),
                Effect::ScheduleDunning {
                    grace_deadline: deadline
                }
            ]
        );
    }

    #[test]
    fn newer_failure_extends_grace() {
        let past_due = apply(&pending(), &failed("in_1", 1_000));
        let decision = decide(&past_due, &failed("in_2", 2 * DAY));

        assert_eq!(decision.outcome, DecisionOutcome::Updated);
        assert_eq!(decision.next.unwrap().grace_deadline, Some(at(7 * DAY)));
    }

    #[test]
    fn stale_success_after_newer_failure_keeps_past_due() {
        let active = apply(&pending(), &succeeded("in_40", 500));
        let past_due = apply(&active, &failed("in_42", 2_000));

        let decision = decide(&past_due, &succeeded("in_41", 1_999));

        let next = decision.next.unwrap();
        assert_eq!(next.status, AgreementStatus::PastDue);
        assert_eq!(next.latest_invoice.unwrap().invoice_id, "in_42");
        assert_eq!(decision.payment.unwrap().invoice_id, "in_41");
        assert!(decision.effects.is_empty());
    }

    #[test]
    fn stale_invoice_already_recorded_is_unchanged() {
        let past_due = apply(&apply(&pending(), &succeeded("in_41", 500)), &failed("in_42", 2_000));

        let decision = reconcile(&past_due, &succeeded("in_41", 500), true, &policy(), at(3_000));

        assert_eq!(decision.outcome, DecisionOutcome::Unchanged { reason: "stale invoice" });
    }

    #[test]
    fn redelivered_failure_requests_dunning_again() {
        let past_due = apply(&pending(), &failed("in_1", 1_000));

        let decision = reconcile(&past_due, &failed("in_1", 1_000), true, &policy(), at(2_000));

        assert!(!decision.requires_write());
        assert_eq!(
            decision.outcome,
            DecisionOutcome::Unchanged {
                reason: "failed invoice redelivered"
            }
        );
        assert_eq!(
            decision.effects,
            vec![Effect::ScheduleDunning {
                grace_deadline: at(1_000 + 5 * DAY)
            }]
        );
    }

    #[test]
    fn redelivered_older_failure_stays_quiet() {
        let past_due = apply(&pending(), &failed("in_1", 1_000));
        let later = apply(&past_due, &failed("in_2", 2_000));

        let decision = reconcile(&later, &failed("in_1", 1_000), true, &policy(), at(3_000));

        assert_eq!(decision.outcome, DecisionOutcome::Unchanged { reason: "stale invoice" });
        assert!(decision.effects.is_empty());
    }

    #[test]
    fn newer_success_recovers_and_clears_dunning() {
        let past_due = apply(&pending(), &failed("in_1", 1_000));
        let decision = decide(&past_due, &succeeded("in_1", 1_000));

        assert_eq!(decision.next.as_ref().unwrap().status, AgreementStatus::Active);
        assert!(decision.next.unwrap().grace_deadline.is_none());
        assert_eq!(
            decision.effects,
            vec![
                Effect::ClearDunning,
                Effect::Notify(NotificationKind::PaymentRecovered)
            ]
        );
    }

    #[test]
    fn grace_check_suspends_after_deadline() {
        let past_due = apply(&pending(), &failed("in_1", 0));

        let early = reconcile(&past_due, &ReconcileInput::GraceCheck, false, &policy(), at(4 * DAY));
        assert_eq!(early.outcome, DecisionOutcome::Unchanged { reason: "grace window open" });

        let late = reconcile(&past_due, &ReconcileInput::GraceCheck, false, &policy(), at(6 * DAY));
        assert_eq!(late.next.unwrap().status, AgreementStatus::Suspended);
        assert!(late
            .effects
            .contains(&Effect::Notify(NotificationKind::AgreementSuspended)));
    }

    #[test]
    fn suspended_failure_only_moves_marker() {
        let past_due = apply(&pending(), &failed("in_1", 0));
        let suspended = reconcile(&past_due, &ReconcileInput::GraceCheck, false, &policy(), at(6 * DAY))
            .next
            .unwrap();

        let decision = decide(&suspended, &failed("in_2", 30 * DAY));

        let next = decision.next.unwrap();
        assert_eq!(next.status, AgreementStatus::Suspended);
        assert_eq!(next.latest_invoice.unwrap().invoice_id, "in_2");
        assert!(decision.effects.is_empty());
    }

    #[test]
    fn suspended_recovers_on_newer_success() {
        let past_due = apply(&pending(), &failed("in_1", 0));
        let suspended = reconcile(&past_due, &ReconcileInput::GraceCheck, false, &policy(), at(6 * DAY))
            .next
            .unwrap();

        let next = apply(&suspended, &succeeded("in_2", 30 * DAY));

        assert_eq!(next.status, AgreementStatus::Active);
    }

    #[test]
    fn action_required_records_pending_payment_only() {
        let active = apply(&pending(), &succeeded("in_1", 100));
        let input = ReconcileInput::Invoice {
            fact: fact("in_2", 200),
            outcome: PaymentOutcome::Pending,
        };

        let decision = decide(&active, &input);

        assert_eq!(decision.outcome, DecisionOutcome::Updated);
        assert_eq!(decision.payment.unwrap().outcome, PaymentOutcome::Pending);
        assert_eq!(decision.next.unwrap().latest_invoice.unwrap().invoice_id, "in_1");
    }

    // ══════════════════════════════════════════════════════════════
    // Cancellation
    // ══════════════════════════════════════════════════════════════

    fn canceled_input(subscription_id: &str) -> ReconcileInput {
        ReconcileInput::SubscriptionCanceled {
            subscription_id: subscription_id.to_string(),
            customer_id: Some("cus_1".to_string()),
            occurred_at: at(50),
        }
    }

    #[test]
    fn cancellation_terminates_from_every_live_status() {
        let active = apply(&pending(), &succeeded("in_1", 100));
        let past_due = apply(&active, &failed("in_2", 200));

        for agreement in [pending(), active, past_due] {
            let decision = decide(&agreement, &canceled_input("sub_1"));
            assert_eq!(decision.next.unwrap().status, AgreementStatus::Terminated);
            assert!(decision
                .effects
                .contains(&Effect::Notify(NotificationKind::AgreementTerminated)));
        }
    }

    #[test]
    fn cancellation_racing_the_ack_terminates_draft() {
        let decision = decide(&draft(), &canceled_input("sub_1"));

        let next = decision.next.unwrap();
        assert_eq!(next.status, AgreementStatus::Terminated);
        assert_eq!(next.subscription_match("sub_1"), SubscriptionMatch::Historical);
    }

    #[test]
    fn cancellation_of_unrelated_subscription_is_ignored() {
        let decision = decide(&pending(), &canceled_input("sub_other"));
        assert!(!decision.requires_write());
    }

    #[test]
    fn terminated_absorbs_everything() {
        let terminated = apply(&pending(), &canceled_input("sub_1"));

        for input in [
            succeeded("in_9", 9_000),
            failed("in_9", 9_000),
            canceled_input("sub_1"),
            ReconcileInput::SubscriptionAcknowledged(sub_ref("sub_1")),
            local_termination_input(Some("sub_1")),
            ReconcileInput::GraceCheck,
        ] {
            let decision = decide(&terminated, &input);
            assert!(!decision.requires_write(), "{:?}", input);
            assert!(decision.payment.is_none());
        }
    }

    fn local_termination_input(expected: Option<&str>) -> ReconcileInput {
        ReconcileInput::LocalTermination {
            expected_subscription: expected.map(str::to_string),
        }
    }

    #[test]
    fn local_termination_of_draft() {
        let decision = decide(&draft(), &local_termination_input(None));
        assert_eq!(
            decision.outcome,
            DecisionOutcome::Transitioned {
                from: AgreementStatus::Draft,
                to: AgreementStatus::Terminated
            }
        );
    }

    #[test]
    fn local_termination_defers_when_a_subscription_was_bound_meanwhile() {
        let decision = decide(&pending(), &local_termination_input(None));

        assert!(matches!(decision.outcome, DecisionOutcome::Deferred { .. }));
        assert!(decision.effects.is_empty());

        let stale = decide(&pending(), &local_termination_input(Some("sub_other")));
        assert!(matches!(stale.outcome, DecisionOutcome::Deferred { .. }));
    }

    #[test]
    fn local_termination_of_the_cancelled_subscription_terminates() {
        let decision = decide(&pending(), &local_termination_input(Some("sub_1")));

        let next = decision.next.unwrap();
        assert_eq!(next.status, AgreementStatus::Terminated);
        assert_eq!(next.subscription_match("sub_1"), SubscriptionMatch::Historical);
    }

    // ══════════════════════════════════════════════════════════════
    // Idempotence
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn reapplying_the_same_success_changes_nothing() {
        let active = apply(&pending(), &succeeded("in_1", 100));

        let decision = reconcile(&active, &succeeded("in_1", 100), true, &policy(), at(200));

        assert!(!decision.requires_write());
        assert!(decision.effects.is_empty());
    }

    #[test]
    fn renewal_notifies_only_for_new_payment() {
        let active = apply(&pending(), &succeeded("in_1", 100));

        let fresh = decide(&active, &succeeded("in_2", 200));
        assert_eq!(
            fresh.effects,
            vec![Effect::Notify(NotificationKind::PaymentSucceeded)]
        );

        let replay = reconcile(&active, &succeeded("in_2", 200), true, &policy(), at(300));
        assert_eq!(replay.outcome, DecisionOutcome::Updated);
        assert!(replay.effects.is_empty());
    }

    #[test]
    fn event_mapping_covers_billing_events() {
        assert!(ReconcileInput::from_event(&BillingEvent::Unknown {
            event_type: "charge.refunded".to_string()
        })
        .is_none());

        let input = ReconcileInput::from_event(&BillingEvent::InvoiceFailed(fact("in_1", 1))).unwrap();
        assert_eq!(input.label(), "invoice_failed");
        assert_eq!(
            input.payment_key(),
            Some(PaymentKey {
                invoice_id: "in_1".to_string(),
                outcome: PaymentOutcome::Failed
            })
        );
    }
}
