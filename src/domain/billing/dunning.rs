//! Dunning tasks: reminders and re-evaluation while an agreement is past due.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{AgreementId, Timestamp};

/// Pending follow-up for one past-due agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DunningTask {
    pub agreement_id: AgreementId,
    pub next_check_at: Timestamp,
    /// Reminders already sent in this grace window.
    pub attempt: u32,
    pub grace_deadline: Timestamp,
}

impl DunningTask {
    pub fn is_due(&self, now: Timestamp) -> bool {
        !now.is_before(&self.next_check_at)
    }
}

/// Reminder cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DunningPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for DunningPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::hours(1),
            backoff_cap: Duration::days(1),
        }
    }
}

impl DunningPolicy {
    /// Delay before the check that follows `attempt` reminders:
    /// `min(base * 2^attempt, cap)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_i32.checked_shl(attempt.min(30)).unwrap_or(i32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .map_or(self.backoff_cap, |delay| delay.min(self.backoff_cap))
    }

    /// Fresh task for a newly failed (or further failed) agreement.
    pub fn start(&self, agreement_id: AgreementId, grace_deadline: Timestamp, now: Timestamp) -> DunningTask {
        DunningTask {
            agreement_id,
            next_check_at: now.plus(self.backoff(0)).min(grace_deadline),
            attempt: 0,
            grace_deadline,
        }
    }

    /// Returns true if another reminder may be sent.
    pub fn may_remind(&self, task: &DunningTask) -> bool {
        task.attempt < self.max_attempts
    }

    /// Task after a reminder was sent at `now`.
    pub fn after_reminder(&self, task: &DunningTask, now: Timestamp) -> DunningTask {
        let attempt = task.attempt + 1;
        DunningTask {
            attempt,
            next_check_at: now.plus(self.backoff(attempt)).min(task.grace_deadline),
            ..task.clone()
        }
    }

    /// Task once reminders are exhausted: wake exactly at the deadline.
    pub fn await_deadline(&self, task: &DunningTask) -> DunningTask {
        DunningTask {
            next_check_at: task.grace_deadline,
            ..task.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> Timestamp {
        Timestamp::from_unix_secs(secs).unwrap()
    }

    fn policy() -> DunningPolicy {
        DunningPolicy {
            max_attempts: 3,
            backoff_base: Duration::seconds(3600),
            backoff_cap: Duration::seconds(10_000),
        }
    }

    #[test]
    fn backoff_doubles_until_cap() {
        let policy = policy();
        assert_eq!(policy.backoff(0), Duration::seconds(3600));
        assert_eq!(policy.backoff(1), Duration::seconds(7200));
        assert_eq!(policy.backoff(2), Duration::seconds(10_000));
        assert_eq!(policy.backoff(40), Duration::seconds(10_000));
    }

    #[test]
    fn start_never_schedules_past_the_deadline() {
        let task = policy().start(AgreementId::new(), at(1_000), at(0));

        assert_eq!(task.next_check_at, at(1_000));
        assert_eq!(task.attempt, 0);
    }

    #[test]
    fn start_uses_base_delay() {
        let task = policy().start(AgreementId::new(), at(1_000_000), at(0));
        assert_eq!(task.next_check_at, at(3600));
    }

    #[test]
    fn reminders_advance_attempt_and_delay() {
        let policy = policy();
        let task = policy.start(AgreementId::new(), at(1_000_000), at(0));

        let next = policy.after_reminder(&task, at(3600));

        assert_eq!(next.attempt, 1);
        assert_eq!(next.next_check_at, at(3600 + 7200));
    }

    #[test]
    fn reminders_stop_at_max_attempts() {
        let policy = policy();
        let mut task = policy.start(AgreementId::new(), at(1_000_000), at(0));
        let mut sent = 0;
        while policy.may_remind(&task) {
            task = policy.after_reminder(&task, task.next_check_at);
            sent += 1;
        }

        assert_eq!(sent, 3);
        assert_eq!(policy.await_deadline(&task).next_check_at, at(1_000_000));
    }

    #[test]
    fn task_is_due_at_its_check_time() {
        let task = policy().start(AgreementId::new(), at(1_000_000), at(0));
        assert!(!task.is_due(at(3599)));
        assert!(task.is_due(at(3600)));
    }
}
