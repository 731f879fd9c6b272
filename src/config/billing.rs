//! Billing policy configuration: grace window, dunning cadence, retention.

use chrono::Duration as ChronoDuration;
use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Billing and dunning policy
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Days a PAST_DUE agreement has to recover before suspension
    #[serde(default = "default_grace_window_days")]
    pub grace_window_days: i64,

    /// Reminder notifications sent during one grace window
    #[serde(default = "default_max_dunning_attempts")]
    pub max_dunning_attempts: u32,

    /// First reminder delay, doubled per attempt
    #[serde(default = "default_backoff_base")]
    pub dunning_backoff_base_secs: u64,

    /// Upper bound on the reminder delay
    #[serde(default = "default_backoff_cap")]
    pub dunning_backoff_cap_secs: u64,

    /// How often the scheduler looks for due tasks
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// How long processed event ids are remembered
    #[serde(default = "default_retention_days")]
    pub processed_event_retention_days: i64,

    /// Age after which an unfinished event claim may be taken over
    #[serde(default = "default_claim_timeout")]
    pub claim_timeout_secs: i64,

    /// Immediate re-read attempts after a ledger version conflict
    #[serde(default = "default_conflict_retries")]
    pub ledger_conflict_retries: u32,

    /// Pending notifications held before new ones are dropped
    #[serde(default = "default_queue_capacity")]
    pub notification_queue_capacity: usize,
}

impl BillingConfig {
    pub fn grace_window(&self) -> ChronoDuration {
        ChronoDuration::days(self.grace_window_days)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn processed_event_retention(&self) -> ChronoDuration {
        ChronoDuration::days(self.processed_event_retention_days)
    }

    pub fn claim_timeout(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.claim_timeout_secs)
    }

    /// Validate billing configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.grace_window_days <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "grace_window_days",
            });
        }
        if self.dunning_backoff_base_secs == 0 {
            return Err(ValidationError::MustBePositive {
                field: "dunning_backoff_base_secs",
            });
        }
        if self.dunning_backoff_cap_secs < self.dunning_backoff_base_secs {
            return Err(ValidationError::BackoffCapBelowBase);
        }
        if self.sweep_interval_secs == 0 {
            return Err(ValidationError::MustBePositive {
                field: "sweep_interval_secs",
            });
        }
        if self.processed_event_retention_days <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "processed_event_retention_days",
            });
        }
        if self.claim_timeout_secs <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "claim_timeout_secs",
            });
        }
        if self.notification_queue_capacity == 0 {
            return Err(ValidationError::MustBePositive {
                field: "notification_queue_capacity",
            });
        }
        Ok(())
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            grace_window_days: default_grace_window_days(),
            max_dunning_attempts: default_max_dunning_attempts(),
            dunning_backoff_base_secs: default_backoff_base(),
            dunning_backoff_cap_secs: default_backoff_cap(),
            sweep_interval_secs: default_sweep_interval(),
            processed_event_retention_days: default_retention_days(),
            claim_timeout_secs: default_claim_timeout(),
            ledger_conflict_retries: default_conflict_retries(),
            notification_queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_grace_window_days() -> i64 {
    7
}

fn default_max_dunning_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    3600
}

fn default_backoff_cap() -> u64 {
    86_400
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_retention_days() -> i64 {
    30
}

fn default_claim_timeout() -> i64 {
    300
}

fn default_conflict_retries() -> u32 {
    5
}

fn default_queue_capacity() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BillingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.grace_window(), ChronoDuration::days(7));
        assert_eq!(config.processed_event_retention(), ChronoDuration::days(30));
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_grace_window_rejected() {
        let config = BillingConfig {
            grace_window_days: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::MustBePositive {
                field: "grace_window_days"
            })
        );
    }

    #[test]
    fn test_cap_below_base_rejected() {
        let config = BillingConfig {
            dunning_backoff_base_secs: 600,
            dunning_backoff_cap_secs: 60,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::BackoffCapBelowBase));
    }

    #[test]
    fn test_zero_attempts_is_allowed() {
        let config = BillingConfig {
            max_dunning_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
