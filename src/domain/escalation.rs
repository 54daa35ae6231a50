//! Escalation policy: maps days past due to a reminder tier.

use serde::{Deserialize, Serialize};

use super::reminder::Tier;

pub const DEFAULT_GENTLE_MAX_DAYS: i64 = 7;
pub const DEFAULT_URGENT_MAX_DAYS: i64 = 20;

/// Threshold table. A day count up to `gentle_max_days` is `gentle`, up to
/// `urgent_max_days` is `urgent`, anything beyond is `final`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub gentle_max_days: i64,
    pub urgent_max_days: i64,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            gentle_max_days: DEFAULT_GENTLE_MAX_DAYS,
            urgent_max_days: DEFAULT_URGENT_MAX_DAYS,
        }
    }
}

impl EscalationPolicy {
    pub fn new(gentle_max_days: i64, urgent_max_days: i64) -> anyhow::Result<Self> {
        if gentle_max_days < 1 {
            anyhow::bail!("gentle tier must cover at least one day");
        }
        if urgent_max_days <= gentle_max_days {
            anyhow::bail!(
                "urgent threshold ({}) must be greater than gentle threshold ({})",
                urgent_max_days,
                gentle_max_days
            );
        }

        Ok(Self {
            gentle_max_days,
            urgent_max_days,
        })
    }

    /// Total over all integers. Non-positive input is clamped to zero and
    /// lands in the lowest tier; callers scanning for overdue orders must not
    /// call this for orders that are not overdue.
    pub fn classify(&self, days_past_due: i64) -> Tier {
        let days = days_past_due.max(0);

        if days <= self.gentle_max_days {
            Tier::Gentle
        } else if days <= self.urgent_max_days {
            Tier::Urgent
        } else {
            Tier::Final
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_boundaries() {
        let policy = EscalationPolicy::default();

        for days in 1..=7 {
            assert_eq!(policy.classify(days), Tier::Gentle, "day {}", days);
        }
        for days in 8..=20 {
            assert_eq!(policy.classify(days), Tier::Urgent, "day {}", days);
        }
        for days in [21, 30, 365, i64::MAX] {
            assert_eq!(policy.classify(days), Tier::Final, "day {}", days);
        }
    }

    #[test]
    fn non_positive_days_behave_as_zero() {
        let policy = EscalationPolicy::default();
        let at_zero = policy.classify(0);

        assert_eq!(policy.classify(-1), at_zero);
        assert_eq!(policy.classify(-90), at_zero);
        assert_eq!(policy.classify(i64::MIN), at_zero);
        assert_eq!(at_zero, Tier::Gentle);
    }

    #[test]
    fn custom_table() {
        let policy = EscalationPolicy::new(3, 10).unwrap();
        assert_eq!(policy.classify(3), Tier::Gentle);
        assert_eq!(policy.classify(4), Tier::Urgent);
        assert_eq!(policy.classify(10), Tier::Urgent);
        assert_eq!(policy.classify(11), Tier::Final);
    }

    #[test]
    fn rejects_inconsistent_table() {
        assert!(EscalationPolicy::new(0, 10).is_err());
        assert!(EscalationPolicy::new(10, 10).is_err());
        assert!(EscalationPolicy::new(10, 5).is_err());
    }
}
