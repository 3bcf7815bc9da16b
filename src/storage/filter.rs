use crate::core::{Account, AccountId};
use chrono::{DateTime, Utc};

/// Declarative predicate over account records, evaluated by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountFilter {
    /// Never activated, never blocked, created at or before the cutoff.
    Abandoned { created_at_or_before: DateTime<Utc> },
    /// Blocked and unchanged since at or before the cutoff.
    ExpiredBlock { updated_at_or_before: DateTime<Utc> },
    /// A single record.
    Id(AccountId),
    /// Matches when any member matches. Empty matches nothing.
    AnyOf(Vec<AccountFilter>),
}

impl AccountFilter {
    pub fn matches(&self, account: &Account) -> bool {
        match self {
            Self::Abandoned { created_at_or_before } => {
                account.activation.is_pending() && account.created_at <= *created_at_or_before
            }
            Self::ExpiredBlock { updated_at_or_before } => {
                account.activation.blocked && account.updated_at <= *updated_at_or_before
            }
            Self::Id(id) => account.id == *id,
            Self::AnyOf(filters) => filters.iter().any(|filter| filter.matches(account)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ActivationState;
    use chrono::Duration;

    fn account_at(created: DateTime<Utc>, updated: DateTime<Utc>, activation: ActivationState) -> Account {
        let mut account = Account::new("bob", "bob@example.com", "hash", activation);
        account.created_at = created;
        account.updated_at = updated;
        account
    }

    #[test]
    fn test_abandoned_cutoff_is_inclusive() {
        let now = Utc::now();
        let cutoff = now - Duration::minutes(10);
        let filter = AccountFilter::Abandoned { created_at_or_before: cutoff };

        let at_cutoff = account_at(cutoff, cutoff, ActivationState::issued("111111", false));
        let after_cutoff = account_at(cutoff + Duration::seconds(1), now, ActivationState::issued("111111", false));

        assert!(filter.matches(&at_cutoff));
        assert!(!filter.matches(&after_cutoff));
    }

    #[test]
    fn test_abandoned_skips_activated_and_blocked() {
        let old = Utc::now() - Duration::days(2);
        let filter = AccountFilter::Abandoned { created_at_or_before: Utc::now() };

        let activated = account_at(old, old, ActivationState::issued("111111", true));
        let mut blocked_state = ActivationState::issued("111111", false);
        blocked_state.blocked = true;
        blocked_state.attempts_left = 0;
        let blocked = account_at(old, old, blocked_state);

        assert!(!filter.matches(&activated));
        assert!(!filter.matches(&blocked));
    }

    #[test]
    fn test_expired_block_uses_updated_at() {
        let now = Utc::now();
        let mut state = ActivationState::issued("111111", false);
        state.blocked = true;
        state.attempts_left = 0;

        let account = account_at(now - Duration::days(3), now - Duration::hours(1), state);
        let filter = AccountFilter::ExpiredBlock { updated_at_or_before: now - Duration::hours(24) };
        assert!(!filter.matches(&account));

        let filter = AccountFilter::ExpiredBlock { updated_at_or_before: now };
        assert!(filter.matches(&account));
    }

    #[test]
    fn test_any_of() {
        let account = account_at(Utc::now(), Utc::now(), ActivationState::issued("111111", false));
        assert!(!AccountFilter::AnyOf(vec![]).matches(&account));
        assert!(AccountFilter::AnyOf(vec![
            AccountFilter::Id(AccountId::new()),
            AccountFilter::Id(account.id),
        ])
        .matches(&account));
    }
}
