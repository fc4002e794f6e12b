//! UserAccount: the persisted user record owned by the ledger.

use serde::{Deserialize, Serialize};

use crate::types::Email;

/// A user account as stored by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub email: Email,
    /// Current balance. Never negative.
    pub credits: u64,
    /// Last successful login (Unix ms). Non-decreasing.
    pub last_login: i64,
    /// Mirrored from the chart service.
    pub number_of_charts: u64,
}

impl UserAccount {
    /// A freshly created account starts with no credits and no charts.
    pub fn new(email: Email, last_login: i64) -> Self {
        Self {
            email,
            credits: 0,
            last_login,
            number_of_charts: 0,
        }
    }

    /// Record a login. Returns false if `at` is older than the current value.
    pub fn record_login(&mut self, at: i64) -> bool {
        if at < self.last_login {
            return false;
        }
        self.last_login = at;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_account_defaults() {
        let account = UserAccount::new(Email::parse("a@x.com").unwrap(), 100);
        assert_eq!(account.credits, 0);
        assert_eq!(account.number_of_charts, 0);
        assert_eq!(account.last_login, 100);
    }

    #[test]
    fn test_last_login_monotonic() {
        let mut account = UserAccount::new(Email::parse("a@x.com").unwrap(), 100);
        assert!(account.record_login(200));
        assert!(!account.record_login(150));
        assert_eq!(account.last_login, 200);
        assert!(account.record_login(200));
    }
}
