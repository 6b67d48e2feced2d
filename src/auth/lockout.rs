use tracing::warn;

use crate::users::model::{lock_account, User};

/// Decides whether an account may attempt a login and books the outcome.
#[derive(Debug, Clone, Copy)]
pub struct AccountLockoutPolicy {
    max_attempts: u32,
}

impl AccountLockoutPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_locked(&self, user: &User) -> bool {
        user.is_locked
    }

    /// A failure bumps the counter and locks once it reaches the threshold.
    /// A success clears the counter; it never clears the lock.
    pub fn record_attempt(&self, mut user: User, success: bool) -> User {
        if success {
            user.failed_login_attempts = 0;
            return user;
        }
        user.failed_login_attempts = user.failed_login_attempts.saturating_add(1).max(1);
        if user.failed_login_attempts as i64 >= self.max_attempts as i64 && !user.is_locked {
            warn!(
                user_id = %user.id,
                attempts = user.failed_login_attempts,
                "account locked after repeated login failures"
            );
            user = lock_account(user);
        }
        user
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::model::tests::sample_user;

    #[test]
    fn locks_exactly_when_threshold_is_reached() {
        let policy = AccountLockoutPolicy::new(3);
        let mut user = sample_user("a@example.com");
        user = policy.record_attempt(user, false);
        user = policy.record_attempt(user, false);
        assert_eq!(user.failed_login_attempts, 2);
        assert!(!policy.is_locked(&user));
        user = policy.record_attempt(user, false);
        assert_eq!(user.failed_login_attempts, 3);
        assert!(policy.is_locked(&user));
    }

    #[test]
    fn success_resets_counter_but_keeps_lock() {
        let policy = AccountLockoutPolicy::new(3);
        let mut user = sample_user("a@example.com");
        user.failed_login_attempts = 2;
        let user = policy.record_attempt(user, true);
        assert_eq!(user.failed_login_attempts, 0);
        assert!(!user.is_locked);

        let locked = lock_account(sample_user("b@example.com"));
        let locked = policy.record_attempt(locked, true);
        assert!(locked.is_locked);
    }

    #[test]
    fn failures_past_threshold_stay_locked() {
        let policy = AccountLockoutPolicy::new(1);
        let user = policy.record_attempt(sample_user("a@example.com"), false);
        assert!(user.is_locked);
        let user = policy.record_attempt(user, false);
        assert!(user.is_locked);
        assert_eq!(user.failed_login_attempts, 2);
    }

    #[test]
    fn zero_threshold_is_treated_as_one() {
        assert_eq!(AccountLockoutPolicy::new(0).max_attempts(), 1);
    }
}
