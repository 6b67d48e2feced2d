use tracing::{info, instrument, warn};

use super::{jwt::TokenService, lockout::AccountLockoutPolicy, password::PasswordHasher};
use crate::{
    error::{AppError, AppResult},
    users::{
        model::{now_utc, touch_last_login},
        repo::UserSession,
    },
};

/// Terminal states of a single login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    TokenIssued(String),
    RejectedLocked,
    RejectedBadCredentials,
}

impl LoginOutcome {
    pub fn into_token(self) -> AppResult<String> {
        match self {
            LoginOutcome::TokenIssued(token) => Ok(token),
            LoginOutcome::RejectedLocked => Err(AppError::AccountLocked),
            LoginOutcome::RejectedBadCredentials => Err(AppError::bad_credentials()),
        }
    }
}

#[derive(Clone)]
pub struct AuthenticationFlow {
    hasher: PasswordHasher,
    tokens: TokenService,
    lockout: AccountLockoutPolicy,
}

impl AuthenticationFlow {
    pub fn new(hasher: PasswordHasher, tokens: TokenService, lockout: AccountLockoutPolicy) -> Self {
        Self {
            hasher,
            tokens,
            lockout,
        }
    }

    /// Runs one login attempt inside `session`. Counter and timestamp
    /// changes are written through the session and become durable only when
    /// the caller commits it, whatever the outcome.
    #[instrument(skip(self, session, password))]
    pub async fn login(
        &self,
        session: &mut dyn UserSession,
        email: &str,
        password: &str,
    ) -> AppResult<LoginOutcome> {
        let email = email.trim().to_lowercase();

        let Some(user) = session.find_by_email_for_update(&email).await? else {
            self.hasher.verify_dummy(password).await;
            warn!("login for unknown email");
            return Ok(LoginOutcome::RejectedBadCredentials);
        };

        if self.lockout.is_locked(&user) {
            warn!(user_id = %user.id, "login refused, account locked");
            return Ok(LoginOutcome::RejectedLocked);
        }

        let ok = self
            .hasher
            .verify_blocking(password, &user.hashed_password)
            .await?;
        if !ok {
            let mut user = self.lockout.record_attempt(user, false);
            user.updated_at = now_utc();
            session.save(&user).await?;
            warn!(
                user_id = %user.id,
                attempts = user.failed_login_attempts,
                "login invalid password"
            );
            return Ok(LoginOutcome::RejectedBadCredentials);
        }

        let now = now_utc();
        let mut user = touch_last_login(self.lockout.record_attempt(user, true), now);
        user.updated_at = now;
        session.save(&user).await?;

        let token = self.tokens.issue_access(user.id, user.role)?;
        info!(user_id = %user.id, "user logged in");
        Ok(LoginOutcome::TokenIssued(token))
    }
}
