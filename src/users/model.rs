use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, UtcOffset};
use uuid::Uuid;

/// Capability level of an account, stored as the `user_role` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Anonymous,
    Authenticated,
    Manager,
    Admin,
}

impl Default for UserRole {
    fn default() -> Self {
        UserRole::Anonymous
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UserRole::Anonymous => "ANONYMOUS",
            UserRole::Authenticated => "AUTHENTICATED",
            UserRole::Manager => "MANAGER",
            UserRole::Admin => "ADMIN",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub nickname: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub profile_picture_url: Option<String>,
    pub linkedin_profile_url: Option<String>,
    pub github_profile_url: Option<String>,
    pub role: UserRole,
    pub is_professional: bool,
    pub professional_status_updated_at: Option<OffsetDateTime>,
    pub last_login_at: Option<OffsetDateTime>,
    pub failed_login_attempts: i32,
    pub is_locked: bool,
    pub email_verified: bool,
    pub hashed_password: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    /// A fresh, unlocked, unverified account.
    pub fn new(nickname: String, email: String, hashed_password: String, role: UserRole) -> Self {
        let now = now_utc();
        Self {
            id: Uuid::new_v4(),
            nickname,
            email,
            first_name: None,
            last_name: None,
            bio: None,
            profile_picture_url: None,
            linkedin_profile_url: None,
            github_profile_url: None,
            role,
            is_professional: false,
            professional_status_updated_at: None,
            last_login_at: None,
            failed_login_attempts: 0,
            is_locked: false,
            email_verified: false,
            hashed_password,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Current time at offset UTC, truncated to the microsecond precision the
/// database keeps.
pub fn now_utc() -> OffsetDateTime {
    truncate_to_micros(OffsetDateTime::now_utc())
}

fn truncate_to_micros(dt: OffsetDateTime) -> OffsetDateTime {
    let micros = dt.microsecond();
    dt.replace_microsecond(micros).unwrap_or(dt)
}

pub fn lock_account(mut user: User) -> User {
    user.is_locked = true;
    user
}

/// Clears the lock and the failure counter so the next failure starts over.
pub fn unlock_account(mut user: User) -> User {
    user.is_locked = false;
    user.failed_login_attempts = 0;
    user
}

pub fn verify_email(mut user: User) -> User {
    user.email_verified = true;
    user
}

pub fn update_professional_status(mut user: User, status: bool, now: OffsetDateTime) -> User {
    user.is_professional = status;
    user.professional_status_updated_at = Some(now.to_offset(UtcOffset::UTC));
    user
}

/// Records a login at `now`. The stored value only ever moves forward: if
/// `now` is not past the previous login (clock skew, two logins inside one
/// microsecond) the previous value plus one microsecond is used instead.
pub fn touch_last_login(mut user: User, now: OffsetDateTime) -> User {
    let now = truncate_to_micros(now.to_offset(UtcOffset::UTC));
    user.last_login_at = Some(match user.last_login_at {
        Some(prev) if now <= prev => prev.to_offset(UtcOffset::UTC) + Duration::microseconds(1),
        _ => now,
    });
    user
}
