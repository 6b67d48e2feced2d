use sqlx::FromRow;
use uuid::Uuid;

use super::model::{User, UserRole};
use crate::db::UtcDateTime;

/// Row of the `users` table as read from Postgres.
#[derive(Debug, FromRow)]
pub struct UserRow {
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
    pub professional_status_updated_at: Option<UtcDateTime>,
    pub last_login_at: Option<UtcDateTime>,
    pub failed_login_attempts: i32,
    pub is_locked: bool,
    pub email_verified: bool,
    pub hashed_password: String,
    pub created_at: UtcDateTime,
    pub updated_at: UtcDateTime,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        Self {
            id: r.id,
            nickname: r.nickname,
            email: r.email,
            first_name: r.first_name,
            last_name: r.last_name,
            bio: r.bio,
            profile_picture_url: r.profile_picture_url,
            linkedin_profile_url: r.linkedin_profile_url,
            github_profile_url: r.github_profile_url,
            role: r.role,
            is_professional: r.is_professional,
            professional_status_updated_at: r
                .professional_status_updated_at
                .map(UtcDateTime::into_inner),
            last_login_at: r.last_login_at.map(UtcDateTime::into_inner),
            failed_login_attempts: r.failed_login_attempts,
            is_locked: r.is_locked,
            email_verified: r.email_verified,
            hashed_password: r.hashed_password,
            created_at: r.created_at.into_inner(),
            updated_at: r.updated_at.into_inner(),
        }
    }
}
