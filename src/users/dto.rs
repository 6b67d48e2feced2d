use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::{User, UserRole};
use crate::error::{AppError, AppResult};

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref NICKNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_-]{3,50}$").unwrap();
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub(crate) fn is_valid_nickname(nickname: &str) -> bool {
    NICKNAME_RE.is_match(nickname)
}

fn check_url(field: &str, value: &Option<String>) -> AppResult<()> {
    match value {
        Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => Err(
            AppError::Validation(format!("{field} must be an http(s) URL")),
        ),
        _ => Ok(()),
    }
}

fn check_len(field: &str, value: &Option<String>, max: usize) -> AppResult<()> {
    match value {
        Some(v) if v.chars().count() > max => Err(AppError::Validation(format!(
            "{field} must be at most {max} characters"
        ))),
        _ => Ok(()),
    }
}

/// Body of `POST /register/` and `POST /users/`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub linkedin_profile_url: Option<String>,
    #[serde(default)]
    pub github_profile_url: Option<String>,
    /// Honoured only on the administrative create path.
    #[serde(default)]
    pub role: Option<UserRole>,
}

impl NewUser {
    /// Normalizes the email and checks every field.
    pub fn validated(mut self) -> AppResult<Self> {
        self.email = self.email.trim().to_lowercase();
        if !is_valid_email(&self.email) {
            return Err(AppError::Validation("Invalid email".into()));
        }
        if self.password.chars().count() < 8 {
            return Err(AppError::Validation("Password too short".into()));
        }
        if let Some(nick) = &self.nickname {
            if !is_valid_nickname(nick) {
                return Err(AppError::Validation("Invalid nickname".into()));
            }
        }
        check_len("first_name", &self.first_name, 100)?;
        check_len("last_name", &self.last_name, 100)?;
        check_len("bio", &self.bio, 500)?;
        check_url("linkedin_profile_url", &self.linkedin_profile_url)?;
        check_url("github_profile_url", &self.github_profile_url)?;
        Ok(self)
    }
}

/// Body of `PUT /users/{id}`; absent fields stay as they are.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub profile_picture_url: Option<String>,
    pub linkedin_profile_url: Option<String>,
    pub github_profile_url: Option<String>,
    pub is_professional: Option<bool>,
}

impl UserUpdate {
    pub fn validated(mut self) -> AppResult<Self> {
        if let Some(email) = self.email.take() {
            let email = email.trim().to_lowercase();
            if !is_valid_email(&email) {
                return Err(AppError::Validation("Invalid email".into()));
            }
            self.email = Some(email);
        }
        if let Some(nick) = &self.nickname {
            if !is_valid_nickname(nick) {
                return Err(AppError::Validation("Invalid nickname".into()));
            }
        }
        check_len("first_name", &self.first_name, 100)?;
        check_len("last_name", &self.last_name, 100)?;
        check_len("bio", &self.bio, 500)?;
        check_url("profile_picture_url", &self.profile_picture_url)?;
        check_url("linkedin_profile_url", &self.linkedin_profile_url)?;
        check_url("github_profile_url", &self.github_profile_url)?;
        Ok(self)
    }
}

#[derive(Debug, Deserialize)]
pub struct RoleUpdate {
    pub role: UserRole,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    10
}

impl Pagination {
    pub fn validated(self) -> AppResult<Self> {
        if self.skip < 0 {
            return Err(AppError::Validation("skip must be >= 0".into()));
        }
        if !(1..=100).contains(&self.limit) {
            return Err(AppError::Validation("limit must be between 1 and 100".into()));
        }
        Ok(self)
    }
}

/// Public view of a user; credentials and counters stay server-side.
#[derive(Debug, Serialize)]
pub struct UserResponse {
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
    pub email_verified: bool,
    pub is_locked: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            nickname: u.nickname,
            email: u.email,
            first_name: u.first_name,
            last_name: u.last_name,
            bio: u.bio,
            profile_picture_url: u.profile_picture_url,
            linkedin_profile_url: u.linkedin_profile_url,
            github_profile_url: u.github_profile_url,
            role: u.role,
            is_professional: u.is_professional,
            email_verified: u.email_verified,
            is_locked: u.is_locked,
            last_login_at: u.last_login_at,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub items: Vec<UserResponse>,
    pub total: i64,
    pub page: i64,
    pub size: usize,
}
