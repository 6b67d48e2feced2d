use axum::Router;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    state::AppState,
    users::model::UserRole,
};

mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod lockout;
pub mod password;
pub mod services;

/// Authenticated identity taken from a verified token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub role: UserRole,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn require_any(&self, roles: &[UserRole]) -> AppResult<()> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(AppError::Forbidden("Operation not permitted".into()))
        }
    }
}

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
