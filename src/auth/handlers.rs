use axum::{extract::State, routing::post, Form, Json, Router};
use tracing::instrument;

use crate::{
    auth::dto::{LoginForm, TokenResponse},
    error::AppResult,
    state::AppState,
    users::{
        dto::{NewUser, UserResponse},
        service,
    },
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register/", post(register))
        .route("/login/", post(login))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<NewUser>,
) -> AppResult<Json<UserResponse>> {
    let mut session = state.store.begin().await?;
    let user = service::register(session.as_mut(), &state.hasher, payload).await?;
    session.commit().await?;
    Ok(Json(user.into()))
}

/// The session is committed before the outcome is mapped to a response so a
/// failed attempt still books its counter.
#[instrument(skip(state, form), fields(email = %form.username))]
pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> AppResult<Json<TokenResponse>> {
    let mut session = state.store.begin().await?;
    let outcome = state
        .auth
        .login(session.as_mut(), &form.username, &form.password)
        .await?;
    session.commit().await?;
    let token = outcome.into_token()?;
    Ok(Json(TokenResponse::bearer(token)))
}
