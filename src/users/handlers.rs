use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use bytes::BytesMut;
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{NewUser, Pagination, RoleUpdate, UserListResponse, UserResponse, UserUpdate},
    model::UserRole,
    service,
};
use crate::{
    auth::extractors::AuthUser,
    error::{AppError, AppResult},
    images::{normalize::MIME_OCTET_STREAM, services::AvatarUpload},
    state::AppState,
};

const STAFF: [UserRole; 2] = [UserRole::Admin, UserRole::Manager];

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/users/:id/lock", post(lock_user))
        .route("/users/:id/unlock", post(unlock_user))
        .route("/users/:id/role", put(set_role))
        // size is enforced while streaming so the caller gets the domain error
        .route(
            "/users/:id/avatar",
            post(upload_avatar).layer(DefaultBodyLimit::disable()),
        )
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Query(page): Query<Pagination>,
) -> AppResult<Json<UserListResponse>> {
    principal.require_any(&STAFF)?;
    let page = page.validated()?;
    let mut session = state.store.begin().await?;
    let (users, total) = service::list_users(session.as_mut(), page.skip, page.limit).await?;
    session.commit().await?;

    let items: Vec<UserResponse> = users.into_iter().map(Into::into).collect();
    Ok(Json(UserListResponse {
        size: items.len(),
        items,
        total,
        page: page.skip / page.limit + 1,
    }))
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Json(payload): Json<NewUser>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    principal.require_any(&STAFF)?;
    let mut session = state.store.begin().await?;
    let user = service::create_user(session.as_mut(), &state.hasher, payload).await?;
    session.commit().await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<UserResponse>> {
    principal.require_any(&STAFF)?;
    let mut session = state.store.begin().await?;
    let user = service::get_user(session.as_mut(), id).await?;
    session.commit().await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UserUpdate>,
) -> AppResult<Json<UserResponse>> {
    principal.require_any(&STAFF)?;
    let mut session = state.store.begin().await?;
    let user = service::update_user(session.as_mut(), id, payload).await?;
    session.commit().await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    principal.require_any(&STAFF)?;
    let mut session = state.store.begin().await?;
    service::delete_user(session.as_mut(), id).await?;
    session.commit().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn lock_user(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<UserResponse>> {
    principal.require_any(&STAFF)?;
    change_lock(&state, id, true).await
}

#[instrument(skip(state))]
pub async fn unlock_user(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<UserResponse>> {
    principal.require_any(&STAFF)?;
    change_lock(&state, id, false).await
}

async fn change_lock(state: &AppState, id: Uuid, locked: bool) -> AppResult<Json<UserResponse>> {
    let mut session = state.store.begin().await?;
    let user = service::set_locked(session.as_mut(), id, locked).await?;
    session.commit().await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, payload))]
pub async fn set_role(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RoleUpdate>,
) -> AppResult<Json<UserResponse>> {
    principal.require_any(&[UserRole::Admin])?;
    let mut session = state.store.begin().await?;
    let user = service::set_role(session.as_mut(), id, payload.role).await?;
    session.commit().await?;
    Ok(Json(user.into()))
}

/// POST /users/:id/avatar (multipart, field `file`)
#[instrument(skip(state, multipart))]
pub async fn upload_avatar(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> AppResult<StatusCode> {
    state.avatars.authorize(&principal, id)?;
    let upload = read_file_field(&mut multipart, state.avatars.max_bytes()).await?;
    state
        .avatars
        .ingest(state.store.as_ref(), &principal, id, upload)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Collects the `file` field, stopping as soon as more than `limit` bytes
/// have arrived.
async fn read_file_field(multipart: &mut Multipart, limit: usize) -> AppResult<AvatarUpload> {
    while let Some(mut field) = multipart.next_field().await.map_err(bad_multipart)? {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field
            .content_type()
            .unwrap_or(MIME_OCTET_STREAM)
            .to_string();

        let mut buf = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(bad_multipart)? {
            buf.extend_from_slice(&chunk);
            if buf.len() > limit {
                break;
            }
        }
        return Ok(AvatarUpload {
            body: buf.freeze(),
            content_type,
        });
    }
    Err(AppError::Validation("file is required".into()))
}

fn bad_multipart(e: axum::extract::multipart::MultipartError) -> AppError {
    AppError::Validation(e.body_text())
}
