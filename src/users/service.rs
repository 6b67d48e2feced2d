use rand::Rng;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    dto::{NewUser, UserUpdate},
    model::{lock_account, now_utc, unlock_account, update_professional_status, User, UserRole},
    repo::UserSession,
};
use crate::{
    auth::password::PasswordHasher,
    error::{AppError, AppResult},
};

/// Self-registration. The first account in an empty table becomes ADMIN,
/// everyone after that is AUTHENTICATED; a requested role is ignored.
#[instrument(skip(session, hasher, input), fields(email = %input.email))]
pub async fn register(
    session: &mut dyn UserSession,
    hasher: &PasswordHasher,
    input: NewUser,
) -> AppResult<User> {
    session.lock_registrations().await?;
    let role = if session.count().await? == 0 {
        UserRole::Admin
    } else {
        UserRole::Authenticated
    };
    let user = insert_new(session, hasher, input, role).await?;
    info!(user_id = %user.id, role = %user.role, "user registered");
    Ok(user)
}

/// Administrative create with an explicit role.
#[instrument(skip(session, hasher, input), fields(email = %input.email))]
pub async fn create_user(
    session: &mut dyn UserSession,
    hasher: &PasswordHasher,
    input: NewUser,
) -> AppResult<User> {
    let role = input.role.unwrap_or(UserRole::Authenticated);
    if role == UserRole::Anonymous {
        return Err(AppError::Validation("ANONYMOUS is not an account role".into()));
    }
    let user = insert_new(session, hasher, input, role).await?;
    info!(user_id = %user.id, role = %user.role, "user created");
    Ok(user)
}

async fn insert_new(
    session: &mut dyn UserSession,
    hasher: &PasswordHasher,
    input: NewUser,
    role: UserRole,
) -> AppResult<User> {
    let input = input.validated()?;

    if session.find_by_email(&input.email).await?.is_some() {
        return Err(AppError::Conflict("Email already exists".into()));
    }
    let nickname = match input.nickname {
        Some(nick) => {
            if session.find_by_nickname(&nick).await?.is_some() {
                return Err(AppError::Conflict("Nickname already exists".into()));
            }
            nick
        }
        None => generate_nickname(session).await?,
    };

    let hash = hasher.hash(&input.password)?;
    let mut user = User::new(nickname, input.email, hash, role);
    user.first_name = input.first_name;
    user.last_name = input.last_name;
    user.bio = input.bio;
    user.linkedin_profile_url = input.linkedin_profile_url;
    user.github_profile_url = input.github_profile_url;

    session.insert(&user).await?;
    Ok(user)
}

async fn generate_nickname(session: &mut dyn UserSession) -> AppResult<String> {
    for _ in 0..5 {
        let candidate = format!("user_{:08x}", rand::thread_rng().gen::<u32>());
        if session.find_by_nickname(&candidate).await?.is_none() {
            return Ok(candidate);
        }
    }
    Err(AppError::Conflict("Could not allocate a nickname".into()))
}

pub async fn get_user(session: &mut dyn UserSession, id: Uuid) -> AppResult<User> {
    session
        .find_by_id(id)
        .await?
        .ok_or_else(AppError::user_not_found)
}

#[instrument(skip(session, update))]
pub async fn update_user(
    session: &mut dyn UserSession,
    id: Uuid,
    update: UserUpdate,
) -> AppResult<User> {
    let update = update.validated()?;
    let mut user = session
        .find_by_id_for_update(id)
        .await?
        .ok_or_else(AppError::user_not_found)?;

    if let Some(email) = update.email {
        if email != user.email {
            if session.find_by_email(&email).await?.is_some() {
                return Err(AppError::Conflict("Email already exists".into()));
            }
            user.email = email;
            user.email_verified = false;
        }
    }
    if let Some(nick) = update.nickname {
        if nick != user.nickname {
            if session.find_by_nickname(&nick).await?.is_some() {
                return Err(AppError::Conflict("Nickname already exists".into()));
            }
            user.nickname = nick;
        }
    }
    let now = now_utc();
    if let Some(v) = update.first_name {
        user.first_name = Some(v);
    }
    if let Some(v) = update.last_name {
        user.last_name = Some(v);
    }
    if let Some(v) = update.bio {
        user.bio = Some(v);
    }
    if let Some(v) = update.profile_picture_url {
        user.profile_picture_url = Some(v);
    }
    if let Some(v) = update.linkedin_profile_url {
        user.linkedin_profile_url = Some(v);
    }
    if let Some(v) = update.github_profile_url {
        user.github_profile_url = Some(v);
    }
    if let Some(status) = update.is_professional {
        if status != user.is_professional {
            user = update_professional_status(user, status, now);
        }
    }
    user.updated_at = now;
    session.save(&user).await?;
    Ok(user)
}

#[instrument(skip(session))]
pub async fn delete_user(session: &mut dyn UserSession, id: Uuid) -> AppResult<()> {
    if !session.delete(id).await? {
        return Err(AppError::user_not_found());
    }
    info!(user_id = %id, "user deleted");
    Ok(())
}

pub async fn list_users(
    session: &mut dyn UserSession,
    skip: i64,
    limit: i64,
) -> AppResult<(Vec<User>, i64)> {
    let total = session.count().await?;
    let users = session.list(skip, limit).await?;
    Ok((users, total))
}

/// Explicit administrative lock or unlock.
#[instrument(skip(session))]
pub async fn set_locked(session: &mut dyn UserSession, id: Uuid, locked: bool) -> AppResult<User> {
    let user = session
        .find_by_id_for_update(id)
        .await?
        .ok_or_else(AppError::user_not_found)?;
    let mut user = if locked {
        lock_account(user)
    } else {
        unlock_account(user)
    };
    user.updated_at = now_utc();
    session.save(&user).await?;
    info!(user_id = %id, locked, "account lock changed");
    Ok(user)
}

#[instrument(skip(session))]
pub async fn set_role(session: &mut dyn UserSession, id: Uuid, role: UserRole) -> AppResult<User> {
    if role == UserRole::Anonymous {
        return Err(AppError::Validation("ANONYMOUS is not an account role".into()));
    }
    let mut user = session
        .find_by_id_for_update(id)
        .await?
        .ok_or_else(AppError::user_not_found)?;
    user.role = role;
    user.updated_at = now_utc();
    session.save(&user).await?;
    info!(user_id = %id, %role, "role updated");
    Ok(user)
}
