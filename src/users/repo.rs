use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{model::User, repo_types::UserRow};
use crate::{db::UtcDateTime, error::AppResult};

/// Opens one transactional session per unit of work.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn begin(&self) -> AppResult<Box<dyn UserSession>>;
}

/// A transaction over the users table. Dropping it without `commit`
/// discards every change made through it.
#[async_trait]
pub trait UserSession: Send {
    async fn find_by_id(&mut self, id: Uuid) -> AppResult<Option<User>>;
    /// Same as `find_by_id` but holds a row lock until the session ends.
    async fn find_by_id_for_update(&mut self, id: Uuid) -> AppResult<Option<User>>;
    async fn find_by_email(&mut self, email: &str) -> AppResult<Option<User>>;
    /// Same as `find_by_email` but holds a row lock until the session ends.
    async fn find_by_email_for_update(&mut self, email: &str) -> AppResult<Option<User>>;
    async fn find_by_nickname(&mut self, nickname: &str) -> AppResult<Option<User>>;
    async fn insert(&mut self, user: &User) -> AppResult<()>;
    async fn save(&mut self, user: &User) -> AppResult<()>;
    /// Returns false when no row had that id.
    async fn delete(&mut self, id: Uuid) -> AppResult<bool>;
    async fn list(&mut self, skip: i64, limit: i64) -> AppResult<Vec<User>>;
    async fn count(&mut self) -> AppResult<i64>;
    /// Serializes self-registrations until the session ends, so only one of
    /// them can observe an empty table.
    async fn lock_registrations(&mut self) -> AppResult<()>;
    async fn commit(self: Box<Self>) -> AppResult<()>;
}

/// Advisory lock key taken by `lock_registrations`.
const REGISTRATION_LOCK_KEY: i64 = 0x7573_6572_7265_6721;

const USER_COLUMNS: &str = r#"
    id, nickname, email, first_name, last_name, bio, profile_picture_url,
    linkedin_profile_url, github_profile_url, role, is_professional,
    professional_status_updated_at, last_login_at, failed_login_attempts,
    is_locked, email_verified, hashed_password, created_at, updated_at
"#;

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn begin(&self) -> AppResult<Box<dyn UserSession>> {
        let tx = self.db.begin().await?;
        Ok(Box::new(PgUserSession { tx }))
    }
}

pub struct PgUserSession {
    tx: Transaction<'static, Postgres>,
}

impl PgUserSession {
    async fn fetch_one_where(
        &mut self,
        column: &str,
        value: &str,
        for_update: bool,
    ) -> AppResult<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {column} = $1{}",
            if for_update { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(User::from))
    }

    async fn fetch_by_id(&mut self, id: Uuid, for_update: bool) -> AppResult<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1{}",
            if for_update { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(User::from))
    }
}

#[async_trait]
impl UserSession for PgUserSession {
    async fn find_by_id(&mut self, id: Uuid) -> AppResult<Option<User>> {
        self.fetch_by_id(id, false).await
    }

    async fn find_by_id_for_update(&mut self, id: Uuid) -> AppResult<Option<User>> {
        self.fetch_by_id(id, true).await
    }

    async fn find_by_email(&mut self, email: &str) -> AppResult<Option<User>> {
        self.fetch_one_where("email", email, false).await
    }

    async fn find_by_email_for_update(&mut self, email: &str) -> AppResult<Option<User>> {
        self.fetch_one_where("email", email, true).await
    }

    async fn find_by_nickname(&mut self, nickname: &str) -> AppResult<Option<User>> {
        self.fetch_one_where("nickname", nickname, false).await
    }

    async fn insert(&mut self, user: &User) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (
                id, nickname, email, first_name, last_name, bio, profile_picture_url,
                linkedin_profile_url, github_profile_url, role, is_professional,
                professional_status_updated_at, last_login_at, failed_login_attempts,
                is_locked, email_verified, hashed_password, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(user.id)
        .bind(&user.nickname)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.bio)
        .bind(&user.profile_picture_url)
        .bind(&user.linkedin_profile_url)
        .bind(&user.github_profile_url)
        .bind(user.role)
        .bind(user.is_professional)
        .bind(user.professional_status_updated_at.map(UtcDateTime::from))
        .bind(user.last_login_at.map(UtcDateTime::from))
        .bind(user.failed_login_attempts)
        .bind(user.is_locked)
        .bind(user.email_verified)
        .bind(&user.hashed_password)
        .bind(UtcDateTime::from(user.created_at))
        .bind(UtcDateTime::from(user.updated_at))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn save(&mut self, user: &User) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE users SET
                nickname = $2, email = $3, first_name = $4, last_name = $5, bio = $6,
                profile_picture_url = $7, linkedin_profile_url = $8, github_profile_url = $9,
                role = $10, is_professional = $11, professional_status_updated_at = $12,
                last_login_at = $13, failed_login_attempts = $14, is_locked = $15,
                email_verified = $16, hashed_password = $17, updated_at = $18
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.nickname)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.bio)
        .bind(&user.profile_picture_url)
        .bind(&user.linkedin_profile_url)
        .bind(&user.github_profile_url)
        .bind(user.role)
        .bind(user.is_professional)
        .bind(user.professional_status_updated_at.map(UtcDateTime::from))
        .bind(user.last_login_at.map(UtcDateTime::from))
        .bind(user.failed_login_attempts)
        .bind(user.is_locked)
        .bind(user.email_verified)
        .bind(&user.hashed_password)
        .bind(UtcDateTime::from(user.updated_at))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete(&mut self, id: Uuid) -> AppResult<bool> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn list(&mut self, skip: i64, limit: i64) -> AppResult<Vec<User>> {
        let sql =
            format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC, id ASC LIMIT $1 OFFSET $2");
        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .bind(limit)
            .bind(skip)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn count(&mut self) -> AppResult<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(n)
    }

    async fn lock_registrations(&mut self) -> AppResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(REGISTRATION_LOCK_KEY)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
