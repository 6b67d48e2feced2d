use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    auth::{
        jwt::TokenService, lockout::AccountLockoutPolicy, password::PasswordHasher,
        services::AuthenticationFlow,
    },
    config::AppConfig,
    db,
    images::services::AvatarPipeline,
    storage::{ObjectStore, S3Storage},
    users::repo::{PgUserStore, UserStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn UserStore>,
    pub tokens: TokenService,
    pub hasher: PasswordHasher,
    pub auth: AuthenticationFlow,
    pub avatars: AvatarPipeline,
}

impl FromRef<AppState> for TokenService {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

impl AppState {
    /// Connects to Postgres and object storage. Returns the pool as well so
    /// the caller can run migrations on it.
    pub async fn init(config: AppConfig) -> anyhow::Result<(Self, sqlx::PgPool)> {
        let pool = db::connect(&config.database_url).await?;

        let s3 = S3Storage::new(&config.s3).await?;
        s3.ensure_bucket().await;

        let store = Arc::new(PgUserStore::new(pool.clone())) as Arc<dyn UserStore>;
        let storage = Arc::new(s3) as Arc<dyn ObjectStore>;
        Ok((Self::from_parts(config, store, storage)?, pool))
    }

    pub fn from_parts(
        config: AppConfig,
        store: Arc<dyn UserStore>,
        storage: Arc<dyn ObjectStore>,
    ) -> anyhow::Result<Self> {
        let tokens = TokenService::new(&config.jwt)?;
        let hasher = PasswordHasher::new();
        let auth = AuthenticationFlow::new(
            hasher.clone(),
            tokens.clone(),
            AccountLockoutPolicy::new(config.auth.max_login_attempts),
        );
        let avatars = AvatarPipeline::new(config.avatar.clone(), storage);

        Ok(Self {
            config: Arc::new(config),
            store,
            tokens,
            hasher,
            auth,
            avatars,
        })
    }

    #[cfg(test)]
    pub fn fake() -> (
        Self,
        crate::users::memory::MemoryUserStore,
        crate::storage::fake::FakeStorage,
    ) {
        let store = crate::users::memory::MemoryUserStore::new();
        let storage = crate::storage::fake::FakeStorage::default();
        let state = Self::from_parts(
            AppConfig::for_tests(),
            Arc::new(store.clone()),
            Arc::new(storage.clone()),
        )
        .expect("test config is valid");
        (state, store, storage)
    }
}
