use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::normalize::{normalize, OutputFormat, DEFAULT_QUALITY, MIME_OCTET_STREAM};
use crate::{
    auth::Principal,
    config::AvatarConfig,
    error::{AppError, AppResult},
    storage::ObjectStore,
    users::{model::now_utc, repo::UserStore},
};

pub struct AvatarUpload {
    pub body: Bytes,
    /// Content type as declared by the client; the bytes are not sniffed.
    pub content_type: String,
}

/// Every upload for a user lands on the same key, replacing the last one.
pub fn avatar_key(user_id: Uuid) -> String {
    format!("users/{}/avatar.jpg", user_id)
}

/// Authorize, validate, normalize, store, then point the user at the object.
#[derive(Clone)]
pub struct AvatarPipeline {
    config: AvatarConfig,
    storage: Arc<dyn ObjectStore>,
}

impl AvatarPipeline {
    pub fn new(config: AvatarConfig, storage: Arc<dyn ObjectStore>) -> Self {
        Self { config, storage }
    }

    pub fn max_bytes(&self) -> usize {
        self.config.max_bytes()
    }

    /// Only the account owner or an ADMIN may replace an avatar.
    pub fn authorize(&self, principal: &Principal, user_id: Uuid) -> AppResult<()> {
        if principal.id != user_id && !principal.is_admin() {
            return Err(AppError::Forbidden("Not allowed".into()));
        }
        Ok(())
    }

    #[instrument(
        skip(self, store, principal, upload),
        fields(principal = %principal.id, size = upload.body.len(), content_type = %upload.content_type)
    )]
    pub async fn ingest(
        &self,
        store: &dyn UserStore,
        principal: &Principal,
        user_id: Uuid,
        upload: AvatarUpload,
    ) -> AppResult<()> {
        self.authorize(principal, user_id)?;

        if upload.body.len() > self.config.max_bytes() {
            return Err(AppError::PayloadTooLarge {
                limit_mb: self.config.max_mb,
            });
        }

        let content_type = upload.content_type.trim().to_lowercase();
        if !self.config.is_allowed(&content_type) {
            return Err(AppError::UnsupportedMediaType(content_type));
        }

        let max_side = self.config.resize_max;
        let body = upload.body;
        let (bytes, mime) = tokio::task::spawn_blocking(move || {
            normalize(&body, max_side, OutputFormat::Jpeg, DEFAULT_QUALITY)
        })
        .await
        .context("image normalization task")??;
        if mime == MIME_OCTET_STREAM {
            return Err(AppError::UnsupportedFormat("not a recognizable image".into()));
        }

        // No transaction is open while talking to object storage.
        let key = avatar_key(user_id);
        let url = self
            .storage
            .put_object(&key, bytes, mime)
            .await
            .with_context(|| format!("put_object {}", key))?;

        let mut session = store.begin().await?;
        let mut user = match session.find_by_id_for_update(user_id).await? {
            Some(u) => u,
            None => {
                drop(session);
                warn!(user_id = %user_id, "user vanished during avatar upload");
                self.discard(&key).await;
                return Err(AppError::user_not_found());
            }
        };

        let already_referenced = user.profile_picture_url.as_deref() == Some(url.as_str());
        user.profile_picture_url = Some(url);
        user.updated_at = now_utc();
        let persisted = match session.save(&user).await {
            Ok(()) => session.commit().await,
            Err(e) => Err(e),
        };
        if let Err(e) = persisted {
            // A record that already pointed at this key stays consistent with
            // the overwritten object, so only a new reference is rolled back.
            if !already_referenced {
                self.discard(&key).await;
            }
            return Err(e);
        }

        info!(user_id = %user_id, key = %key, "avatar stored");
        Ok(())
    }

    async fn discard(&self, key: &str) {
        match self.storage.delete_object(key).await {
            Ok(()) => info!(key = %key, "orphaned avatar removed"),
            Err(e) => warn!(key = %key, error = %e, "could not remove orphaned avatar"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::{
        config::AppConfig,
        images::normalize::tests::png_bytes,
        storage::fake::{Call, FakeStorage},
        users::{
            memory::MemoryUserStore,
            model::{tests::sample_user, User, UserRole},
        },
    };

    fn setup() -> (AvatarPipeline, FakeStorage, MemoryUserStore, User) {
        let storage = FakeStorage::default();
        let pipeline = AvatarPipeline::new(
            AppConfig::for_tests().avatar,
            Arc::new(storage.clone()) as Arc<dyn ObjectStore>,
        );
        let user = sample_user("owner@example.com");
        let store = MemoryUserStore::with_users([user.clone()]);
        (pipeline, storage, store, user)
    }

    fn principal(id: Uuid, role: UserRole) -> Principal {
        Principal { id, role }
    }

    fn png_upload(w: u32, h: u32) -> AvatarUpload {
        AvatarUpload {
            body: Bytes::from(png_bytes(w, h)),
            content_type: "image/png".into(),
        }
    }

    #[tokio::test]
    async fn owner_upload_is_normalized_stored_and_linked() {
        let (pipeline, storage, store, user) = setup();
        pipeline
            .ingest(&store, &principal(user.id, UserRole::Authenticated), user.id, png_upload(1024, 600))
            .await
            .unwrap();

        let key = avatar_key(user.id);
        let (bytes, ct) = storage.object(&key).expect("object stored");
        assert_eq!(ct, "image/jpeg");
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (512, 300));

        let saved = store.get(user.id).unwrap();
        assert_eq!(
            saved.profile_picture_url.as_deref(),
            Some(format!("http://fake.local/profile-pics/users/{}/avatar.jpg", user.id).as_str())
        );
    }

    #[tokio::test]
    async fn non_owner_non_admin_is_forbidden_without_touching_storage() {
        let (pipeline, storage, store, user) = setup();
        for role in [UserRole::Authenticated, UserRole::Manager, UserRole::Anonymous] {
            let err = pipeline
                .ingest(&store, &principal(Uuid::new_v4(), role), user.id, png_upload(10, 10))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Forbidden(_)));
        }
        assert!(storage.calls().is_empty());
        assert_eq!(store.commits(), 0);
    }

    #[tokio::test]
    async fn admin_may_upload_for_someone_else() {
        let (pipeline, storage, store, user) = setup();
        pipeline
            .ingest(&store, &principal(Uuid::new_v4(), UserRole::Admin), user.id, png_upload(10, 10))
            .await
            .unwrap();
        assert_eq!(storage.calls().len(), 1);
        assert!(store.get(user.id).unwrap().profile_picture_url.is_some());
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_before_normalization_or_storage() {
        let (pipeline, storage, store, user) = setup();
        // Not an image at all: reaching the normalizer would fail differently.
        let upload = AvatarUpload {
            body: Bytes::from(vec![0u8; 5 * 1024 * 1024 + 1]),
            content_type: "image/jpeg".into(),
        };
        let err = pipeline
            .ingest(&store, &principal(user.id, UserRole::Authenticated), user.id, upload)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge { limit_mb: 5 }));
        assert!(err.to_string().contains("5MB"));
        assert!(storage.calls().is_empty());
    }

    #[tokio::test]
    async fn declared_type_outside_allow_list_is_rejected() {
        let (pipeline, storage, store, user) = setup();
        let mut upload = png_upload(10, 10);
        upload.content_type = "image/gif".into();
        let err = pipeline
            .ingest(&store, &principal(user.id, UserRole::Authenticated), user.id, upload)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnsupportedMediaType(ref ct) if ct == "image/gif"));
        assert!(storage.calls().is_empty());
    }

    #[tokio::test]
    async fn declared_type_is_trusted_and_undecodable_bytes_fail_in_normalization() {
        let (pipeline, storage, store, user) = setup();
        let upload = AvatarUpload {
            body: Bytes::from_static(b"plain text pretending to be a jpeg"),
            content_type: "IMAGE/JPEG".into(),
        };
        let err = pipeline
            .ingest(&store, &principal(user.id, UserRole::Authenticated), user.id, upload)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnsupportedFormat(_)));
        assert!(storage.calls().is_empty());
    }

    #[tokio::test]
    async fn repeated_uploads_overwrite_one_key() {
        let (pipeline, storage, store, user) = setup();
        let me = principal(user.id, UserRole::Authenticated);
        pipeline.ingest(&store, &me, user.id, png_upload(800, 800)).await.unwrap();
        pipeline.ingest(&store, &me, user.id, png_upload(20, 30)).await.unwrap();

        let keys: Vec<String> = storage
            .calls()
            .into_iter()
            .map(|c| match c {
                Call::Put { key, .. } => key,
                Call::Delete { key } => panic!("unexpected delete of {key}"),
            })
            .collect();
        assert_eq!(keys, vec![avatar_key(user.id), avatar_key(user.id)]);
        assert_eq!(storage.objects.lock().unwrap().len(), 1);
        let (bytes, _) = storage.object(&avatar_key(user.id)).unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (20, 30));
    }

    #[tokio::test]
    async fn user_deleted_mid_flight_is_not_found_and_object_is_cleaned_up() {
        let (pipeline, storage, store, user) = setup();
        store.remove(user.id);
        let err = pipeline
            .ingest(&store, &principal(Uuid::new_v4(), UserRole::Admin), user.id, png_upload(10, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(
            storage.calls().last(),
            Some(&Call::Delete {
                key: avatar_key(user.id)
            })
        );
        assert!(storage.object(&avatar_key(user.id)).is_none());
    }

    #[tokio::test]
    async fn failed_commit_removes_a_newly_referenced_object() {
        let (pipeline, storage, store, user) = setup();
        store.fail_commits(true);
        let err = pipeline
            .ingest(&store, &principal(user.id, UserRole::Authenticated), user.id, png_upload(10, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert!(storage.object(&avatar_key(user.id)).is_none());
        assert!(store.get(user.id).unwrap().profile_picture_url.is_none());
    }

    #[tokio::test]
    async fn failed_commit_keeps_object_the_record_already_points_to() {
        let (pipeline, storage, store, user) = setup();
        let me = principal(user.id, UserRole::Authenticated);
        pipeline.ingest(&store, &me, user.id, png_upload(10, 10)).await.unwrap();

        store.fail_commits(true);
        assert!(pipeline.ingest(&store, &me, user.id, png_upload(12, 12)).await.is_err());
        assert!(storage.object(&avatar_key(user.id)).is_some());
        assert!(!storage.calls().iter().any(|c| matches!(c, Call::Delete { .. })));
    }

    #[tokio::test]
    async fn storage_failure_never_reaches_the_database() {
        let (pipeline, storage, store, user) = setup();
        storage.fail_put.store(true, Ordering::SeqCst);
        let err = pipeline
            .ingest(&store, &principal(user.id, UserRole::Authenticated), user.id, png_upload(10, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert_eq!(store.commits(), 0);
        assert!(store.get(user.id).unwrap().profile_picture_url.is_none());
    }
}
