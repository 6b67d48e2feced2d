//! In-memory `UserStore` for tests.
//!
//! A session works on a snapshot taken at `begin` and publishes it on
//! `commit`, so an abandoned session leaves the shared map untouched.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    model::User,
    repo::{UserSession, UserStore},
};
use crate::error::{AppError, AppResult};

#[derive(Clone, Default)]
pub struct MemoryUserStore {
    users: Arc<Mutex<HashMap<Uuid, User>>>,
    fail_commit: Arc<AtomicBool>,
    commits: Arc<AtomicUsize>,
    registration_locks: Arc<AtomicUsize>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let store = Self::new();
        {
            let mut map = store.users.lock().unwrap();
            for u in users {
                map.insert(u.id, u);
            }
        }
        store
    }

    pub fn get(&self, id: Uuid) -> Option<User> {
        self.users.lock().unwrap().get(&id).cloned()
    }

    pub fn get_by_email(&self, email: &str) -> Option<User> {
        self.users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.email == email)
            .cloned()
    }

    pub fn remove(&self, id: Uuid) {
        self.users.lock().unwrap().remove(&id);
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn registration_locks(&self) -> usize {
        self.registration_locks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn begin(&self) -> AppResult<Box<dyn UserSession>> {
        let snapshot = self.users.lock().unwrap().clone();
        Ok(Box::new(MemorySession {
            store: self.clone(),
            users: snapshot,
        }))
    }
}

pub struct MemorySession {
    store: MemoryUserStore,
    users: HashMap<Uuid, User>,
}

impl MemorySession {
    fn check_unique(&self, user: &User) -> AppResult<()> {
        let clash = self
            .users
            .values()
            .any(|u| u.id != user.id && (u.email == user.email || u.nickname == user.nickname));
        if clash {
            return Err(AppError::Conflict("Email or nickname already exists".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl UserSession for MemorySession {
    async fn find_by_id(&mut self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.users.get(&id).cloned())
    }

    async fn find_by_id_for_update(&mut self, id: Uuid) -> AppResult<Option<User>> {
        self.find_by_id(id).await
    }

    async fn find_by_email(&mut self, email: &str) -> AppResult<Option<User>> {
        Ok(self.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_email_for_update(&mut self, email: &str) -> AppResult<Option<User>> {
        self.find_by_email(email).await
    }

    async fn find_by_nickname(&mut self, nickname: &str) -> AppResult<Option<User>> {
        Ok(self.users.values().find(|u| u.nickname == nickname).cloned())
    }

    async fn insert(&mut self, user: &User) -> AppResult<()> {
        if self.users.contains_key(&user.id) {
            return Err(AppError::Conflict("duplicate id".into()));
        }
        self.check_unique(user)?;
        self.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn save(&mut self, user: &User) -> AppResult<()> {
        self.check_unique(user)?;
        if let Some(slot) = self.users.get_mut(&user.id) {
            *slot = user.clone();
        }
        Ok(())
    }

    async fn delete(&mut self, id: Uuid) -> AppResult<bool> {
        Ok(self.users.remove(&id).is_some())
    }

    async fn list(&mut self, skip: i64, limit: i64) -> AppResult<Vec<User>> {
        let mut all: Vec<User> = self.users.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(all
            .into_iter()
            .skip(skip.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count(&mut self) -> AppResult<i64> {
        Ok(self.users.len() as i64)
    }

    async fn lock_registrations(&mut self) -> AppResult<()> {
        self.store.registration_locks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemorySession { store, users } = *self;
        if store.fail_commit.load(Ordering::SeqCst) {
            return Err(AppError::Internal(anyhow::anyhow!("commit failed")));
        }
        *store.users.lock().unwrap() = users;
        store.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
