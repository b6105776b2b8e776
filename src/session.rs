// src/session.rs

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::cart::Cart;
use crate::checkout::CheckoutFlow;

/// Wszystko, co sklep wie o jednym odwiedzającym. Tylko w pamięci.
#[derive(Debug, Default)]
pub struct ShopSession {
    pub cart: Cart,
    pub checkout: CheckoutFlow,
}

pub type SessionHandle = Arc<Mutex<ShopSession>>;

/// Sesja gościa razem z jej identyfikatorem (z ciasteczka lub nagłówka).
#[derive(Debug, Clone)]
pub struct GuestSession {
    pub id: Uuid,
    pub handle: SessionHandle,
}

#[derive(Clone)]
pub struct SessionStore {
    sessions: Cache<Uuid, SessionHandle>,
}

impl SessionStore {
    pub fn new(time_to_idle: Duration) -> Self {
        let sessions = Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(time_to_idle)
            .build();
        Self { sessions }
    }

    pub async fn get_or_create(&self, id: Uuid) -> GuestSession {
        let handle = self
            .sessions
            .get_with(id, async move {
                tracing::debug!("Nowa sesja gościa: {}", id);
                Arc::new(Mutex::new(ShopSession::default()))
            })
            .await;
        GuestSession { id, handle }
    }

    pub async fn get(&self, id: Uuid) -> Option<GuestSession> {
        self.sessions
            .get(&id)
            .await
            .map(|handle| GuestSession { id, handle })
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("entries", &self.sessions.entry_count())
            .finish()
    }
}
