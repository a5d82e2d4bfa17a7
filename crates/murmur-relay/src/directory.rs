//! Registry of connected principals.
//!
//! All mutations take the write lock, so registration, removal and the
//! broadcasts they trigger are linearized. Frames are pushed with
//! `try_send`; a slow connection never blocks the directory.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use murmur_common::{is_valid_name, normalize_name, PrincipalInfo, ServerFrame};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::IdentityError;

/// Outbound side of one client connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::Sender<ServerFrame>,
}

impl ConnectionHandle {
    /// Wrap a connection's outbox under a fresh connection id.
    pub fn new(tx: mpsc::Sender<ServerFrame>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    /// Identifies this connection, so a stale disconnect cannot evict a
    /// newer registration of the same name.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a frame without waiting. Fails if the outbox is full or closed.
    pub fn try_send(&self, frame: ServerFrame) -> bool {
        self.tx.try_send(frame).is_ok()
    }
}

/// A registered name and its live connection.
#[derive(Debug, Clone)]
pub struct Principal {
    pub name: String,
    pub public_key: String,
    pub handle: ConnectionHandle,
    pub registered_at: DateTime<Utc>,
}

/// Name registry shared by the HTTP and WebSocket handlers.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    principals: Arc<RwLock<HashMap<String, Principal>>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `public_key` and `handle`.
    ///
    /// On success the new principal receives `accepted` followed by the
    /// active list, and every other principal receives the updated list.
    /// Returns the normalized name.
    pub async fn register(
        &self,
        name: &str,
        public_key: &str,
        handle: ConnectionHandle,
    ) -> Result<String, IdentityError> {
        let name = normalize_name(name);
        if !is_valid_name(&name) {
            return Err(IdentityError::InvalidName(name));
        }
        let public_key = murmur_crypto::PublicKey::import(public_key)
            .map_err(|_| IdentityError::MalformedKey)?
            .export();

        let mut principals = self.principals.write().await;
        if principals.contains_key(&name) {
            return Err(IdentityError::DuplicateIdentity(name));
        }

        if !handle.try_send(ServerFrame::Accepted { name: name.clone() }) {
            warn!("could not queue acceptance for {}", name);
        }
        principals.insert(
            name.clone(),
            Principal {
                name: name.clone(),
                public_key,
                handle,
                registered_at: Utc::now(),
            },
        );
        broadcast(&principals);

        info!("registered principal {} ({} active)", name, principals.len());
        Ok(name)
    }

    /// Remove `name` if it is still bound to `connection_id`. Idempotent.
    pub async fn remove(&self, name: &str, connection_id: Uuid) -> bool {
        let name = normalize_name(name);
        let mut principals = self.principals.write().await;
        let owned = principals
            .get(&name)
            .is_some_and(|principal| principal.handle.id() == connection_id);
        if !owned {
            return false;
        }

        principals.remove(&name);
        broadcast(&principals);
        info!("removed principal {} ({} active)", name, principals.len());
        true
    }

    /// Published public key of `name`.
    pub async fn lookup(&self, name: &str) -> Option<String> {
        let name = normalize_name(name);
        self.principals
            .read()
            .await
            .get(&name)
            .map(|principal| principal.public_key.clone())
    }

    /// Connection currently bound to `name`.
    pub async fn handle(&self, name: &str) -> Option<ConnectionHandle> {
        let name = normalize_name(name);
        self.principals
            .read()
            .await
            .get(&name)
            .map(|principal| principal.handle.clone())
    }

    /// Whether `name` is registered.
    pub async fn contains(&self, name: &str) -> bool {
        let name = normalize_name(name);
        self.principals.read().await.contains_key(&name)
    }

    /// Active principals sorted by name.
    pub async fn principals(&self) -> Vec<PrincipalInfo> {
        snapshot(&*self.principals.read().await)
    }

    /// Number of registered principals.
    pub async fn len(&self) -> usize {
        self.principals.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.principals.read().await.is_empty()
    }
}

fn snapshot(principals: &HashMap<String, Principal>) -> Vec<PrincipalInfo> {
    let mut list: Vec<PrincipalInfo> = principals
        .values()
        .map(|principal| PrincipalInfo {
            name: principal.name.clone(),
            public_key: principal.public_key.clone(),
        })
        .collect();
    list.sort_by(|a, b| a.name.cmp(&b.name));
    list
}

fn broadcast(principals: &HashMap<String, Principal>) {
    let frame = ServerFrame::Principals {
        principals: snapshot(principals),
    };
    for principal in principals.values() {
        if !principal.handle.try_send(frame.clone()) {
            debug!("dropped principal list for {}", principal.name);
        }
    }
}
