//! Session store - durable key/value persistence of the signed-in user.
//!
//! The store itself has no logic; the helpers at the bottom map the three
//! well-known keys onto a [`Session`]. A corrupted profile blob is logged and
//! treated as absent, never surfaced as an error.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use knock_protocol::{Profile, Session};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::StoreError;

pub const TOKEN_KEY: &str = "token";
pub const USER_ID_KEY: &str = "userId";
pub const PROFILE_KEY: &str = "userProfile";

/// Key/value persistence for session data. Writes are last-write-wins.
pub trait SessionStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    fn set(&self, key: &str, value: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn clear(&self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local store, used by tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_values<T>(&self, f: impl FnOnce(&mut HashMap<String, String>) -> T) -> T {
        let mut guard = self.values.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.with_values(|values| values.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_values(|values| values.insert(key.to_string(), value.to_string()));
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        self.with_values(|values| values.remove(key));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SQLite store
// ---------------------------------------------------------------------------

/// SQLite-backed store. Every call runs on `spawn_blocking`.
#[derive(Clone)]
pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteSessionStore {
    /// Open (or create) the database at `db_path` and ensure the `kv` table.
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref().to_path_buf();
        let path = db_path.clone();
        let conn = tokio::task::spawn_blocking(move || open_connection(&path)).await??;
        debug!(
            component = "store",
            event = "store.opened",
            path = %db_path.display(),
            "Session store opened"
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = self.conn.clone();
        let result = tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&guard)
        })
        .await??;
        Ok(result)
    }
}

fn open_connection(path: &Path) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;
         CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
         );",
    )?;
    Ok(conn)
}

impl SessionStore for SqliteSessionStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.run(move |conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = ?2",
                params![key, value],
            )
            .map(|_| ())
        })
        .await
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        self.run(move |conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map(|_| ())
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Session helpers
// ---------------------------------------------------------------------------

/// Read the persisted session. A missing token means unauthenticated.
pub async fn load_session<S: SessionStore>(store: &S) -> Result<Session, StoreError> {
    let token = store.get(TOKEN_KEY).await?;
    let user_id = store.get(USER_ID_KEY).await?;
    let profile = load_profile(store).await?;
    Ok(Session {
        token,
        user_id,
        profile,
    })
}

/// Read the cached profile; a blob that fails to parse counts as absent.
pub async fn load_profile<S: SessionStore>(store: &S) -> Result<Option<Profile>, StoreError> {
    let Some(raw) = store.get(PROFILE_KEY).await? else {
        return Ok(None);
    };
    match serde_json::from_str::<Profile>(&raw) {
        Ok(profile) => Ok(Some(profile)),
        Err(e) => {
            warn!(
                component = "store",
                event = "store.profile_invalid",
                error = %e,
                "Missing or invalid profile data"
            );
            Ok(None)
        }
    }
}

/// Persist the credentials from a successful handshake.
pub async fn save_credentials<S: SessionStore>(
    store: &S,
    token: &str,
    user_id: &str,
) -> Result<(), StoreError> {
    store.set(TOKEN_KEY, token).await?;
    store.set(USER_ID_KEY, user_id).await
}

pub async fn save_profile<S: SessionStore>(store: &S, profile: &Profile) -> Result<(), StoreError> {
    let json = serde_json::to_string(profile)?;
    store.set(PROFILE_KEY, &json).await
}

/// Remove every session key (explicit sign-out).
pub async fn clear_session<S: SessionStore>(store: &S) -> Result<(), StoreError> {
    store.clear(TOKEN_KEY).await?;
    store.clear(USER_ID_KEY).await?;
    store.clear(PROFILE_KEY).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Profile {
        Profile {
            display_name: "Ada Lovelace".to_string(),
            avatar_url: "https://img/ada.png".to_string(),
        }
    }

    #[tokio::test]
    async fn empty_store_is_unauthenticated() {
        let store = MemorySessionStore::new();
        let session = load_session(&store).await.unwrap();
        assert_eq!(session, Session::default());
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn corrupted_profile_is_treated_as_absent() {
        let store = MemorySessionStore::new();
        save_credentials(&store, "tok", "U1").await.unwrap();
        store.set(PROFILE_KEY, "{not json").await.unwrap();

        let session = load_session(&store).await.unwrap();
        assert!(session.is_authenticated());
        assert_eq!(session.user_id.as_deref(), Some("U1"));
        assert_eq!(session.profile, None);
    }

    #[tokio::test]
    async fn clear_session_removes_all_keys() {
        let store = MemorySessionStore::new();
        save_credentials(&store, "tok", "U1").await.unwrap();
        save_profile(&store, &profile()).await.unwrap();

        clear_session(&store).await.unwrap();

        assert_eq!(load_session(&store).await.unwrap(), Session::default());
    }

    #[tokio::test]
    async fn sqlite_round_trip_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("knock.db");

        {
            let store = SqliteSessionStore::open(&db_path).await.unwrap();
            assert_eq!(store.path(), db_path.as_path());
            save_credentials(&store, "xoxp-1", "U1").await.unwrap();
            save_profile(&store, &profile()).await.unwrap();
        }

        let reopened = SqliteSessionStore::open(&db_path).await.unwrap();
        let session = load_session(&reopened).await.unwrap();
        assert_eq!(
            session,
            Session {
                token: Some("xoxp-1".to_string()),
                user_id: Some("U1".to_string()),
                profile: Some(profile()),
            }
        );
    }

    #[tokio::test]
    async fn sqlite_set_overwrites_and_clear_removes() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteSessionStore::open(dir.path().join("knock.db"))
            .await
            .unwrap();

        store.set(TOKEN_KEY, "old").await.unwrap();
        store.set(TOKEN_KEY, "new").await.unwrap();
        assert_eq!(store.get(TOKEN_KEY).await.unwrap().as_deref(), Some("new"));

        store.clear(TOKEN_KEY).await.unwrap();
        assert_eq!(store.get(TOKEN_KEY).await.unwrap(), None);
    }
}
