use std::{str::FromStr, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use postbox::{sqlite::SqliteQueueStore, NewMessage};
use sqlx::sqlite::SqliteConnectOptions;
use tempfile::TempDir;

pub const WAIT: Duration = Duration::from_secs(10);

/// A store on a fresh database file. Every pooled connection must see the
/// same database, so `sqlite::memory:` won't do.
pub struct TestDb {
    pub store: SqliteQueueStore,
    _dir: TempDir,
}

pub async fn test_db() -> anyhow::Result<TestDb> {
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}", dir.path().join("queue.db").display());
    let store = SqliteQueueStore::connect_with(SqliteConnectOptions::from_str(&url)?).await?;
    Ok(TestDb { store, _dir: dir })
}

#[allow(dead_code)]
pub fn message(enqueue_time: DateTime<Utc>, payload: &'static [u8]) -> NewMessage {
    NewMessage {
        message_id: None,
        enqueue_time,
        type_name: "test.Message".to_string(),
        revision: 1,
        payload: Bytes::from_static(payload),
    }
}
