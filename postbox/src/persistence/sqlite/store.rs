use std::{str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};
use tracing::debug;
use uuid::Uuid;

use super::{
    error::{decode_error, SqlError},
    reservation::{Lease, SqliteReservation},
};
use crate::{
    constants::DEFAULT_RESERVATION_LEASE,
    model::{GlobalMessage, MessageId, NewMessage, SubscriptionId, SubscriptionQueueItem},
    persistence::MessageQueueStore,
    util::{from_nanos, to_nanos},
};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// How long a writer waits for another connection's write to finish before
/// giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Lease the next due item of a subscription, fewest attempts first. Rows
/// under a live lease are skipped.
const DEQUEUE_NEXT: &str = r#"
    UPDATE subscription_queue
    SET reservation_token = ?3,
        reserved_until    = ?4
    WHERE subscription_id = ?1
      AND message_id = (
          SELECT message_id
          FROM subscription_queue
          WHERE subscription_id = ?1
            AND due_time <= ?2
            AND (reserved_until IS NULL OR reserved_until <= ?2)
          ORDER BY dequeue_attempts, due_time, enqueue_time, message_id
          LIMIT 1
      )
    RETURNING subscription_id, message_id, enqueue_time, due_time, dequeue_attempts, type_name, revision, payload
"#;

/// Insert or overwrite one queue row, but only while its subscription
/// exists. An overwritten row loses any lease on it.
const UPSERT_ITEM: &str = r#"
    INSERT OR REPLACE INTO subscription_queue
        (subscription_id, message_id, enqueue_time, due_time, dequeue_attempts, type_name, revision, payload)
    SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
    WHERE EXISTS (SELECT 1 FROM subscription WHERE subscription_id = ?1)
"#;

/// A queue store backed by sqlite. Fan-out and backfill are performed by
/// the `message_queue_fan_out` and `subscription_backfill` triggers.
///
/// A dequeue leases its row and commits straight away, so reservations
/// never hold the database write lock. Concurrent dequeuers skip leased
/// rows; a lease which lapses (the holder died) makes its row available
/// again.
#[derive(Debug, Clone)]
pub struct SqliteQueueStore {
    /// Connection pool
    pool: SqlitePool,
    lease: Duration,
}

impl SqliteQueueStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            lease: DEFAULT_RESERVATION_LEASE,
        }
    }

    /// How long a reservation may take before its row can be claimed by
    /// another dequeue. Defaults to five minutes.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Open (creating if needed) the database at `url` in WAL mode and run
    /// the migrations.
    pub async fn connect(url: &str) -> Result<Self, SqlError> {
        let options = SqliteConnectOptions::from_str(url)?;
        Self::connect_with(options).await
    }

    pub async fn connect_with(options: SqliteConnectOptions) -> Result<Self, SqlError> {
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Create the queue tables and triggers if they don't exist yet.
    pub async fn migrate(&self) -> Result<(), SqlError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The lease of a row claimed at `as_of` runs out here.
    fn lease_end(&self, as_of: DateTime<Utc>) -> i64 {
        chrono::Duration::from_std(self.lease)
            .ok()
            .and_then(|lease| as_of.checked_add_signed(lease))
            .map_or(i64::MAX, to_nanos)
    }
}

#[async_trait::async_trait]
impl MessageQueueStore for SqliteQueueStore {
    type Error = SqlError;
    type Reservation = SqliteReservation;

    async fn enqueue(
        &self,
        message: NewMessage,
        due_time: DateTime<Utc>,
    ) -> Result<MessageId, Self::Error> {
        let message = GlobalMessage::prepare(message, due_time);
        // a single statement: the fan-out trigger commits (or fails) with
        // it, and only fires if the id isn't logged already
        sqlx::query(
            r#"
                INSERT OR IGNORE INTO message_queue (message_id, enqueue_time, due_time, type_name, revision, payload)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(message.message_id.as_bytes().as_slice())
        .bind(to_nanos(message.enqueue_time))
        .bind(to_nanos(message.due_time))
        .bind(message.type_name.as_str())
        .bind(message.revision)
        .bind(message.payload.as_ref())
        .execute(&self.pool)
        .await?;
        Ok(message.message_id)
    }

    async fn enqueue_to_subscription(
        &self,
        subscription_id: SubscriptionId,
        item: SubscriptionQueueItem,
    ) -> Result<(), Self::Error> {
        let result = bind_item(sqlx::query(UPSERT_ITEM), subscription_id, &item)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            debug!("Subscription {} not found, dropping item", subscription_id);
        }
        Ok(())
    }

    async fn create_subscription(
        &self,
        subscription_id: SubscriptionId,
        creation_time: DateTime<Utc>,
    ) -> Result<bool, Self::Error> {
        // the backfill trigger only fires if a row is actually inserted
        let result = sqlx::query(
            r#"
                INSERT OR IGNORE INTO subscription (subscription_id, creation_time)
                VALUES (?1, ?2)
            "#,
        )
        .bind(subscription_id.as_bytes().as_slice())
        .bind(to_nanos(creation_time))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<bool, Self::Error> {
        let mut tx = self.pool.begin().await?;
        // the foreign key cascades too, but don't depend on the pragma
        sqlx::query(
            r#"
                DELETE FROM subscription_queue
                WHERE subscription_id = ?1
            "#,
        )
        .bind(subscription_id.as_bytes().as_slice())
        .execute(&mut *tx)
        .await?;
        let result = sqlx::query(
            r#"
                DELETE FROM subscription
                WHERE subscription_id = ?1
            "#,
        )
        .bind(subscription_id.as_bytes().as_slice())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn dequeue(
        &self,
        subscription_id: SubscriptionId,
        as_of: DateTime<Utc>,
    ) -> Result<Self::Reservation, Self::Error> {
        let token = Uuid::now_v7();
        // one statement: selecting and claiming the row can't interleave
        // with another dequeue
        let maybe_row = sqlx::query(DEQUEUE_NEXT)
            .bind(subscription_id.as_bytes().as_slice())
            .bind(to_nanos(as_of))
            .bind(token.as_bytes().as_slice())
            .bind(self.lease_end(as_of))
            .fetch_optional(&self.pool)
            .await?;
        match maybe_row {
            Some(row) => {
                let item = item_from_row(&row)?;
                let lease = Lease::new(
                    self.pool.clone(),
                    item.subscription_id,
                    item.message_id,
                    token,
                );
                Ok(SqliteReservation::reserved(item, lease))
            }
            None => Ok(SqliteReservation::empty()),
        }
    }

    async fn queue_depth(&self, subscription_id: SubscriptionId) -> Result<u64, Self::Error> {
        let row = sqlx::query(
            r#"
                SELECT COUNT(*) AS depth
                FROM subscription_queue
                WHERE subscription_id = ?1
                  AND (reserved_until IS NULL OR reserved_until <= ?2)
            "#,
        )
        .bind(subscription_id.as_bytes().as_slice())
        .bind(to_nanos(Utc::now()))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("depth").max(0) as u64)
    }

    async fn purge_messages(&self, older_than: DateTime<Utc>) -> Result<u64, Self::Error> {
        let result = sqlx::query(
            r#"
                DELETE FROM message_queue
                WHERE enqueue_time < ?1
            "#,
        )
        .bind(to_nanos(older_than))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

type SqliteQuery<'q> =
    sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

/// Bind the parameters of [UPSERT_ITEM].
fn bind_item<'q>(
    query: SqliteQuery<'q>,
    subscription_id: SubscriptionId,
    item: &'q SubscriptionQueueItem,
) -> SqliteQuery<'q> {
    query
        .bind(subscription_id.as_bytes().to_vec())
        .bind(item.message_id.as_bytes().as_slice())
        .bind(to_nanos(item.enqueue_time))
        .bind(to_nanos(item.due_time))
        .bind(item.dequeue_attempts)
        .bind(item.type_name.as_str())
        .bind(item.revision)
        .bind(item.payload.as_ref())
}

fn item_from_row(row: &SqliteRow) -> Result<SubscriptionQueueItem, SqlError> {
    let subscription_id = Uuid::from_slice(&row.try_get::<Vec<u8>, _>("subscription_id")?)
        .map_err(decode_error)?;
    let message_id =
        Uuid::from_slice(&row.try_get::<Vec<u8>, _>("message_id")?).map_err(decode_error)?;
    Ok(SubscriptionQueueItem {
        subscription_id: subscription_id.into(),
        message_id: message_id.into(),
        enqueue_time: from_nanos(row.try_get("enqueue_time")?),
        due_time: from_nanos(row.try_get("due_time")?),
        dequeue_attempts: row.try_get("dequeue_attempts")?,
        type_name: row.try_get("type_name")?,
        revision: row.try_get("revision")?,
        payload: row.try_get::<Vec<u8>, _>("payload")?.into(),
    })
}
