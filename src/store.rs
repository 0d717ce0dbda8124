//! Event Store (§4.F).
//!
//! The store is treated as an external collaborator: this module defines
//! the interface the rest of the service depends on (`EventStore`) plus a
//! Postgres-backed implementation and an in-memory test double. Only the
//! Ingestor writes `EventRecord`s; only the Ingestor and the settlement
//! follow-up write `related_event_id`/`processed`, per spec.md §3's
//! ownership rule.

use async_trait::async_trait;
use ethers::types::{Address, H256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::SettlerError;
use crate::models::{EventQuery, EventRecord, EventType};

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a decoded event record. No uniqueness constraint is imposed
    /// on `(block_number, log_index)`; duplicates are tolerated per
    /// spec.md §3.2.
    async fn append(&self, record: EventRecord) -> Result<Uuid, SettlerError>;

    /// Finds the most recent unprocessed `BetPlaced` for `(room_id,
    /// player)`, used to correlate an incoming `BetSettled` (§4.C step 5).
    async fn find_latest_unprocessed_bet_placed(
        &self,
        room_id: u32,
        player: Address,
    ) -> Result<Option<EventRecord>, SettlerError>;

    /// Links two records symmetrically and marks both `processed = true`
    /// (§3.2 invariant).
    async fn link(&self, id_a: Uuid, id_b: Uuid) -> Result<(), SettlerError>;

    async fn count(&self, query: &EventQuery) -> Result<i64, SettlerError>;

    async fn find(
        &self,
        query: &EventQuery,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<EventRecord>, SettlerError>;

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<EventRecord>, SettlerError>;

    /// Cheap reachability check used by the Health Surface (§4.H).
    async fn ping(&self) -> Result<(), SettlerError>;
}

/// Postgres-backed implementation.
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

fn address_to_hex(address: Address) -> String {
    format!("{address:#x}")
}

fn hash_to_hex(hash: H256) -> String {
    format!("{hash:#x}")
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn append(&self, record: EventRecord) -> Result<Uuid, SettlerError> {
        let event_type = match record.event_type {
            EventType::BetPlaced => "bet_placed",
            EventType::BetSettled => "bet_settled",
        };

        sqlx::query(
            r#"
            INSERT INTO event_records (
                id, event_type, room_id, player, block_number, block_timestamp,
                log_index, transaction_hash, created_at,
                amount_wei, bet_big, commit_block, reveal_block,
                reward_amount_wei, won, hash_value, block_hash, result_block, bet_id,
                related_event_id, processed
            ) VALUES (
                $1, $2, $3, $4, $5, $6,
                $7, $8, $9,
                $10, $11, $12, $13,
                $14, $15, $16, $17, $18, $19,
                $20, $21
            )
            "#,
        )
        .bind(record.id)
        .bind(event_type)
        .bind(record.room_id as i64)
        .bind(address_to_hex(record.player))
        .bind(record.block_number as i64)
        .bind(record.block_timestamp)
        .bind(record.log_index as i64)
        .bind(hash_to_hex(record.transaction_hash))
        .bind(record.created_at)
        .bind(record.amount_wei.map(|v| v.to_string()))
        .bind(record.bet_big)
        .bind(record.commit_block.map(|v| v as i64))
        .bind(record.reveal_block.map(|v| v as i64))
        .bind(record.reward_amount_wei.map(|v| v.to_string()))
        .bind(record.won)
        .bind(record.hash_value.map(|v| v as i16))
        .bind(record.block_hash.map(hash_to_hex))
        .bind(record.result_block.map(|v| v as i64))
        .bind(record.bet_id.map(|v| v.to_string()))
        .bind(record.related_event_id)
        .bind(record.processed)
        .execute(&self.pool)
        .await?;

        Ok(record.id)
    }

    async fn find_latest_unprocessed_bet_placed(
        &self,
        room_id: u32,
        player: Address,
    ) -> Result<Option<EventRecord>, SettlerError> {
        let row = sqlx::query_as::<_, StoredRecord>(
            r#"
            SELECT * FROM event_records
            WHERE event_type = 'bet_placed'
              AND room_id = $1
              AND player = $2
              AND processed = false
            ORDER BY block_number DESC
            LIMIT 1
            "#,
        )
        .bind(room_id as i64)
        .bind(address_to_hex(player))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn link(&self, id_a: Uuid, id_b: Uuid) -> Result<(), SettlerError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE event_records SET related_event_id = $1, processed = true WHERE id = $2",
        )
        .bind(id_b)
        .bind(id_a)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE event_records SET related_event_id = $1, processed = true WHERE id = $2",
        )
        .bind(id_a)
        .bind(id_b)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn count(&self, query: &EventQuery) -> Result<i64, SettlerError> {
        // Out-of-scope query surface (§1, §6): this service only needs a
        // coarse count for diagnostics, not the rich filters the external
        // read API exposes.
        let event_type = query.event_type.map(|t| match t {
            EventType::BetPlaced => "bet_placed",
            EventType::BetSettled => "bet_settled",
        });
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM event_records WHERE ($1::text IS NULL OR event_type = $1)",
        )
        .bind(event_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn find(
        &self,
        query: &EventQuery,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<EventRecord>, SettlerError> {
        let event_type = query.event_type.map(|t| match t {
            EventType::BetPlaced => "bet_placed",
            EventType::BetSettled => "bet_settled",
        });
        let room_id = query.room_id.map(|v| v as i64);
        let player = query.player.map(address_to_hex);

        let rows = sqlx::query_as::<_, StoredRecord>(
            r#"
            SELECT * FROM event_records
            WHERE ($1::text IS NULL OR event_type = $1)
              AND ($2::bigint IS NULL OR room_id = $2)
              AND ($3::text IS NULL OR player = $3)
              AND ($4::bool IS NULL OR processed = $4)
            ORDER BY block_number DESC, log_index DESC
            OFFSET $5 LIMIT $6
            "#,
        )
        .bind(event_type)
        .bind(room_id)
        .bind(player)
        .bind(query.processed)
        .bind(skip)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<EventRecord>, SettlerError> {
        let rows = sqlx::query_as::<_, StoredRecord>(
            "SELECT * FROM event_records WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn ping(&self) -> Result<(), SettlerError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Row shape matching `event_records`, kept separate from the public
/// `EventRecord` model since SQL types (`i64`, hex strings) differ from
/// the domain types (`u64`, `Address`, `H256`).
#[derive(sqlx::FromRow)]
struct StoredRecord {
    id: Uuid,
    event_type: String,
    room_id: i64,
    player: String,
    block_number: i64,
    block_timestamp: chrono::DateTime<chrono::Utc>,
    log_index: i64,
    transaction_hash: String,
    created_at: chrono::DateTime<chrono::Utc>,
    amount_wei: Option<String>,
    bet_big: Option<bool>,
    commit_block: Option<i64>,
    reveal_block: Option<i64>,
    reward_amount_wei: Option<String>,
    won: Option<bool>,
    hash_value: Option<i16>,
    block_hash: Option<String>,
    result_block: Option<i64>,
    bet_id: Option<String>,
    related_event_id: Option<Uuid>,
    processed: bool,
}

impl From<StoredRecord> for EventRecord {
    fn from(row: StoredRecord) -> Self {
        use std::str::FromStr;
        EventRecord {
            id: row.id,
            event_type: if row.event_type == "bet_placed" {
                EventType::BetPlaced
            } else {
                EventType::BetSettled
            },
            room_id: row.room_id as u32,
            player: Address::from_str(&row.player).unwrap_or_default(),
            block_number: row.block_number as u64,
            block_timestamp: row.block_timestamp,
            log_index: row.log_index as u64,
            transaction_hash: H256::from_str(&row.transaction_hash).unwrap_or_default(),
            created_at: row.created_at,
            amount_wei: row.amount_wei.and_then(|v| v.parse().ok()),
            bet_big: row.bet_big,
            commit_block: row.commit_block.map(|v| v as u64),
            reveal_block: row.reveal_block.map(|v| v as u64),
            reward_amount_wei: row.reward_amount_wei.and_then(|v| v.parse().ok()),
            won: row.won,
            hash_value: row.hash_value.map(|v| v as u8),
            block_hash: row.block_hash.and_then(|v| H256::from_str(&v).ok()),
            result_block: row.result_block.map(|v| v as u64),
            bet_id: row.bet_id.and_then(|v| v.parse().ok()),
            related_event_id: row.related_event_id,
            processed: row.processed,
        }
    }
}

/// In-memory test double, implementing the same interface so the rest of
/// the service can be exercised without a live database (§8).
#[derive(Default)]
pub struct MemoryEventStore {
    records: std::sync::Mutex<Vec<EventRecord>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.records.lock().expect("memory store mutex poisoned").clone()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, record: EventRecord) -> Result<Uuid, SettlerError> {
        let id = record.id;
        self.records.lock().expect("memory store mutex poisoned").push(record);
        Ok(id)
    }

    async fn find_latest_unprocessed_bet_placed(
        &self,
        room_id: u32,
        player: Address,
    ) -> Result<Option<EventRecord>, SettlerError> {
        let records = self.records.lock().expect("memory store mutex poisoned");
        let found = records
            .iter()
            .filter(|r| {
                r.event_type == EventType::BetPlaced
                    && r.room_id == room_id
                    && r.player == player
                    && !r.processed
            })
            .max_by_key(|r| r.block_number)
            .cloned();
        Ok(found)
    }

    async fn link(&self, id_a: Uuid, id_b: Uuid) -> Result<(), SettlerError> {
        let mut records = self.records.lock().expect("memory store mutex poisoned");
        for record in records.iter_mut() {
            if record.id == id_a {
                record.related_event_id = Some(id_b);
                record.processed = true;
            } else if record.id == id_b {
                record.related_event_id = Some(id_a);
                record.processed = true;
            }
        }
        Ok(())
    }

    async fn count(&self, query: &EventQuery) -> Result<i64, SettlerError> {
        Ok(self.find(query, 0, i64::MAX).await?.len() as i64)
    }

    async fn find(
        &self,
        query: &EventQuery,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<EventRecord>, SettlerError> {
        let records = self.records.lock().expect("memory store mutex poisoned");
        let mut matched: Vec<EventRecord> = records
            .iter()
            .filter(|r| query.event_type.map_or(true, |t| t == r.event_type))
            .filter(|r| query.room_id.map_or(true, |id| id == r.room_id))
            .filter(|r| query.player.map_or(true, |p| p == r.player))
            .filter(|r| query.processed.map_or(true, |p| p == r.processed))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.block_number.cmp(&a.block_number).then(b.log_index.cmp(&a.log_index)));
        Ok(matched.into_iter().skip(skip.max(0) as usize).take(limit.max(0) as usize).collect())
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<EventRecord>, SettlerError> {
        let records = self.records.lock().expect("memory store mutex poisoned");
        Ok(records.iter().filter(|r| ids.contains(&r.id)).cloned().collect())
    }

    async fn ping(&self) -> Result<(), SettlerError> {
        Ok(())
    }
}
