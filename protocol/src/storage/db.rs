//! # KeelDB: Persistent Storage Engine
//!
//! The persistence layer for the ledger, built on sled's embedded key-value
//! store. Everything lives in one tree so that a committed operation can be
//! written as a single atomic `Batch`:
//!
//! | Key                   | Value                         |
//! |-----------------------|-------------------------------|
//! | `state`               | `bincode(LedgerState)`        |
//! | `config`              | `bincode(LedgerConfig)`       |
//! | `meta:event_seq`      | next event sequence (8B BE)   |
//! | `ev:` + seq (8B BE)   | `bincode(LedgerEvent)`        |
//!
//! Event sequence numbers are big-endian so sled's lexicographic order is
//! numeric order and range scans return events in the order they happened.
//!
//! The store is generic over the state and event types: it knows how to
//! write a snapshot and an event log atomically, not what a ledger is.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Batch, Db, Tree};
use std::path::Path;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type DbResult<T> = Result<T, DbError>;

const KEY_STATE: &[u8] = b"state";
const KEY_CONFIG: &[u8] = b"config";
const KEY_EVENT_SEQ: &[u8] = b"meta:event_seq";
const EVENT_PREFIX: &[u8] = b"ev:";

fn event_key(seq: u64) -> Vec<u8> {
    let mut key = EVENT_PREFIX.to_vec();
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn encode<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// KeelDB
// ---------------------------------------------------------------------------

/// Persistent storage for ledger snapshots and the event log.
///
/// Cheap to clone; sled handles are reference counted and thread-safe.
#[derive(Debug, Clone)]
pub struct KeelDB {
    db: Db,
    ledger: Tree,
}

impl KeelDB {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database, removed when dropped. For tests.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let ledger = db.open_tree("ledger")?;
        Ok(Self { db, ledger })
    }

    // -- Snapshot + events --------------------------------------------------

    /// Atomically replace the state snapshot and append `events`.
    ///
    /// Returns the sequence number the next event will receive. Either the
    /// snapshot and every event land on disk together, or none of them do.
    pub fn commit<S: Serialize, E: Serialize>(&self, state: &S, events: &[E]) -> DbResult<u64> {
        let mut seq = self.next_event_seq()?;
        let mut batch = Batch::default();
        batch.insert(KEY_STATE, encode(state)?);
        for event in events {
            batch.insert(event_key(seq), encode(event)?);
            seq += 1;
        }
        batch.insert(KEY_EVENT_SEQ, &seq.to_be_bytes());
        self.ledger.apply_batch(batch)?;
        self.db.flush()?;
        tracing::trace!(next_seq = seq, events = events.len(), "ledger snapshot committed");
        Ok(seq)
    }

    /// Load the last committed snapshot, if any.
    pub fn load_state<S: DeserializeOwned>(&self) -> DbResult<Option<S>> {
        match self.ledger.get(KEY_STATE)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Events with sequence number ≥ `from`, in order.
    pub fn events_from<E: DeserializeOwned>(&self, from: u64) -> DbResult<Vec<(u64, E)>> {
        let start = event_key(from);
        let end = event_key(u64::MAX);
        let mut out = Vec::new();
        for item in self.ledger.range(start..=end) {
            let (key, value) = item?;
            let seq_bytes: [u8; 8] = key[EVENT_PREFIX.len()..]
                .try_into()
                .map_err(|_| DbError::Serialization("invalid event key".to_string()))?;
            out.push((u64::from_be_bytes(seq_bytes), decode(&value)?));
        }
        Ok(out)
    }

    /// Sequence number the next appended event will receive.
    pub fn next_event_seq(&self) -> DbResult<u64> {
        match self.ledger.get(KEY_EVENT_SEQ)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| DbError::Serialization("invalid event sequence".to_string()))?;
                Ok(u64::from_be_bytes(arr))
            }
            None => Ok(0),
        }
    }

    // -- Configuration ------------------------------------------------------

    /// Persist the configuration the ledger was initialized with.
    pub fn put_config<C: Serialize>(&self, config: &C) -> DbResult<()> {
        self.ledger.insert(KEY_CONFIG, encode(config)?)?;
        self.db.flush()?;
        Ok(())
    }

    /// Load the persisted configuration, if any.
    pub fn get_config<C: DeserializeOwned>(&self) -> DbResult<Option<C>> {
        match self.ledger.get(KEY_CONFIG)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Force a flush of all pending writes to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
