use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use uuid::Uuid;

use heartbank_core::{AccountId, ExpectedVersion};

use super::r#trait::{LedgerStore, LedgerStoreError, StoredEvent, UncommittedEvent};

type StreamHandle = Arc<Mutex<Vec<StoredEvent>>>;

/// In-memory append-only ledger store.
///
/// Each account stream sits behind its own mutex, so the compare-and-swap on
/// one account never blocks appends to another. The stream map, the event-id
/// index, and the unique-key set are only locked for short bookkeeping steps.
///
/// Lock order during append: stream, then unique keys, then index.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    streams: RwLock<HashMap<AccountId, StreamHandle>>,
    events_by_id: RwLock<HashMap<Uuid, StoredEvent>>,
    unique_keys: Mutex<HashSet<String>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    fn stream(&self, account_id: AccountId) -> Result<StreamHandle, LedgerStoreError> {
        if let Some(stream) = self
            .streams
            .read()
            .map_err(|_| poisoned())?
            .get(&account_id)
        {
            return Ok(stream.clone());
        }

        let mut streams = self.streams.write().map_err(|_| poisoned())?;
        Ok(streams.entry(account_id).or_default().clone())
    }

    fn existing_stream(&self, account_id: AccountId) -> Result<Option<StreamHandle>, LedgerStoreError> {
        let streams = self.streams.read().map_err(|_| poisoned())?;
        Ok(streams.get(&account_id).cloned())
    }

    /// Number of accounts that have at least one committed event.
    pub fn account_count(&self) -> usize {
        let Ok(streams) = self.streams.read() else {
            return 0;
        };
        streams
            .values()
            .filter(|s| s.lock().map(|s| !s.is_empty()).unwrap_or(false))
            .count()
    }
}

fn poisoned() -> LedgerStoreError {
    LedgerStoreError::Backend("lock poisoned".to_string())
}

impl LedgerStore for InMemoryLedgerStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, LedgerStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        // All events must target the same account stream.
        let account_id = events[0].account_id;
        let mut batch_keys = HashSet::new();
        let mut batch_ids = HashSet::new();
        for (idx, e) in events.iter().enumerate() {
            if e.account_id != account_id {
                return Err(LedgerStoreError::InvalidAppend(format!(
                    "batch contains multiple account_ids (index {idx})"
                )));
            }
            if !batch_ids.insert(e.event_id) {
                return Err(LedgerStoreError::DuplicateKey(format!("event_id {}", e.event_id)));
            }
            if let Some(key) = &e.unique_key {
                if !batch_keys.insert(key.clone()) {
                    return Err(LedgerStoreError::DuplicateKey(key.clone()));
                }
            }
        }

        let handle = self.stream(account_id)?;
        let mut stream = handle.lock().map_err(|_| poisoned())?;

        let current = Self::current_version(&stream);
        if !expected_version.matches(current) {
            return Err(LedgerStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        let mut unique_keys = self.unique_keys.lock().map_err(|_| poisoned())?;
        if let Some(taken) = batch_keys.iter().find(|k| unique_keys.contains(*k)) {
            return Err(LedgerStoreError::DuplicateKey(taken.clone()));
        }
        let mut events_by_id = self.events_by_id.write().map_err(|_| poisoned())?;
        if let Some(taken) = batch_ids.iter().find(|id| events_by_id.contains_key(*id)) {
            return Err(LedgerStoreError::DuplicateKey(format!("event_id {taken}")));
        }

        // Nothing can fail past this point; commit the whole batch.
        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let stored = StoredEvent {
                event_id: e.event_id,
                account_id: e.account_id,
                sequence_number: next,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            };
            next += 1;
            stream.push(stored.clone());
            events_by_id.insert(stored.event_id, stored.clone());
            committed.push(stored);
        }
        unique_keys.extend(batch_keys);

        Ok(committed)
    }

    fn load_stream(&self, account_id: AccountId) -> Result<Vec<StoredEvent>, LedgerStoreError> {
        let Some(handle) = self.existing_stream(account_id)? else {
            return Ok(vec![]);
        };
        let stream = handle.lock().map_err(|_| poisoned())?;
        Ok(stream.clone())
    }

    fn load_event(&self, event_id: Uuid) -> Result<Option<StoredEvent>, LedgerStoreError> {
        let events_by_id = self.events_by_id.read().map_err(|_| poisoned())?;
        Ok(events_by_id.get(&event_id).cloned())
    }
}
