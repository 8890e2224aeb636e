use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::RwLock;

use crate::store::{LedgerStore, require_active, validate_new_entry};
use crate::{EntryId, EntryType, LedgerEntry, LedgerError, NewEntry, Result};

#[derive(Debug, Default)]
struct LedgerState {
    entries: BTreeMap<EntryId, LedgerEntry>,
    entry_types: HashMap<i32, EntryType>,
    next_id: i64,
    unavailable: bool,
    failing_dates: HashSet<NaiveDate>,
}

impl LedgerState {
    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(LedgerError::Unavailable(
                "in-memory ledger marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

/// In-memory ledger store implementation for testing and local runs.
///
/// Provides the same interface as the PostgreSQL implementation, plus
/// switches to simulate an unreachable store.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedgerStore {
    /// Creates a new empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger seeded with the given entry types.
    pub async fn with_entry_types(types: impl IntoIterator<Item = EntryType>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.write().await;
            for t in types {
                state.entry_types.insert(t.id, t);
            }
        }
        store
    }

    /// Returns the total number of entries stored.
    pub async fn entry_count(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Makes every operation fail with [`LedgerError::Unavailable`].
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Makes `entries_by_date` fail for one specific date.
    pub async fn fail_on_date(&self, date: NaiveDate) {
        self.state.write().await.failing_dates.insert(date);
    }

    /// Clears every injected fault.
    pub async fn clear_faults(&self) {
        let mut state = self.state.write().await;
        state.unavailable = false;
        state.failing_dates.clear();
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert(&self, entry: NewEntry) -> Result<LedgerEntry> {
        validate_new_entry(&entry)?;

        let mut state = self.state.write().await;
        state.check_available()?;

        let entry_type = require_active(
            state.entry_types.get(&entry.entry_type_id).cloned(),
            entry.entry_type_id,
        )?;

        state.next_id += 1;
        let committed = LedgerEntry {
            id: EntryId::new(state.next_id),
            description: entry.description,
            entry_type_id: entry_type.id,
            amount: entry.amount,
            nature: entry_type.nature,
            date: entry.date,
            processed: false,
            created_at: Utc::now(),
        };
        state.entries.insert(committed.id, committed.clone());

        Ok(committed)
    }

    async fn get_entry(&self, id: EntryId) -> Result<Option<LedgerEntry>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.entries.get(&id).cloned())
    }

    async fn entries_by_date(&self, date: NaiveDate) -> Result<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        state.check_available()?;
        if state.failing_dates.contains(&date) {
            return Err(LedgerError::Unavailable(format!(
                "injected failure reading entries for {date}"
            )));
        }
        Ok(state
            .entries
            .values()
            .filter(|e| e.date == date)
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, ids: &[EntryId]) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_available()?;
        for id in ids {
            if let Some(entry) = state.entries.get_mut(id) {
                entry.processed = true;
            }
        }
        Ok(())
    }

    async fn get_entry_type(&self, id: i32) -> Result<Option<EntryType>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.entry_types.get(&id).cloned())
    }

    async fn add_entry_type(&self, entry_type: EntryType) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_available()?;
        state.entry_types.insert(entry_type.id, entry_type);
        Ok(())
    }
}
