// State Store Seam - Persisted position rows and scalar application state
// MemoryStore for tests and paper sessions, JsonFileStore for restarts

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::types::{PositionRow, ProductClass};

pub const STATE_REALIZED_PNL: &str = "realized_pnl";
pub const STATE_AUTO_TRADING: &str = "auto_trading_enabled";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Store unavailable")]
    Unavailable,
}

/// Row and key/value persistence owned by a collaborator
pub trait StateStore: Send + Sync {
    /// Insert or replace the row for (instrument, product)
    fn upsert_position(&self, row: &PositionRow) -> Result<(), StoreError>;

    fn load_positions(&self) -> Result<Vec<PositionRow>, StoreError>;

    fn set_state(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError>;

    fn get_state(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;
}

type RowKey = (String, ProductClass);

// ============================================================================
// Memory Store
// ============================================================================

pub struct MemoryStore {
    positions: RwLock<BTreeMap<RowKey, PositionRow>>,
    state: RwLock<HashMap<String, serde_json::Value>>,
    available: RwLock<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            positions: RwLock::new(BTreeMap::new()),
            state: RwLock::new(HashMap::new()),
            available: RwLock::new(true),
        }
    }

    /// Simulate an outage; every call fails with `Unavailable` while false
    pub fn set_available(&self, available: bool) {
        *self.available.write() = available;
    }

    fn check(&self) -> Result<(), StoreError> {
        if *self.available.read() {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStore {
    fn upsert_position(&self, row: &PositionRow) -> Result<(), StoreError> {
        self.check()?;
        self.positions
            .write()
            .insert((row.instrument.clone(), row.product), row.clone());
        Ok(())
    }

    fn load_positions(&self) -> Result<Vec<PositionRow>, StoreError> {
        self.check()?;
        Ok(self.positions.read().values().cloned().collect())
    }

    fn set_state(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        self.check()?;
        self.state.write().insert(key.to_string(), value);
        Ok(())
    }

    fn get_state(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        self.check()?;
        Ok(self.state.read().get(key).cloned())
    }
}

// ============================================================================
// JSON File Store
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreFile {
    positions: Vec<PositionRow>,
    app_state: HashMap<String, serde_json::Value>,
}

/// Whole-file JSON store, rewritten via a temp file and rename on every change
pub struct JsonFileStore {
    path: PathBuf,
    contents: RwLock<StoreFile>,
}

impl JsonFileStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let contents = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            StoreFile::default()
        };

        info!(path = %path.display(), positions = contents.positions.len(), "State store opened");
        Ok(Self {
            path,
            contents: RwLock::new(contents),
        })
    }

    fn flush(&self, contents: &StoreFile) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(contents)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "State store flushed");
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn upsert_position(&self, row: &PositionRow) -> Result<(), StoreError> {
        let mut contents = self.contents.write();
        match contents
            .positions
            .iter_mut()
            .find(|r| r.instrument == row.instrument && r.product == row.product)
        {
            Some(existing) => *existing = row.clone(),
            None => contents.positions.push(row.clone()),
        }
        self.flush(&contents)
    }

    fn load_positions(&self) -> Result<Vec<PositionRow>, StoreError> {
        Ok(self.contents.read().positions.clone())
    }

    fn set_state(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        let mut contents = self.contents.write();
        contents.app_state.insert(key.to_string(), value);
        self.flush(&contents)
    }

    fn get_state(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self.contents.read().app_state.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(instrument: &str, product: ProductClass, net_qty: i64) -> PositionRow {
        PositionRow {
            instrument: instrument.to_string(),
            product,
            net_qty,
            avg_price: 100.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
        }
    }

    #[test]
    fn test_memory_store_upsert_replaces() {
        let store = MemoryStore::new();
        store.upsert_position(&row("A", ProductClass::Intraday, 10)).unwrap();
        store.upsert_position(&row("A", ProductClass::Intraday, 0)).unwrap();
        store.upsert_position(&row("A", ProductClass::CarryForward, 5)).unwrap();

        let rows = store.load_positions().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.product == ProductClass::Intraday && r.net_qty == 0));
    }

    #[test]
    fn test_memory_store_unavailable() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(
            store.set_state(STATE_REALIZED_PNL, json!(1.0)),
            Err(StoreError::Unavailable)
        ));
        store.set_available(true);
        assert!(store.get_state(STATE_REALIZED_PNL).unwrap().is_none());
    }

    #[test]
    fn test_json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("engine.json");

        {
            let store = JsonFileStore::open(&path).unwrap();
            store.upsert_position(&row("X", ProductClass::CarryForward, -15)).unwrap();
            store.set_state(STATE_REALIZED_PNL, json!(250.0)).unwrap();
            store.set_state(STATE_AUTO_TRADING, json!(false)).unwrap();
        }

        let reopened = JsonFileStore::open(&path).unwrap();
        let rows = reopened.load_positions().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].net_qty, -15);
        assert_eq!(reopened.get_state(STATE_REALIZED_PNL).unwrap(), Some(json!(250.0)));
        assert_eq!(reopened.get_state(STATE_AUTO_TRADING).unwrap(), Some(json!(false)));
    }
}
