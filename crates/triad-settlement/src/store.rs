//! Durable state on `sled`.
//!
//! Trees:
//! - `operations`: one JSON row per operation, keyed by id (audit lookup)
//! - `exits`, `batches`: same for exit requests and batches
//! - `state`: full consensus and gateway snapshots, the restart source
//! - `meta`: schema version

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sled::Tree;
use tracing::info;
use triad_consensus::{ConsensusEngine, EngineSnapshot};
use triad_types::{
    Batch, ExitId, ExitRequest, MerkleRoot, Operation, OperationId, Result, TriadError, constants,
};

use crate::gateway::BatchGateway;

pub const SCHEMA_VERSION: &str = constants::STORE_SCHEMA_VERSION;
const META_SCHEMA_KEY: &[u8] = b"schema_version";
const CONSENSUS_KEY: &[u8] = b"consensus";
const GATEWAY_KEY: &[u8] = b"gateway";

#[allow(clippy::needless_pass_by_value)]
fn storage_err(err: sled::Error) -> TriadError {
    TriadError::Storage(err.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

#[derive(Clone)]
pub struct Store {
    db: sled::Db,
    operations: Tree,
    exits: Tree,
    batches: Tree,
    state: Tree,
    meta: Tree,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path).map_err(storage_err)?;
        let store = Self {
            operations: db.open_tree("operations").map_err(storage_err)?,
            exits: db.open_tree("exits").map_err(storage_err)?,
            batches: db.open_tree("batches").map_err(storage_err)?,
            state: db.open_tree("state").map_err(storage_err)?,
            meta: db.open_tree("meta").map_err(storage_err)?,
            db,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        match self.meta.get(META_SCHEMA_KEY).map_err(storage_err)? {
            Some(found) if found.as_ref() != SCHEMA_VERSION.as_bytes() => {
                Err(TriadError::Storage(format!(
                    "schema mismatch: expected {SCHEMA_VERSION}, found {:?}",
                    String::from_utf8_lossy(&found)
                )))
            }
            Some(_) => Ok(()),
            None => {
                self.meta
                    .insert(META_SCHEMA_KEY, SCHEMA_VERSION.as_bytes())
                    .map_err(storage_err)?;
                info!(schema = SCHEMA_VERSION, "initialized schema version");
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------

    pub fn persist_consensus(&self, engine: &ConsensusEngine) -> Result<()> {
        for op in engine.registry().operations() {
            self.operations
                .insert(op.id.as_bytes(), encode(op)?)
                .map_err(storage_err)?;
        }
        self.state
            .insert(CONSENSUS_KEY, encode(&engine.snapshot())?)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn persist_gateway(&self, gateway: &BatchGateway) -> Result<()> {
        for exit in gateway.exits() {
            self.exits
                .insert(exit.id.as_bytes(), encode(exit)?)
                .map_err(storage_err)?;
        }
        for batch in gateway.batches() {
            self.batches
                .insert(batch.root.as_bytes(), encode(batch)?)
                .map_err(storage_err)?;
        }
        self.state
            .insert(GATEWAY_KEY, encode(gateway)?)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    pub fn load_consensus(&self) -> Result<Option<ConsensusEngine>> {
        self.state
            .get(CONSENSUS_KEY)
            .map_err(storage_err)?
            .map(|bytes| decode::<EngineSnapshot>(&bytes).and_then(ConsensusEngine::from_snapshot))
            .transpose()
    }

    pub fn load_gateway(&self) -> Result<Option<BatchGateway>> {
        self.state
            .get(GATEWAY_KEY)
            .map_err(storage_err)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn get_operation(&self, id: &OperationId) -> Result<Option<Operation>> {
        self.operations
            .get(id.as_bytes())
            .map_err(storage_err)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn get_exit(&self, id: &ExitId) -> Result<Option<ExitRequest>> {
        self.exits
            .get(id.as_bytes())
            .map_err(storage_err)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn get_batch(&self, root: &MerkleRoot) -> Result<Option<Batch>> {
        self.batches
            .get(root.as_bytes())
            .map_err(storage_err)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use tempfile::tempdir;
    use triad_types::{EngineConfig, OperationRequest, ValidatorKeys};

    use super::*;

    fn engine() -> ConsensusEngine {
        let keys = ValidatorKeys::generate();
        ConsensusEngine::new(EngineConfig::default(), keys.validator_set([MerkleRoot([1; 32]); 3]))
            .expect("engine")
    }

    #[test]
    fn schema_version_is_enforced() {
        let dir = tempdir().expect("tmpdir");
        {
            let store = Store::open(dir.path()).expect("open");
            store.meta.insert(META_SCHEMA_KEY, b"999").expect("overwrite");
            store.meta.flush().expect("flush");
        }
        let reopened = Store::open(dir.path());
        assert!(matches!(reopened, Err(TriadError::Storage(msg)) if msg.contains("schema mismatch")));
    }

    #[test]
    fn empty_store_has_no_state() {
        let dir = tempdir().expect("tmpdir");
        let store = Store::open(dir.path()).expect("open");
        assert!(store.load_consensus().expect("load").is_none());
        assert!(store.load_gateway().expect("load").is_none());
        assert!(store.get_exit(&ExitId([1; 32])).expect("get").is_none());
    }

    #[test]
    fn consensus_survives_reopen() {
        let dir = tempdir().expect("tmpdir");
        let mut engine = engine();
        let id = engine
            .create_operation(&OperationRequest::dummy_transfer(Decimal::new(12, 0)), Utc::now())
            .expect("create");
        {
            let store = Store::open(dir.path()).expect("open");
            store.persist_consensus(&engine).expect("persist");
            store
                .persist_gateway(&BatchGateway::new(engine.config()))
                .expect("persist");
            store.flush().expect("flush");
        }

        let store = Store::open(dir.path()).expect("reopen");
        let row = store.get_operation(&id).expect("get").expect("present");
        assert_eq!(row.amount, Decimal::new(12, 0));

        let restored = store.load_consensus().expect("load").expect("present");
        assert_eq!(restored.registry().len(), 1);
        assert_eq!(restored.validators(), engine.validators());
        assert!(store.load_gateway().expect("load").is_some());
    }
}
