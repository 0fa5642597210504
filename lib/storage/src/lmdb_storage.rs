// LMDB-backed node result store
use crate::store::{rank_candidates, KnnSearchParams, NodeResultStore, SearchHit};
use anyhow::Result;
use async_trait::async_trait;
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use linkvec_core::{EntityId, Error, EventMetadata, FieldValue, NodeResultKey, NodeValue};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const DB_RESULTS: &str = "node_results";
const DB_METADATA: &str = "event_metadata";
const DB_FIELDS: &str = "entity_fields";

const DEFAULT_MAP_SIZE: usize = 10 * 1024 * 1024 * 1024; // 10GB

/// Length-prefixed parts, so ids containing the separator cannot collide.
fn key_prefix(parts: &[&str]) -> String {
    parts.iter().map(|part| format!("{}:{}|", part.len(), part)).collect()
}

/// Results are keyed by node, schema then object, so one index node's
/// results for a schema share a prefix.
fn result_key(key: &NodeResultKey) -> String {
    key_prefix(&[&key.node_id, &key.entity.schema]) + &key.entity.object_id
}

fn entity_key(entity: &EntityId) -> String {
    key_prefix(&[&entity.schema]) + &entity.object_id
}

fn storage_error(err: anyhow::Error) -> Error {
    Error::Storage(err.to_string())
}

pub struct LmdbStore {
    env: Arc<Env>,
    results_db: Database<Str, Bytes>,
    metadata_db: Database<Str, Bytes>,
    fields_db: Database<Str, Bytes>,
}

impl LmdbStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_map_size(path, DEFAULT_MAP_SIZE)
    }

    pub fn with_map_size<P: AsRef<Path>>(path: P, map_size: usize) -> Result<Self> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process.
        let env = Arc::new(unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(3)
                .open(path.as_ref())?
        });

        let mut wtxn = env.write_txn()?;
        let results_db = env.create_database(&mut wtxn, Some(DB_RESULTS))?;
        let metadata_db = env.create_database(&mut wtxn, Some(DB_METADATA))?;
        let fields_db = env.create_database(&mut wtxn, Some(DB_FIELDS))?;
        wtxn.commit()?;

        debug!(path = %path.as_ref().display(), "opened lmdb store");
        Ok(Self {
            env,
            results_db,
            metadata_db,
            fields_db,
        })
    }

    fn put(&self, db: &Database<Str, Bytes>, key: &str, data: &[u8]) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        db.put(&mut wtxn, key, data)?;
        wtxn.commit()?;
        Ok(())
    }

    fn get(&self, db: &Database<Str, Bytes>, key: &str) -> Result<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn()?;
        Ok(db.get(&rtxn, key)?.map(<[u8]>::to_vec))
    }

    pub fn get_result(&self, key: &NodeResultKey) -> Result<Option<NodeValue>> {
        match self.get(&self.results_db, &result_key(key))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn save_result(&self, key: &NodeResultKey, value: &NodeValue) -> Result<()> {
        self.put(&self.results_db, &result_key(key), &bincode::serialize(value)?)
    }

    pub fn remove_result(&self, key: &NodeResultKey) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.results_db.delete(&mut wtxn, &result_key(key))?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn get_metadata(&self, key: &NodeResultKey) -> Result<EventMetadata> {
        match self.get(&self.metadata_db, &result_key(key))? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(EventMetadata::default()),
        }
    }

    pub fn save_metadata(&self, key: &NodeResultKey, metadata: &EventMetadata) -> Result<()> {
        self.put(&self.metadata_db, &result_key(key), &bincode::serialize(metadata)?)
    }

    pub fn get_fields(&self, entity: &EntityId) -> Result<HashMap<String, FieldValue>> {
        match self.get(&self.fields_db, &entity_key(entity))? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(HashMap::new()),
        }
    }

    /// Read-merge-write in one transaction.
    pub fn merge_fields(&self, entity: &EntityId, fields: &HashMap<String, FieldValue>) -> Result<()> {
        let key = entity_key(entity);
        let mut wtxn = self.env.write_txn()?;
        let mut merged: HashMap<String, FieldValue> = match self.fields_db.get(&wtxn, &key)? {
            Some(bytes) => bincode::deserialize(bytes)?,
            None => HashMap::new(),
        };
        merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.fields_db.put(&mut wtxn, &key, &bincode::serialize(&merged)?)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn search(&self, params: &KnnSearchParams) -> Result<Vec<SearchHit>> {
        let rtxn = self.env.read_txn()?;
        let prefix = key_prefix(&[&params.index_id, &params.schema]);
        let mut candidates = Vec::new();
        for entry in self.results_db.prefix_iter(&rtxn, prefix.as_str())? {
            let (key, bytes) = entry?;
            let object_id = &key[prefix.len()..];
            if let NodeValue::Vector(vector) = bincode::deserialize::<NodeValue>(bytes)? {
                let entity = EntityId::new(object_id, params.schema.clone());
                let fields = match self.fields_db.get(&rtxn, &entity_key(&entity))? {
                    Some(bytes) => bincode::deserialize(bytes)?,
                    None => HashMap::new(),
                };
                candidates.push((entity, vector, fields));
            }
        }
        Ok(rank_candidates(
            params,
            candidates.iter().map(|(e, v, f)| (e.clone(), v, f)),
        ))
    }
}

#[async_trait]
impl NodeResultStore for LmdbStore {
    async fn read(&self, key: &NodeResultKey) -> linkvec_core::Result<Option<NodeValue>> {
        self.get_result(key).map_err(storage_error)
    }

    async fn write(&self, key: &NodeResultKey, value: &NodeValue) -> linkvec_core::Result<()> {
        self.save_result(key, value).map_err(storage_error)
    }

    async fn delete(&self, key: &NodeResultKey) -> linkvec_core::Result<()> {
        self.remove_result(key).map_err(storage_error)
    }

    async fn read_event_metadata(&self, key: &NodeResultKey) -> linkvec_core::Result<EventMetadata> {
        self.get_metadata(key).map_err(storage_error)
    }

    async fn write_event_metadata(
        &self,
        key: &NodeResultKey,
        metadata: &EventMetadata,
    ) -> linkvec_core::Result<()> {
        self.save_metadata(key, metadata).map_err(storage_error)
    }

    async fn read_fields(&self, entity: &EntityId) -> linkvec_core::Result<HashMap<String, FieldValue>> {
        self.get_fields(entity).map_err(storage_error)
    }

    async fn write_fields(
        &self,
        entity: &EntityId,
        fields: &HashMap<String, FieldValue>,
    ) -> linkvec_core::Result<()> {
        self.merge_fields(entity, fields).map_err(storage_error)
    }

    async fn knn_search(&self, params: &KnnSearchParams) -> linkvec_core::Result<Vec<SearchHit>> {
        self.search(params).map_err(storage_error)
    }
}
