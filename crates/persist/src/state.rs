//! The persisted-state manager: load, migrate, validate, write back.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use vstate_migrate::{Migration, MigrationEngine, MigrationError};
use vstate_schema::{Schema, SchemaError, ValidationError};

use crate::config::{DriftPolicy, StateConfig};
use crate::storage::{StorageAdapter, StorageError};

/// Errors surfaced by the manager.
///
/// Storage read failures never appear here: a failed read is treated as an
/// empty key during `init`.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state not initialized: call init() first")]
    NotInitialized,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    InvalidSchema(#[from] SchemaError),
    #[error("field {0:?} is not declared by the schema")]
    UnknownField(String),
    #[error("field {0:?} is reserved for the schema version")]
    ReservedField(String),
    #[error("failed to decode field {field:?}: {source}")]
    Decode {
        field: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode state snapshot: {0}")]
    DecodeAll(#[source] serde_json::Error),
    #[error("failed to serialize state: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to write {key:?}: {source}")]
    StorageWrite {
        key: String,
        #[source]
        source: StorageError,
    },
    #[error("failed to remove {key:?}: {source}")]
    StorageRemove {
        key: String,
        #[source]
        source: StorageError,
    },
}

/// Why `init` discarded stored data and started from defaults.
#[derive(Debug)]
pub enum ResetReason {
    /// The stored bytes were not a JSON object.
    Unreadable(String),
    /// Migrating to the current version failed.
    MigrationFailed(MigrationError),
    /// The (possibly migrated) data did not satisfy the schema.
    ValidationFailed(ValidationError),
    /// The data was written by a newer schema version than this build knows.
    FutureVersion { stored: u32 },
    /// The live schema does not match the recorded fingerprint and the drift
    /// policy is [`DriftPolicy::Reset`].
    SchemaDrift { expected: String, actual: String },
}

/// Which path `init` took.
#[derive(Debug)]
pub enum InitOutcome {
    AlreadyInitialized,
    /// Nothing was stored (or the read failed); defaults were used.
    Fresh,
    /// Stored data was already at the current version.
    Loaded,
    /// Stored data was migrated forward from `from`.
    Migrated { from: u32 },
    /// Stored data was discarded in favour of defaults.
    Reset(ResetReason),
}

/// Comparison of the live fingerprint against the hash table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftReport {
    pub version: u32,
    /// Table entry for `version`, if any.
    pub expected: Option<String>,
    pub actual: String,
}

impl DriftReport {
    /// True when the table has an entry for this version and it differs.
    pub fn is_drifted(&self) -> bool {
        self.expected.as_deref().is_some_and(|e| e != self.actual)
    }
}

/// Owner of one persisted key.
///
/// Every read before [`init`](Self::init) fails with
/// [`StateError::NotInitialized`]. Each mutation revalidates the whole state
/// against the schema and writes it back before the in-memory copy changes.
/// Mutating methods take `&mut self`, so one instance never runs two
/// lifecycle operations at once.
pub struct PersistedState {
    schema: Schema,
    config: StateConfig,
    storage: Arc<dyn StorageAdapter>,
    migrations: Vec<Migration>,
    defaults: Map<String, Value>,
    live_hash: String,
    state: Option<Map<String, Value>>,
}

impl std::fmt::Debug for PersistedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedState")
            .field("storage_key", &self.config.storage_key)
            .field("current_version", &self.config.current_version)
            .field("migrations", &self.migrations.len())
            .field("initialized", &self.state.is_some())
            .finish_non_exhaustive()
    }
}

impl PersistedState {
    /// Create a manager for `config.storage_key`.
    ///
    /// The schema root must be an object that does not declare the reserved
    /// version field, and its defaults must validate.
    pub fn new(
        schema: Schema,
        config: StateConfig,
        storage: Arc<dyn StorageAdapter>,
        migrations: Vec<Migration>,
    ) -> Result<Self, StateError> {
        let live_hash = vstate_schema::fingerprint(&schema)?;
        if schema.declares(&config.version_field) {
            return Err(SchemaError::InvalidSchema(format!(
                "field {:?} is reserved for the schema version",
                config.version_field
            ))
            .into());
        }
        let defaults = match schema.defaults()? {
            Value::Object(map) => map,
            _ => return Err(SchemaError::InvalidSchema("defaults are not an object".into()).into()),
        };

        Ok(Self {
            schema,
            config,
            storage,
            migrations,
            defaults,
            live_hash,
            state: None,
        })
    }

    /// Load the stored blob, migrating and validating it, or fall back to
    /// defaults. Never fails; a second call is a no-op.
    #[tracing::instrument(level = "debug", skip(self), fields(key = %self.config.storage_key))]
    pub async fn init(&mut self) -> InitOutcome {
        if self.state.is_some() {
            return InitOutcome::AlreadyInitialized;
        }

        let (state, outcome) = match self.read().await {
            None => (self.fresh_state(), InitOutcome::Fresh),
            Some(bytes) => match self.load(&bytes) {
                Ok((state, outcome)) => (state, outcome),
                Err(reason) => {
                    tracing::warn!(?reason, "discarding stored state, using defaults");
                    (self.fresh_state(), InitOutcome::Reset(reason))
                }
            },
        };

        tracing::info!(version = self.config.current_version, ?outcome, "state initialized");
        self.state = Some(state);
        outcome
    }

    /// Decode, migrate and validate a stored blob.
    fn load(&self, bytes: &[u8]) -> Result<(Map<String, Value>, InitOutcome), ResetReason> {
        let parsed: Value =
            serde_json::from_slice(bytes).map_err(|e| ResetReason::Unreadable(e.to_string()))?;
        if !parsed.is_object() {
            return Err(ResetReason::Unreadable("top level is not an object".into()));
        }

        let report = self.drift();
        if report.is_drifted() {
            match self.config.drift_policy {
                DriftPolicy::Ignore => {}
                DriftPolicy::Warn => {
                    tracing::warn!(
                        expected = ?report.expected,
                        actual = %report.actual,
                        "schema fingerprint differs from recorded hash"
                    );
                }
                DriftPolicy::Reset => {
                    return Err(ResetReason::SchemaDrift {
                        expected: report.expected.unwrap_or_default(),
                        actual: report.actual,
                    });
                }
            }
        }

        let stored = self.stored_version(&parsed);
        let current = self.config.current_version;
        let (candidate, outcome) = if stored < current {
            let migrated = MigrationEngine::run(parsed, stored, current, &self.migrations)
                .map_err(ResetReason::MigrationFailed)?;
            (migrated, InitOutcome::Migrated { from: stored })
        } else if stored == current {
            (parsed, InitOutcome::Loaded)
        } else {
            return Err(ResetReason::FutureVersion { stored });
        };

        let state = self.validate(&candidate).map_err(ResetReason::ValidationFailed)?;
        Ok((state, outcome))
    }

    fn stored_version(&self, parsed: &Value) -> u32 {
        parsed
            .get(&self.config.version_field)
            .and_then(version_number)
            .unwrap_or(0)
    }

    /// Validate against the schema and stamp the current version.
    fn validate(&self, candidate: &Value) -> Result<Map<String, Value>, ValidationError> {
        match self.schema.parse(candidate)? {
            Value::Object(mut map) => {
                map.insert(
                    self.config.version_field.clone(),
                    Value::from(self.config.current_version),
                );
                Ok(map)
            }
            _ => Err(ValidationError::message("expected object")),
        }
    }

    fn fresh_state(&self) -> Map<String, Value> {
        let mut map = self.defaults.clone();
        map.insert(
            self.config.version_field.clone(),
            Value::from(self.config.current_version),
        );
        map
    }

    fn current(&self) -> Result<&Map<String, Value>, StateError> {
        self.state.as_ref().ok_or(StateError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// The value of `key`, or `None` when the field is absent.
    pub fn get(&self, key: &str) -> Result<Option<&Value>, StateError> {
        Ok(self.current()?.get(key))
    }

    /// Deserialize the value of `key`. An absent field decodes from `null`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, StateError> {
        let value = self.get(key)?.cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|source| StateError::Decode {
            field: key.to_owned(),
            source,
        })
    }

    /// Snapshot of the whole state, including the version field.
    pub fn get_all(&self) -> Result<Value, StateError> {
        Ok(Value::Object(self.current()?.clone()))
    }

    /// Deserialize the whole state into `T`.
    pub fn get_all_as<T: DeserializeOwned>(&self) -> Result<T, StateError> {
        serde_json::from_value(self.get_all()?).map_err(StateError::DecodeAll)
    }

    /// Replace one field, revalidate everything, and persist.
    ///
    /// On any error the in-memory state is unchanged.
    pub async fn set(&mut self, key: &str, value: Value) -> Result<(), StateError> {
        let current = self.current()?;
        if key == self.config.version_field {
            return Err(StateError::ReservedField(key.to_owned()));
        }
        if !self.schema.declares(key) {
            return Err(StateError::UnknownField(key.to_owned()));
        }

        let mut draft = current.clone();
        draft.insert(key.to_owned(), value);
        let next = self.validate(&Value::Object(draft))?;
        let bytes = serde_json::to_vec(&next).map_err(StateError::Serialize)?;
        self.write(&bytes).await?;

        tracing::debug!(key = %self.config.storage_key, field = key, "state updated");
        self.state = Some(next);
        Ok(())
    }

    /// Compute a field's new value from its current one, then [`set`](Self::set) it.
    ///
    /// Not atomic with respect to other writers of the same storage key.
    pub async fn update<F>(&mut self, key: &str, updater: F) -> Result<(), StateError>
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let next = updater(self.get(key)?);
        self.set(key, next).await
    }

    /// Remove the stored blob, then reset memory to defaults.
    ///
    /// If removal fails the error is returned and memory is left as it was.
    /// On an uninitialized manager only the stored blob is removed.
    pub async fn clear(&mut self) -> Result<(), StateError> {
        let key = &self.config.storage_key;
        let removed = self.deadline(self.storage.remove_item(key)).await;
        removed.map_err(|source| StateError::StorageRemove {
            key: key.clone(),
            source,
        })?;
        if self.state.is_some() {
            self.state = Some(self.fresh_state());
        }
        tracing::info!(key = %self.config.storage_key, "state cleared");
        Ok(())
    }

    pub fn schema_version(&self) -> u32 {
        self.config.current_version
    }

    /// Fingerprint of the live schema.
    pub fn schema_hash(&self) -> &str {
        &self.live_hash
    }

    /// Recorded fingerprint for `version`, if the hash table has one.
    pub fn schema_hash_for_version(&self, version: u32) -> Option<&str> {
        self.config.schema_hashes.get(&version).map(String::as_str)
    }

    pub fn storage_key(&self) -> &str {
        &self.config.storage_key
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Compare the live fingerprint with the recorded one for the current version.
    pub fn drift(&self) -> DriftReport {
        let version = self.config.current_version;
        DriftReport {
            version,
            expected: self.schema_hash_for_version(version).map(str::to_owned),
            actual: self.live_hash.clone(),
        }
    }

    /// Read the stored blob; errors and timeouts count as absent.
    async fn read(&self) -> Option<Vec<u8>> {
        let key = &self.config.storage_key;
        match self.deadline(self.storage.get_item(key)).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(%key, error = %e, "storage read failed, treating as empty");
                None
            }
        }
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), StateError> {
        let key = &self.config.storage_key;
        self.deadline(self.storage.set_item(key, bytes))
            .await
            .map_err(|source| StateError::StorageWrite {
                key: key.clone(),
                source,
            })
    }

    /// Bound a storage call by the configured I/O timeout.
    async fn deadline<T>(
        &self,
        call: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        match self.config.io_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| StorageError::Timeout(limit))?,
            None => call.await,
        }
    }
}

/// A non-negative whole number that fits in `u32`. `1.0` reads as `1`.
fn version_number(value: &Value) -> Option<u32> {
    if let Some(v) = value.as_u64() {
        return u32::try_from(v).ok();
    }
    let v = value.as_f64()?;
    let whole = v.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&v);
    whole.then(|| v as u32)
}
