//! Consumption engine
//!
//! Every record is consumed through one of two strategies fixed at creation:
//!
//! - **Fetch-and-delete** (`max_views == 1`, and every legacy record): a single
//!   atomic `GETDEL`. Only one caller can ever observe the value.
//! - **Counted** (`max_views > 1`): fetch the hash, atomically increment
//!   `current_views` in the store, and delete the hash once the post-increment
//!   value reaches the budget. The increment is the linearization point: each
//!   reader gets a distinct value, and only values `1..=max_views` are served.
//!
//! No step is a client-side read-modify-write, so any number of relay
//! instances may share the store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::codec::{self, ConsumeStrategy, KeySpace, SecretRecord, FIELD_CURRENT_VIEWS};
use crate::config::{ReadMode, StoreConfig};
use crate::error::{RelayError, Result};
use crate::notify::NotificationDispatcher;
use crate::schema::ValidatedCreate;
use crate::storage::{KvStore, StoreResult};
use crate::token::{self, redact};

/// Creates and consumes secrets against a shared store
#[derive(Clone)]
pub struct ConsumptionEngine {
    store: Arc<dyn KvStore>,
    keys: KeySpace,
    mode: ReadMode,
    timeout: Duration,
    dispatcher: NotificationDispatcher,
}

impl ConsumptionEngine {
    /// Create an engine over `store`
    pub fn new(
        store: Arc<dyn KvStore>,
        config: &StoreConfig,
        mode: ReadMode,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            store,
            keys: KeySpace::new(config.key_prefix.clone()),
            mode,
            timeout: config.timeout(),
            dispatcher,
        }
    }

    /// Read semantics this engine serves
    pub fn mode(&self) -> ReadMode {
        self.mode
    }

    /// Store a new secret and return its token.
    ///
    /// No collision check is made; the token space makes collisions negligible.
    #[instrument(skip_all, fields(max_views = max_views, ttl_secs = ttl.as_secs()))]
    pub async fn create(
        &self,
        ciphertext: String,
        ttl: Duration,
        max_views: u32,
        notify_target: Option<String>,
    ) -> Result<String> {
        if max_views == 0 {
            return Err(RelayError::Validation("max_views must be positive".into()));
        }
        if ttl.is_zero() {
            return Err(RelayError::Validation("ttl must be positive".into()));
        }
        if self.mode == ReadMode::Legacy && (max_views > 1 || notify_target.is_some()) {
            return Err(RelayError::Validation(
                "legacy read mode supports single-view secrets without notification".into(),
            ));
        }

        let token = token::generate();
        let record = SecretRecord::new(ciphertext, max_views, notify_target);

        match ConsumeStrategy::select(max_views, self.mode) {
            ConsumeStrategy::FetchAndDelete => {
                let key = self.keys.single_shot(&token);
                let value = match self.mode {
                    ReadMode::Legacy => record.ciphertext.into_bytes(),
                    ReadMode::Counted => codec::to_envelope(&record)?,
                };
                self.call("SET", self.store.set_ex(&key, value, ttl)).await?;
            }
            ConsumeStrategy::Counted => {
                let key = self.keys.counted(&token);
                let fields = codec::to_fields(&record);
                self.call("HSET", self.store.hset_ex(&key, fields, ttl))
                    .await?;
            }
        }

        debug!(token = %redact(&token), "secret stored");
        Ok(token)
    }

    /// Store a secret from a validated create request
    pub async fn create_validated(&self, request: ValidatedCreate) -> Result<String> {
        self.create(
            request.ciphertext,
            request.ttl,
            request.max_views,
            request.notify_target,
        )
        .await
    }

    /// Consume one view of a secret.
    ///
    /// The read that exhausts the budget deletes the record and still receives
    /// the ciphertext. Fails with `NotFound` once the record is gone.
    #[instrument(skip_all, fields(token = %redact(token)))]
    pub async fn read(&self, token: &str) -> Result<String> {
        if !token::is_well_formed(token) {
            debug!("malformed token");
            return Err(RelayError::NotFound);
        }

        if let Some(record) = self.take_single_shot(token).await? {
            self.burned(token, record.notify_target);
            return Ok(record.ciphertext);
        }

        match self.mode {
            ReadMode::Legacy => {
                debug!("secret not found");
                Err(RelayError::NotFound)
            }
            ReadMode::Counted => self.read_counted(token).await,
        }
    }

    /// Single-shot read: one atomic fetch-and-delete, no view counting.
    ///
    /// Any caller racing against a successful call observes `NotFound`.
    #[instrument(skip_all, fields(token = %redact(token)))]
    pub async fn read_legacy(&self, token: &str) -> Result<String> {
        if !token::is_well_formed(token) {
            return Err(RelayError::NotFound);
        }

        match self.take_single_shot(token).await? {
            Some(record) => {
                self.burned(token, record.notify_target);
                Ok(record.ciphertext)
            }
            None => {
                debug!("secret not found");
                Err(RelayError::NotFound)
            }
        }
    }

    /// Probe the store
    pub async fn health_check(&self) -> Result<()> {
        self.call("PING", self.store.ping()).await
    }

    async fn take_single_shot(&self, token: &str) -> Result<Option<SecretRecord>> {
        let key = self.keys.single_shot(token);
        let Some(bytes) = self.call("GETDEL", self.store.get_del(&key)).await? else {
            return Ok(None);
        };

        let record = match self.mode {
            ReadMode::Legacy => codec::from_legacy_blob(bytes)?,
            ReadMode::Counted => codec::from_envelope(&bytes)?,
        };
        Ok(Some(record))
    }

    async fn read_counted(&self, token: &str) -> Result<String> {
        let key = self.keys.counted(token);

        let fields = self.call("HGETALL", self.store.hgetall(&key)).await?;
        let Some(record) = codec::from_fields(&fields)? else {
            debug!("secret not found");
            return Err(RelayError::NotFound);
        };

        let Some(views) = self
            .call(
                "HINCRBY",
                self.store.hincr_existing(&key, FIELD_CURRENT_VIEWS, 1),
            )
            .await?
        else {
            debug!("secret removed between fetch and increment");
            return Err(RelayError::NotFound);
        };

        let max_views = i64::from(record.max_views);
        if views >= max_views {
            // Another reader may have deleted it already; either way the
            // record is exhausted, so a failed delete is left to the TTL.
            if let Err(e) = self.call("DEL", self.store.del(&key)).await {
                warn!(error = %e, "failed to delete exhausted secret");
            }
        }

        if views > max_views {
            debug!(views, max_views, "view budget exhausted by concurrent readers");
            return Err(RelayError::NotFound);
        }

        debug!(views, max_views, "view consumed");
        if views == max_views {
            self.burned(token, record.notify_target);
        }
        Ok(record.ciphertext)
    }

    fn burned(&self, token: &str, notify_target: Option<String>) {
        debug!("secret burned");
        if let Some(target) = notify_target {
            // Detached: the reader's response never waits on delivery.
            drop(self.dispatcher.dispatch(target, token.to_string()));
        }
    }

    async fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(op, error = %e, "store call failed");
                Err(e.into())
            }
            Err(_) => {
                warn!(op, timeout_ms = self.timeout.as_millis() as u64, "store call timed out");
                Err(RelayError::StorageUnavailable(format!(
                    "{} timed out after {:?}",
                    op, self.timeout
                )))
            }
        }
    }
}
