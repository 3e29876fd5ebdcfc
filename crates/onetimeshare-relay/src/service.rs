//! The three operations exposed to an outer transport layer
//!
//! Admission runs first, so a rate-limited client never touches the store.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, instrument};

use crate::admission::{AdmissionController, ClientIdentity, Endpoint};
use crate::config::{RelayConfig, SecretLimits};
use crate::engine::ConsumptionEngine;
use crate::error::{RelayError, Result};
use crate::notify::NotificationDispatcher;
use crate::schema::{CreateSecretRequest, CreateSecretResponse, HealthResponse, ReadSecretResponse};
use crate::storage::{KvStore, RedisStore};
use crate::token::redact;

/// Aborts the window purge loop once the last service clone is dropped
struct PurgeTask(JoinHandle<()>);

impl Drop for PurgeTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Admission, validation and consumption bound together
#[derive(Clone)]
pub struct SecretService {
    engine: ConsumptionEngine,
    admission: Arc<AdmissionController>,
    limits: SecretLimits,
    purge_task: Option<Arc<PurgeTask>>,
}

impl SecretService {
    /// Assemble a service from its parts
    pub fn new(
        engine: ConsumptionEngine,
        admission: Arc<AdmissionController>,
        limits: SecretLimits,
    ) -> Self {
        Self {
            engine,
            admission,
            limits,
            purge_task: None,
        }
    }

    /// Build a service over `store` as `config` describes.
    ///
    /// Rate-limit windows are only reclaimed once [`Self::with_purge_task`]
    /// is called; [`Self::connect`] does so.
    pub fn from_config(config: &RelayConfig, store: Arc<dyn KvStore>) -> Result<Self> {
        config.validate().map_err(RelayError::Validation)?;

        let dispatcher = NotificationDispatcher::from_config(&config.notify)
            .map_err(|e| RelayError::Validation(format!("notifier: {}", e)))?;
        let engine = ConsumptionEngine::new(store, &config.store, config.read_mode, dispatcher);
        let admission = Arc::new(AdmissionController::new(&config.admission));

        Ok(Self::new(engine, admission, config.limits.clone()))
    }

    /// Connect to the configured Redis and build a service over it
    pub async fn connect(config: &RelayConfig) -> Result<Self> {
        let store = RedisStore::connect(&config.store.url).await?;
        info!(
            read_mode = ?config.read_mode,
            prefix = %config.store.key_prefix,
            "relay connected to store"
        );
        let service = Self::from_config(config, Arc::new(store))?;
        let every = service.admission.purge_interval();
        Ok(service.with_purge_task(every))
    }

    /// Reclaim rolled-over rate-limit windows every `every` on the current
    /// runtime, for as long as a clone of this service is alive
    pub fn with_purge_task(mut self, every: Duration) -> Self {
        let handle = Arc::clone(&self.admission).spawn_purge_task(every);
        self.purge_task = Some(Arc::new(PurgeTask(handle)));
        self
    }

    /// Underlying engine
    pub fn engine(&self) -> &ConsumptionEngine {
        &self.engine
    }

    /// Shared admission controller
    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// CreateSecret
    #[instrument(skip_all, fields(client = %client))]
    pub async fn create_secret(
        &self,
        client: &ClientIdentity,
        request: CreateSecretRequest,
    ) -> Result<CreateSecretResponse> {
        self.admission.check(client, Endpoint::Create)?;

        let validated = request.validate(&self.limits)?;
        let max_views = validated.max_views;
        let token = self.engine.create_validated(validated).await?;

        info!(token = %redact(&token), max_views, "secret created");
        Ok(CreateSecretResponse { token })
    }

    /// ReadSecret
    #[instrument(skip_all, fields(client = %client, token = %redact(token)))]
    pub async fn read_secret(
        &self,
        client: &ClientIdentity,
        token: &str,
    ) -> Result<ReadSecretResponse> {
        self.admission.check(client, Endpoint::Read)?;

        let ciphertext = self.engine.read(token).await?;
        Ok(ReadSecretResponse { ciphertext })
    }

    /// HealthCheck
    pub async fn health_check(&self) -> Result<HealthResponse> {
        self.engine.health_check().await?;
        Ok(HealthResponse::ok())
    }
}
