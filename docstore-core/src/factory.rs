//! Keyed registry of lazily established connections.
//!
//! Each logical database key owns one [`ConnectionConfig`] and up to two cached stores: one
//! reading from the primary and one preferring secondaries. A store is established on the
//! first [`ConnectionFactory::get_store`] call for its `(key, mode)` pair and handed out as a
//! shared `Arc` from then on.
//!
//! All registration and establishment happens under a single async mutex. Concurrent first
//! requests for the same slot therefore cause exactly one connection attempt, and a failed
//! attempt leaves the slot empty so the next caller tries again.

use std::{collections::HashMap, fmt, sync::Arc};

use mea::mutex::Mutex;

use crate::{
    backend::{Backend, Connector},
    config::{ConnectionConfig, FactoryConfig, ReadMode},
    error::{DocumentStoreError, DocumentStoreResult},
    logging::Logger,
    store::Store,
};

#[derive(Debug)]
struct Entry<B: Backend> {
    config: ConnectionConfig,
    primary: Option<Arc<Store<B>>>,
    secondary: Option<Arc<Store<B>>>,
}

impl<B: Backend> Entry<B> {
    fn new(config: ConnectionConfig) -> Self {
        Entry { config, primary: None, secondary: None }
    }
}

/// Hands out one shared [`Store`] per `(key, ReadMode)`.
pub struct ConnectionFactory<C: Connector> {
    connector: C,
    entries: Mutex<HashMap<String, Entry<C::Backend>>>,
    logger: Logger,
}

impl<C: Connector> fmt::Debug for ConnectionFactory<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("connector", &self.connector)
            .field("logger", &self.logger)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> ConnectionFactory<C> {
    pub fn new(connector: C) -> Self {
        ConnectionFactory {
            connector,
            entries: Mutex::new(HashMap::new()),
            logger: Logger::default(),
        }
    }

    /// Sets the logger used by the factory and by every store it establishes.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Registers `config` under `key`. No connection is made until a store is requested.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::DuplicateKey`] if `key` is already registered; the existing
    /// configuration is kept.
    pub async fn register(
        &self,
        key: impl Into<String>,
        config: ConnectionConfig,
    ) -> DocumentStoreResult<()> {
        let key = key.into();
        let mut entries = self.entries.lock().await;

        if entries.contains_key(&key) {
            return Err(DocumentStoreError::DuplicateKey(key));
        }

        self.logger.scope(|| {
            tracing::debug!(key = key.as_str(), database = config.database.as_str(), "registered connection")
        });
        entries.insert(key, Entry::new(config));

        Ok(())
    }

    /// Registers every connection of `config`, stopping at the first duplicate key.
    pub async fn register_all(&self, config: FactoryConfig) -> DocumentStoreResult<()> {
        for (key, connection) in config.connections {
            self.register(key, connection).await?;
        }
        Ok(())
    }

    /// Registered keys in lexical order.
    pub async fn registered_keys(&self) -> Vec<String> {
        let entries = self.entries.lock().await;
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns the store for `key` in `mode`, establishing its connection on first use.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::UnknownKey`] if `key` was never registered
    /// - [`DocumentStoreError::ConnectionFailure`] if connecting or pinging failed; nothing is
    ///   cached and the next call retries
    pub async fn get_store(
        &self,
        key: &str,
        mode: ReadMode,
    ) -> DocumentStoreResult<Arc<Store<C::Backend>>> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| DocumentStoreError::UnknownKey(key.to_string()))?;

        let slot = match mode {
            ReadMode::Primary => &mut entry.primary,
            ReadMode::SecondaryPreferred => &mut entry.secondary,
        };
        if let Some(store) = slot.as_ref() {
            return Ok(Arc::clone(store));
        }

        let store = Arc::new(self.establish(key, &entry.config, mode).await?);
        *slot = Some(Arc::clone(&store));

        Ok(store)
    }

    async fn establish(
        &self,
        key: &str,
        config: &ConnectionConfig,
        mode: ReadMode,
    ) -> DocumentStoreResult<Store<C::Backend>> {
        let outcome = self.connect(config, mode).await;

        match outcome {
            Ok(backend) => {
                self.logger.scope(|| {
                    tracing::info!(
                        key,
                        ?mode,
                        database = config.database.as_str(),
                        endpoints = %config.endpoints.join(","),
                        "connected to document store"
                    )
                });

                Ok(Store::new(backend, config.database.clone())
                    .with_logger(self.logger.clone())
                    .with_default_timeout(config.operation_timeout()))
            }
            Err(err) => {
                self.logger.scope(|| {
                    tracing::warn!(key, ?mode, error = %err, "failed to connect to document store")
                });

                Err(DocumentStoreError::ConnectionFailure(key.to_string(), err.to_string()))
            }
        }
    }

    async fn connect(
        &self,
        config: &ConnectionConfig,
        mode: ReadMode,
    ) -> DocumentStoreResult<C::Backend> {
        config.validate()?;

        let backend = self
            .connector
            .connect(&config.uri(mode), config.max_pool_size)
            .await?;
        backend.ping(config.ping_timeout()).await?;

        Ok(backend)
    }
}
