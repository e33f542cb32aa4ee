//! Transport Client
//!
//! Maps endpoint URIs to their channel pools. Pools are created on first
//! use and live until `close_all`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;

use super::connector::Connector;
use super::errors::TransportResult;
use super::pool::ChannelPool;
use crate::config::PoolConfig;
use crate::observability::MetricsRegistry;

/// Endpoint -> pool dictionary
pub struct TransportClient {
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    metrics: Arc<MetricsRegistry>,
    pools: RwLock<HashMap<String, Arc<ChannelPool>>>,
}

impl TransportClient {
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            connector,
            config,
            metrics,
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Pool for `endpoint`, created if absent.
    pub fn pool(&self, endpoint: &str) -> Arc<ChannelPool> {
        {
            let pools = self.pools.read().unwrap_or_else(|e| e.into_inner());
            if let Some(pool) = pools.get(endpoint) {
                return Arc::clone(pool);
            }
        }

        let mut pools = self.pools.write().unwrap_or_else(|e| e.into_inner());
        let pool = pools.entry(endpoint.to_string()).or_insert_with(|| {
            Arc::new(ChannelPool::new(
                endpoint,
                Arc::clone(&self.connector),
                self.config.clone(),
                Arc::clone(&self.metrics),
            ))
        });
        Arc::clone(pool)
    }

    /// Send one request to `endpoint`.
    pub async fn request(
        &self,
        endpoint: &str,
        payload: Vec<u8>,
        cancel: &CancellationToken,
    ) -> TransportResult<Vec<u8>> {
        let pool = self.pool(endpoint);
        pool.request(payload, cancel).await
    }

    pub fn pool_count(&self) -> usize {
        self.pools.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Retire every pooled channel and forget all pools.
    pub fn close_all(&self) {
        let pools: Vec<Arc<ChannelPool>> = {
            let mut pools = self.pools.write().unwrap_or_else(|e| e.into_inner());
            pools.drain().map(|(_, pool)| pool).collect()
        };
        for pool in pools {
            pool.close_all();
        }
    }
}
