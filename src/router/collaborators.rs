//! External collaborators
//!
//! Address resolution, message encoding and CPU telemetry are provided by
//! the embedding application. Simple in-process implementations are
//! included for tools and tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::model::{PartitionId, StoreRequest, StoreResponse};
use crate::errors::{RouterError, RouterResult};
use crate::replica::ReplicaEndpoint;

/// Resolves the replica set of a partition.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// `region` of `None` means the local region. `force_refresh` bypasses
    /// any cache.
    async fn resolve_addresses(
        &self,
        partition: &PartitionId,
        region: Option<&str>,
        force_refresh: bool,
    ) -> RouterResult<Vec<Arc<ReplicaEndpoint>>>;
}

/// Encodes requests and decodes responses.
pub trait RequestCodec: Send + Sync {
    fn serialize(&self, request: &StoreRequest) -> RouterResult<Vec<u8>>;
    fn deserialize(&self, bytes: &[u8]) -> RouterResult<StoreResponse>;
}

/// Client CPU telemetry.
pub trait CpuMonitor: Send + Sync {
    /// Current load in percent, or NaN when unknown.
    fn current_cpu_load(&self) -> f64;
}

/// Fixed per-region replica sets shared by every partition.
///
/// Endpoints are handed out as the same `Arc`s on every call, so health
/// marks persist across requests.
#[derive(Debug, Default)]
pub struct StaticAddressResolver {
    regions: RwLock<Vec<(String, Vec<Arc<ReplicaEndpoint>>)>>,
    refreshes: AtomicU64,
}

impl StaticAddressResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a region. The first registered region is the local one.
    pub fn add_region(&self, region: impl Into<String>, replicas: Vec<Arc<ReplicaEndpoint>>) {
        let mut regions = self.regions.write().unwrap_or_else(|e| e.into_inner());
        regions.push((region.into(), replicas));
    }

    /// Number of forced refreshes requested so far.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AddressResolver for StaticAddressResolver {
    async fn resolve_addresses(
        &self,
        partition: &PartitionId,
        region: Option<&str>,
        force_refresh: bool,
    ) -> RouterResult<Vec<Arc<ReplicaEndpoint>>> {
        if force_refresh {
            self.refreshes.fetch_add(1, Ordering::Relaxed);
        }
        let regions = self.regions.read().unwrap_or_else(|e| e.into_inner());
        let found = match region {
            Some(wanted) => regions.iter().find(|(name, _)| name == wanted),
            None => regions.first(),
        };
        found.map(|(_, replicas)| replicas.clone()).ok_or_else(|| {
            RouterError::gone(format!(
                "no replicas for {} in region {}",
                partition,
                region.unwrap_or("<local>")
            ))
        })
    }
}

/// JSON encoding of the request and response model.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl RequestCodec for JsonCodec {
    fn serialize(&self, request: &StoreRequest) -> RouterResult<Vec<u8>> {
        serde_json::to_vec(request)
            .map_err(|e| RouterError::internal(format!("request encoding failed: {}", e)))
    }

    fn deserialize(&self, bytes: &[u8]) -> RouterResult<StoreResponse> {
        serde_json::from_slice(bytes)
            .map_err(|e| RouterError::internal(format!("response decoding failed: {}", e)))
    }
}

/// Reports a constant CPU load.
#[derive(Debug, Clone, Copy)]
pub struct FixedCpuMonitor {
    load: f64,
}

impl FixedCpuMonitor {
    pub fn new(load: f64) -> Self {
        Self { load }
    }

    /// Telemetry not available.
    pub fn unknown() -> Self {
        Self { load: f64::NAN }
    }
}

impl CpuMonitor for FixedCpuMonitor {
    fn current_cpu_load(&self) -> f64 {
        self.load
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::OperationType;

    #[tokio::test]
    async fn test_static_resolver_regions() {
        let resolver = StaticAddressResolver::new();
        let west = vec![Arc::new(ReplicaEndpoint::new("rntbd://w1:1"))];
        let east = vec![Arc::new(ReplicaEndpoint::new("rntbd://e1:1"))];
        resolver.add_region("west", west);
        resolver.add_region("east", east);
        let partition = PartitionId::new("coll", "0");

        let local = resolver.resolve_addresses(&partition, None, false).await.unwrap();
        assert_eq!(local[0].uri(), "rntbd://w1:1");
        let remote = resolver
            .resolve_addresses(&partition, Some("east"), true)
            .await
            .unwrap();
        assert_eq!(remote[0].uri(), "rntbd://e1:1");
        assert_eq!(resolver.refresh_count(), 1);
        assert!(resolver
            .resolve_addresses(&partition, Some("north"), false)
            .await
            .is_err());
    }

    #[test]
    fn test_json_codec_roundtrip_request() {
        let codec = JsonCodec;
        let request = StoreRequest::new(OperationType::Read, PartitionId::new("c", "1"));
        let bytes = codec.serialize(&request).unwrap();
        let decoded: StoreRequest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, request);
        assert!(codec.deserialize(b"not json").is_err());
    }

    #[test]
    fn test_unknown_cpu_is_nan() {
        assert!(FixedCpuMonitor::unknown().current_cpu_load().is_nan());
    }
}
