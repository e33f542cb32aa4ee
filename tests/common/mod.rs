//! In-memory backend shared by the integration tests.
//!
//! Every endpoint answers from its own script first, then from its default
//! reply. All calls are recorded.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use aeroroute::config::{PoolConfig, RouterConfig};
use aeroroute::replica::ReplicaEndpoint;
use aeroroute::router::{
    Collaborators, FixedCpuMonitor, JsonCodec, OperationType, StaticAddressResolver,
    StoreRequest, StoreResponse,
};
use aeroroute::session::SessionToken;
use aeroroute::transport::{CallProgress, Connection, Connector, TransportError, TransportResult};

/// How an endpoint answers one call.
#[derive(Debug, Clone)]
pub enum Reply {
    Respond(StoreResponse),
    /// Connection reset before the payload was written
    Reset,
    /// Payload written, no answer ever
    Hang,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Respond(StoreResponse::new(200))
    }

    pub fn status(status_code: u16, sub_status_code: u32) -> Self {
        let mut response = StoreResponse::new(status_code);
        response.sub_status_code = sub_status_code;
        Reply::Respond(response)
    }

    pub fn with_token(token: &str) -> Self {
        let mut response = StoreResponse::new(200);
        response.session_token = Some(token.parse::<SessionToken>().unwrap());
        Reply::Respond(response)
    }

    pub fn progress(lsn: i64, global_committed_lsn: i64) -> Self {
        let mut response = StoreResponse::new(200);
        response.lsn = lsn;
        response.global_committed_lsn = global_committed_lsn;
        Reply::Respond(response)
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub endpoint: String,
    pub operation: OperationType,
}

#[derive(Default)]
pub struct FakeBackend {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    defaults: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, endpoint: &str, replies: Vec<Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default()
            .extend(replies);
    }

    pub fn set_default(&self, endpoint: &str, reply: Reply) {
        self.defaults
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), reply);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, endpoint: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.endpoint == endpoint)
            .collect()
    }

    fn next_reply(&self, endpoint: &str) -> Reply {
        if let Some(reply) = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(endpoint)
            .and_then(|queue| queue.pop_front())
        {
            return reply;
        }
        self.defaults
            .lock()
            .unwrap()
            .get(endpoint)
            .cloned()
            .unwrap_or_else(Reply::ok)
    }
}

struct FakeConnection {
    endpoint: String,
    backend: Arc<FakeBackend>,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn send(&self, payload: Vec<u8>, progress: &CallProgress) -> TransportResult<Vec<u8>> {
        let request: StoreRequest = serde_json::from_slice(&payload).unwrap();
        self.backend.calls.lock().unwrap().push(Call {
            endpoint: self.endpoint.clone(),
            operation: request.operation,
        });

        match self.backend.next_reply(&self.endpoint) {
            Reply::Respond(response) => {
                progress.mark_sent();
                Ok(serde_json::to_vec(&response).unwrap())
            }
            Reply::Reset => Err(TransportError::SendFailed {
                endpoint: self.endpoint.clone(),
                message: "connection reset".into(),
                payload_sent: false,
            }),
            Reply::Hang => {
                progress.mark_sent();
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Err(TransportError::ChannelClosed {
                    endpoint: self.endpoint.clone(),
                })
            }
        }
    }

    fn is_healthy(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

pub struct FakeConnector {
    backend: Arc<FakeBackend>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, endpoint: &str) -> TransportResult<Arc<dyn Connection>> {
        Ok(Arc::new(FakeConnection {
            endpoint: endpoint.to_string(),
            backend: Arc::clone(&self.backend),
        }))
    }
}

/// Replica set named `{region}-{i}`; replica 0 is the primary.
pub fn region_replicas(region: &str, count: usize) -> Vec<Arc<ReplicaEndpoint>> {
    (0..count)
        .map(|i| {
            let endpoint =
                ReplicaEndpoint::new(format!("rntbd://{}-{}:10250", region, i)).with_region(region);
            Arc::new(if i == 0 { endpoint.primary() } else { endpoint })
        })
        .collect()
}

pub fn uri(region: &str, index: usize) -> String {
    format!("rntbd://{}-{}:10250", region, index)
}

pub fn test_config(regions: &[&str]) -> RouterConfig {
    RouterConfig {
        pool: PoolConfig {
            request_timeout_ms: 100,
            ..PoolConfig::default()
        },
        preferred_regions: regions.iter().map(|r| r.to_string()).collect(),
        rng_seed: Some(7),
        ..RouterConfig::default()
    }
}

pub fn collaborators(
    backend: &Arc<FakeBackend>,
    resolver: &Arc<StaticAddressResolver>,
) -> Collaborators {
    Collaborators {
        connector: Arc::new(FakeConnector {
            backend: Arc::clone(backend),
        }),
        resolver: resolver.clone(),
        codec: Arc::new(JsonCodec),
        cpu: Arc::new(FixedCpuMonitor::new(10.0)),
    }
}
