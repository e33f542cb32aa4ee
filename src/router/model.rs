//! Request and response model

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::SessionToken;

/// Kind of store operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Read,
    Query,
    Head,
    Create,
    Replace,
    Upsert,
    Delete,
    /// Synthetic read used to confirm replication progress
    Barrier,
}

impl OperationType {
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            OperationType::Read | OperationType::Query | OperationType::Head | OperationType::Barrier
        )
    }

    pub fn is_write(&self) -> bool {
        !self.is_read_only()
    }
}

/// Consistency level requested for an operation or configured for the
/// account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    Strong,
    BoundedStaleness,
    #[default]
    Session,
    Eventual,
}

impl ConsistencyLevel {
    /// Reads at this level must wait for a read barrier.
    pub fn requires_read_barrier(&self) -> bool {
        matches!(self, ConsistencyLevel::Strong | ConsistencyLevel::BoundedStaleness)
    }
}

/// A partition key range of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionId {
    pub collection: String,
    pub range_id: String,
}

impl PartitionId {
    pub fn new(collection: impl Into<String>, range_id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            range_id: range_id.into(),
        }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.range_id)
    }
}

/// A logical request as handed to the codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRequest {
    pub activity_id: Uuid,
    pub operation: OperationType,
    pub partition: PartitionId,
    /// Per-request override of the account consistency
    #[serde(default)]
    pub consistency: Option<ConsistencyLevel>,
    /// Token the serving replica must satisfy
    #[serde(default)]
    pub session_token: Option<SessionToken>,
    /// LSN a barrier probe is waiting for
    #[serde(default)]
    pub target_lsn: Option<i64>,
    #[serde(default)]
    pub body: Vec<u8>,
}

impl StoreRequest {
    pub fn new(operation: OperationType, partition: PartitionId) -> Self {
        Self {
            activity_id: Uuid::new_v4(),
            operation,
            partition,
            consistency: None,
            session_token: None,
            target_lsn: None,
            body: Vec::new(),
        }
    }

    /// Probe for replication progress at `target_lsn`.
    pub fn barrier(partition: PartitionId, target_lsn: i64) -> Self {
        let mut request = Self::new(OperationType::Barrier, partition);
        request.target_lsn = Some(target_lsn);
        request
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_consistency(mut self, consistency: ConsistencyLevel) -> Self {
        self.consistency = Some(consistency);
        self
    }

    pub fn with_session_token(mut self, token: SessionToken) -> Self {
        self.session_token = Some(token);
        self
    }
}

/// A decoded backend response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreResponse {
    pub status_code: u16,
    #[serde(default)]
    pub sub_status_code: u32,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Vec<u8>,
    #[serde(default)]
    pub lsn: i64,
    #[serde(default)]
    pub global_committed_lsn: i64,
    #[serde(default)]
    pub session_token: Option<SessionToken>,
}

impl StoreResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            sub_status_code: 0,
            headers: BTreeMap::new(),
            body: Vec::new(),
            lsn: 0,
            global_committed_lsn: 0,
            session_token: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Body as text, for error messages.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
