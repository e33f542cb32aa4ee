//! Request routing
//!
//! - Request and response model
//! - Collaborator seams: address resolution, codec, CPU telemetry
//! - Read quorum selection for strong and bounded-staleness reads
//! - `RequestOrchestrator::execute`, the single entry point

mod collaborators;
mod diagnostics;
mod model;
mod orchestrator;
mod quorum;

pub use collaborators::{
    AddressResolver, CpuMonitor, FixedCpuMonitor, JsonCodec, RequestCodec, StaticAddressResolver,
};
pub use diagnostics::RequestDiagnostics;
pub use model::{ConsistencyLevel, OperationType, PartitionId, StoreRequest, StoreResponse};
pub use orchestrator::{Collaborators, RequestOrchestrator};
pub use quorum::{evaluate as evaluate_quorum, quorum_progress, read_quorum, QuorumResult};
