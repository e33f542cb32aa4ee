//! aeroroute - client-side request routing for a multi-region replicated store
//!
//! Replica selection, pooled channels with admission control, retry
//! policies, session-token vector clocks and replication barriers, composed
//! behind `RequestOrchestrator::execute`.

pub mod barrier;
pub mod cli;
pub mod config;
pub mod errors;
pub mod observability;
pub mod replica;
pub mod retry;
pub mod router;
pub mod session;
pub mod transport;

pub use config::RouterConfig;
pub use errors::{RouterError, RouterErrorKind, RouterResult};
pub use router::{Collaborators, RequestOrchestrator, StoreRequest, StoreResponse};
pub use session::SessionToken;
