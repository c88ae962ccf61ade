// Kawaraban Request Core Library
//
// Every backend call of the feed reader goes through `RequestOrchestrator`;
// state-changing calls made while offline wait in `OfflineQueue`.

pub mod cache; // Response cache with TTL
pub mod cancel;
pub mod circuit_breaker; // Per-endpoint circuit breakers
pub mod config;
pub mod connectivity;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics; // Prometheus metrics
pub mod orchestrator;
pub mod queue; // Offline operation queue
pub mod request;
pub mod request_coalescing; // In-flight deduplication
pub mod retry;
pub mod store;
pub mod transport;

pub use config::Config;
pub use error::RequestError;
pub use orchestrator::RequestOrchestrator;
pub use queue::OfflineQueue;
pub use request::{RequestDescriptor, RequestId, Response};
