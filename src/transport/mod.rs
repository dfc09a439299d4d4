//! Transport layer — dual STDIO/streamable-HTTP MCP transports sharing one
//! Session Manager, Event Store, Tool Registry, and Workflow Engine.

pub mod http;
pub mod manager;
pub mod router;
pub mod stdio;

pub use manager::{TransportManager, TransportManagerConfig};
pub use router::{build_router, ApiError, RouterConfig};
