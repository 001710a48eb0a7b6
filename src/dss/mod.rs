//! DSS access
//!
//! Wire types, the transport seam, authentication and the typed client used
//! by scenarios, plus an in-memory deployment implementing the same endpoints.

pub mod auth;
pub mod client;
pub mod geo;
pub mod mock;
pub mod query;
pub mod transport;
pub mod types;

pub use client::DssInstance;
pub use mock::{Fault, MockDeployment};
pub use query::{Fetched, Query};
