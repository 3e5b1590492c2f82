//! HTTP host surface standing in for the mobile plugin runtime.
//!
//! - [`routes`]: one route per host method, rejection mapping
//! - [`streaming`]: SSE stream of download progress and outcome

pub mod routes;
pub mod streaming;
