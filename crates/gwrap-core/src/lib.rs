//! Core pieces shared by the gwrap service clients.
//!
//! - [`ApiError`] - the error taxonomy every operation reports through
//! - [`PageCollector`] - continuation-token loop behind every list operation
//! - [`tracing`] - subscriber setup for the diagnostics the clients emit

pub mod error;
pub mod pagination;
pub mod tracing;

pub use error::{ApiError, ApiErrorCode, ApiResult};
pub use pagination::{Page, PageCollector};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
