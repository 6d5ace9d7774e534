pub mod exporter;
pub mod retry_policy;

pub use exporter::{export, write_exports, ExportFormat};
pub use retry_policy::{Backoff, RetryDecision, RetryPolicy};
