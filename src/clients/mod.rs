pub mod analyst_client;
pub mod cortex_client;

pub use analyst_client::{
    AnalystConnection, AnalystFailure, Answer, FailureKind, SEMANTIC_MODEL_ERROR_CODE,
};
pub use cortex_client::CortexAnalystClient;
