pub mod question_ctx;
pub mod question_runner;

pub use question_ctx::QuestionCtx;
pub use question_runner::QuestionRunner;
