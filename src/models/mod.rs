pub mod job;
pub mod loaders;
pub mod question;

pub use job::{Job, JobStatus, JobSummary};
pub use loaders::{load_questions, parse_questions};
pub use question::{Question, QuestionResult, ResultStatus};
