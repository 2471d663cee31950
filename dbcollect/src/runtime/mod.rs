/// Builder for the collection runtime.
pub mod builder;
/// Per-instance orchestration: generator, processor pool and ingestion.
pub mod supervisor;
/// Generator and processor tasks and their shared run state.
pub mod worker;

pub use builder::CollectRuntimeBuilder;
pub use supervisor::{CollectRuntime, EXIT_ABORTED, EXIT_PANICKED, RunSummary};
pub use worker::{InfoSource, RunContext, WorkerConfig, job_generator, job_processor};
