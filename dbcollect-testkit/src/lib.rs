//! Test doubles for dbcollect.

mod job;
mod mock;
mod sqlplus;

pub use job::{TestJob, TestJobKind};
pub use mock::{MockSession, MockSessionFactory, RecordingArchive, RunRecord, ScriptedMetadata};
pub use sqlplus::{FakeHome, FakeSqlplus};
