//! Build execution and source backends for Shipyard.
//!
//! - [`docker::LocalDockerExecutor`] runs build jobs in Docker containers
//! - [`git::GitSource`] pins a branch to a revision with `git ls-remote`

pub mod docker;
pub mod git;

pub use docker::LocalDockerExecutor;
pub use git::GitSource;
pub use shipyard_core::executor::{
    Executor, GitCloneSpec, JobHandle, JobResult, JobSpec, JobStatus, LogLine, LogStream,
    VolumeMount,
};
