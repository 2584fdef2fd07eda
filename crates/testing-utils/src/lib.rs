//! Testing utilities for the orchestrator crates
//!
//! Provides an in-memory implementation of every repository trait plus
//! mock transport/credential implementations and entity builders, so the
//! application and dispatcher layers can be exercised without a database.

pub mod builders;
pub mod mocks;

pub use builders::{PipelineBuilder, TaskDefinitionBuilder, TaskRunBuilder};
pub use mocks::{InMemoryStore, MockCredentialIssuer, MockWorkerTransport};
