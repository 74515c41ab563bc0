pub mod agent;
pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod pipeline;
pub mod policy;
pub mod resolution;
pub mod run;
pub mod samples;
pub mod stages;
pub mod types;

pub use error::{ErrorOrigin, GuardError};
pub use types::*;
