// ABOUTME: Root module for switchyard - task dispatch and resource allocation engine.
// ABOUTME: Re-exports all public types from submodules.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod prelude;
pub mod scheduler;
pub mod worker;

pub use error::SwitchyardError;
