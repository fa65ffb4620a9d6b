// ABOUTME: Worker module - defines workers, their registry and factory, and results.
// ABOUTME: Workers are the pluggable executors the scheduler routes tasks to.

mod model;
mod registry;
mod result;
mod traits;

pub use model::*;
pub use registry::*;
pub use result::*;
pub use traits::*;
