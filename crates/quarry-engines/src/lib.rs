//! quarry-engines — the analytical algorithms behind the execution host.
//!
//! Every engine is a pure function over an owned copy of its input. Long
//! computations report through a [`Progress`] sink, which is also where
//! cancellation surfaces as [`EngineError::Cancelled`].

pub mod anomaly;
pub mod community;
pub mod error;
pub mod features;
pub mod preconditions;
pub mod progress;
pub mod surface;

pub use error::EngineError;
pub use progress::{NoProgress, Progress};
