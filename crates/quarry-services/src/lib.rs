//! quarry-services — execution hosts and the coordinator that drives them.

pub mod cancel;
pub mod coordinator;
pub mod host;
pub mod request_store;

pub use cancel::CancelToken;
pub use coordinator::{CoordinatorError, HostCoordinator, RequestHandle, TaskOutcome};
pub use host::Inbound;
pub use request_store::{RequestStatus, RequestStore, StatusCounts, TrackedRequest};
