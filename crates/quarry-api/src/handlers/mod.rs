pub mod status;
pub mod tasks;

use quarry_services::HostCoordinator;

#[derive(Clone)]
pub struct ApiState {
    pub coordinator: HostCoordinator,
}

impl ApiState {
    pub fn new(coordinator: HostCoordinator) -> Self {
        Self { coordinator }
    }
}

pub use status::handle_status;
pub use tasks::{handle_cancel, handle_submit, handle_task, handle_tasks};
