mod builder;
mod supervisor;

pub use builder::DispatchSupervisorBuilder;
pub use supervisor::{CancelToken, DispatchSupervisor};
