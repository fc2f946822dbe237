pub mod controller;
pub mod error;
pub mod filter;

pub use controller::{ProviderStatus, SwarmController, SwarmStatus};
pub use error::ControllerError;
pub use filter::InstanceFilter;
