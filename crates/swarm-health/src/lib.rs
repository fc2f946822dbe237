pub mod error;
pub mod monitor;

pub use error::HealthError;
pub use monitor::HealthMonitor;
