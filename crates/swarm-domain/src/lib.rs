pub mod error;
mod tests;
pub mod types;
pub mod validate;

pub use error::DomainError;
pub use types::*;
pub use validate::validate_config;
