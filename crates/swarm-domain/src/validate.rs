use std::collections::HashSet;

use crate::error::DomainError;
use crate::types::InstanceConfig;

/// Structural validation of a desired-state `InstanceConfig`, independent of
/// any provider. Providers may layer additional, provider-specific checks on
/// top (surfaced as `ProviderError::Validation`).
pub fn validate_config(config: &InstanceConfig) -> Result<(), DomainError> {
    if config.name.trim().is_empty() {
        return Err(DomainError::EmptyName);
    }
    if config.image.trim().is_empty() {
        return Err(DomainError::EmptyImage);
    }
    if config.resources.cpu <= 0.0 {
        return Err(DomainError::InvalidCpu(config.resources.cpu));
    }

    let mut seen_host_ports: HashSet<u16> = HashSet::new();
    for port in &config.network.ports {
        if port.host_port == 0 {
            continue; // 0 = "let the provider pick", never conflicts
        }
        if !seen_host_ports.insert(port.host_port) {
            return Err(DomainError::DuplicateHostPort(port.host_port));
        }
    }

    Ok(())
}
