#[cfg(test)]
mod tests {
    use crate::types::*;
    use crate::validate::validate_config;
    use std::collections::HashMap;

    fn valid_config() -> InstanceConfig {
        InstanceConfig {
            name: "vscode-a".to_string(),
            image: "codercom/code-server:latest".to_string(),
            workspace_path: "/ws".to_string(),
            resources: ResourceSpec { cpu: 1.0, memory: "512m".to_string(), storage: 1 },
            network: NetworkSpec {
                ports: vec![PortSpec { container_port: 8080, host_port: 0, protocol: "tcp".to_string() }],
                public_access: false,
                domain: None,
            },
            env: HashMap::new(),
            extensions: vec![],
            auth: AuthConfig { auth_type: AuthType::Password, credentials: HashMap::new() },
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn empty_name_rejected() {
        let mut cfg = valid_config();
        cfg.name = String::new();
        assert!(matches!(validate_config(&cfg), Err(crate::error::DomainError::EmptyName)));
    }

    #[test]
    fn zero_cpu_rejected() {
        let mut cfg = valid_config();
        cfg.resources.cpu = 0.0;
        assert!(matches!(validate_config(&cfg), Err(crate::error::DomainError::InvalidCpu(_))));
    }

    #[test]
    fn duplicate_host_ports_rejected() {
        let mut cfg = valid_config();
        cfg.network.ports = vec![
            PortSpec { container_port: 8080, host_port: 9000, protocol: "tcp".to_string() },
            PortSpec { container_port: 8081, host_port: 9000, protocol: "tcp".to_string() },
        ];
        assert!(matches!(validate_config(&cfg), Err(crate::error::DomainError::DuplicateHostPort(9000))));
    }

    #[test]
    fn zero_host_ports_do_not_conflict() {
        // host_port: 0 means "let the provider pick" — many ports can share it.
        let mut cfg = valid_config();
        cfg.network.ports = vec![
            PortSpec { container_port: 8080, host_port: 0, protocol: "tcp".to_string() },
            PortSpec { container_port: 8081, host_port: 0, protocol: "tcp".to_string() },
        ];
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn provider_type_round_trips_through_json() {
        let pt = ProviderType::Docker;
        let json = serde_json::to_string(&pt).unwrap();
        assert_eq!(json, "\"docker\"");
        let back: ProviderType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pt);
    }

    #[test]
    fn provider_type_unknown_driver_round_trips() {
        let pt = ProviderType::Other("qemu".to_string());
        let json = serde_json::to_string(&pt).unwrap();
        let back: ProviderType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pt);
    }

    #[test]
    fn step_sequence_stop_and_recreate() {
        let steps = StepName::sequence_for(MigrationStrategy::StopAndRecreate);
        assert_eq!(
            steps,
            vec![
                StepName::Prepare,
                StepName::ValidateSource,
                StepName::ValidateTargetProvider,
                StepName::StopSource,
                StepName::ExportSourceConfig,
                StepName::CreateTarget,
                StepName::StartTarget,
                StepName::VerifyTarget,
                StepName::CleanupSource,
                StepName::Complete,
            ]
        );
    }

    #[test]
    fn step_sequence_create_then_stop() {
        let steps = StepName::sequence_for(MigrationStrategy::CreateThenStop);
        assert_eq!(
            steps,
            vec![
                StepName::Prepare,
                StepName::ValidateSource,
                StepName::ValidateTargetProvider,
                StepName::ExportSourceConfig,
                StepName::CreateTarget,
                StepName::StartTarget,
                StepName::VerifyTarget,
                StepName::StopSource,
                StepName::CleanupSource,
                StepName::Complete,
            ]
        );
    }

    #[test]
    fn health_history_bounded_by_capacity() {
        let mut health = InstanceHealth::new(InstanceId::new());
        for _ in 0..5 {
            health.record(HealthStatus::Healthy, chrono::Utc::now(), HealthDetails::default(), 3);
        }
        assert_eq!(health.health_history.len(), 3);
    }

    #[test]
    fn health_history_size_zero_keeps_no_entries() {
        let mut health = InstanceHealth::new(InstanceId::new());
        health.record(HealthStatus::Healthy, chrono::Utc::now(), HealthDetails::default(), 0);
        assert!(health.health_history.is_empty());
        // status/last_checked are still recorded even with no history capacity.
        assert_eq!(health.status, HealthStatus::Healthy);
    }

    #[test]
    fn migration_status_terminal_set() {
        assert!(MigrationStatus::Completed.is_terminal());
        assert!(MigrationStatus::Failed.is_terminal());
        assert!(MigrationStatus::Cancelled.is_terminal());
        assert!(MigrationStatus::TimedOut.is_terminal());
        assert!(!MigrationStatus::Pending.is_terminal());
        assert!(!MigrationStatus::InProgress.is_terminal());
    }
}
