use std::collections::HashMap;

use chrono::{DateTime, Utc};
use swarm_domain::types::InstanceStatus;

/// `listInstances` predicate set: status membership, a name regex, a
/// creation-time window, an opaque metadata tag map, and offset/limit
/// pagination applied after filtering.
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pub status: Option<Vec<InstanceStatus>>,
    pub name_pattern: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub tags: HashMap<String, serde_json::Value>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}
