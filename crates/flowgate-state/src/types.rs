//! Persisted domain types.
//!
//! A [`ServiceInstance`] is serialized to JSON and stored as the opaque
//! `service_instance_details` blob:
//! `{id, service_id, plan_id, host, domain, enable_session_sticky, nginxs: [{name, url, weight, port}]}`.

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

/// Weight given to a backend when the caller does not pick one.
pub const DEFAULT_BACKEND_WEIGHT: u32 = 5;

/// One provisioned traffic-distribution service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceInstance {
    pub id: String,
    pub service_id: String,
    #[serde(default)]
    pub plan_id: String,
    pub host: String,
    pub domain: String,
    #[serde(rename = "enable_session_sticky", default)]
    pub session_sticky: bool,
    /// Bound backends; order only affects config rendering.
    #[serde(rename = "nginxs", default)]
    pub backends: Vec<Backend>,
}

/// One weighted upstream target, identified by its binding id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backend {
    pub name: String,
    pub url: String,
    pub weight: u32,
    pub port: u16,
}

impl ServiceInstance {
    pub fn new(id: &str, service_id: &str, plan_id: &str, host: &str, domain: &str) -> Self {
        Self {
            id: id.to_string(),
            service_id: service_id.to_string(),
            plan_id: plan_id.to_string(),
            host: host.to_string(),
            domain: domain.to_string(),
            session_sticky: false,
            backends: Vec::new(),
        }
    }

    /// Externally reachable name of the proxy, `host.domain`.
    pub fn fqdn(&self) -> String {
        format!("{}.{}", self.host, self.domain)
    }

    pub fn backend(&self, name: &str) -> Option<&Backend> {
        self.backends.iter().find(|b| b.name == name)
    }

    /// Encode into the blob stored by [`crate::StateStore`].
    pub fn to_blob(&self) -> StateResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StateError::Serialize(e.to_string()))
    }

    pub fn from_blob(blob: &[u8]) -> StateResult<Self> {
        serde_json::from_slice(blob).map_err(|e| StateError::Deserialize(e.to_string()))
    }
}
