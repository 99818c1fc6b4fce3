//! Service/plan catalog advertised by the broker.
//!
//! Lookups compare ids case-insensitively; a miss is always `None` and the
//! caller turns it into a not-found error.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Catalog {
    services: Vec<Service>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub bindable: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub plan_updateable: bool,
    #[serde(default)]
    pub metadata: ServiceMetadata,
    #[serde(default)]
    pub plans: Vec<Plan>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceMetadata {
    pub display_name: String,
    pub image_url: String,
    pub long_description: String,
    pub provider_display_name: String,
    pub documentation_url: String,
    pub support_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub description: String,
    pub free: Option<bool>,
    pub bindable: Option<bool>,
    /// Deploy into the broker's system scope instead of the caller's space.
    #[serde(default)]
    pub use_system_space: bool,
    #[serde(default)]
    pub bullets: Vec<String>,
    #[serde(default)]
    pub resources: PlanResources,
}

/// Sizing of the proxy application created for each instance of a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlanResources {
    pub instances: u32,
    pub memory_mb: u32,
    pub disk_mb: u32,
    pub buildpack: String,
}

impl Default for PlanResources {
    fn default() -> Self {
        Self {
            instances: 1,
            memory_mb: 128,
            disk_mb: 64,
            buildpack: "staticfile_buildpack".to_string(),
        }
    }
}

impl Catalog {
    pub fn new(services: Vec<Service>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn find_service(&self, service_id: &str) -> Option<&Service> {
        self.services
            .iter()
            .find(|s| s.id.eq_ignore_ascii_case(service_id))
    }

    pub fn find_plan(&self, service_id: &str, plan_id: &str) -> Option<&Plan> {
        self.find_service(service_id)?
            .plans
            .iter()
            .find(|p| p.id.eq_ignore_ascii_case(plan_id))
    }
}
