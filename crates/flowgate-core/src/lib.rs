pub mod catalog;
pub mod config;

pub use catalog::{Catalog, Plan, PlanResources, Service, ServiceMetadata};
pub use config::{
    BackendPoolConfig, BrokerConfig, BrokerSection, ConfigError, DeploymentConfig, PlatformConfig,
    PolicyConfig, ScopeConfig,
};
