//! Typed request parameters.
//!
//! Only the documented keys are accepted. Unknown keys and mistyped values
//! are validation errors.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{BrokerError, BrokerResult};

/// Provision and update parameters.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct InstanceParams {
    pub host: Option<String>,
    pub domain: Option<String>,
    pub enable_session_sticky: Option<bool>,
    pub nginxs: Option<Vec<BackendParams>>,
}

/// One entry of `nginxs`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BackendParams {
    pub name: String,
    pub url: String,
    pub weight: Option<u32>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BindParams {
    pub url: Option<String>,
    pub weight: Option<u32>,
}

impl InstanceParams {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl BindParams {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Decode raw request parameters. Absent or `null` yields the default.
pub fn parse<T: DeserializeOwned + Default>(raw: Option<&Value>) -> BrokerResult<T> {
    match raw {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value @ Value::Object(_)) => {
            T::deserialize(value).map_err(|e| BrokerError::Validation(e.to_string()))
        }
        Some(_) => Err(BrokerError::Validation(
            "parameters must be a JSON object".to_string(),
        )),
    }
}
