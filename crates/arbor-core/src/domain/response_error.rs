use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::address::AddressError;
use super::coded::describe_code;
use super::severity::Severity;

/// A coded error carried inside a failed [`ValueResponse`](super::ValueResponse).
///
/// `extra` holds free-form key/value pairs attached by the reporting
/// component; on the wire they are flattened into the error mapping itself.
/// Conditional cyclic queries forward them verbatim as continuation
/// parameters when a subscription has to be renewed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub component_name: String,

    #[serde(default)]
    pub severity: Severity,

    #[serde(flatten)]
    pub extra: BTreeMap<String, rmpv::Value>,
}

impl ResponseError {
    pub fn new(
        code: i64,
        message: impl Into<String>,
        component_name: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            component_name: component_name.into(),
            severity,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<rmpv::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn from_address_error(component_name: impl Into<String>, err: &AddressError) -> Self {
        Self::new(err.code, err.message.clone(), component_name, Severity::Normal)
    }

    /// Explicit message if present, else the registry description of the code.
    pub fn describe(&self) -> &str {
        if self.message.is_empty() {
            describe_code(self.code).unwrap_or("")
        } else {
            &self.message
        }
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ResponseError ({}) code: {} - {}",
            self.severity,
            self.code,
            self.describe()
        )
    }
}
