use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::clock::now_ts;

/// Common surface of the user identities attached to requests.
pub trait Identity {
    /// Opaque id bytes. May be empty for an anonymous identity.
    fn id(&self) -> &[u8];

    /// Epoch seconds of the moment this identity was created.
    fn login_date(&self) -> f64;

    fn display_name(&self) -> &str;
}

/// Identity of an interactive caller.
///
/// When no primary id has been assigned, the transport-level `socket_id`
/// stands in (priority: primary id, else socket id). Equality compares the
/// effective id only.
///
/// Only `name`, `email` and `description` cross the wire; ids and the login
/// timestamp are local state, so a decoded user starts with empty ids and a
/// fresh login timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeUser {
    #[serde(skip)]
    user_id: Vec<u8>,

    #[serde(skip)]
    socket_id: Vec<u8>,

    #[serde(skip, default = "now_ts")]
    login_date: f64,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub description: String,
}

impl TreeUser {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            user_id: Vec::new(),
            socket_id: Vec::new(),
            login_date: now_ts(),
            name: name.into(),
            email: String::new(),
            description: String::new(),
        }
    }

    /// Anonymous default identity.
    pub fn anonymous() -> Self {
        Self::new("")
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn set_id(&mut self, id: impl Into<Vec<u8>>) {
        self.user_id = id.into();
    }

    pub fn set_socket_id(&mut self, id: impl Into<Vec<u8>>) {
        self.socket_id = id.into();
    }
}

impl Default for TreeUser {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl Identity for TreeUser {
    fn id(&self) -> &[u8] {
        if self.user_id.is_empty() {
            &self.socket_id
        } else {
            &self.user_id
        }
    }

    fn login_date(&self) -> f64 {
        self.login_date
    }

    fn display_name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for TreeUser {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

/// Identity of an unattended service component. Self-assigns a fresh unique
/// id (a ULID) at construction, so two service users are never equal.
#[derive(Debug, Clone)]
pub struct ServiceUser {
    user_id: Vec<u8>,
    login_date: f64,
    pub name: String,
}

impl ServiceUser {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            user_id: Ulid::new().to_bytes().to_vec(),
            login_date: now_ts(),
            name: name.into(),
        }
    }
}

impl Identity for ServiceUser {
    fn id(&self) -> &[u8] {
        &self.user_id
    }

    fn login_date(&self) -> f64 {
        self.login_date
    }

    fn display_name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for ServiceUser {
    fn eq(&self, other: &Self) -> bool {
        self.user_id == other.user_id
    }
}

impl From<ServiceUser> for TreeUser {
    fn from(service: ServiceUser) -> Self {
        Self {
            user_id: service.user_id,
            socket_id: Vec::new(),
            login_date: service.login_date,
            name: service.name,
            email: String::new(),
            description: String::new(),
        }
    }
}
