//! Compute endpoints and assignments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::principal::PrincipalType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EndpointKind {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum EndpointStatus {
    #[default]
    Active,
    Inactive,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("LOCAL"),
            Self::Remote => f.write_str("REMOTE"),
        }
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("ACTIVE"),
            Self::Inactive => f.write_str("INACTIVE"),
        }
    }
}

/// A named execution backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeEndpoint {
    pub id: Uuid,
    pub name: String,
    pub kind: EndpointKind,
    #[serde(default)]
    pub status: EndpointStatus,
    /// `grpc://host:port` for remote endpoints, empty for local ones.
    #[serde(default)]
    pub url: String,
    /// Decrypted agent token. Secret storage is handled by the store.
    #[serde(default, skip_serializing)]
    pub auth_token: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ComputeEndpoint {
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind: EndpointKind::Local,
            status: EndpointStatus::Active,
            url: String::new(),
            auth_token: None,
            updated_at: Utc::now(),
        }
    }

    pub fn remote(
        name: impl Into<String>,
        url: impl Into<String>,
        auth_token: Option<String>,
    ) -> Self {
        Self {
            kind: EndpointKind::Remote,
            url: url.into(),
            auth_token,
            ..Self::local(name)
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == EndpointStatus::Active
    }
}

// Never print the token.
impl fmt::Debug for ComputeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeEndpoint")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("url", &self.url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Binding of a user or group to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeAssignment {
    pub endpoint_name: String,
    pub principal_id: Uuid,
    pub principal_type: PrincipalType,
    #[serde(default)]
    pub is_default: bool,
}
