use super::{AccessClaims, ROLE_ADMIN, UserId};
use serde::Serialize;

/// Who is calling, as proven by a verified access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub subject_id: UserId,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl Identity {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ROLE_ADMIN)
    }
}

impl From<AccessClaims> for Identity {
    fn from(claims: AccessClaims) -> Self {
        Self {
            subject_id: claims.id,
            roles: claims.roles,
            permissions: claims.permissions,
        }
    }
}

/// Caller metadata recorded next to each issued refresh token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub user_agent: String,
    pub ip_address: String,
}

impl ClientInfo {
    pub fn new(user_agent: Option<String>, ip_address: Option<String>) -> Self {
        Self {
            user_agent: user_agent.unwrap_or_default(),
            ip_address: ip_address.unwrap_or_default(),
        }
    }
}

/// Per-call context handed from the authorization gate to a handler.
/// Public operations carry no identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub operation: &'static str,
    pub identity: Option<Identity>,
    pub client: ClientInfo,
}

impl RequestContext {
    pub fn anonymous(operation: &'static str) -> Self {
        Self {
            operation,
            identity: None,
            client: ClientInfo::default(),
        }
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_client(mut self, client: ClientInfo) -> Self {
        self.client = client;
        self
    }
}
