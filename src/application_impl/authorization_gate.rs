use crate::application_port::*;
use crate::domain_model::*;
use std::collections::HashMap;
use std::sync::Arc;

/// Operation ids known to the gate. Routes pass one of these per call.
pub mod ops {
    pub const REGISTER: &str = "user.register";
    pub const LOGIN: &str = "user.login";
    pub const REFRESH: &str = "user.refresh";
    pub const LOGOUT: &str = "user.logout";
    pub const GET_CURRENT_USER: &str = "user.get_current";
    pub const GET_USER: &str = "user.get";
    pub const LIST_USERS: &str = "user.list";
    pub const CREATE_ADMIN: &str = "user.create_admin";

    pub const CREATE_ROLE: &str = "rbac.create_role";
    pub const GET_ROLE: &str = "rbac.get_role";
    pub const GET_ROLE_BY_NAME: &str = "rbac.get_role_by_name";
    pub const LIST_ROLES: &str = "rbac.list_roles";
    pub const UPDATE_ROLE: &str = "rbac.update_role";
    pub const DELETE_ROLE: &str = "rbac.delete_role";
    pub const CREATE_PERMISSION: &str = "rbac.create_permission";
    pub const GET_PERMISSION_BY_NAME: &str = "rbac.get_permission_by_name";
    pub const LIST_PERMISSIONS: &str = "rbac.list_permissions";
    pub const DELETE_PERMISSION: &str = "rbac.delete_permission";
    pub const ASSIGN_ROLES_TO_USER: &str = "rbac.assign_roles_to_user";
    pub const ASSIGN_PERMISSIONS_TO_USER: &str = "rbac.assign_permissions_to_user";
    pub const ASSIGN_PERMISSIONS_TO_ROLE: &str = "rbac.assign_permissions_to_role";
    pub const REMOVE_ROLE_FROM_USER: &str = "rbac.remove_role_from_user";
    pub const REMOVE_PERMISSION_FROM_USER: &str = "rbac.remove_permission_from_user";
    pub const REMOVE_PERMISSION_FROM_ROLE: &str = "rbac.remove_permission_from_role";
    pub const LIST_ROLES_FOR_USER: &str = "rbac.list_roles_for_user";
    pub const LIST_PERMISSIONS_FOR_USER: &str = "rbac.list_permissions_for_user";
    pub const LIST_PERMISSIONS_FOR_ROLE: &str = "rbac.list_permissions_for_role";
    pub const LIST_USERS_FOR_ROLE: &str = "rbac.list_users_for_role";
    pub const LIST_USERS_FOR_PERMISSION: &str = "rbac.list_users_for_permission";
    pub const LIST_ROLES_FOR_PERMISSION: &str = "rbac.list_roles_for_permission";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPolicy {
    Public,
    Authenticated,
    AdminOnly,
}

fn default_policies() -> HashMap<&'static str, AccessPolicy> {
    use AccessPolicy::*;
    use ops::*;

    HashMap::from([
        (REGISTER, Public),
        (LOGIN, Public),
        (REFRESH, Public),
        (LOGOUT, Public),
        (GET_CURRENT_USER, Authenticated),
        (GET_USER, AdminOnly),
        (LIST_USERS, AdminOnly),
        (CREATE_ADMIN, AdminOnly),
        (CREATE_ROLE, AdminOnly),
        (GET_ROLE, Authenticated),
        (GET_ROLE_BY_NAME, Authenticated),
        (LIST_ROLES, Authenticated),
        (UPDATE_ROLE, AdminOnly),
        (DELETE_ROLE, AdminOnly),
        (CREATE_PERMISSION, AdminOnly),
        (GET_PERMISSION_BY_NAME, Authenticated),
        (LIST_PERMISSIONS, Authenticated),
        (DELETE_PERMISSION, AdminOnly),
        (ASSIGN_ROLES_TO_USER, AdminOnly),
        (ASSIGN_PERMISSIONS_TO_USER, AdminOnly),
        (ASSIGN_PERMISSIONS_TO_ROLE, AdminOnly),
        (REMOVE_ROLE_FROM_USER, AdminOnly),
        (REMOVE_PERMISSION_FROM_USER, AdminOnly),
        (REMOVE_PERMISSION_FROM_ROLE, AdminOnly),
        (LIST_ROLES_FOR_USER, Authenticated),
        (LIST_PERMISSIONS_FOR_USER, Authenticated),
        (LIST_PERMISSIONS_FOR_ROLE, Authenticated),
        (LIST_USERS_FOR_ROLE, Authenticated),
        (LIST_USERS_FOR_PERMISSION, Authenticated),
        (LIST_ROLES_FOR_PERMISSION, Authenticated),
    ])
}

/// Checks every inbound call against a per-operation policy. Stateless apart
/// from the policy table.
pub struct AuthorizationGate {
    token_codec: Arc<dyn TokenCodec>,
    policies: HashMap<&'static str, AccessPolicy>,
    fallback: AccessPolicy,
}

impl AuthorizationGate {
    pub fn new(token_codec: Arc<dyn TokenCodec>) -> Self {
        Self {
            token_codec,
            policies: default_policies(),
            fallback: AccessPolicy::Authenticated,
        }
    }

    pub fn with_policy(mut self, operation: &'static str, policy: AccessPolicy) -> Self {
        self.policies.insert(operation, policy);
        self
    }

    pub fn policy_for(&self, operation: &str) -> AccessPolicy {
        self.policies
            .get(operation)
            .copied()
            .unwrap_or(self.fallback)
    }

    /// `authorization` is the raw `Authorization` header, if any.
    pub fn check(
        &self,
        operation: &'static str,
        authorization: Option<&str>,
    ) -> Result<RequestContext, Status> {
        let policy = self.policy_for(operation);
        if policy == AccessPolicy::Public {
            return Ok(RequestContext::anonymous(operation));
        }

        let token = authorization
            .and_then(bearer_token)
            .ok_or_else(|| Status::unauthenticated("missing bearer token"))?;

        let claims = self.token_codec.verify_access(token).map_err(|e| {
            tracing::debug!(operation, error = %e, "access token rejected");
            Status::unauthenticated("invalid token")
        })?;
        let identity = Identity::from(claims);

        if policy == AccessPolicy::AdminOnly && !identity.is_admin() {
            return Err(Status::permission_denied("admin role required"));
        }

        Ok(RequestContext::anonymous(operation).with_identity(identity))
    }
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_impl::{JwtConfig, JwtHs256Codec};

    fn codec() -> Arc<dyn TokenCodec> {
        Arc::new(JwtHs256Codec::new(JwtConfig {
            access_secret: b"gate-access".to_vec(),
            refresh_secret: b"gate-refresh".to_vec(),
        }))
    }

    fn bearer(codec: &Arc<dyn TokenCodec>, roles: &[&str]) -> (UserId, String) {
        let subject = UserId::new_v4();
        let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
        let pair = codec
            .issue_token_pair(subject, &roles, &[], &TokenTtl::default())
            .unwrap();
        (subject, format!("Bearer {}", pair.access_token.0))
    }

    #[test]
    fn public_operation_needs_no_token() {
        let gate = AuthorizationGate::new(codec());
        let ctx = gate.check(ops::LOGIN, None).unwrap();
        assert_eq!(ctx.operation, ops::LOGIN);
        assert!(ctx.identity.is_none());
    }

    #[test]
    fn missing_or_garbage_token_is_unauthenticated() {
        let gate = AuthorizationGate::new(codec());
        for header in [None, Some("Bearer"), Some("Basic abc"), Some("Bearer not.a.jwt")] {
            let err = gate.check(ops::GET_CURRENT_USER, header).unwrap_err();
            assert_eq!(err.code, StatusCode::Unauthenticated, "{:?}", header);
        }
    }

    #[test]
    fn refresh_token_is_not_accepted_as_bearer() {
        let c = codec();
        let pair = c
            .issue_token_pair(UserId::new_v4(), &[], &[], &TokenTtl::default())
            .unwrap();
        let gate = AuthorizationGate::new(c);
        let header = format!("Bearer {}", pair.refresh_token.0);
        let err = gate.check(ops::GET_CURRENT_USER, Some(&header)).unwrap_err();
        assert_eq!(err.code, StatusCode::Unauthenticated);
    }

    #[test]
    fn admin_only_requires_admin_role() {
        let c = codec();
        let gate = AuthorizationGate::new(c.clone());

        let (_, user_header) = bearer(&c, &[ROLE_USER]);
        let err = gate.check(ops::CREATE_ROLE, Some(&user_header)).unwrap_err();
        assert_eq!(err.code, StatusCode::PermissionDenied);

        let (admin_id, admin_header) = bearer(&c, &[ROLE_USER, ROLE_ADMIN]);
        let ctx = gate.check(ops::CREATE_ROLE, Some(&admin_header)).unwrap();
        let identity = ctx.identity.unwrap();
        assert_eq!(identity.subject_id, admin_id);
        assert!(identity.is_admin());
    }

    #[test]
    fn unlisted_operation_falls_back_to_authenticated() {
        let c = codec();
        let gate = AuthorizationGate::new(c.clone());
        assert_eq!(gate.policy_for("user.unheard_of"), AccessPolicy::Authenticated);

        assert!(gate.check("user.unheard_of", None).is_err());
        let (_, header) = bearer(&c, &[]);
        assert!(gate.check("user.unheard_of", Some(&header)).is_ok());
    }

    #[test]
    fn policies_can_be_overridden() {
        let gate = AuthorizationGate::new(codec()).with_policy(ops::LIST_ROLES, AccessPolicy::Public);
        assert!(gate.check(ops::LIST_ROLES, None).is_ok());
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("BEARER   abc "), Some("abc"));
        assert_eq!(bearer_token("Token abc"), None);
    }
}
