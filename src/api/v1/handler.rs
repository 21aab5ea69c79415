use super::error::*;
use crate::application_port::*;
use crate::domain_model::*;
use crate::logger::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use warp::Rejection;
use warp::reply::Json;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(code: StatusCode, message: impl Into<String>) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(ApiError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Runs one call under the request deadline and wraps the outcome in the
/// response envelope. Dropping the future on expiry cancels downstream I/O.
async fn respond<T, F>(deadline: Duration, call: F) -> Result<Json, Rejection>
where
    T: Serialize,
    F: Future<Output = Result<T, Status>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(Ok(data)) => Ok(warp::reply::json(&ApiResponse::ok(data))),
        Ok(Err(status)) => Err(reject_status(status)),
        Err(_) => {
            warn!(?deadline, "request deadline exceeded");
            Err(reject_status(Status::new(
                StatusCode::Internal,
                "deadline exceeded",
            )))
        }
    }
}

fn parse_id<T: FromStr>(kind: &str, raw: &str) -> Result<T, Status> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| Status::invalid_argument(format!("malformed {} id: '{}'", kind, raw)))
}

fn parse_ids<T: FromStr>(kind: &str, raw: &[String]) -> Result<Vec<T>, Status> {
    raw.iter().map(|r| parse_id(kind, r)).collect()
}

fn caller(ctx: &RequestContext) -> Result<&Identity, Status> {
    ctx.identity
        .as_ref()
        .ok_or_else(|| Status::unauthenticated("missing identity"))
}

// region user service

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub revoked: bool,
}

pub async fn register(
    ctx: RequestContext,
    body: RegisterRequest,
    auth: Arc<dyn AuthService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        let input = RegisterInput {
            email: body.email,
            username: body.username,
            password: body.password,
        };
        Ok(auth.register(input, &ctx.client).await?)
    })
    .await
}

pub async fn login(
    ctx: RequestContext,
    body: LoginRequest,
    auth: Arc<dyn AuthService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        let input = LoginInput {
            email: body.email,
            password: body.password,
        };
        Ok(auth.login(input, &ctx.client).await?)
    })
    .await
}

pub async fn refresh(
    ctx: RequestContext,
    body: RefreshRequest,
    auth: Arc<dyn AuthService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        Ok(auth.refresh(&body.refresh_token, &ctx.client).await?)
    })
    .await
}

pub async fn logout(
    _ctx: RequestContext,
    body: RefreshRequest,
    auth: Arc<dyn AuthService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        auth.logout(&body.refresh_token).await?;
        Ok(LogoutResponse { revoked: true })
    })
    .await
}

pub async fn get_current_user(
    ctx: RequestContext,
    auth: Arc<dyn AuthService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        let identity = caller(&ctx)?;
        Ok(auth.get_current_user(identity).await?)
    })
    .await
}

pub async fn get_user(
    user_id: String,
    _ctx: RequestContext,
    auth: Arc<dyn AuthService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        let user_id: UserId = parse_id("user", &user_id)?;
        Ok(auth.get_user(user_id).await?)
    })
    .await
}

pub async fn list_users(
    _ctx: RequestContext,
    auth: Arc<dyn AuthService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move { Ok(auth.list_users().await?) }).await
}

pub async fn create_admin(
    ctx: RequestContext,
    body: RegisterRequest,
    auth: Arc<dyn AuthService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        let creator = caller(&ctx)?.subject_id;
        let user = auth
            .create_admin(CreateAdminInput {
                email: body.email,
                username: body.username,
                password: body.password,
            })
            .await?;
        info!(user_id = %user.id, created_by = %creator, "admin account created");
        Ok(user)
    })
    .await
}

// endregion

// region rbac service

#[derive(Debug, Deserialize)]
pub struct NameRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignRolesRequest {
    pub role_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub permission_id: String,
    #[serde(default)]
    pub granter_id: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct AssignUserPermissionsRequest {
    pub permissions: Vec<GrantRequest>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRolePermissionsRequest {
    pub permission_ids: Vec<String>,
}

pub async fn create_role(
    _ctx: RequestContext,
    body: NameRequest,
    rbac: Arc<dyn RbacService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move { Ok(rbac.create_role(&body.name).await?) }).await
}

pub async fn list_roles(
    _ctx: RequestContext,
    rbac: Arc<dyn RbacService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move { Ok(rbac.list_roles().await?) }).await
}

pub async fn get_role(
    role_id: String,
    _ctx: RequestContext,
    rbac: Arc<dyn RbacService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        let role_id: RoleId = parse_id("role", &role_id)?;
        Ok(rbac.get_role(role_id).await?)
    })
    .await
}

pub async fn get_role_by_name(
    name: String,
    _ctx: RequestContext,
    rbac: Arc<dyn RbacService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move { Ok(rbac.get_role_by_name(&name).await?) }).await
}

pub async fn update_role(
    role_id: String,
    _ctx: RequestContext,
    body: NameRequest,
    rbac: Arc<dyn RbacService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        let role_id: RoleId = parse_id("role", &role_id)?;
        Ok(rbac.update_role(role_id, &body.name).await?)
    })
    .await
}

pub async fn delete_role(
    role_id: String,
    _ctx: RequestContext,
    rbac: Arc<dyn RbacService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        let role_id: RoleId = parse_id("role", &role_id)?;
        Ok(rbac.delete_role(role_id).await?)
    })
    .await
}

pub async fn create_permission(
    _ctx: RequestContext,
    body: NameRequest,
    rbac: Arc<dyn RbacService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move { Ok(rbac.create_permission(&body.name).await?) }).await
}

pub async fn list_permissions(
    _ctx: RequestContext,
    rbac: Arc<dyn RbacService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move { Ok(rbac.list_permissions().await?) }).await
}

pub async fn get_permission_by_name(
    name: String,
    _ctx: RequestContext,
    rbac: Arc<dyn RbacService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        Ok(rbac.get_permission_by_name(&name).await?)
    })
    .await
}

pub async fn delete_permission(
    permission_id: String,
    _ctx: RequestContext,
    rbac: Arc<dyn RbacService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        let permission_id: PermissionId = parse_id("permission", &permission_id)?;
        Ok(rbac.delete_permission(permission_id).await?)
    })
    .await
}

pub async fn assign_roles_to_user(
    user_id: String,
    _ctx: RequestContext,
    body: AssignRolesRequest,
    rbac: Arc<dyn RbacService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        let user_id: UserId = parse_id("user", &user_id)?;
        let role_ids: Vec<RoleId> = parse_ids("role", &body.role_ids)?;
        Ok(rbac.assign_roles_to_user(user_id, &role_ids).await?)
    })
    .await
}

pub async fn list_roles_for_user(
    user_id: String,
    _ctx: RequestContext,
    rbac: Arc<dyn RbacService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        let user_id: UserId = parse_id("user", &user_id)?;
        Ok(rbac.list_roles_for_user(user_id).await?)
    })
    .await
}

pub async fn remove_role_from_user(
    user_id: String,
    role_id: String,
    _ctx: RequestContext,
    rbac: Arc<dyn RbacService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        let user_id: UserId = parse_id("user", &user_id)?;
        let role_id: RoleId = parse_id("role", &role_id)?;
        Ok(rbac.remove_role_from_user(user_id, role_id).await?)
    })
    .await
}

pub async fn assign_permissions_to_user(
    user_id: String,
    ctx: RequestContext,
    body: AssignUserPermissionsRequest,
    rbac: Arc<dyn RbacService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        let user_id: UserId = parse_id("user", &user_id)?;
        let caller_id = caller(&ctx)?.subject_id;

        let grants = body
            .permissions
            .iter()
            .map(|g| -> Result<PermissionGrant, Status> {
                // Without an explicit granter the caller delegates.
                let granter_id = match &g.granter_id {
                    Some(raw) => parse_id("granter", raw)?,
                    None => caller_id,
                };
                Ok(PermissionGrant {
                    permission_id: parse_id("permission", &g.permission_id)?,
                    granter_id: Some(granter_id),
                    expires_at: g.expires_at,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rbac.assign_permissions_to_user(user_id, &grants).await?)
    })
    .await
}

pub async fn list_permissions_for_user(
    user_id: String,
    _ctx: RequestContext,
    rbac: Arc<dyn RbacService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        let user_id: UserId = parse_id("user", &user_id)?;
        Ok(rbac.list_permissions_for_user(user_id).await?)
    })
    .await
}

pub async fn remove_permission_from_user(
    user_id: String,
    permission_id: String,
    _ctx: RequestContext,
    rbac: Arc<dyn RbacService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        let user_id: UserId = parse_id("user", &user_id)?;
        let permission_id: PermissionId = parse_id("permission", &permission_id)?;
        Ok(rbac.remove_permission_from_user(user_id, permission_id).await?)
    })
    .await
}

pub async fn assign_permissions_to_role(
    role_id: String,
    _ctx: RequestContext,
    body: AssignRolePermissionsRequest,
    rbac: Arc<dyn RbacService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        let role_id: RoleId = parse_id("role", &role_id)?;
        let permission_ids: Vec<PermissionId> = parse_ids("permission", &body.permission_ids)?;
        Ok(rbac.assign_permissions_to_role(role_id, &permission_ids).await?)
    })
    .await
}

pub async fn list_permissions_for_role(
    role_id: String,
    _ctx: RequestContext,
    rbac: Arc<dyn RbacService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        let role_id: RoleId = parse_id("role", &role_id)?;
        Ok(rbac.list_permissions_for_role(role_id).await?)
    })
    .await
}

pub async fn remove_permission_from_role(
    role_id: String,
    permission_id: String,
    _ctx: RequestContext,
    rbac: Arc<dyn RbacService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        let role_id: RoleId = parse_id("role", &role_id)?;
        let permission_id: PermissionId = parse_id("permission", &permission_id)?;
        Ok(rbac.remove_permission_from_role(role_id, permission_id).await?)
    })
    .await
}

pub async fn list_users_for_role(
    role_id: String,
    _ctx: RequestContext,
    rbac: Arc<dyn RbacService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        let role_id: RoleId = parse_id("role", &role_id)?;
        Ok(rbac.list_users_for_role(role_id).await?)
    })
    .await
}

pub async fn list_users_for_permission(
    permission_id: String,
    _ctx: RequestContext,
    rbac: Arc<dyn RbacService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        let permission_id: PermissionId = parse_id("permission", &permission_id)?;
        Ok(rbac.list_users_for_permission(permission_id).await?)
    })
    .await
}

pub async fn list_roles_for_permission(
    permission_id: String,
    _ctx: RequestContext,
    rbac: Arc<dyn RbacService>,
    deadline: Duration,
) -> Result<Json, Rejection> {
    respond(deadline, async move {
        let permission_id: PermissionId = parse_id("permission", &permission_id)?;
        Ok(rbac.list_roles_for_permission(permission_id).await?)
    })
    .await
}

// endregion

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_ids_are_invalid_arguments() {
        let err = parse_id::<RoleId>("role", "not-a-uuid").unwrap_err();
        assert_eq!(err.code, StatusCode::InvalidArgument);

        let id = RoleId::new_v4();
        let parsed: RoleId = parse_id("role", &format!(" {} ", id)).unwrap();
        assert_eq!(parsed, id);
    }

    #[tokio::test]
    async fn expired_deadline_is_internal() {
        let result = respond(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, Status>(())
        })
        .await;
        assert!(result.is_err());
    }
}
