use super::error::*;
use super::handler;
use crate::application_impl::{AuthorizationGate, ops};
use crate::application_port::*;
use crate::domain_model::*;
use crate::server::Server;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use warp::filters::BoxedFilter;
use warp::reply::Json;
use warp::{Filter, Rejection};

const MAX_BODY_BYTES: u64 = 64 * 1024;

/// Mounts the routes of whichever services this process hosts.
pub fn routes(server: Arc<Server>) -> BoxedFilter<(Json,)> {
    let gate = server.gate.clone();
    let deadline = server.request_timeout;

    let mut api = None;
    if let Some(auth) = &server.auth_service {
        api = Some(join(api, user_routes(auth.clone(), gate.clone(), deadline)));
    }
    if let Some(rbac) = &server.rbac_service {
        api = Some(join(api, rbac_routes(rbac.clone(), gate.clone(), deadline)));
    }

    api.unwrap_or_else(|| {
        warp::any()
            .and_then(|| async { Err::<Json, Rejection>(warp::reject::not_found()) })
            .boxed()
    })
}

pub fn user_routes(
    auth: Arc<dyn AuthService>,
    gate: Arc<AuthorizationGate>,
    deadline: Duration,
) -> BoxedFilter<(Json,)> {
    let register = warp::path!("register")
        .and(warp::post())
        .and(authorize(gate.clone(), ops::REGISTER))
        .and(json_body())
        .and(with(auth.clone()))
        .and(with_value(deadline))
        .and_then(handler::register);

    let login = warp::path!("login")
        .and(warp::post())
        .and(authorize(gate.clone(), ops::LOGIN))
        .and(json_body())
        .and(with(auth.clone()))
        .and(with_value(deadline))
        .and_then(handler::login);

    let refresh = warp::path!("refresh")
        .and(warp::post())
        .and(authorize(gate.clone(), ops::REFRESH))
        .and(json_body())
        .and(with(auth.clone()))
        .and(with_value(deadline))
        .and_then(handler::refresh);

    let logout = warp::path!("logout")
        .and(warp::post())
        .and(authorize(gate.clone(), ops::LOGOUT))
        .and(json_body())
        .and(with(auth.clone()))
        .and(with_value(deadline))
        .and_then(handler::logout);

    let me = warp::path!("me")
        .and(warp::get())
        .and(authorize(gate.clone(), ops::GET_CURRENT_USER))
        .and(with(auth.clone()))
        .and(with_value(deadline))
        .and_then(handler::get_current_user);

    let list_users = warp::path!("users")
        .and(warp::get())
        .and(authorize(gate.clone(), ops::LIST_USERS))
        .and(with(auth.clone()))
        .and(with_value(deadline))
        .and_then(handler::list_users);

    let get_user = warp::path!("users" / String)
        .and(warp::get())
        .and(authorize(gate.clone(), ops::GET_USER))
        .and(with(auth.clone()))
        .and(with_value(deadline))
        .and_then(handler::get_user);

    let create_admin = warp::path!("admin" / "users")
        .and(warp::post())
        .and(authorize(gate.clone(), ops::CREATE_ADMIN))
        .and(json_body())
        .and(with(auth.clone()))
        .and(with_value(deadline))
        .and_then(handler::create_admin);

    register
        .or(login)
        .unify()
        .or(refresh)
        .unify()
        .or(logout)
        .unify()
        .or(me)
        .unify()
        .or(list_users)
        .unify()
        .or(get_user)
        .unify()
        .or(create_admin)
        .unify()
        .boxed()
}

pub fn rbac_routes(
    rbac: Arc<dyn RbacService>,
    gate: Arc<AuthorizationGate>,
    deadline: Duration,
) -> BoxedFilter<(Json,)> {
    // Roles

    let create_role = warp::path!("roles")
        .and(warp::post())
        .and(authorize(gate.clone(), ops::CREATE_ROLE))
        .and(json_body())
        .and(with(rbac.clone()))
        .and(with_value(deadline))
        .and_then(handler::create_role);

    let list_roles = warp::path!("roles")
        .and(warp::get())
        .and(authorize(gate.clone(), ops::LIST_ROLES))
        .and(with(rbac.clone()))
        .and(with_value(deadline))
        .and_then(handler::list_roles);

    let get_role_by_name = warp::path!("roles" / "by-name" / String)
        .and(warp::get())
        .and(authorize(gate.clone(), ops::GET_ROLE_BY_NAME))
        .and(with(rbac.clone()))
        .and(with_value(deadline))
        .and_then(handler::get_role_by_name);

    let get_role = warp::path!("roles" / String)
        .and(warp::get())
        .and(authorize(gate.clone(), ops::GET_ROLE))
        .and(with(rbac.clone()))
        .and(with_value(deadline))
        .and_then(handler::get_role);

    let update_role = warp::path!("roles" / String)
        .and(warp::put())
        .and(authorize(gate.clone(), ops::UPDATE_ROLE))
        .and(json_body())
        .and(with(rbac.clone()))
        .and(with_value(deadline))
        .and_then(handler::update_role);

    let delete_role = warp::path!("roles" / String)
        .and(warp::delete())
        .and(authorize(gate.clone(), ops::DELETE_ROLE))
        .and(with(rbac.clone()))
        .and(with_value(deadline))
        .and_then(handler::delete_role);

    let assign_role_permissions = warp::path!("roles" / String / "permissions")
        .and(warp::post())
        .and(authorize(gate.clone(), ops::ASSIGN_PERMISSIONS_TO_ROLE))
        .and(json_body())
        .and(with(rbac.clone()))
        .and(with_value(deadline))
        .and_then(handler::assign_permissions_to_role);

    let list_role_permissions = warp::path!("roles" / String / "permissions")
        .and(warp::get())
        .and(authorize(gate.clone(), ops::LIST_PERMISSIONS_FOR_ROLE))
        .and(with(rbac.clone()))
        .and(with_value(deadline))
        .and_then(handler::list_permissions_for_role);

    let remove_role_permission = warp::path!("roles" / String / "permissions" / String)
        .and(warp::delete())
        .and(authorize(gate.clone(), ops::REMOVE_PERMISSION_FROM_ROLE))
        .and(with(rbac.clone()))
        .and(with_value(deadline))
        .and_then(handler::remove_permission_from_role);

    let list_role_users = warp::path!("roles" / String / "users")
        .and(warp::get())
        .and(authorize(gate.clone(), ops::LIST_USERS_FOR_ROLE))
        .and(with(rbac.clone()))
        .and(with_value(deadline))
        .and_then(handler::list_users_for_role);

    // Permissions

    let create_permission = warp::path!("permissions")
        .and(warp::post())
        .and(authorize(gate.clone(), ops::CREATE_PERMISSION))
        .and(json_body())
        .and(with(rbac.clone()))
        .and(with_value(deadline))
        .and_then(handler::create_permission);

    let list_permissions = warp::path!("permissions")
        .and(warp::get())
        .and(authorize(gate.clone(), ops::LIST_PERMISSIONS))
        .and(with(rbac.clone()))
        .and(with_value(deadline))
        .and_then(handler::list_permissions);

    let get_permission_by_name = warp::path!("permissions" / "by-name" / String)
        .and(warp::get())
        .and(authorize(gate.clone(), ops::GET_PERMISSION_BY_NAME))
        .and(with(rbac.clone()))
        .and(with_value(deadline))
        .and_then(handler::get_permission_by_name);

    let delete_permission = warp::path!("permissions" / String)
        .and(warp::delete())
        .and(authorize(gate.clone(), ops::DELETE_PERMISSION))
        .and(with(rbac.clone()))
        .and(with_value(deadline))
        .and_then(handler::delete_permission);

    let list_permission_users = warp::path!("permissions" / String / "users")
        .and(warp::get())
        .and(authorize(gate.clone(), ops::LIST_USERS_FOR_PERMISSION))
        .and(with(rbac.clone()))
        .and(with_value(deadline))
        .and_then(handler::list_users_for_permission);

    let list_permission_roles = warp::path!("permissions" / String / "roles")
        .and(warp::get())
        .and(authorize(gate.clone(), ops::LIST_ROLES_FOR_PERMISSION))
        .and(with(rbac.clone()))
        .and(with_value(deadline))
        .and_then(handler::list_roles_for_permission);

    // User assignments

    let assign_user_roles = warp::path!("users" / String / "roles")
        .and(warp::post())
        .and(authorize(gate.clone(), ops::ASSIGN_ROLES_TO_USER))
        .and(json_body())
        .and(with(rbac.clone()))
        .and(with_value(deadline))
        .and_then(handler::assign_roles_to_user);

    let list_user_roles = warp::path!("users" / String / "roles")
        .and(warp::get())
        .and(authorize(gate.clone(), ops::LIST_ROLES_FOR_USER))
        .and(with(rbac.clone()))
        .and(with_value(deadline))
        .and_then(handler::list_roles_for_user);

    let remove_user_role = warp::path!("users" / String / "roles" / String)
        .and(warp::delete())
        .and(authorize(gate.clone(), ops::REMOVE_ROLE_FROM_USER))
        .and(with(rbac.clone()))
        .and(with_value(deadline))
        .and_then(handler::remove_role_from_user);

    let assign_user_permissions = warp::path!("users" / String / "permissions")
        .and(warp::post())
        .and(authorize(gate.clone(), ops::ASSIGN_PERMISSIONS_TO_USER))
        .and(json_body())
        .and(with(rbac.clone()))
        .and(with_value(deadline))
        .and_then(handler::assign_permissions_to_user);

    let list_user_permissions = warp::path!("users" / String / "permissions")
        .and(warp::get())
        .and(authorize(gate.clone(), ops::LIST_PERMISSIONS_FOR_USER))
        .and(with(rbac.clone()))
        .and(with_value(deadline))
        .and_then(handler::list_permissions_for_user);

    let remove_user_permission = warp::path!("users" / String / "permissions" / String)
        .and(warp::delete())
        .and(authorize(gate.clone(), ops::REMOVE_PERMISSION_FROM_USER))
        .and(with(rbac.clone()))
        .and(with_value(deadline))
        .and_then(handler::remove_permission_from_user);

    // by-name routes go first so "by-name" is never parsed as an id
    let roles = get_role_by_name
        .or(create_role)
        .unify()
        .or(list_roles)
        .unify()
        .or(get_role)
        .unify()
        .or(update_role)
        .unify()
        .or(delete_role)
        .unify()
        .or(assign_role_permissions)
        .unify()
        .or(list_role_permissions)
        .unify()
        .or(remove_role_permission)
        .unify()
        .or(list_role_users)
        .unify()
        .boxed();

    let permissions = get_permission_by_name
        .or(create_permission)
        .unify()
        .or(list_permissions)
        .unify()
        .or(delete_permission)
        .unify()
        .or(list_permission_users)
        .unify()
        .or(list_permission_roles)
        .unify()
        .boxed();

    let assignments = assign_user_roles
        .or(list_user_roles)
        .unify()
        .or(remove_user_role)
        .unify()
        .or(assign_user_permissions)
        .unify()
        .or(list_user_permissions)
        .unify()
        .or(remove_user_permission)
        .unify()
        .boxed();

    roles.or(permissions).unify().or(assignments).unify().boxed()
}

fn join(acc: Option<BoxedFilter<(Json,)>>, next: BoxedFilter<(Json,)>) -> BoxedFilter<(Json,)> {
    match acc {
        Some(acc) => acc.or(next).unify().boxed(),
        None => next,
    }
}

fn with<ServiceType>(
    service: Arc<ServiceType>,
) -> impl Filter<Extract = (Arc<ServiceType>,), Error = Infallible> + Clone
where
    ServiceType: Send + Sync + ?Sized,
{
    warp::any().map(move || service.clone())
}

fn with_value<T: Clone + Send + Sync + 'static>(
    value: T,
) -> impl Filter<Extract = (T,), Error = Infallible> + Clone {
    warp::any().map(move || value.clone())
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// Runs the authorization gate for `operation` and records the caller's
/// user agent and address on the resulting context.
fn authorize(
    gate: Arc<AuthorizationGate>,
    operation: &'static str,
) -> impl Filter<Extract = (RequestContext,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(warp::header::optional::<String>("user-agent"))
        .and(warp::addr::remote())
        .and_then(
            move |authorization: Option<String>,
                  user_agent: Option<String>,
                  remote: Option<SocketAddr>| {
                let gate = gate.clone();
                async move {
                    let ctx = gate
                        .check(operation, authorization.as_deref())
                        .map_err(reject_status)?;
                    let client = ClientInfo::new(user_agent, remote.map(|a| a.ip().to_string()));
                    Ok::<_, Rejection>(ctx.with_client(client))
                }
            },
        )
}
