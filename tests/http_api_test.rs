mod common;

use common::*;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use turnstile::api::v1::{recover_error, routes};
use turnstile::infra_memory::MemoryDb;
use turnstile::server::{MemoryBroker, Queue, Server, Stores, token_codec_from};
use turnstile::settings::{Admin, ServiceMode, Settings};
use warp::Filter;
use warp::http::StatusCode;

const ADMIN_EMAIL: &str = "admin@example.com";

fn settings() -> Settings {
    let mut settings = test_settings();
    settings.admin = Some(Admin {
        email: ADMIN_EMAIL.to_string(),
        username: "admin".to_string(),
        password: PASSWORD.to_string(),
    });
    settings
}

async fn start(settings: &Settings) -> Arc<Server> {
    let cancel = CancellationToken::new();
    let broker = Arc::new(
        MemoryBroker::new(cancel.clone()).with_redelivery_pause(Duration::from_millis(5)),
    );
    let server = Server::from_components(
        settings,
        ServiceMode::Standalone,
        Stores::memory(MemoryDb::new()),
        Queue::memory(broker),
        cancel,
    )
    .await
    .unwrap();
    Arc::new(server)
}

fn api(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone {
    warp::path("api")
        .and(warp::path("v1"))
        .and(routes(server))
        .recover(recover_error)
}

fn body(res: &warp::http::Response<impl AsRef<[u8]>>) -> Value {
    serde_json::from_slice(res.body().as_ref()).unwrap()
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

async fn login(
    filter: &(impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone + 'static),
    email: &str,
) -> Value {
    let res = warp::test::request()
        .method("POST")
        .path("/api/v1/login")
        .json(&json!({ "email": email, "password": PASSWORD }))
        .reply(filter)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    body(&res)
}

/// Logs in until the issued access token carries `role`.
async fn login_with_role(
    filter: &(impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone + 'static),
    settings: &Settings,
    email: &str,
    role: &str,
) -> String {
    let codec = token_codec_from(&settings.auth).unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let reply = login(filter, email).await;
            let token = reply["data"]["tokens"]["access_token"]
                .as_str()
                .unwrap()
                .to_string();
            let claims = codec.verify_access(&token).unwrap();
            if claims.roles.iter().any(|r| r == role) {
                return token;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn register_login_and_me() {
    let settings = settings();
    let server = start(&settings).await;
    let filter = api(server.clone());

    let res = warp::test::request()
        .method("POST")
        .path("/api/v1/register")
        .header("user-agent", "it/1.0")
        .json(&json!({
            "email": "Alice@Example.com",
            "username": "alice",
            "password": PASSWORD,
        }))
        .reply(&filter)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let registered = body(&res);
    assert_eq!(registered["success"], json!(true));
    assert_eq!(registered["data"]["user"]["email"], json!("alice@example.com"));

    // roles arrive through the outbox and the consumer
    let token = login_with_role(&filter, &settings, "alice@example.com", "user").await;

    let res = warp::test::request()
        .path("/api/v1/me")
        .header("authorization", bearer(&token))
        .reply(&filter)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body(&res)["data"]["username"], json!("alice"));

    let res = warp::test::request()
        .method("POST")
        .path("/api/v1/register")
        .json(&json!({
            "email": "alice@example.com",
            "username": "again",
            "password": PASSWORD,
        }))
        .reply(&filter)
        .await;
    assert_eq!(res.status(), StatusCode::CONFLICT);

    server.shutdown().await;
}

#[tokio::test]
async fn gate_rejects_missing_tokens_and_non_admins() {
    let settings = settings();
    let server = start(&settings).await;
    let filter = api(server.clone());

    let res = warp::test::request().path("/api/v1/me").reply(&filter).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let rejected = body(&res);
    assert_eq!(rejected["success"], json!(false));
    assert_eq!(rejected["error"]["code"], json!("Unauthenticated"));

    let res = warp::test::request()
        .path("/api/v1/roles")
        .header("authorization", "Bearer garbage")
        .reply(&filter)
        .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = warp::test::request()
        .method("POST")
        .path("/api/v1/register")
        .json(&json!({
            "email": "bob@example.com",
            "username": "bob",
            "password": PASSWORD,
        }))
        .reply(&filter)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let token = body(&res)["data"]["tokens"]["access_token"]
        .as_str()
        .unwrap()
        .to_string();

    // authenticated reads pass, admin writes do not
    let res = warp::test::request()
        .path("/api/v1/roles")
        .header("authorization", bearer(&token))
        .reply(&filter)
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = warp::test::request()
        .method("POST")
        .path("/api/v1/roles")
        .header("authorization", bearer(&token))
        .json(&json!({ "name": "editor" }))
        .reply(&filter)
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = warp::test::request()
        .path("/api/v1/users")
        .header("authorization", bearer(&token))
        .reply(&filter)
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = warp::test::request()
        .path("/api/v1/nowhere")
        .reply(&filter)
        .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    server.shutdown().await;
}

#[tokio::test]
async fn admin_manages_roles_and_permissions() {
    let settings = settings();
    let server = start(&settings).await;
    let filter = api(server.clone());
    let admin = bearer(&login_with_role(&filter, &settings, ADMIN_EMAIL, "admin").await);

    let res = warp::test::request()
        .method("POST")
        .path("/api/v1/roles")
        .header("authorization", &admin)
        .json(&json!({ "name": "editor" }))
        .reply(&filter)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let role_id = body(&res)["data"]["id"].as_str().unwrap().to_string();

    let res = warp::test::request()
        .method("POST")
        .path("/api/v1/roles")
        .header("authorization", &admin)
        .json(&json!({ "name": "editor" }))
        .reply(&filter)
        .await;
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = warp::test::request()
        .method("POST")
        .path("/api/v1/roles")
        .header("authorization", &admin)
        .json(&json!({ "name": "3fa85f64-5717-4562-b3fc-2c963f66afa6" }))
        .reply(&filter)
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = warp::test::request()
        .path("/api/v1/roles/by-name/editor")
        .header("authorization", &admin)
        .reply(&filter)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body(&res)["data"]["id"], json!(role_id));

    let res = warp::test::request()
        .path("/api/v1/roles/not-a-uuid")
        .header("authorization", &admin)
        .reply(&filter)
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = warp::test::request()
        .method("POST")
        .path("/api/v1/permissions")
        .header("authorization", &admin)
        .json(&json!({ "name": "publish" }))
        .reply(&filter)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let permission_id = body(&res)["data"]["id"].as_str().unwrap().to_string();

    let res = warp::test::request()
        .method("POST")
        .path(&format!("/api/v1/roles/{}/permissions", role_id))
        .header("authorization", &admin)
        .json(&json!({ "permission_ids": [permission_id] }))
        .reply(&filter)
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = warp::test::request()
        .path(&format!("/api/v1/permissions/{}/roles", permission_id))
        .header("authorization", &admin)
        .reply(&filter)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let names: Vec<Value> = body(&res)["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].clone())
        .collect();
    assert_eq!(names, vec![json!("editor")]);

    let res = warp::test::request()
        .method("DELETE")
        .path(&format!("/api/v1/roles/{}", role_id))
        .header("authorization", &admin)
        .reply(&filter)
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = warp::test::request()
        .path(&format!("/api/v1/roles/{}", role_id))
        .header("authorization", &admin)
        .reply(&filter)
        .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    server.shutdown().await;
}

#[tokio::test]
async fn malformed_body_is_a_bad_request() {
    let settings = settings();
    let server = start(&settings).await;
    let filter = api(server.clone());

    let res = warp::test::request()
        .method("POST")
        .path("/api/v1/login")
        .header("content-type", "application/json")
        .body("{\"email\": 42")
        .reply(&filter)
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    server.shutdown().await;
}

#[tokio::test]
async fn user_service_reads_grants_from_remote_rbac_service() {
    use turnstile::application_impl::HttpRbacQuery;
    use turnstile::application_port::RbacQuery;
    use turnstile::domain_model::{ROLE_USER, UserId};

    let settings = test_settings();
    let cancel = CancellationToken::new();
    let rbac_server = Arc::new(
        Server::from_components(
            &settings,
            ServiceMode::Rbac,
            Stores::memory(MemoryDb::new()),
            Queue::memory(Arc::new(MemoryBroker::new(cancel.clone()))),
            cancel,
        )
        .await
        .unwrap(),
    );
    assert!(rbac_server.auth_service.is_none());

    let (addr, serving) = warp::serve(api(rbac_server.clone())).bind_ephemeral(([127, 0, 0, 1], 0));
    let serving = tokio::spawn(serving);

    let rbac = rbac_server.rbac_service.clone().unwrap();
    let user_id = UserId::new_v4();
    let role = rbac.get_role_by_name(ROLE_USER).await.unwrap();
    rbac.assign_roles_to_user(user_id, &[role.id]).await.unwrap();

    let query = HttpRbacQuery::new(
        &format!("http://{}/api/v1", addr),
        token_codec_from(&settings.auth).unwrap(),
        Duration::from_secs(5),
    )
    .unwrap();

    let roles = query.list_roles_for_user(user_id).await.unwrap();
    assert_eq!(roles, vec![ROLE_USER.to_string()]);
    let mut permissions = query.list_permissions_for_user(user_id).await.unwrap();
    permissions.sort();
    assert_eq!(permissions, vec!["read_profile".to_string(), "write_profile".to_string()]);

    serving.abort();
    rbac_server.shutdown().await;
}
