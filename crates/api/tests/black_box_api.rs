use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::json;
use uuid::Uuid;

use commons_authz::AuthClaims;
use commons_core::{OrganizationId, UserId};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(jwt_secret: &str) -> Self {
        // Build the same router as prod, but bind to an ephemeral port.
        let app = commons_api::app::build_app(jwt_secret.to_string()).await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(
    jwt_secret: &str,
    user_id: UserId,
    is_administrator: bool,
    organizations: Vec<OrganizationId>,
) -> String {
    let now = Utc::now();
    let claims = AuthClaims {
        sub: user_id,
        is_administrator,
        organizations,
        issued_at: now,
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .expect("failed to encode jwt")
}

async fn register_entity(
    client: &reqwest::Client,
    base_url: &str,
    admin_token: &str,
    body: serde_json::Value,
) -> Uuid {
    let res = client
        .post(format!("{}/entities", base_url))
        .bearer_auth(admin_token)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: serde_json::Value = res.json().await.unwrap();
    created["id"].as_str().unwrap().parse().unwrap()
}

async fn accessible_ids(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    kind: &str,
    verb: &str,
) -> Vec<String> {
    let res = client
        .get(format!("{}/entities/{}?verb={}", base_url, kind, verb))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["unrestricted"], false);
    body["ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;

    let client = reqwest::Client::new();
    let res = client
        .get(format!("{}/whoami", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // Health stays open.
    let res = client
        .get(format!("{}/health", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn whoami_reflects_claims_and_synced_membership() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;

    let user = UserId::new();
    let organization = OrganizationId::new();
    let token = mint_jwt(jwt_secret, user, false, vec![organization]);

    let client = reqwest::Client::new();
    let res = client
        .get(format!("{}/whoami", srv.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["user_id"].as_str().unwrap(), user.to_string());
    assert_eq!(body["is_administrator"], false);
    // The claimed organization was synced into the ledger on this call.
    assert!(
        body["active_organizations"]
            .as_array()
            .unwrap()
            .iter()
            .any(|o| o == &json!(organization.to_string()))
    );
}

#[tokio::test]
async fn grant_lifecycle_controls_visibility() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let client = reqwest::Client::new();

    let admin_token = mint_jwt(jwt_secret, UserId::new(), true, vec![]);
    let user = UserId::new();
    let user_token = mint_jwt(jwt_secret, user, false, vec![]);

    let changemaker = register_entity(
        &client,
        &srv.base_url,
        &admin_token,
        json!({ "kind": "changemaker" }),
    )
    .await;
    let value = register_entity(
        &client,
        &srv.base_url,
        &admin_token,
        json!({
            "kind": "changemaker_field_value",
            "parent_kind": "changemaker",
            "parent_id": changemaker,
        }),
    )
    .await;

    // Nothing accessible before the grant.
    assert!(
        accessible_ids(&client, &srv.base_url, &user_token, "changemaker", "VIEW")
            .await
            .is_empty()
    );

    let res = client
        .post(format!("{}/grants", srv.base_url))
        .bearer_auth(&admin_token)
        .json(&json!({
            "grantee_type": "USER",
            "user_id": user,
            "context_entity_type": "changemaker",
            "changemaker_id": changemaker,
            "scope": ["changemaker", "changemaker_field_value"],
            "verbs": ["VIEW"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let grant: serde_json::Value = res.json().await.unwrap();
    let grant_id = grant["id"].as_str().unwrap().to_string();

    // The grant reaches the changemaker and its field value, for the
    // granted verb only.
    assert_eq!(
        accessible_ids(&client, &srv.base_url, &user_token, "changemaker", "VIEW").await,
        vec![changemaker.to_string()]
    );
    assert_eq!(
        accessible_ids(&client, &srv.base_url, &user_token, "changemaker_field_value", "VIEW").await,
        vec![value.to_string()]
    );
    assert!(
        accessible_ids(&client, &srv.base_url, &user_token, "changemaker_field_value", "EDIT")
            .await
            .is_empty()
    );

    // The grantee can read its own grant.
    let res = client
        .get(format!("{}/grants/{}", srv.base_url, grant_id))
        .bearer_auth(&user_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Deleting the grant revokes access on the very next check.
    let res = client
        .delete(format!("{}/grants/{}", srv.base_url, grant_id))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert!(
        accessible_ids(&client, &srv.base_url, &user_token, "changemaker", "VIEW")
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn manage_holders_delegate_within_their_entities_only() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let client = reqwest::Client::new();

    let admin_token = mint_jwt(jwt_secret, UserId::new(), true, vec![]);
    let manager = UserId::new();
    let manager_token = mint_jwt(jwt_secret, manager, false, vec![]);
    let viewer = UserId::new();
    let viewer_token = mint_jwt(jwt_secret, viewer, false, vec![]);

    let managed = register_entity(&client, &srv.base_url, &admin_token, json!({ "kind": "funder" })).await;
    let other = register_entity(&client, &srv.base_url, &admin_token, json!({ "kind": "funder" })).await;

    // Admin hands MANAGE over one funder to the manager via the legacy route.
    let res = client
        .put(format!(
            "{}/entities/funder/{}/permissions/users/{}/MANAGE",
            srv.base_url, managed, manager
        ))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    // The manager may delegate VIEW over the managed funder...
    let res = client
        .post(format!("{}/grants", srv.base_url))
        .bearer_auth(&manager_token)
        .json(&json!({
            "grantee_type": "USER",
            "user_id": viewer,
            "context_entity_type": "funder",
            "funder_id": managed,
            "scope": ["funder"],
            "verbs": ["VIEW"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let grant: serde_json::Value = res.json().await.unwrap();
    let grant_id = grant["id"].as_str().unwrap().to_string();

    assert_eq!(
        accessible_ids(&client, &srv.base_url, &viewer_token, "funder", "VIEW").await,
        vec![managed.to_string()]
    );

    // ...but delegation can never exceed what the delegator holds: a grant
    // about the other funder is a privilege conflict.
    let res = client
        .post(format!("{}/grants", srv.base_url))
        .bearer_auth(&manager_token)
        .json(&json!({
            "grantee_type": "USER",
            "user_id": viewer,
            "context_entity_type": "funder",
            "funder_id": other,
            "scope": ["funder"],
            "verbs": ["VIEW"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // The manager can also revoke the delegation it created.
    let res = client
        .delete(format!("{}/grants/{}", srv.base_url, grant_id))
        .bearer_auth(&manager_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn group_membership_gates_group_grants() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let client = reqwest::Client::new();

    let admin_token = mint_jwt(jwt_secret, UserId::new(), true, vec![]);
    let organization = OrganizationId::new();
    let member_token = mint_jwt(jwt_secret, UserId::new(), false, vec![organization]);
    let outsider_token = mint_jwt(jwt_secret, UserId::new(), false, vec![]);

    let funder = register_entity(&client, &srv.base_url, &admin_token, json!({ "kind": "funder" })).await;

    let res = client
        .post(format!("{}/grants", srv.base_url))
        .bearer_auth(&admin_token)
        .json(&json!({
            "grantee_type": "USER_GROUP",
            "organization_id": organization,
            "context_entity_type": "funder",
            "funder_id": funder,
            "scope": ["funder"],
            "verbs": ["VIEW", "EDIT"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    assert_eq!(
        accessible_ids(&client, &srv.base_url, &member_token, "funder", "VIEW").await,
        vec![funder.to_string()]
    );
    assert!(
        accessible_ids(&client, &srv.base_url, &outsider_token, "funder", "VIEW")
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn deleting_an_entity_cascades_over_http() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let client = reqwest::Client::new();

    let admin_token = mint_jwt(jwt_secret, UserId::new(), true, vec![]);
    let user = UserId::new();
    let user_token = mint_jwt(jwt_secret, user, false, vec![]);

    let source = register_entity(&client, &srv.base_url, &admin_token, json!({ "kind": "source" })).await;

    let res = client
        .post(format!("{}/grants", srv.base_url))
        .bearer_auth(&admin_token)
        .json(&json!({
            "grantee_type": "USER",
            "user_id": user,
            "context_entity_type": "source",
            "source_id": source,
            "scope": ["source"],
            "verbs": ["VIEW"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let grant: serde_json::Value = res.json().await.unwrap();
    let grant_id = grant["id"].as_str().unwrap().to_string();

    let res = client
        .delete(format!("{}/entities/source/{}", srv.base_url, source))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    // The grant went with its entity, atomically.
    let res = client
        .get(format!("{}/grants/{}", srv.base_url, grant_id))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert!(
        accessible_ids(&client, &srv.base_url, &user_token, "source", "VIEW")
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn error_taxonomy_is_stable() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let client = reqwest::Client::new();

    let admin_token = mint_jwt(jwt_secret, UserId::new(), true, vec![]);
    let user = UserId::new();
    let user_token = mint_jwt(jwt_secret, user, false, vec![]);

    let funder = register_entity(&client, &srv.base_url, &admin_token, json!({ "kind": "funder" })).await;

    // Malformed enum → validation failure.
    let res = client
        .post(format!("{}/grants", srv.base_url))
        .bearer_auth(&admin_token)
        .json(&json!({
            "grantee_type": "USER",
            "user_id": user,
            "context_entity_type": "funder",
            "funder_id": funder,
            "scope": ["funder"],
            "verbs": ["SHOUT"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Empty scope → validation failure.
    let res = client
        .post(format!("{}/grants", srv.base_url))
        .bearer_auth(&admin_token)
        .json(&json!({
            "grantee_type": "USER",
            "user_id": user,
            "context_entity_type": "funder",
            "funder_id": funder,
            "scope": [],
            "verbs": ["VIEW"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Wrong identifier shape (two grantee ids) → validation failure.
    let res = client
        .post(format!("{}/grants", srv.base_url))
        .bearer_auth(&admin_token)
        .json(&json!({
            "grantee_type": "USER",
            "user_id": user,
            "organization_id": OrganizationId::new(),
            "context_entity_type": "funder",
            "funder_id": funder,
            "scope": ["funder"],
            "verbs": ["VIEW"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // A nonexistent entity referenced in the payload is a semantic
    // conflict, not a routing not-found.
    let res = client
        .post(format!("{}/grants", srv.base_url))
        .bearer_auth(&admin_token)
        .json(&json!({
            "grantee_type": "USER",
            "user_id": user,
            "context_entity_type": "funder",
            "funder_id": Uuid::now_v7(),
            "scope": ["funder"],
            "verbs": ["VIEW"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // Unknown grant id → not-found.
    let res = client
        .get(format!("{}/grants/{}", srv.base_url, Uuid::now_v7()))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // Removing an absent legacy row → not-found, never a silent success.
    let res = client
        .delete(format!(
            "{}/entities/funder/{}/permissions/users/{}/VIEW",
            srv.base_url, funder, user
        ))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // Malformed path id → validation failure.
    let res = client
        .get(format!("{}/grants/not-a-uuid", srv.base_url))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // The registry surface is administrator-only.
    let res = client
        .post(format!("{}/entities", srv.base_url))
        .bearer_auth(&user_token)
        .json(&json!({ "kind": "funder" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // Non-privileged callers get not-found on hidden entities, not
    // forbidden.
    let res = client
        .put(format!(
            "{}/entities/funder/{}/permissions/users/{}/VIEW",
            srv.base_url, funder, user
        ))
        .bearer_auth(&user_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn legacy_rows_grant_and_revoke_access() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let client = reqwest::Client::new();

    let admin_token = mint_jwt(jwt_secret, UserId::new(), true, vec![]);
    let user = UserId::new();
    let user_token = mint_jwt(jwt_secret, user, false, vec![]);

    let opportunity_parent =
        register_entity(&client, &srv.base_url, &admin_token, json!({ "kind": "funder" })).await;
    let opportunity = register_entity(
        &client,
        &srv.base_url,
        &admin_token,
        json!({
            "kind": "opportunity",
            "parent_kind": "funder",
            "parent_id": opportunity_parent,
        }),
    )
    .await;

    // CREATE_PROPOSAL is an opportunity-only verb.
    let res = client
        .put(format!(
            "{}/entities/funder/{}/permissions/users/{}/CREATE_PROPOSAL",
            srv.base_url, opportunity_parent, user
        ))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .put(format!(
            "{}/entities/opportunity/{}/permissions/users/{}/CREATE_PROPOSAL",
            srv.base_url, opportunity, user
        ))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    assert_eq!(
        accessible_ids(&client, &srv.base_url, &user_token, "opportunity", "CREATE_PROPOSAL").await,
        vec![opportunity.to_string()]
    );

    // The row shows up on the admin listing surface.
    let res = client
        .get(format!(
            "{}/entities/opportunity/{}/permissions",
            srv.base_url, opportunity
        ))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["items"].as_array().unwrap().len(), 1);

    // Removing the row revokes access.
    let res = client
        .delete(format!(
            "{}/entities/opportunity/{}/permissions/users/{}/CREATE_PROPOSAL",
            srv.base_url, opportunity, user
        ))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert!(
        accessible_ids(&client, &srv.base_url, &user_token, "opportunity", "CREATE_PROPOSAL")
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn administrators_are_unrestricted_in_list_scoping() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let client = reqwest::Client::new();

    let admin_token = mint_jwt(jwt_secret, UserId::new(), true, vec![]);

    let res = client
        .get(format!("{}/entities/funder?verb=VIEW", srv.base_url))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["unrestricted"], true);

    // With a caller filter the selector narrows to exactly the filter.
    let a = Uuid::now_v7();
    let b = Uuid::now_v7();
    let res = client
        .get(format!(
            "{}/entities/funder?verb=VIEW&ids={},{}",
            srv.base_url, a, b
        ))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["unrestricted"], false);
    assert_eq!(body["ids"].as_array().unwrap().len(), 2);
}
