use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use skillpath_api::app::{self, ApiAuth};
use skillpath_auth::IdentityClaims;
use skillpath_infra::dispatch::Dispatcher;
use skillpath_infra::AppConfig;

const JWT_SECRET: &str = "test-secret";
const WORKER_SECRET: &str = "worker-secret";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
    shutdown: CancellationToken,
}

impl TestServer {
    /// Same wiring as `main`, on an ephemeral port with the in-memory store
    /// and the stub generator. `vars` override the defaults.
    async fn spawn(vars: &[(&str, &str)]) -> Self {
        let mut env: HashMap<String, String> = HashMap::from([
            ("JWT_SECRET".to_string(), JWT_SECRET.to_string()),
            ("GENERATION_PROVIDER".to_string(), "stub".to_string()),
        ]);
        for (k, v) in vars {
            env.insert(k.to_string(), v.to_string());
        }
        let config = AppConfig::from_lookup(|key| env.get(key).cloned()).expect("valid test config");

        let auth = ApiAuth::new(
            app::identity_verifier(&config.auth).unwrap(),
            config.worker_secret.as_deref(),
            config.cron_secret.as_deref(),
        )
        .unwrap();
        let services = Arc::new(app::services::build_services(&config).await.unwrap());

        let shutdown = CancellationToken::new();
        tokio::spawn({
            let dispatchers = services.dispatchers.clone();
            let shutdown = shutdown.clone();
            async move { dispatchers.run(shutdown).await }
        });

        let router = app::build_app(services, auth);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url,
            handle,
            shutdown,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.handle.abort();
    }
}

fn mint_jwt(sub: &str) -> String {
    let now = Utc::now();
    let claims = IdentityClaims::new(sub, now, now + ChronoDuration::minutes(10));

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

async fn get_roadmap_eventually(
    client: &reqwest::Client,
    srv: &TestServer,
    token: &str,
    topic: &str,
) -> serde_json::Value {
    // Generation runs after submit returns; poll until the result lands.
    for _ in 0..100 {
        let res = client
            .get(srv.url(&format!("/api/roadmaps/{topic}")))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();

        if res.status() == StatusCode::OK {
            return res.json().await.unwrap();
        }
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    panic!("roadmap did not become available within timeout");
}

async fn get_terminal_status_eventually(
    client: &reqwest::Client,
    srv: &TestServer,
    token: &str,
    topic: &str,
) -> serde_json::Value {
    // The result is stored before the job is marked completed.
    for _ in 0..100 {
        let res = client
            .get(srv.url(&format!("/api/roadmaps/{topic}/status")))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let job: serde_json::Value = res.json().await.unwrap();
        if job["status"] == "COMPLETED" || job["status"] == "FAILED" {
            return job;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    panic!("job did not finish within timeout");
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn(&[]).await;

    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_required_for_roadmap_endpoints() {
    let srv = TestServer::spawn(&[]).await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/roadmaps"))
        .json(&json!({ "skill": "Rust" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(srv.url("/api/roadmaps/Rust"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn submit_then_local_push_generates_the_roadmap() {
    let srv = TestServer::spawn(&[("PUSH_DISPATCH", "local")]).await;
    let client = reqwest::Client::new();
    let token = mint_jwt("alice");

    let res = client
        .post(srv.url("/api/roadmaps"))
        .bearer_auth(&token)
        .json(&json!({ "skill": "  Rust  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["ownerKey"], "alice:Rust");

    let roadmap = get_roadmap_eventually(&client, &srv, &token, "Rust").await;
    assert_eq!(roadmap["ownerKey"], "alice:Rust");
    let again = get_roadmap_eventually(&client, &srv, &token, "Rust").await;
    assert_eq!(again, roadmap);
    let weeks = roadmap["weeks"].as_array().unwrap();
    assert_eq!(weeks.len(), 8);
    assert_eq!(weeks[0]["week"], 1);

    let job = get_terminal_status_eventually(&client, &srv, &token, "Rust").await;
    assert_eq!(job["status"], "COMPLETED");
    assert!(job["completedAt"].is_string());
    assert!(job.get("error").is_none());
}

#[tokio::test]
async fn duplicate_submission_reports_the_active_job() {
    let srv = TestServer::spawn(&[("PUSH_DISPATCH", "none"), ("EMBEDDED_WORKER", "false")]).await;
    let client = reqwest::Client::new();
    let token = mint_jwt("bob");

    let submit = || {
        client
            .post(srv.url("/api/roadmaps"))
            .bearer_auth(&token)
            .json(&json!({ "skill": "Go" }))
            .send()
    };

    let first = submit().await.unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    let first: serde_json::Value = first.json().await.unwrap();

    let second = submit().await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let second: serde_json::Value = second.json().await.unwrap();
    assert_eq!(second["status"], "already_in_progress");
    assert_eq!(second["jobId"], first["jobId"]);
    assert_eq!(second["jobStatus"], "PENDING");
}

#[tokio::test]
async fn cron_trigger_claims_pending_work() {
    let srv = TestServer::spawn(&[
        ("PUSH_DISPATCH", "none"),
        ("EMBEDDED_WORKER", "false"),
        ("WORKER_SECRET_KEY", WORKER_SECRET),
    ])
    .await;
    let client = reqwest::Client::new();
    let token = mint_jwt("carol");

    let trigger = || {
        client
            .post(srv.url("/api/cron/process-roadmaps"))
            .header("x-cron-secret", WORKER_SECRET)
            .send()
    };

    let res = trigger().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "no_pending_requests");

    let res = client
        .post(srv.url("/api/roadmaps"))
        .bearer_auth(&token)
        .json(&json!({ "skill": "SQL" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let submitted: serde_json::Value = res.json().await.unwrap();

    let res = trigger().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "claimed");
    assert_eq!(body["jobId"], submitted["jobId"]);

    let roadmap = get_roadmap_eventually(&client, &srv, &token, "SQL").await;
    assert_eq!(roadmap["weeks"].as_array().unwrap().len(), 8);
}

#[tokio::test]
async fn push_trigger_is_accepted_and_runs_a_cycle() {
    let srv = TestServer::spawn(&[
        ("PUSH_DISPATCH", "none"),
        ("EMBEDDED_WORKER", "false"),
        ("WORKER_SECRET_KEY", WORKER_SECRET),
    ])
    .await;
    let client = reqwest::Client::new();
    let token = mint_jwt("dave");

    let res = client
        .post(srv.url("/api/roadmaps"))
        .bearer_auth(&token)
        .json(&json!({ "skill": "Kubernetes" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let res = client
        .post(srv.url("/api/workers/generate-roadmap"))
        .header("x-worker-secret", WORKER_SECRET)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "accepted");

    let job = get_terminal_status_eventually(&client, &srv, &token, "Kubernetes").await;
    assert_eq!(job["status"], "COMPLETED");

    let res = client
        .get(srv.url("/api/workers/stats"))
        .header("x-worker-secret", WORKER_SECRET)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let stats: serde_json::Value = res.json().await.unwrap();
    assert_eq!(stats["jobs"]["completed"], 1);
}

#[tokio::test]
async fn worker_endpoints_need_the_secret() {
    let srv = TestServer::spawn(&[("WORKER_SECRET_KEY", WORKER_SECRET)]).await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/workers/generate-roadmap"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .post(srv.url("/api/cron/process-roadmaps"))
        .header("x-cron-secret", "wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn worker_endpoints_are_disabled_without_a_secret() {
    let srv = TestServer::spawn(&[]).await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/workers/generate-roadmap"))
        .header("x-worker-secret", "anything")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn unknown_topic_is_not_found() {
    let srv = TestServer::spawn(&[]).await;
    let client = reqwest::Client::new();
    let token = mint_jwt("erin");

    for path in ["/api/roadmaps/Haskell", "/api/roadmaps/Haskell/status"] {
        let res = client.get(srv.url(path)).bearer_auth(&token).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND, "{path}");
    }
}

#[tokio::test]
async fn blank_skill_is_a_validation_error() {
    let srv = TestServer::spawn(&[]).await;
    let client = reqwest::Client::new();
    let token = mint_jwt("frank");

    let res = client
        .post(srv.url("/api/roadmaps"))
        .bearer_auth(&token)
        .json(&json!({ "skill": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");

    let res = client
        .post(srv.url("/api/roadmaps"))
        .bearer_auth(&token)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_submit_body_is_a_validation_error() {
    let srv = TestServer::spawn(&[]).await;
    let client = reqwest::Client::new();
    let token = mint_jwt("ivan");

    let res = client
        .post(srv.url("/api/roadmaps"))
        .bearer_auth(&token)
        .json(&json!({ "skill": 5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");

    let res = client
        .post(srv.url("/api/roadmaps"))
        .bearer_auth(&token)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn users_only_see_their_own_roadmaps() {
    let srv = TestServer::spawn(&[("PUSH_DISPATCH", "local")]).await;
    let client = reqwest::Client::new();
    let owner = mint_jwt("gina");
    let other = mint_jwt("hank");

    let res = client
        .post(srv.url("/api/roadmaps"))
        .bearer_auth(&owner)
        .json(&json!({ "skill": "Elixir" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    get_roadmap_eventually(&client, &srv, &owner, "Elixir").await;

    let res = client
        .get(srv.url("/api/roadmaps/Elixir"))
        .bearer_auth(&other)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
