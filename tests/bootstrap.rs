//! Startup, chat round-trips and teardown against mocked Azure endpoints.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use azureai_chat::api::{create_router, AppState};
use azureai_chat::error::{AppError, CredentialError, ProjectError};
use azureai_chat::identity::{AccessToken, CredentialKind, CredentialSelection, TokenCredential};
use azureai_chat::{Application, Config, Session};

const CONNECTIONS_PATH: &str = "/agents/v1.0/subscriptions/sub-1/resourceGroups/rg-chat/providers/Microsoft.MachineLearningServices/workspaces/proj-chat/connections";
const COMPLETIONS_PATH: &str = "/ai/models/chat/completions";

/// Credential that hands out a fixed token.
#[derive(Debug)]
struct FixedCredential;

#[async_trait]
impl TokenCredential for FixedCredential {
    fn kind(&self) -> CredentialKind {
        CredentialKind::DeveloperCli
    }

    async fn get_token(&self, _scope: &str) -> Result<AccessToken, CredentialError> {
        Ok(AccessToken::new("test-token", Utc::now() + Duration::hours(1)))
    }
}

fn config_for(server: &MockServer) -> Config {
    Config::from_vars(vec![
        (
            "AZURE_AIPROJECT_CONNECTION_STRING".to_string(),
            format!("{};sub-1;rg-chat;proj-chat", server.uri()),
        ),
        (
            "AZURE_AI_CHAT_DEPLOYMENT_NAME".to_string(),
            "gpt-4o-mini".to_string(),
        ),
        ("AZURE_TENANT_ID".to_string(), "abc".to_string()),
        ("PORT".to_string(), "0".to_string()),
    ])
    .unwrap()
}

fn prompt_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"---\nname: Test Prompt\n---\nsystem:\nYou are a hotel concierge.\n")
        .unwrap();
    file
}

async fn mount_connections(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(CONNECTIONS_PATH))
        .and(query_param("category", "AIServices"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {
                    "name": "secondary",
                    "properties": {"category": "AIServices", "target": "https://unused.example.com/", "authType": "AAD"}
                },
                {
                    "name": "ai-services",
                    "properties": {"category": "AIServices", "target": format!("{}/ai/", server.uri()), "authType": "AAD", "isDefault": true}
                }
            ]
        })))
        .mount(server)
        .await;
}

async fn start_session(server: &MockServer, prompt: &NamedTempFile) -> Session {
    mount_connections(server).await;
    tokio_test::assert_ok!(
        Session::start_with(&config_for(server), Arc::new(FixedCredential), prompt.path()).await
    )
}

fn chat_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"messages":[{"role":"user","content":"Is breakfast included?"}]}"#,
        ))
        .unwrap()
}

#[tokio::test]
async fn startup_exposes_chat_client_and_model() {
    let server = MockServer::start().await;
    let prompt = prompt_file();
    let config = config_for(&server);

    assert_eq!(
        CredentialSelection::from_config(&config),
        CredentialSelection::DeveloperCli {
            tenant_id: Some("abc".to_string())
        }
    );

    let session = start_session(&server, &prompt).await;

    assert!(session.is_ready());
    assert_eq!(session.chat_model(), "gpt-4o-mini");
    assert_eq!(session.chat().endpoint(), format!("{}/ai/models", server.uri()));
    assert_eq!(session.project().connection().project_name, "proj-chat");
    assert_eq!(
        session.prompt().metadata().name.as_deref(),
        Some("Test Prompt")
    );
}

#[tokio::test]
async fn rejected_project_auth_aborts_startup() {
    let server = MockServer::start().await;
    let prompt = prompt_file();
    Mock::given(method("GET"))
        .and(path(CONNECTIONS_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .mount(&server)
        .await;

    let err = Session::start_with(&config_for(&server), Arc::new(FixedCredential), prompt.path())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::Project(ProjectError::RequestFailed { status: 401, .. })
    ));
}

#[tokio::test]
async fn project_without_ai_services_aborts_startup() {
    let server = MockServer::start().await;
    let prompt = prompt_file();
    Mock::given(method("GET"))
        .and(path(CONNECTIONS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
        .mount(&server)
        .await;

    let err = Session::start_with(&config_for(&server), Arc::new(FixedCredential), prompt.path())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::Project(ProjectError::NoConnection { .. })
    ));
}

#[tokio::test]
async fn missing_prompt_template_aborts_startup() {
    let server = MockServer::start().await;
    mount_connections(&server).await;

    let err = Session::start_with(
        &config_for(&server),
        Arc::new(FixedCredential),
        std::path::Path::new("/nowhere/prompt.prompty"),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, AppError::Prompt(_)));
}

#[tokio::test]
async fn chat_sends_prompt_and_history() {
    let server = MockServer::start().await;
    let prompt = prompt_file();
    let session = start_session(&server, &prompt).await;

    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "stream": false,
            "messages": [
                {"role": "system", "content": "You are a hotel concierge."},
                {"role": "user", "content": "Is breakfast included?"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Yes, from 7 to 10."},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 20, "completion_tokens": 6, "total_tokens": 26}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = create_router(AppState::new(Arc::new(session)), "static");
    let response = app.oneshot(chat_request("/chat")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["message"]["content"], "Yes, from 7 to 10.");
    assert_eq!(body["finish_reason"], "stop");
    assert_eq!(body["usage"]["total_tokens"], 26);
}

#[tokio::test]
async fn upstream_errors_become_bad_gateway() {
    let server = MockServer::start().await;
    let prompt = prompt_file();
    let session = start_session(&server, &prompt).await;

    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let app = create_router(AppState::new(Arc::new(session)), "static");
    let response = app.oneshot(chat_request("/chat")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn chat_stream_emits_ndjson_deltas() {
    let server = MockServer::start().await;
    let prompt = prompt_file();
    let session = start_session(&server, &prompt).await;

    let sse = concat!(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&server)
        .await;

    let app = create_router(AppState::new(Arc::new(session)), "static");
    let response = app.oneshot(chat_request("/chat/stream")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/x-ndjson"
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let lines: Vec<Value> = std::str::from_utf8(&body)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(
        lines,
        vec![
            json!({"delta": {"role": "assistant", "content": ""}}),
            json!({"delta": {"content": "Hel"}}),
            json!({"delta": {"content": "lo"}}),
        ]
    );
}

#[tokio::test]
async fn serving_lifetime_ends_with_teardown() {
    let server = MockServer::start().await;
    let prompt = prompt_file();
    let config = config_for(&server);
    let session = Arc::new(start_session(&server, &prompt).await);

    let app = tokio_test::assert_ok!(
        Application::with_session(&config, Arc::clone(&session), None).await
    );
    assert_ne!(app.local_addr().port(), 0);

    tokio_test::assert_ok!(app.run_until(async {}).await);

    assert!(!session.is_ready());
    assert!(!session.project().close());
    assert!(!session.chat().close());
}

#[tokio::test]
async fn chat_stream_ends_with_error_line_on_bad_event() {
    let server = MockServer::start().await;
    let prompt = prompt_file();
    let session = start_session(&server, &prompt).await;

    let sse = concat!(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {oops\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"never\"}}]}\n\n",
    );
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&server)
        .await;

    let app = create_router(AppState::new(Arc::new(session)), "static");
    let response = app.oneshot(chat_request("/chat/stream")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let lines: Vec<Value> = std::str::from_utf8(&body)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], json!({"delta": {"content": "Hel"}}));
    assert!(lines[1]["error"].is_string());
    assert!(lines[1].get("delta").is_none());
}
