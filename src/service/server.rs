use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tracing::info;

use crate::adapters::line::LineClient;
use crate::ai_reply::AiReplier;
use crate::bot_store::BotStore;
use crate::message_router::MessageRouter;

use super::config::ServiceConfig;
use super::handlers::{health, send_messages, upload, webhook};
use super::state::AppState;
use super::BoxError;

pub async fn run_server(
    config: ServiceConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let config = Arc::new(config);
    let store = Arc::new(BotStore::new(&config.db_path)?);
    let line = Arc::new(LineClient::new(
        config.line_channel_access_token.clone(),
        config.line_api_base_url.clone(),
    ));
    let replier = Arc::new(AiReplier::with_config(config.ai.clone()));
    let router = Arc::new(MessageRouter::new(
        store.clone(),
        line.clone(),
        replier,
        config.manager_line_user_id.clone(),
    ));
    let state = AppState {
        config: config.clone(),
        store,
        line,
        router,
    };

    let host: IpAddr = config
        .host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    info!("shift notifier listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, build_app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn build_app(state: AppState) -> Router {
    let body_limit = state.config.upload_body_max_bytes;
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/upload", post(upload))
        .route("/send_messages", post(send_messages))
        .route("/webhook", post(webhook))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_reply::AiConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use base64::Engine;
    use hmac::{Hmac, Mac};
    use serde_json::{json, Value};
    use sha2::Sha256;
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    const MULTIPART_BOUNDARY: &str = "test-boundary";

    fn test_config(line_api_base_url: &str, db_path: std::path::PathBuf) -> ServiceConfig {
        ServiceConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            db_path,
            line_channel_access_token: Some("test-token".to_string()),
            line_channel_secret: None,
            line_api_base_url: line_api_base_url.to_string(),
            manager_line_user_id: None,
            upload_body_max_bytes: crate::service::DEFAULT_UPLOAD_BODY_MAX_BYTES,
            ai: AiConfig {
                api_key: None,
                api_url: "http://127.0.0.1:9".to_string(),
                model: "test".to_string(),
                enabled: true,
            },
        }
    }

    fn test_app(temp: &TempDir, config: ServiceConfig) -> (Router, Arc<BotStore>) {
        let config = Arc::new(config);
        let store = Arc::new(BotStore::new(temp.path().join("bot.db")).unwrap());
        let line = Arc::new(LineClient::new(
            config.line_channel_access_token.clone(),
            config.line_api_base_url.clone(),
        ));
        let replier = Arc::new(AiReplier::with_config(config.ai.clone()));
        let router = Arc::new(MessageRouter::new(
            store.clone(),
            line.clone(),
            replier,
            config.manager_line_user_id.clone(),
        ));
        let state = AppState {
            config,
            store: store.clone(),
            line,
            router,
        };
        (build_app(state), store)
    }

    fn app_in(temp: &TempDir, line_api_base_url: &str) -> (Router, Arc<BotStore>) {
        let config = test_config(line_api_base_url, temp.path().join("bot.db"));
        test_app(temp, config)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn multipart_request(filename: Option<&str>, contents: &str) -> Request<Body> {
        let disposition = match filename {
            Some(filename) => format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"",
                filename
            ),
            None => "Content-Disposition: form-data; name=\"other\"".to_string(),
        };
        let body = format!(
            "--{b}\r\n{disposition}\r\n\r\n{contents}\r\n--{b}--\r\n",
            b = MULTIPART_BOUNDARY
        );
        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", MULTIPART_BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoints_answer_ok() {
        let temp = TempDir::new().unwrap();
        let (app, _store) = app_in(&temp, "http://127.0.0.1:9");

        for uri in ["/", "/health"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn upload_without_file_part_is_rejected() {
        let temp = TempDir::new().unwrap();
        let (app, _store) = app_in(&temp, "http://127.0.0.1:9");

        let response = app.oneshot(multipart_request(None, "ignored")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "No file uploaded");
    }

    #[tokio::test]
    async fn upload_with_empty_filename_is_rejected() {
        let temp = TempDir::new().unwrap();
        let (app, _store) = app_in(&temp, "http://127.0.0.1:9");

        let response = app
            .oneshot(multipart_request(Some(""), "ignored"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["message"], "No file selected");
    }

    #[tokio::test]
    async fn upload_with_wrong_extension_is_rejected() {
        let temp = TempDir::new().unwrap();
        let (app, _store) = app_in(&temp, "http://127.0.0.1:9");

        let response = app
            .oneshot(multipart_request(Some("shifts.csv"), "a,b,c"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(
            body["message"],
            "Invalid file type. Please upload .xlsx or .xls files only."
        );
    }

    #[tokio::test]
    async fn send_messages_without_rows_is_rejected() {
        let temp = TempDir::new().unwrap();
        let (app, _store) = app_in(&temp, "http://127.0.0.1:9");

        let response = app
            .oneshot(json_request("/send_messages", json!({ "rows": [] })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["message"], "No data available. Please upload a file first.");
    }

    #[tokio::test]
    async fn send_messages_reports_the_dispatch_tally() {
        let temp = TempDir::new().unwrap();
        let (app, _store) = app_in(&temp, "http://127.0.0.1:9");

        // "Alice" has no directory entry, so the only send fails.
        let rows = json!({
            "rows": [{
                "employee_name": "Alice",
                "shift_date": "2024-01-01",
                "start_time": "09:00",
                "end_time": "17:00"
            }]
        });
        let response = app
            .oneshot(json_request("/send_messages", rows))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(
            body["message"],
            "Failed to send all 1 messages. Please check your LINE API configuration."
        );
        assert_eq!(body["errors"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn webhook_registers_a_sender_and_pushes_the_reply() {
        let temp = TempDir::new().unwrap();
        let mut server = mockito::Server::new_async().await;
        let push_mock = server
            .mock("POST", "/v2/bot/message/push")
            .match_header("authorization", "Bearer test-token")
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;
        let (app, store) = app_in(&temp, &server.url());

        let payload = json!({
            "events": [{
                "type": "message",
                "source": { "type": "user", "userId": "U1" },
                "message": { "type": "text", "id": "1", "text": "太郎" }
            }]
        });
        let response = app.oneshot(json_request("/webhook", payload)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(store.find_employee_name("U1").unwrap(), Some("太郎".to_string()));
        push_mock.assert_async().await;
    }

    #[tokio::test]
    async fn webhook_with_bad_signature_is_rejected_before_processing() {
        let temp = TempDir::new().unwrap();
        let mut config = test_config("http://127.0.0.1:9", temp.path().join("bot.db"));
        config.line_channel_secret = Some("channel-secret".to_string());
        let (app, store) = test_app(&temp, config);

        let payload = json!({
            "events": [{
                "type": "message",
                "source": { "type": "user", "userId": "U1" },
                "message": { "type": "text", "id": "1", "text": "太郎" }
            }]
        });
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .header("x-line-signature", "bm90LXRoZS1yaWdodC1zaWduYXR1cmU=")
            .body(Body::from(payload.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["status"], "invalid_signature");
        assert_eq!(store.find_employee_name("U1").unwrap(), None);
    }

    #[tokio::test]
    async fn webhook_with_valid_signature_is_processed() {
        let temp = TempDir::new().unwrap();
        let mut server = mockito::Server::new_async().await;
        let push_mock = server
            .mock("POST", "/v2/bot/message/push")
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;
        let mut config = test_config(&server.url(), temp.path().join("bot.db"));
        config.line_channel_secret = Some("channel-secret".to_string());
        let (app, _store) = test_app(&temp, config);

        let payload = json!({
            "events": [{
                "type": "message",
                "source": { "type": "user", "userId": "U1" },
                "message": { "type": "text", "id": "1", "text": "登録" }
            }]
        })
        .to_string();
        let mut mac = Hmac::<Sha256>::new_from_slice(b"channel-secret").unwrap();
        mac.update(payload.as_bytes());
        let signature =
            base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .header("x-line-signature", signature)
            .body(Body::from(payload))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        push_mock.assert_async().await;
    }

    #[tokio::test]
    async fn webhook_acks_a_malformed_body() {
        let temp = TempDir::new().unwrap();
        let (app, _store) = app_in(&temp, "http://127.0.0.1:9");

        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .body(Body::from("not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ignored");
    }

    #[tokio::test]
    async fn webhook_acks_an_event_batch_with_nothing_of_interest() {
        let temp = TempDir::new().unwrap();
        let (app, store) = app_in(&temp, "http://127.0.0.1:9");

        let payload = json!({
            "destination": "Ubot",
            "events": [
                { "type": "follow", "source": { "type": "user", "userId": "U1" } },
                {
                    "type": "message",
                    "source": { "type": "user", "userId": "U1" },
                    "message": { "type": "sticker", "id": "1" }
                }
            ]
        });
        let response = app.oneshot(json_request("/webhook", payload)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.find_employee_name("U1").unwrap(), None);
    }
}
