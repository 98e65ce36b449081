//! Device registration tests against a local device API

use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use secrecy::SecretString;
use serde_json::Value;

use assist_client::Error;
use assist_client::config::{DeviceRegistrar, DeviceSetup};

#[derive(Debug, Clone)]
struct Registration {
    project: String,
    authorization: Option<String>,
    body: Value,
}

type Seen = Arc<Mutex<Vec<Registration>>>;

async fn register_device(
    State(seen): State<Seen>,
    Path(project): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    seen.lock().unwrap().push(Registration {
        project,
        authorization,
        body,
    });
    StatusCode::OK
}

/// Start a device API answering with `status` after recording the request
async fn device_api(status: StatusCode) -> (String, Seen) {
    let seen = Seen::default();
    let app = if status == StatusCode::OK {
        Router::new()
            .route("/projects/{project}/devices", post(register_device))
            .with_state(Arc::clone(&seen))
    } else {
        Router::new().route(
            "/projects/{project}/devices",
            post(move || async move { (status, "model not found") }),
        )
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    (url, seen)
}

fn token() -> SecretString {
    SecretString::from(String::from("test-token"))
}

#[tokio::test]
async fn registers_and_saves_identity() {
    let (url, seen) = device_api(StatusCode::OK).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("assistant").join("device_config.json");

    let registrar = DeviceRegistrar::new(format!("{url}/"));
    let identity = registrar
        .register(&token(), "my-project", "model-1", &path)
        .await
        .unwrap();

    assert_eq!(identity.model_id, "model-1");
    assert!(uuid::Uuid::parse_str(&identity.id).is_ok());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].project, "my-project");
    assert_eq!(seen[0].authorization.as_deref(), Some("Bearer test-token"));
    assert_eq!(seen[0].body["id"], identity.id.as_str());
    assert_eq!(seen[0].body["model_id"], "model-1");
    assert_eq!(seen[0].body["client_type"], "SDK_SERVICE");

    // The saved file resolves without registering again
    let setup = DeviceSetup::resolve(None, None, None, &path).unwrap();
    assert_eq!(setup, DeviceSetup::Registered(identity));
}

#[tokio::test]
async fn unregistered_setup_registers_on_resolution() {
    let (url, seen) = device_api(StatusCode::OK).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("device_config.json");

    let setup = DeviceSetup::resolve(
        None,
        Some("model-1".to_string()),
        Some("my-project".to_string()),
        &path,
    )
    .unwrap();
    let identity = setup
        .into_identity(&DeviceRegistrar::new(url), &token())
        .await
        .unwrap();

    assert_eq!(seen.lock().unwrap().len(), 1);
    assert!(path.exists());
    assert_eq!(identity.model_id, "model-1");
}

#[tokio::test]
async fn rejected_registration_leaves_no_file() {
    let (url, _) = device_api(StatusCode::NOT_FOUND).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("device_config.json");

    let err = DeviceRegistrar::new(url)
        .register(&token(), "my-project", "model-1", &path)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Registration(ref m) if m.contains("model not found")));
    assert!(!path.exists());
}
