use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::error;
use serde::Deserialize;

use crate::domain::{model::ViewModel, store::SaveOutcome, ProfileService, TestRequest};

type SharedService = State<Arc<ProfileService>>;

pub fn router(service: ProfileService) -> Router {
    Router::new()
        .route("/profiles", get(list_profiles).put(save_profile))
        .route("/profiles/:name", get(get_profile).delete(delete_profile))
        .route("/settings", get(export_settings).post(import_settings))
        .route("/check", post(check_connection))
        .route("/tests", post(create_test))
        .route("/tests/:id", get(query_test).delete(cancel_test))
        .route("/tests/:id/start", post(start_test))
        .route("/tests/:id/logs", get(test_logs))
        .with_state(Arc::new(service))
}

fn internal_error(operation: &str, e: anyhow::Error) -> (StatusCode, String) {
    error!("Error during {} {:?}", operation, e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Something went wrong: {e}"),
    )
}

async fn list_profiles(State(service): SharedService) -> impl IntoResponse {
    Json(service.list_profiles().await)
}

async fn get_profile(State(service): SharedService, Path(name): Path<String>) -> impl IntoResponse {
    service
        .get_profile(&name)
        .await
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, format!("Profile {} does not exist", name)))
}

#[derive(Deserialize)]
struct SaveParams {
    previous: Option<String>,
}

async fn save_profile(
    State(service): SharedService,
    Query(params): Query<SaveParams>,
    Json(model): Json<ViewModel>,
) -> Response {
    match service.save_profile(&model, params.previous.as_deref()).await {
        Ok(SaveOutcome::Saved { report, .. }) => (StatusCode::OK, Json(report)).into_response(),
        Ok(SaveOutcome::Rejected(report)) => (StatusCode::UNPROCESSABLE_ENTITY, Json(report)).into_response(),
        Err(e) => internal_error("save_profile", e).into_response(),
    }
}

async fn delete_profile(State(service): SharedService, Path(name): Path<String>) -> Response {
    if service.get_profile(&name).await.is_none() {
        return (StatusCode::NOT_FOUND, format!("Profile {} does not exist", name)).into_response();
    }
    service
        .delete_profile(&name)
        .await
        .map(|_| (StatusCode::OK, "Profile deleted"))
        .map_err(|e| internal_error("delete_profile", e))
        .into_response()
}

async fn export_settings(State(service): SharedService) -> impl IntoResponse {
    service
        .export_settings()
        .await
        .map(|serialized| ([(header::CONTENT_TYPE, "application/json")], serialized))
        .map_err(|e| internal_error("export_settings", e))
}

async fn import_settings(State(service): SharedService, body: String) -> impl IntoResponse {
    service
        .import_settings(&body)
        .await
        .map(|count| (StatusCode::OK, format!("{} profiles imported", count)))
        .map_err(|e| {
            error!("Error during import_settings {:?}", e);
            (StatusCode::BAD_REQUEST, format!("Invalid settings: {e:#}"))
        })
}

async fn check_connection(State(service): SharedService) -> impl IntoResponse {
    Json(service.check_connection().await)
}

async fn create_test(State(service): SharedService, Json(model): Json<ViewModel>) -> Response {
    match service.create_test(&model).await {
        Ok(TestRequest::Created(status)) => (StatusCode::CREATED, Json(status)).into_response(),
        Ok(TestRequest::Rejected(report)) => (StatusCode::UNPROCESSABLE_ENTITY, Json(report)).into_response(),
        Err(e) => internal_error("create_test", e).into_response(),
    }
}

/// 404 when no test with this id was created.
async fn known_test(service: &ProfileService, id: &str) -> Result<(), (StatusCode, String)> {
    service
        .tests
        .query(id)
        .await
        .map(|_| ())
        .map_err(|e| (StatusCode::NOT_FOUND, format!("{e}")))
}

async fn start_test(State(service): SharedService, Path(id): Path<String>) -> Response {
    if let Err(not_found) = known_test(&service, &id).await {
        return not_found.into_response();
    }
    service
        .tests
        .start(&id)
        .await
        .map(Json)
        .map_err(|e| internal_error("start_test", e))
        .into_response()
}

async fn query_test(State(service): SharedService, Path(id): Path<String>) -> impl IntoResponse {
    service
        .tests
        .query(&id)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::NOT_FOUND, format!("{e}")))
}

async fn test_logs(State(service): SharedService, Path(id): Path<String>) -> Response {
    if let Err(not_found) = known_test(&service, &id).await {
        return not_found.into_response();
    }
    service
        .tests
        .logs(&id)
        .await
        .map(Json)
        .map_err(|e| internal_error("test_logs", e))
        .into_response()
}

async fn cancel_test(State(service): SharedService, Path(id): Path<String>) -> Response {
    if let Err(not_found) = known_test(&service, &id).await {
        return not_found.into_response();
    }
    service
        .tests
        .cancel(&id)
        .await
        .map(Json)
        .map_err(|e| internal_error("cancel_test", e))
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        check::ConnectionChecker,
        fake::{FakeDaemon, MemoryRepository},
        model::SchemaVariant,
        store::ProfileStore,
        test_run::TestRunner,
    };
    use axum::{body::Body, http::Request};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    fn app() -> Router {
        let daemon = Arc::new(FakeDaemon::default());
        router(ProfileService {
            store: Mutex::new(ProfileStore::new(SchemaVariant::Container)),
            repository: Box::new(MemoryRepository::default()),
            checker: ConnectionChecker::new(daemon.clone()),
            tests: TestRunner::new(daemon, Duration::from_millis(10)),
        })
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::String(String::from_utf8_lossy(&bytes).to_string()));
        (status, body)
    }

    #[tokio::test]
    async fn profile_lifecycle() {
        let app = app();
        let (status, _) = send(&app, "PUT", "/profiles", Some(json!({"Profile": "p", "Image": "alpine"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(send(&app, "GET", "/profiles", None).await, (StatusCode::OK, json!(["p"])));
        let (status, model) = send(&app, "GET", "/profiles/p", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(model["Image"], json!("alpine"));

        let (status, _) = send(&app, "PUT", "/profiles?previous=p", Some(json!({"Profile": "q", "Image": "alpine"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(send(&app, "GET", "/profiles", None).await, (StatusCode::OK, json!(["q"])));

        assert_eq!(send(&app, "DELETE", "/profiles/q", None).await.0, StatusCode::OK);
        assert_eq!(send(&app, "DELETE", "/profiles/q", None).await.0, StatusCode::NOT_FOUND);
        assert_eq!(send(&app, "GET", "/profiles/q", None).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_profile_is_unprocessable() {
        let app = app();
        let (status, report) = send(&app, "PUT", "/profiles", Some(json!({"Image": "alpine"}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(report["errors"][0]["field"], json!("Profile"));
        assert_eq!(send(&app, "GET", "/profiles", None).await.1, json!([]));
    }

    #[tokio::test]
    async fn settings_export_and_import() {
        let app = app();
        let imported = json!([{"Administration": {"Version": 4, "Profile": "i"}, "Container": {"Image": "alpine"}}]);
        let (status, _) = send(&app, "POST", "/settings", Some(imported)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, exported) = send(&app, "GET", "/settings", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(exported[0]["Administration"]["Profile"], json!("i"));

        let request = Request::builder()
            .method("POST")
            .uri("/settings")
            .body(Body::from("{not json"))
            .unwrap();
        assert_eq!(app.clone().oneshot(request).await.unwrap().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn connection_check_reports_version() {
        let (status, outcome) = send(&app(), "POST", "/check", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome, json!({"outcome": "connected", "version": "27.1.0"}));
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let app = app();
        let (status, _) = send(&app, "POST", "/tests", Some(json!({"Image": "alpine"}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, created) = send(&app, "POST", "/tests", Some(json!({"Profile": "p", "Image": "alpine"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap().to_string();

        let (status, started) = send(&app, "POST", &format!("/tests/{}/start", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(started["phase"], json!("running"));
        let (status, logs) = send(&app, "GET", &format!("/tests/{}/logs", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(logs, json!(["container-1 started"]));
        assert_eq!(send(&app, "GET", &format!("/tests/{}", id), None).await.0, StatusCode::OK);
        assert_eq!(send(&app, "DELETE", &format!("/tests/{}", id), None).await.0, StatusCode::OK);

        for (method, uri) in [
            ("GET", format!("/tests/{}", id)),
            ("POST", "/tests/unknown/start".to_string()),
            ("GET", "/tests/unknown/logs".to_string()),
            ("DELETE", "/tests/unknown".to_string()),
        ] {
            assert_eq!(send(&app, method, &uri, None).await.0, StatusCode::NOT_FOUND, "{} {}", method, uri);
        }
    }
}
