//! Defines routes for the drive's command interface.
//!
//! ## Structure
//! - **Health**
//!   - `GET    /healthz`, `GET /readyz`
//!
//! - **Identity**
//!   - `POST   /api/auth/sign-in` — email + password
//!   - `POST   /api/auth/sign-up` — create account and sign in
//!   - `POST   /api/auth/provider` — federated sign-in
//!   - `POST   /api/auth/sign-out`
//!
//! - **Drive**
//!   - `GET    /api/drive` — session snapshot (files, mode, quota, sync status)
//!   - `GET    /api/drive/events` — server-sent events
//!   - `PUT    /api/mode` — change storage mode
//!   - `POST   /api/files` — multipart upload
//!   - `GET    /api/files/{id}` — download
//!   - `DELETE /api/files/{id}` — delete record (cloud copy stays)
//!   - `GET    /api/files/{id}/share` — cloud URL

use crate::{
    handlers::{
        auth_handlers::{sign_in, sign_in_with_provider, sign_out, sign_up},
        file_handlers::{
            delete_file, download_file, events, set_mode, share_file, snapshot, upload_files,
        },
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};

/// Build the router for all drive routes.
///
/// `max_upload_bytes` bounds the body of a single upload request.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // identity
        .route("/api/auth/sign-in", post(sign_in))
        .route("/api/auth/sign-up", post(sign_up))
        .route("/api/auth/provider", post(sign_in_with_provider))
        .route("/api/auth/sign-out", post(sign_out))
        // drive
        .route("/api/drive", get(snapshot))
        .route("/api/drive/events", get(events))
        .route("/api/mode", put(set_mode))
        .route(
            "/api/files",
            post(upload_files).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/api/files/{id}", get(download_file).delete(delete_file))
        .route("/api/files/{id}/share", get(share_file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::storage_mode::StorageMode,
        services::{
            blob_store::fake::FakeBlobStore,
            drive_service::DriveService,
            identity::SqliteIdentityProvider,
            quota_ledger::Capacities,
            record_store::{SqliteRecordStore, memory_pool},
        },
    };
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode, header},
    };
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "drive-test-boundary";

    async fn app() -> Router {
        let db = memory_pool().await;
        let drive = DriveService::new(
            Arc::new(SqliteRecordStore::new(db.clone())),
            Arc::new(FakeBlobStore::default()),
            Capacities::default(),
            StorageMode::Dual,
        );
        let state = AppState {
            identity: Arc::new(SqliteIdentityProvider::new(db.clone())),
            db,
            drive,
            remote_configured: true,
        };
        routes(1024 * 1024).with_state(state)
    }

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn upload_request(name: &str, content: &str) -> Request<Body> {
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\n\
             Content-Type: text/plain\r\n\r\n{content}\r\n--{b}--\r\n",
            b = BOUNDARY,
        );
        Request::builder()
            .method(Method::POST)
            .uri("/api/files")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn sign_up(app: &Router) {
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/auth/sign-up",
                json!({"email": "alice@example.com", "password": "secret1", "display_name": "Alice"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let response = app().await.oneshot(get("/healthz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn drive_requires_a_session() {
        let response = app().await.oneshot(get("/api/drive")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn weak_password_reports_provider_code() {
        let response = app()
            .await
            .oneshot(json_request(
                Method::POST,
                "/api/auth/sign-up",
                json!({"email": "bob@example.com", "password": "123", "display_name": "Bob"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "auth/weak-password");
        assert_eq!(body["error"], "Password must be at least 6 characters!");
    }

    #[tokio::test]
    async fn upload_then_list_download_and_share() {
        let app = app().await;
        sign_up(&app).await;

        let response = app
            .clone()
            .oneshot(upload_request("notes.txt", "hello drive"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report = body_json(response).await;
        assert_eq!(report["aborted"], false);
        assert_eq!(report["outcomes"][0]["status"], "stored");
        let id = report["outcomes"][0]["id"].as_str().unwrap().to_string();

        let snapshot = body_json(app.clone().oneshot(get("/api/drive")).await.unwrap()).await;
        assert_eq!(snapshot["mode"], "dual");
        assert_eq!(snapshot["files"][0]["name"], "notes.txt");
        assert_eq!(snapshot["files"][0]["destinations"], json!(["local", "cloud"]));

        let response = app
            .clone()
            .oneshot(get(&format!("/api/files/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"hello drive");

        let share = body_json(
            app.clone()
                .oneshot(get(&format!("/api/files/{}/share", id)))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(share["url"], "https://blobs.test/notes.txt");
    }

    #[tokio::test]
    async fn set_mode_and_delete() {
        let app = app().await;
        sign_up(&app).await;

        let response = app
            .clone()
            .oneshot(json_request(Method::PUT, "/api/mode", json!({"mode": "local"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let mode = body_json(response).await;
        assert_eq!(mode["mode"], "local");
        assert_eq!(mode["label"], "Local Only");

        let report = body_json(
            app.clone()
                .oneshot(upload_request("a.txt", "abc"))
                .await
                .unwrap(),
        )
        .await;
        let id = report["outcomes"][0]["id"].as_str().unwrap().to_string();

        let share = app
            .clone()
            .oneshot(get(&format!("/api/files/{}/share", id)))
            .await
            .unwrap();
        assert_eq!(share.status(), StatusCode::CONFLICT);

        let delete = Request::builder()
            .method(Method::DELETE)
            .uri(format!("/api/files/{}", id))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(delete).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let missing = app
            .clone()
            .oneshot(get(&format!("/api/files/{}", id)))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_mode_is_rejected() {
        let app = app().await;
        sign_up(&app).await;
        let response = app
            .oneshot(json_request(Method::PUT, "/api/mode", json!({"mode": "both"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
