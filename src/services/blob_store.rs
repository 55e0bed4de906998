//! Remote Blob Store: uploads raw bytes to a hosted object service and returns
//! a retrievable URL plus the service's object identifier.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::io;
use thiserror::Error;
use tracing::debug;

/// Size of the chunks handed to the transport; progress is reported per chunk.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("upload rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("upload response missing `{0}`")]
    MalformedResponse(&'static str),
    #[error("remote store is not configured")]
    NotConfigured,
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Location of an uploaded blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteObject {
    pub url: String,
    pub object_id: String,
}

/// Callback receiving integer upload progress, 0 to 100.
pub type ProgressFn<'a> = dyn Fn(u8) + Send + Sync + 'a;

#[async_trait]
pub trait RemoteBlobStore: Send + Sync {
    async fn upload(
        &self,
        name: &str,
        mime_type: &str,
        bytes: Bytes,
        on_progress: &ProgressFn<'_>,
    ) -> BlobResult<RemoteObject>;
}

/// Upload endpoint settings.
#[derive(Clone, Debug)]
pub struct HttpBlobConfig {
    /// Full URL of the upload endpoint, e.g. `https://api.example.com/v1_1/{cloud}/auto/upload`.
    pub upload_url: Option<String>,
    /// Unsigned upload preset sent with every upload.
    pub upload_preset: String,
}

/// Multipart-over-HTTP blob store.
///
/// Posts `file` and `upload_preset` fields and expects a JSON response with
/// `secure_url` and `public_id`. Any non-2xx status is a failed upload.
#[derive(Clone)]
pub struct HttpBlobStore {
    client: reqwest::Client,
    config: HttpBlobConfig,
}

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    public_id: Option<String>,
}

impl HttpBlobStore {
    pub fn new(config: HttpBlobConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.upload_url.is_some()
    }
}

#[async_trait]
impl RemoteBlobStore for HttpBlobStore {
    async fn upload(
        &self,
        name: &str,
        mime_type: &str,
        bytes: Bytes,
        on_progress: &ProgressFn<'_>,
    ) -> BlobResult<RemoteObject> {
        let url = self
            .config
            .upload_url
            .as_deref()
            .ok_or(BlobError::NotConfigured)?;

        let total = bytes.len() as u64;
        let mut progress = Progress::new(on_progress);

        // The body is pulled chunk by chunk while the request runs; collect the
        // running byte counts so progress can be replayed in order on the
        // caller's side.
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<u64>();
        let chunks: Vec<Bytes> = chunk_bytes(&bytes, UPLOAD_CHUNK_SIZE);
        let body_stream = stream::iter(chunks.into_iter().scan(0u64, move |sent, chunk| {
            *sent += chunk.len() as u64;
            let _ = tx.send(*sent);
            Some(Ok::<Bytes, io::Error>(chunk))
        }));

        let part = Part::stream_with_length(reqwest::Body::wrap_stream(body_stream), total)
            .file_name(name.to_string())
            .mime_str(mime_type)?;
        let form = Form::new()
            .part("file", part)
            .text("upload_preset", self.config.upload_preset.clone());

        let request = self.client.post(url).multipart(form).send();
        tokio::pin!(request);

        let response = loop {
            tokio::select! {
                biased;
                Some(sent) = rx.recv() => progress.advance(percent(sent, total)),
                response = &mut request => break response?,
            }
        };
        while let Ok(sent) = rx.try_recv() {
            progress.advance(percent(sent, total));
        }

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(BlobError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: UploadResponse = response.json().await?;
        let url = parsed
            .secure_url
            .ok_or(BlobError::MalformedResponse("secure_url"))?;
        let object_id = parsed
            .public_id
            .ok_or(BlobError::MalformedResponse("public_id"))?;
        progress.advance(100);

        debug!(%object_id, "remote upload complete");
        Ok(RemoteObject { url, object_id })
    }
}

/// Forwards progress to the callback, starting at 0 and only when it rises.
struct Progress<'a> {
    on_progress: &'a ProgressFn<'a>,
    last: u8,
}

impl<'a> Progress<'a> {
    fn new(on_progress: &'a ProgressFn<'a>) -> Self {
        on_progress(0);
        Self {
            on_progress,
            last: 0,
        }
    }

    fn advance(&mut self, percent: u8) {
        if percent > self.last {
            self.last = percent;
            (self.on_progress)(percent);
        }
    }
}

fn chunk_bytes(bytes: &Bytes, size: usize) -> Vec<Bytes> {
    let mut chunks = Vec::with_capacity(bytes.len() / size + 1);
    let mut offset = 0;
    while offset < bytes.len() {
        let end = (offset + size).min(bytes.len());
        chunks.push(bytes.slice(offset..end));
        offset = end;
    }
    chunks
}

/// Integer percentage of `sent` over `total`; an empty body is complete.
pub fn percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((sent.min(total) as f64 / total as f64) * 100.0).round() as u8
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::Multipart,
        http::StatusCode,
        routing::post,
    };
    use serde_json::{Value, json};
    use std::sync::Mutex;

    #[test]
    fn percent_rounds_and_clamps() {
        assert_eq!(percent(0, 200), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(500, 200), 100);
        assert_eq!(percent(0, 0), 100);
    }

    #[test]
    fn chunking_covers_every_byte() {
        let bytes = Bytes::from(vec![7u8; 10]);
        let chunks = chunk_bytes(&bytes, 4);
        assert_eq!(chunks.iter().map(Bytes::len).collect::<Vec<_>>(), vec![4, 4, 2]);
        assert!(chunk_bytes(&Bytes::new(), 4).is_empty());
    }

    async fn serve(router: Router) -> HttpBlobStore {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        HttpBlobStore::new(HttpBlobConfig {
            upload_url: Some(format!("http://{}/upload", addr)),
            upload_preset: "ml_default".into(),
        })
    }

    /// Echoes the received fields back as `secure_url` and `public_id`.
    async fn accept(mut multipart: Multipart) -> Json<Value> {
        let mut name = String::new();
        let mut preset = String::new();
        let mut len = 0;
        while let Some(field) = multipart.next_field().await.unwrap() {
            let field_name = field.name().map(str::to_string);
            match field_name.as_deref() {
                Some("file") => {
                    name = field.file_name().unwrap_or_default().to_string();
                    len = field.bytes().await.unwrap().len();
                }
                Some("upload_preset") => preset = field.text().await.unwrap(),
                _ => {}
            }
        }
        Json(json!({
            "secure_url": format!("https://blobs.example/{}", name),
            "public_id": format!("{}/{}", preset, len),
        }))
    }

    #[tokio::test]
    async fn upload_posts_multipart_and_reads_location() {
        let store = serve(Router::new().route("/upload", post(accept))).await;
        let seen = Mutex::new(Vec::new());
        let on_progress = |p: u8| seen.lock().unwrap().push(p);

        let remote = store
            .upload(
                "photo.jpg",
                "image/jpeg",
                Bytes::from(vec![3u8; 300 * 1024]),
                &on_progress,
            )
            .await
            .unwrap();

        assert_eq!(
            remote,
            RemoteObject {
                url: "https://blobs.example/photo.jpg".into(),
                object_id: format!("ml_default/{}", 300 * 1024),
            }
        );
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "progress {:?}", seen);
    }

    #[tokio::test]
    async fn non_success_status_is_rejected() {
        let router = Router::new().route(
            "/upload",
            post(|| async { (StatusCode::BAD_REQUEST, "nope") }),
        );
        let store = serve(router).await;

        let err = store
            .upload("a.txt", "text/plain", Bytes::from_static(b"abc"), &|_| {})
            .await
            .unwrap_err();
        assert!(
            matches!(&err, BlobError::Rejected { status: 400, body } if body == "nope"),
            "unexpected error {:?}",
            err
        );
    }

    #[tokio::test]
    async fn response_without_object_id_is_malformed() {
        let router = Router::new().route(
            "/upload",
            post(|| async { Json(json!({ "secure_url": "https://blobs.example/a.txt" })) }),
        );
        let store = serve(router).await;

        let err = store
            .upload("a.txt", "text/plain", Bytes::from_static(b"abc"), &|_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::MalformedResponse("public_id")));
    }

    #[test]
    fn progress_only_reports_increases() {
        let seen = Mutex::new(Vec::new());
        let on_progress = |p: u8| seen.lock().unwrap().push(p);
        let mut progress = Progress::new(&on_progress);
        for p in [0, 40, 40, 100, 100] {
            progress.advance(p);
        }
        drop(progress);
        assert_eq!(seen.into_inner().unwrap(), vec![0, 40, 100]);
    }

    #[tokio::test]
    async fn unconfigured_store_refuses_uploads() {
        let store = HttpBlobStore::new(HttpBlobConfig {
            upload_url: None,
            upload_preset: "ml_default".into(),
        });
        assert!(!store.is_configured());
        let err = store
            .upload("a.txt", "text/plain", Bytes::from_static(b"a"), &|_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::NotConfigured));
    }
}
