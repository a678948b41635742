//! HTTP client for the analysis service.

use std::{error::Error, fmt, future::Future, io, path::Path, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use async_stream::stream;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use common::{
    data::{AnalysisResult, VideoFile},
    payloads::{AnalysisRequest, UploadResponse},
};
use futures_util::Stream;
use log::{debug, error, warn};
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE},
    multipart::{Form, Part},
    Body, Client, RequestBuilder,
};
use serde::de::DeserializeOwned;
use tokio::{io::AsyncReadExt, select, sync::watch};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::credentials::CredentialProvider;

#[derive(Clone, Debug)]
pub enum ApiError {
    ReqwestError(String),
    BadStatusCode(u16, String),
    JsonDecodeError(String),
    Credentials(String),
    BadUrl(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReqwestError(s) => write!(f, "reqwest error: {s}"),
            Self::BadStatusCode(s, body) if body.is_empty() => write!(f, "bad status code {s}"),
            Self::BadStatusCode(s, body) => write!(f, "bad status code {s}: {body}"),
            Self::JsonDecodeError(s) => write!(f, "json decode error: {s}"),
            Self::Credentials(s) => write!(f, "could not read credentials: {s}"),
            Self::BadUrl(s) => write!(f, "bad url: {s}"),
        }
    }
}

impl Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(value: reqwest::Error) -> Self {
        Self::ReqwestError(format!("{}", value))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        Self::JsonDecodeError(value.to_string())
    }
}

/// The four calls the rest of the client makes against the service.
#[async_trait]
pub trait VideoApi: Send + Sync {
    /// Sends the file as multipart field `video`. The cumulative number of
    /// bytes handed to the transport is published on `progress`.
    async fn upload_video(
        &self,
        path: &Path,
        video: &VideoFile,
        progress: watch::Sender<u64>,
    ) -> Result<UploadResponse>;

    async fn start_analysis(&self, request: &AnalysisRequest) -> Result<AnalysisResult>;

    async fn get_analysis_status(&self, analysis_id: &str) -> Result<AnalysisResult>;

    async fn get_analysis_results(&self, video_id: &str) -> Result<Vec<AnalysisResult>>;
}

/// Runs `fut` unless `cancel` fires first. Dropping the request closes its
/// connection.
pub async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    select! {
        biased;
        _ = cancel.cancelled() => Err(anyhow!("cancelled")),
        r = fut => r,
    }
}

/// Decodes a listing record by record. Records that do not decode are
/// logged and left out instead of failing the whole listing.
fn decode_listing(records: Vec<serde_json::Value>) -> Vec<AnalysisResult> {
    records
        .into_iter()
        .filter_map(|record| match serde_json::from_value::<AnalysisResult>(record) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!("skipping analysis record: {e}");
                None
            }
        })
        .collect()
}

const CHUNK_SIZE: usize = 256 * 1024;

/// Streams a file in chunks, publishing the running byte count as each
/// chunk leaves.
fn read_with_progress(
    mut file: tokio::fs::File,
    progress: watch::Sender<u64>,
) -> impl Stream<Item = io::Result<Bytes>> {
    stream! {
        let mut sent: u64 = 0;
        loop {
            let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
            match file.read_buf(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    sent += n as u64;
                    progress.send_replace(sent);
                    yield Ok(buf.freeze());
                }
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    }
}

pub struct ApiClient {
    client: Client,
    base_url: Url,
    credentials: Arc<dyn CredentialProvider>,
    /// Applies to the JSON calls; uploads run as long as the transfer takes.
    timeout: Duration,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        credentials: Arc<dyn CredentialProvider>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .user_agent(concat!("videlizer/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .build()?;
        let base_url = Url::parse(base_url).map_err(|e| ApiError::BadUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::BadUrl(base_url.to_string()).into());
        }
        Ok(Self {
            client,
            base_url,
            credentials,
            timeout,
        })
    }

    /// Appends path segments to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::BadUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        let token = self
            .credentials
            .token()
            .await
            .map_err(|e| ApiError::Credentials(e.to_string()))?;
        Ok(match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }

    /// Processes a response from the server: checks the status code and decodes the body.
    async fn process_response<Resp: DeserializeOwned>(
        input: reqwest::Result<reqwest::Response>,
    ) -> Result<Resp, ApiError> {
        let res = input?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::BadStatusCode(status.as_u16(), body));
        }
        let text = res.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn execute<Resp: DeserializeOwned>(
        &self,
        what: &str,
        request: Result<RequestBuilder, ApiError>,
    ) -> Result<Resp> {
        let result = match request {
            Ok(request) => match self.authorize(request).await {
                Ok(request) => Self::process_response(request.send().await).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        result.map_err(|e| {
            error!("API error ({what}): {e}");
            e.into()
        })
    }

    fn get(&self, segments: &[&str]) -> Result<RequestBuilder, ApiError> {
        let url = self.endpoint(segments)?;
        debug!("GET {url}");
        Ok(self.client.get(url).timeout(self.timeout))
    }

    /// `GET /`: whether the service answers with a success status.
    pub async fn health(&self) -> Result<bool> {
        let url = self.base_url.clone();
        debug!("GET {url}");
        match self.client.get(url).timeout(self.timeout).send().await {
            Ok(res) => Ok(res.status().is_success()),
            Err(e) => {
                error!("API error (health): {e}");
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl VideoApi for ApiClient {
    async fn upload_video(
        &self,
        path: &Path,
        video: &VideoFile,
        progress: watch::Sender<u64>,
    ) -> Result<UploadResponse> {
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            error!("API error (upload): could not open {}: {e}", path.display());
            e
        })?;
        let body = Body::wrap_stream(read_with_progress(file, progress));
        let request = self.endpoint(&["api", "videos", "upload"]).and_then(|url| {
            debug!("POST {url} ({} bytes)", video.size);
            let part = Part::stream_with_length(body, video.size)
                .file_name(video.name.clone())
                .mime_str(&video.content_type)?;
            Ok(self.client.post(url).multipart(Form::new().part("video", part)))
        });
        self.execute("upload", request).await
    }

    async fn start_analysis(&self, request: &AnalysisRequest) -> Result<AnalysisResult> {
        let builder = self.endpoint(&["api", "videos", "analyze"]).map(|url| {
            debug!("POST {url}");
            self.client.post(url).timeout(self.timeout).json(request)
        });
        self.execute("start analysis", builder).await
    }

    async fn get_analysis_status(&self, analysis_id: &str) -> Result<AnalysisResult> {
        self.execute("analysis status", self.get(&["api", "analysis", analysis_id]))
            .await
    }

    async fn get_analysis_results(&self, video_id: &str) -> Result<Vec<AnalysisResult>> {
        let records = self
            .execute(
                "analysis results",
                self.get(&["api", "videos", video_id, "analysis"]),
            )
            .await?;
        Ok(decode_listing(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{NoCredentials, StaticToken};
    use common::payloads::AnalysisOptions;
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn client(server: &MockServer, credentials: Arc<dyn CredentialProvider>) -> ApiClient {
        ApiClient::new(&server.uri(), credentials, Duration::from_secs(5)).unwrap()
    }

    fn record(id: &str, status: &str) -> serde_json::Value {
        json!({
            "id": id,
            "videoId": "v-1",
            "status": status,
            "progress": 0,
            "createdAt": "2024-01-01T00:00:00Z"
        })
    }

    #[tokio::test]
    async fn attaches_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/videos/v-1/analysis"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                record("a1", "pending"),
                record("a2", "processing"),
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let api = client(&server, Arc::new(StaticToken::new("secret")));
        let results = api.get_analysis_results("v-1").await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].id(), "a2");
    }

    #[tokio::test]
    async fn omits_authorization_without_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/analysis/a1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(record("a1", "pending")))
            .mount(&server)
            .await;

        let api = client(&server, Arc::new(NoCredentials));
        let result = api.get_analysis_status("a1").await.unwrap();
        assert_eq!(result.id(), "a1");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].headers.get("authorization").is_none());
        assert_eq!(
            requests[0].headers.get("content-type").unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn start_analysis_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/videos/analyze"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({"videoId": "v-1", "options": {"language": "en"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(record("a9", "processing")))
            .expect(1)
            .mount(&server)
            .await;

        let api = client(&server, Arc::new(NoCredentials));
        let options = AnalysisOptions {
            language: Some("en".to_string()),
            ..Default::default()
        };
        let result = api
            .start_analysis(&AnalysisRequest::new("v-1", options))
            .await
            .unwrap();
        assert_eq!(result.id(), "a9");
    }

    #[tokio::test]
    async fn failures_are_passed_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/analysis/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/analysis/garbled"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"id\":"))
            .mount(&server)
            .await;

        let api = client(&server, Arc::new(NoCredentials));
        let err = api.get_analysis_status("missing").await.unwrap_err();
        assert!(err.to_string().contains("404"), "{err}");
        let err = api.get_analysis_status("garbled").await.unwrap_err();
        assert!(err.to_string().contains("json decode error"), "{err}");
    }

    #[tokio::test]
    async fn upload_streams_multipart_and_reports_progress() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/videos/upload"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"success": true, "videoId": "v-42"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("clip.mp4");
        let contents = vec![7u8; 3 * CHUNK_SIZE + 10];
        std::fs::write(&file_path, &contents).unwrap();
        let video = VideoFile {
            id: "local".to_string(),
            name: "clip.mp4".to_string(),
            size: contents.len() as u64,
            content_type: "video/mp4".to_string(),
            last_modified: 0,
            preview: None,
        };

        let api = client(&server, Arc::new(StaticToken::new("secret")));
        let (sender, receiver) = watch::channel(0u64);
        let response = api.upload_video(&file_path, &video, sender).await.unwrap();
        assert_eq!(response.into_result(), Ok("v-42".to_string()));
        assert_eq!(*receiver.borrow(), contents.len() as u64);

        let requests = server.received_requests().await.unwrap();
        let request = &requests[0];
        let content_type = request.headers.get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.starts_with("multipart/form-data"), "{content_type}");
        assert_eq!(request.headers.get("authorization").unwrap(), "Bearer secret");
        let body = String::from_utf8_lossy(&request.body);
        assert!(body.contains("name=\"video\""));
        assert!(body.contains("filename=\"clip.mp4\""));
        assert!(body.contains("Content-Type: video/mp4"));
    }

    #[test]
    fn endpoints_keep_base_path_and_encode_ids() {
        let api = ApiClient::new(
            "http://localhost:8080/service/",
            Arc::new(NoCredentials),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            api.endpoint(&["api", "videos", "a b/c", "analysis"]).unwrap().as_str(),
            "http://localhost:8080/service/api/videos/a%20b%2Fc/analysis"
        );
        assert!(ApiClient::new("not a url", Arc::new(NoCredentials), Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn bad_records_do_not_hide_the_rest() {
        let server = MockServer::start().await;
        let mut naive = record("a3", "processing");
        naive["createdAt"] = json!("2024-01-01T12:00:00.123456");
        Mock::given(method("GET"))
            .and(path("/api/videos/v-1/analysis"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                record("a1", "pending"),
                record("bad", "error"),
                naive,
                "not a record",
            ])))
            .mount(&server)
            .await;

        let api = client(&server, Arc::new(NoCredentials));
        let results = api.get_analysis_results("v-1").await.unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.id()).collect();
        assert_eq!(ids, ["a1", "a3"]);
        assert_eq!(
            results[1].created_at().to_rfc3339(),
            "2024-01-01T12:00:00.123456+00:00"
        );
    }

    #[tokio::test]
    async fn cancelling_abandons_a_slow_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/analysis/a1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(record("a1", "pending"))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let api = client(&server, Arc::new(NoCredentials));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(3),
            cancellable(&cancel, api.get_analysis_status("a1")),
        )
        .await
        .expect("request kept running after cancellation");
        assert_eq!(outcome.unwrap_err().to_string(), "cancelled");
    }
}
