//! HTTP side of the engine: capability probe and append-only body streaming.

use futures::TryStreamExt;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, COOKIE, RANGE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

use crate::error::{FetchError, ProbeError};
use crate::progress::ProgressHandle;
use crate::segment::Segment;

/// What a metadata request tells us about a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub total_size: u64,
    pub range_supported: bool,
}

/// Issues authenticated requests against the hosting service. Cheap to clone;
/// every segment task gets its own copy.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    token: Option<Arc<str>>,
    chunk_size: usize,
}

impl Fetcher {
    pub fn new(client: Client, token: Option<String>, chunk_size: usize) -> Self {
        Self {
            client,
            token: token.filter(|t| !t.is_empty()).map(Arc::from),
            chunk_size: chunk_size.max(1),
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.token {
            Some(token) => request.header(COOKIE, format!("accountToken={}", token)),
            None => request,
        }
    }

    /// HEAD request; no body is transferred.
    pub async fn probe(&self, url: &str) -> Result<Probe, ProbeError> {
        let response = self.request(Method::HEAD, url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status));
        }

        let headers = response.headers();
        // Read the header directly: a HEAD response has no body to size.
        let total_size = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        let range_supported = headers
            .get_all(ACCEPT_RANGES)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|unit| unit.trim().eq_ignore_ascii_case("bytes"));

        Ok(Probe {
            total_size,
            range_supported,
        })
    }

    /// Makes sure `segment.path` holds the segment's whole range, fetching only
    /// what is missing. Returns the number of new bytes.
    pub async fn fetch_segment(
        &self,
        url: &str,
        segment: &Segment,
        sink: &ProgressHandle,
    ) -> Result<u64, FetchError> {
        let existing = segment.existing_len().await;
        let Some((from, to)) = segment.remaining(existing) else {
            tracing::debug!(index = segment.index, "segment already complete");
            return Ok(0);
        };

        let response = self
            .request(Method::GET, url)
            .header(RANGE, format!("bytes={}-{}", from, to))
            .send()
            .await?;
        match response.status() {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::OK => return Err(FetchError::RangeIgnored { index: segment.index }),
            status => return Err(FetchError::Status(status)),
        }

        let expected = to - from + 1;
        let received = self
            .append_body(response, &segment.path, expected, sink)
            .await?;
        if received != expected {
            return Err(FetchError::ShortBody {
                index: segment.index,
                expected,
                received,
            });
        }
        tracing::debug!(index = segment.index, received, "segment finished");
        Ok(received)
    }

    /// Streams the resource into `path`. With `resume_from > 0` only the tail
    /// is requested and appended.
    pub async fn fetch_stream(
        &self,
        url: &str,
        path: &Path,
        resume_from: u64,
        sink: &ProgressHandle,
    ) -> Result<u64, FetchError> {
        let mut request = self.request(Method::GET, url);
        if resume_from > 0 {
            request = request.header(RANGE, format!("bytes={}-", resume_from));
        }
        let response = request.send().await?;
        let status = response.status();
        if resume_from > 0 && status == StatusCode::OK {
            return Err(FetchError::RangeIgnored { index: 0 });
        }
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        self.append_body(response, path, u64::MAX, sink).await
    }

    /// Appends at most `limit` body bytes to `path`. Each chunk is flushed to
    /// the file before it is reported to `sink`.
    async fn append_body(
        &self,
        response: Response,
        path: &Path,
        limit: u64,
        sink: &ProgressHandle,
    ) -> Result<u64, FetchError> {
        let io_err = |source| FetchError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(io_err)?;

        let stream = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        let reader = StreamReader::new(stream).take(limit);
        tokio::pin!(reader);

        let mut buffer = vec![0u8; self.chunk_size];
        let mut received = 0u64;
        loop {
            let n = reader.read(&mut buffer).await.map_err(FetchError::Body)?;
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n]).await.map_err(io_err)?;
            file.flush().await.map_err(io_err)?;
            received += n as u64;
            sink.add_bytes(n as u64);
        }
        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{DownloadStatus, ProgressBoard};
    use crate::segment::TransferPlan;
    use crate::test_helpers::{payload, range_headers, serve, RangeResponder};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(token: Option<&str>) -> Fetcher {
        Fetcher::new(Client::new(), token.map(str::to_string), 1024)
    }

    fn sink() -> ProgressHandle {
        ProgressBoard::new().create(Path::new("t"), "t", 0, 0, DownloadStatus::Downloading)
    }

    #[tokio::test]
    async fn probe_reads_size_and_range_support() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/file"))
            .and(header("cookie", "accountToken=abc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-length", "12345")
                    .insert_header("accept-ranges", "bytes"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let probe = fetcher(Some("abc"))
            .probe(&format!("{}/file", server.uri()))
            .await
            .unwrap();
        assert_eq!(
            probe,
            Probe {
                total_size: 12345,
                range_supported: true
            }
        );
    }

    #[tokio::test]
    async fn probe_without_range_header() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/file"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-length", "10"))
            .mount(&server)
            .await;

        let probe = fetcher(None)
            .probe(&format!("{}/file", server.uri()))
            .await
            .unwrap();
        assert_eq!(probe.total_size, 10);
        assert!(!probe.range_supported);
    }

    #[tokio::test]
    async fn probe_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = fetcher(None)
            .probe(&format!("{}/missing", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Status(StatusCode::NOT_FOUND)));
    }

    #[tokio::test]
    async fn segment_resumes_from_existing_bytes() {
        let server = MockServer::start().await;
        let body = payload(10_000);
        serve(&server, "/big", &body, true).await;

        let tmp = tempfile::tempdir().unwrap();
        let segments = TransferPlan::new(10_000, true, 4).segments(tmp.path());
        let segment = &segments[2];
        tokio::fs::write(&segment.path, &body[5000..5500]).await.unwrap();

        let progress = sink();
        let written = fetcher(None)
            .fetch_segment(&format!("{}/big", server.uri()), segment, &progress)
            .await
            .unwrap();

        assert_eq!(written, 2000);
        assert_eq!(progress.current_bytes(), 2000);
        assert_eq!(
            range_headers(&server).await,
            vec![Some("bytes=5500-7499".to_string())]
        );
        assert_eq!(tokio::fs::read(&segment.path).await.unwrap(), &body[5000..7500]);
    }

    #[tokio::test]
    async fn complete_segment_is_a_no_op() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(206))
            .expect(0)
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let segments = TransferPlan::new(100, true, 2).segments(tmp.path());
        tokio::fs::write(&segments[1].path, vec![7u8; 50]).await.unwrap();

        let progress = sink();
        let written = fetcher(None)
            .fetch_segment(&server.uri(), &segments[1], &progress)
            .await
            .unwrap();
        assert_eq!(written, 0);
        assert_eq!(progress.current_bytes(), 0);
    }

    #[tokio::test]
    async fn full_response_to_range_request_is_rejected() {
        let server = MockServer::start().await;
        let body = payload(100);
        Mock::given(method("GET"))
            .respond_with(RangeResponder::ignoring_ranges(body))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let segments = TransferPlan::new(100, true, 2).segments(tmp.path());
        let err = fetcher(None)
            .fetch_segment(&server.uri(), &segments[1], &sink())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::RangeIgnored { index: 1 }));
        assert!(!segments[1].path.exists());
    }

    #[tokio::test]
    async fn short_body_keeps_partial_bytes_for_resume() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![9u8; 30]))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let segments = TransferPlan::new(100, true, 2).segments(tmp.path());
        let progress = sink();
        let err = fetcher(None)
            .fetch_segment(&server.uri(), &segments[0], &progress)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FetchError::ShortBody { index: 0, expected: 50, received: 30 }
        ));
        assert_eq!(segments[0].existing_len().await, 30);
        assert_eq!(progress.current_bytes(), 30);
    }

    #[tokio::test]
    async fn oversized_body_is_truncated_to_range() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![1u8; 80]))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let segments = TransferPlan::new(100, true, 2).segments(tmp.path());
        let written = fetcher(None)
            .fetch_segment(&server.uri(), &segments[0], &sink())
            .await
            .unwrap();
        assert_eq!(written, 50);
        assert_eq!(segments[0].existing_len().await, 50);
    }

    #[tokio::test]
    async fn stream_resume_requests_open_range() {
        let server = MockServer::start().await;
        let body = payload(3000);
        serve(&server, "/s", &body, true).await;

        let tmp = tempfile::tempdir().unwrap();
        let part = tmp.path().join("s.part");
        tokio::fs::write(&part, &body[..1200]).await.unwrap();

        let progress = sink();
        let written = fetcher(Some("tok"))
            .fetch_stream(&format!("{}/s", server.uri()), &part, 1200, &progress)
            .await
            .unwrap();
        assert_eq!(written, 1800);
        assert_eq!(range_headers(&server).await, vec![Some("bytes=1200-".to_string())]);
        assert_eq!(tokio::fs::read(&part).await.unwrap(), body);
    }

    #[tokio::test]
    async fn server_error_is_reported_as_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let err = fetcher(None)
            .fetch_stream(&server.uri(), &tmp.path().join("x.part"), 0, &sink())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status(StatusCode::SERVICE_UNAVAILABLE)));
    }
}
