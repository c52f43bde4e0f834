//! Mock HTTP origin used by the fetcher and orchestrator tests.

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Deterministic, non-repeating-looking payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 131 + i / 251) % 256) as u8).collect()
}

/// Serves `body`, honouring `Range: bytes=a-b` and `bytes=a-` requests.
pub struct RangeResponder {
    body: Vec<u8>,
    honour_ranges: bool,
}

impl RangeResponder {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            honour_ranges: true,
        }
    }

    /// Always answers 200 with the full body, like an origin without range support.
    pub fn ignoring_ranges(body: Vec<u8>) -> Self {
        Self {
            body,
            honour_ranges: false,
        }
    }
}

fn parse_range(value: &str) -> Option<(usize, Option<usize>)> {
    let ranges = value.strip_prefix("bytes=")?;
    let (start, end) = ranges.split_once('-')?;
    let start = start.parse().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse().ok()?)
    };
    Some((start, end))
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range);

        match range {
            Some((start, end)) if self.honour_ranges => {
                let last = self.body.len().saturating_sub(1);
                let end = end.unwrap_or(last).min(last);
                if start > end {
                    return ResponseTemplate::new(416);
                }
                ResponseTemplate::new(206)
                    .insert_header(
                        "content-range",
                        format!("bytes {}-{}/{}", start, end, self.body.len()),
                    )
                    .set_body_bytes(self.body[start..=end].to_vec())
            }
            _ => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
        }
    }
}

/// Mounts HEAD and GET handlers for `route` on `server`.
pub async fn serve(server: &MockServer, route: &str, body: &[u8], ranges: bool) {
    let mut head = ResponseTemplate::new(200).insert_header("content-length", body.len().to_string());
    if ranges {
        head = head.insert_header("accept-ranges", "bytes");
    }
    Mock::given(method("HEAD"))
        .and(path(route))
        .respond_with(head)
        .mount(server)
        .await;

    let responder = if ranges {
        RangeResponder::new(body.to_vec())
    } else {
        RangeResponder::ignoring_ranges(body.to_vec())
    };
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(responder)
        .mount(server)
        .await;
}

/// `Range` headers of every GET the server has seen, in arrival order.
pub async fn range_headers(server: &MockServer) -> Vec<Option<String>> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == "GET")
        .map(|r| {
            r.headers
                .get("range")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .collect()
}
