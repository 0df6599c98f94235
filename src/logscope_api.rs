//! HTTP client for the log-search API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Url;
use tracing::{debug, warn};

use crate::logscope_core::{AnalyzeResponse, ApiPayload, GraphResponse, SearchResponse};
use crate::logscope_dispatch::{ApiRequest, Endpoint};

const BODY_EXCERPT_CHARS: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid API url `{0}`")]
    InvalidUrl(String),
    #[error("invalid API token: {0}")]
    InvalidToken(#[from] reqwest::header::InvalidHeaderValue),
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {request} failed: {source}")]
    Transport {
        request: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{request} returned HTTP {status}: {body}")]
    Status { request: String, status: u16, body: String },
    #[error("could not read the {endpoint} response: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait SearchApi: Send + Sync {
    async fn fetch(&self, request: &ApiRequest) -> Result<ApiPayload, ApiError>;
}

/// Decodes a response body according to the endpoint that produced it.
pub fn parse_payload(endpoint: Endpoint, body: &[u8]) -> Result<ApiPayload, ApiError> {
    let decode = |source| ApiError::Decode { endpoint: endpoint.as_str(), source };
    Ok(match endpoint {
        Endpoint::Search => {
            ApiPayload::Search(serde_json::from_slice::<SearchResponse>(body).map_err(decode)?)
        }
        Endpoint::Graph => {
            ApiPayload::Graph(serde_json::from_slice::<GraphResponse>(body).map_err(decode)?)
        }
        Endpoint::Analyze => {
            ApiPayload::Analyze(serde_json::from_slice::<AnalyzeResponse>(body).map_err(decode)?)
        }
        Endpoint::Document => {
            ApiPayload::Document(serde_json::from_slice::<SearchResponse>(body).map_err(decode)?)
        }
        Endpoint::Stream => {
            ApiPayload::Stream(serde_json::from_slice::<SearchResponse>(body).map_err(decode)?)
        }
    })
}

fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.chars().count() <= BODY_EXCERPT_CHARS {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(BODY_EXCERPT_CHARS).collect();
    clipped.push('…');
    clipped
}

#[derive(Clone, Debug)]
pub struct HttpSearchApi {
    client: reqwest::Client,
    base: Url,
    headers: HeaderMap,
}

impl HttpSearchApi {
    pub fn new(base_url: &str, bearer: Option<&str>, timeout: Duration) -> Result<Self, ApiError> {
        let base = Url::parse(base_url).map_err(|_| ApiError::InvalidUrl(base_url.to_string()))?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(ApiError::InvalidUrl(base_url.to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(ApiError::Client)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = bearer.filter(|token| !token.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        Ok(Self { client, base, headers })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }
}

#[async_trait]
impl SearchApi for HttpSearchApi {
    async fn fetch(&self, request: &ApiRequest) -> Result<ApiPayload, ApiError> {
        let url = request
            .url(&self.base)
            .ok_or_else(|| ApiError::InvalidUrl(self.base.to_string()))?;
        debug!(%url, "GET");
        let transport = |source| ApiError::Transport { request: request.to_string(), source };

        let response = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        let body = response.bytes().await.map_err(transport)?;
        if !status.is_success() {
            warn!(request = %request, status = status.as_u16(), "search API error");
            return Err(ApiError::Status {
                request: request.to_string(),
                status: status.as_u16(),
                body: excerpt(&body),
            });
        }
        parse_payload(request.endpoint, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn parses_payload_by_endpoint() {
        let body = br#"{"entries":[{"time":0,"count":3}],"next":2}"#;
        match parse_payload(Endpoint::Graph, body).unwrap() {
            ApiPayload::Graph(graph) => {
                assert_eq!(graph.entries.len(), 1);
                assert_eq!(graph.next, Some(2));
            }
            other => panic!("unexpected payload {other:?}"),
        }
        let stream = parse_payload(Endpoint::Stream, br#"{"hits":{"total":0,"hits":[]}}"#).unwrap();
        assert!(matches!(stream, ApiPayload::Stream(response) if response.is_empty()));
    }

    #[test]
    fn decode_errors_name_the_endpoint() {
        let error = parse_payload(Endpoint::Analyze, b"<html>").unwrap_err();
        assert!(error.to_string().starts_with("could not read the analyze response"));
    }

    #[rstest]
    #[case("not a url")]
    #[case("mailto:ops@example.com")]
    #[case("ftp://example.com/")]
    fn rejects_unusable_base_urls(#[case] base: &str) {
        let error = HttpSearchApi::new(base, None, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(error, ApiError::InvalidUrl(_)));
    }

    #[test]
    fn bearer_token_becomes_sensitive_header() {
        let api = HttpSearchApi::new("http://127.0.0.1:9/", Some("s3cret"), Duration::from_secs(1))
            .unwrap();
        let value = api.headers.get(AUTHORIZATION).unwrap();
        assert!(value.is_sensitive());
        assert_eq!(value.to_str().unwrap(), "Bearer s3cret");
        let bad = HttpSearchApi::new("http://h/", Some("bad\ntoken"), Duration::from_secs(1));
        assert!(bad.is_err());
    }

    #[test]
    fn long_bodies_are_clipped() {
        let body = "x".repeat(500);
        let clipped = excerpt(body.as_bytes());
        assert_eq!(clipped.chars().count(), BODY_EXCERPT_CHARS + 1);
        assert_eq!(excerpt(b"  short \n"), "short");
    }
}
