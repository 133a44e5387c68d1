//! Gmail REST connector.
//!
//! Authenticates with an OAuth refresh token, lists messages matching a
//! search query and keeps those whose `X-Mailing-List` header contains the
//! configured filter.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{self, GeneralPurpose};
use base64::engine::DecodePaddingMode;
use chrono::{DateTime, Utc};
use domain_vector::{Metadata, Record};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::Source;
use crate::error::{PipelineError, PipelineResult};

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const MAILING_LIST_HEADER: &str = "X-Mailing-List";
const PAGE_SIZE: usize = 500;
const TOKEN_MARGIN: Duration = Duration::from_secs(60);

/// Gmail bodies are base64url, with or without padding.
const BODY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    general_purpose::NO_PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, Deserialize)]
pub struct GmailConfig {
    /// Substring the `X-Mailing-List` header must contain
    pub filters: String,
    #[serde(alias = "clientID")]
    pub client_id: String,
    #[serde(alias = "clientSecret")]
    pub client_secret: String,
    #[serde(alias = "refreshToken")]
    pub refresh_token: String,
    #[serde(default = "default_query")]
    pub query: String,
    /// Upper bound on listed messages per run
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

fn default_query() -> String {
    "newer_than:1d".to_string()
}

fn default_max_messages() -> usize {
    PAGE_SIZE
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

pub struct GmailSource {
    client: Client,
    config: GmailConfig,
    collection: String,
    token: Mutex<Option<AccessToken>>,
}

impl GmailSource {
    pub fn new(config: GmailConfig, collection: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            config,
            collection: collection.into(),
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> PipelineResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now()
        {
            return Ok(token.value.clone());
        }

        let response = self
            .refresh_request()
            .send()
            .await
            .map_err(|e| PipelineError::Source(format!("Token refresh failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Source(format!(
                "Token refresh rejected ({status}): {error_text}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Source(format!("Invalid token response: {e}")))?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_MARGIN);
        debug!(expires_in = token.expires_in, "Refreshed Gmail access token");

        let value = token.access_token.clone();
        *cached = Some(AccessToken {
            value: token.access_token,
            expires_at: Instant::now() + lifetime,
        });
        Ok(value)
    }

    fn refresh_request(&self) -> RequestBuilder {
        self.client.post(TOKEN_URL).form(&[
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", self.config.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ])
    }

    fn list_request(&self, page_token: Option<&str>) -> RequestBuilder {
        let request = self
            .client
            .get(format!("{API_BASE}/messages"))
            .query(&[("q", self.config.query.as_str())])
            .query(&[("maxResults", PAGE_SIZE)]);

        match page_token {
            Some(token) => request.query(&[("pageToken", token)]),
            None => request,
        }
    }

    fn message_request(&self, id: &str) -> RequestBuilder {
        self.client
            .get(format!("{API_BASE}/messages/{}", urlencoding::encode(id)))
            .query(&[("format", "full")])
    }

    async fn send<T: for<'de> Deserialize<'de>>(&self, request: RequestBuilder) -> PipelineResult<T> {
        let token = self.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| PipelineError::Source(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::RateLimited(format!(
                "Gmail API: {}",
                response.url().path()
            )));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Source(format!(
                "Gmail API error ({status}): {error_text}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PipelineError::Source(format!("Invalid Gmail response: {e}")))
    }
}

#[async_trait]
impl Source for GmailSource {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn list_metadata(&self) -> PipelineResult<Vec<Metadata>> {
        info!(query = %self.config.query, "Fetching metadata");

        let mut metadata = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page: ListResponse = self.send(self.list_request(page_token.as_deref())).await?;
            metadata.extend(
                page.messages
                    .into_iter()
                    .map(|m| Metadata::new(m.id, m.thread_id)),
            );

            match page.next_page_token {
                Some(token) if metadata.len() < self.config.max_messages => {
                    page_token = Some(token)
                }
                _ => break,
            }
        }

        metadata.truncate(self.config.max_messages);
        info!(count = metadata.len(), "Listed messages");
        Ok(metadata)
    }

    async fn fetch_records(&self, metadata: &[Metadata]) -> PipelineResult<Vec<Record>> {
        let mut records = Vec::with_capacity(metadata.len());

        for item in metadata {
            debug!(id = %item.id, "Fetching the mail");
            let message: MessageResponse = self.send(self.message_request(&item.id)).await?;

            if let Some(record) = message_to_record(item, &message.payload, &self.config.filters)
            {
                records.push(record);
            }
        }

        info!(requested = metadata.len(), kept = records.len(), "Fetched records");
        Ok(records)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRef {
    id: String,
    thread_id: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    payload: MessagePart,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: PartBody,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct PartBody {
    #[serde(default)]
    data: Option<String>,
}

impl MessagePart {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// Build a record from a full message, or `None` when it is not from the
/// filtered mailing list or carries no readable body.
fn message_to_record(metadata: &Metadata, payload: &MessagePart, filter: &str) -> Option<Record> {
    let on_list = payload
        .headers
        .iter()
        .any(|h| h.name == MAILING_LIST_HEADER && h.value.contains(filter));
    if !on_list {
        return None;
    }

    let Some(body) = extract_body(payload) else {
        warn!(id = %metadata.id, "Could not extract message body, skipping");
        return None;
    };

    let sender = payload
        .header("Sender")
        .or_else(|| payload.header("From"))
        .unwrap_or_default()
        .to_string();

    let date = payload.header("Date").and_then(|raw| {
        let parsed = parse_date(raw);
        if parsed.is_none() {
            warn!(id = %metadata.id, date = raw, "Could not parse date");
        }
        parsed
    });

    Some(Record {
        metadata: metadata.clone(),
        sender,
        date,
        body,
    })
}

/// First non-empty text part, depth first.
fn extract_body(part: &MessagePart) -> Option<String> {
    if part.mime_type == "text/plain" || part.mime_type == "text/html" {
        let data = part.body.data.as_deref().filter(|d| !d.is_empty())?;
        let decoded = BODY_ENGINE
            .decode(data)
            .or_else(|_| general_purpose::STANDARD.decode(data))
            .ok()?;
        return String::from_utf8(decoded).ok().filter(|b| !b.is_empty());
    }

    part.parts.iter().find_map(extract_body)
}

/// RFC 2822 date, ignoring a trailing comment such as `(UTC)`.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = match raw.find(" (") {
        Some(idx) => &raw[..idx],
        None => raw,
    };
    DateTime::parse_from_rfc2822(trimmed.trim())
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::Url;
    use std::collections::HashMap;

    fn source(client_secret: &str, query: &str) -> GmailSource {
        let config: GmailConfig = serde_json::from_value(serde_json::json!({
            "filters": "lkml",
            "clientID": "id-1",
            "clientSecret": client_secret,
            "refreshToken": "1//refresh",
            "query": query
        }))
        .unwrap();
        GmailSource::new(config, "lkml")
    }

    fn pairs(url: &Url) -> HashMap<String, String> {
        url.query_pairs().into_owned().collect()
    }

    fn encode(text: &str) -> String {
        general_purpose::URL_SAFE_NO_PAD.encode(text)
    }

    fn message(list: &str, body: &str) -> MessagePart {
        serde_json::from_value(serde_json::json!({
            "mimeType": "multipart/alternative",
            "headers": [
                {"name": "X-Mailing-List", "value": list},
                {"name": "Sender", "value": "linux-kernel-owner@vger.kernel.org"},
                {"name": "Date", "value": "Sun, 15 Jun 2025 13:49:35 +0000 (UTC)"}
            ],
            "parts": [
                {"mimeType": "text/plain", "body": {"data": encode(body)}},
                {"mimeType": "text/html", "body": {"data": encode("<p>html</p>")}}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_message_on_list_becomes_record() {
        let metadata = Metadata::new("18c2f", "18c2a");
        let record = message_to_record(
            &metadata,
            &message("linux-kernel@vger.kernel.org", "[PATCH] fix"),
            "linux-kernel",
        )
        .unwrap();

        assert_eq!(record.metadata, metadata);
        assert_eq!(record.body, "[PATCH] fix");
        assert_eq!(record.sender, "linux-kernel-owner@vger.kernel.org");
        assert_eq!(
            record.date,
            Some(Utc.with_ymd_and_hms(2025, 6, 15, 13, 49, 35).unwrap())
        );
    }

    #[test]
    fn test_message_off_list_is_skipped() {
        let metadata = Metadata::new("1", "1");
        assert!(message_to_record(&metadata, &message("netdev@vger", "x"), "linux-kernel").is_none());
    }

    #[test]
    fn test_unparseable_date_keeps_record() {
        let mut part = message("lkml", "body");
        part.headers[2].value = "yesterday".into();
        let record = message_to_record(&Metadata::new("1", "1"), &part, "lkml").unwrap();
        assert!(record.date.is_none());
    }

    #[test]
    fn test_extract_body_accepts_padding_and_nesting() {
        let nested = MessagePart {
            mime_type: "multipart/mixed".into(),
            parts: vec![MessagePart {
                mime_type: "multipart/alternative".into(),
                parts: vec![MessagePart {
                    mime_type: "text/plain".into(),
                    body: PartBody {
                        data: Some(general_purpose::URL_SAFE.encode("ab")),
                    },
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(extract_body(&nested).as_deref(), Some("ab"));

        let empty = MessagePart {
            mime_type: "text/plain".into(),
            ..Default::default()
        };
        assert!(extract_body(&empty).is_none());
    }

    #[test]
    fn test_list_response_shape() {
        let page: ListResponse = serde_json::from_value(serde_json::json!({
            "messages": [{"id": "a", "threadId": "t"}],
            "nextPageToken": "p2",
            "resultSizeEstimate": 1
        }))
        .unwrap();
        assert_eq!(page.messages[0].thread_id, "t");
        assert_eq!(page.next_page_token.as_deref(), Some("p2"));

        let empty: ListResponse =
            serde_json::from_value(serde_json::json!({"resultSizeEstimate": 0})).unwrap();
        assert!(empty.messages.is_empty());
    }

    #[test]
    fn test_config_aliases_and_defaults() {
        let config: GmailConfig = serde_json::from_value(serde_json::json!({
            "filters": "lkml",
            "clientID": "id",
            "clientSecret": "secret",
            "refreshToken": "refresh"
        }))
        .unwrap();
        assert_eq!(config.client_id, "id");
        assert_eq!(config.query, "newer_than:1d");
        assert_eq!(config.max_messages, 500);

        let source = GmailSource::new(config, "lkml");
        assert_eq!(source.collection(), "lkml");
    }

    #[test]
    fn test_refresh_request_is_form_encoded() {
        let request = source("s3cr+t&x=y", "newer_than:1d")
            .refresh_request()
            .build()
            .unwrap();

        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().as_str(), TOKEN_URL);
        assert_eq!(
            request.headers()[reqwest::header::CONTENT_TYPE],
            "application/x-www-form-urlencoded"
        );

        let body = request.body().and_then(|b| b.as_bytes()).unwrap();
        let body = std::str::from_utf8(body).unwrap();
        let fields = pairs(&Url::parse(&format!("http://form/?{body}")).unwrap());
        assert_eq!(fields["client_id"], "id-1");
        assert_eq!(fields["client_secret"], "s3cr+t&x=y");
        assert_eq!(fields["refresh_token"], "1//refresh");
        assert_eq!(fields["grant_type"], "refresh_token");
    }

    #[test]
    fn test_list_and_message_requests_encode_query() {
        let source = source("secret", "list:linux-kernel newer_than:1d");

        let first = source.list_request(None).build().unwrap();
        assert_eq!(first.url().path(), "/gmail/v1/users/me/messages");
        let query = pairs(first.url());
        assert_eq!(query["q"], "list:linux-kernel newer_than:1d");
        assert_eq!(query["maxResults"], "500");
        assert!(!query.contains_key("pageToken"));

        let next = source.list_request(Some("page/2+")).build().unwrap();
        assert_eq!(pairs(next.url())["pageToken"], "page/2+");

        let message = source.message_request("18c2f").build().unwrap();
        assert_eq!(message.url().path(), "/gmail/v1/users/me/messages/18c2f");
        assert_eq!(pairs(message.url())["format"], "full");
    }
}
