//! S3-compatible object storage (MinIO, AWS S3) over the REST API.
//!
//! Requests use path-style addressing (`/<bucket>/<key>`) and are signed with
//! AWS Signature Version 4 using `hmac` + `sha2`. The bucket is created on
//! connect when it does not exist.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info};

use super::BlobStorage;
use crate::error::{PipelineError, PipelineResult};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub bucket: String,
    #[serde(alias = "accessKey")]
    pub access_key: String,
    #[serde(alias = "secretKey")]
    pub secret_key: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Use HTTPS
    #[serde(default)]
    pub secure: bool,
}

fn default_port() -> u16 {
    9000
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl S3Config {
    /// Host header value; the port is omitted when it is the scheme default.
    fn authority(&self) -> String {
        let default_port = if self.secure { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    fn endpoint(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}", self.authority())
    }
}

/// Headers produced by signing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Signature {
    authorization: String,
    amz_date: String,
    payload_hash: String,
}

pub struct S3Storage {
    client: Client,
    config: S3Config,
}

impl S3Storage {
    /// Connect and make sure the bucket exists.
    pub async fn connect(config: S3Config) -> PipelineResult<Self> {
        let storage = Self {
            client: Client::new(),
            config,
        };
        storage.ensure_bucket().await?;
        Ok(storage)
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    async fn ensure_bucket(&self) -> PipelineResult<()> {
        let bucket = &self.config.bucket;
        let path = format!("/{}", uri_encode(bucket));

        let status = self.send(Method::HEAD, &path, Vec::new()).await?.status();
        if status.is_success() {
            info!(bucket = %bucket, "Bucket already exists");
            return Ok(());
        }
        if status != StatusCode::NOT_FOUND {
            error!(bucket = %bucket, status = %status, "Error checking if bucket exists");
            return Err(PipelineError::Storage(format!(
                "HeadBucket {bucket} failed (HTTP {status})"
            )));
        }

        let response = self.send(Method::PUT, &path, Vec::new()).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(bucket = %bucket, status = %status, "Error creating bucket");
            return Err(PipelineError::Storage(format!(
                "CreateBucket {bucket} failed (HTTP {status}): {body}"
            )));
        }

        info!(bucket = %bucket, "Created new bucket");
        Ok(())
    }

    fn object_path(&self, key: &str) -> String {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        format!("/{}/{}", uri_encode(&self.config.bucket), encoded_key)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Vec<u8>,
    ) -> PipelineResult<reqwest::Response> {
        let signature = sign(&self.config, method.as_str(), path, &body, Utc::now())?;
        let url = format!("{}{}", self.config.endpoint(), path);

        self.client
            .request(method, &url)
            .header("Authorization", &signature.authorization)
            .header("x-amz-content-sha256", &signature.payload_hash)
            .header("x-amz-date", &signature.amz_date)
            .body(body)
            .send()
            .await
            .map_err(|e| PipelineError::Storage(format!("Request to {url} failed: {e}")))
    }
}

#[async_trait]
impl BlobStorage for S3Storage {
    async fn upload(&self, key: &str, data: &str) -> PipelineResult<()> {
        let path = self.object_path(key);
        let response = self
            .send(Method::PUT, &path, data.as_bytes().to_vec())
            .await?;

        let status = response.status();
        if !status.is_success() {
            error!(key, status = %status, "Error uploading object");
            return Err(PipelineError::Storage(format!(
                "PutObject {key} failed (HTTP {status})"
            )));
        }

        debug!(bucket = %self.config.bucket, key, bytes = data.len(), "Uploaded object");
        Ok(())
    }

    async fn download(&self, key: &str) -> PipelineResult<String> {
        let path = self.object_path(key);
        let response = self.send(Method::GET, &path, Vec::new()).await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(PipelineError::ObjectNotFound(key.to_string()));
        }
        if !status.is_success() {
            error!(key, status = %status, "Error downloading object");
            return Err(PipelineError::Storage(format!(
                "GetObject {key} failed (HTTP {status})"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::Storage(format!("Reading {key} failed: {e}")))?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| PipelineError::InvalidData(format!("Object {key} is not UTF-8")))
    }
}

// ============ AWS SigV4 ============

fn sign(
    config: &S3Config,
    method: &str,
    canonical_uri: &str,
    body: &[u8],
    now: DateTime<Utc>,
) -> PipelineResult<Signature> {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let payload_hash = hex_sha256(body);

    // Sorted by name.
    let headers = [
        ("host", config.authority()),
        ("x-amz-content-sha256", payload_hash.clone()),
        ("x-amz-date", amz_date.clone()),
    ];
    let signed_headers = headers
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();

    let canonical_request = format!(
        "{method}\n{canonical_uri}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    );

    let credential_scope = format!("{date_stamp}/{}/s3/aws4_request", config.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&config.secret_key, &date_stamp, &config.region, "s3")?;
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

    Ok(Signature {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
            config.access_key
        ),
        amz_date,
        payload_hash,
    })
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> PipelineResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| PipelineError::Storage(format!("Signing key rejected: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> PipelineResult<Vec<u8>> {
    let k_date = hmac_sha256(
        format!("AWS4{secret_key}").as_bytes(),
        date_stamp.as_bytes(),
    )?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding; only `A-Z a-z 0-9 - _ . ~` pass through.
fn uri_encode(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config() -> S3Config {
        serde_json::from_value(serde_json::json!({
            "host": "minio",
            "bucket": "prompts",
            "accessKey": "minio",
            "secretKey": "minio123"
        }))
        .unwrap()
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
    }

    #[test]
    fn test_config_defaults_and_aliases() {
        let config = config();
        assert_eq!(config.port, 9000);
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.access_key, "minio");
        assert_eq!(config.endpoint(), "http://minio:9000");
    }

    #[test]
    fn test_empty_payload_hash() {
        assert_eq!(
            hex_sha256(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_authorization_header_shape() {
        let signature = sign(&config(), "GET", "/prompts/p-1", b"", at()).unwrap();
        assert_eq!(signature.amz_date, "20240301T123000Z");

        let prefix = "AWS4-HMAC-SHA256 Credential=minio/20240301/us-east-1/s3/aws4_request, \
                      SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature=";
        assert!(signature.authorization.starts_with(prefix));
        let hex_signature = &signature.authorization[prefix.len()..];
        assert_eq!(hex_signature.len(), 64);
        assert!(hex_signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_covers_secret_body_and_path() {
        let base = sign(&config(), "PUT", "/prompts/p-1", b"body", at()).unwrap();
        assert_eq!(base, sign(&config(), "PUT", "/prompts/p-1", b"body", at()).unwrap());

        let mut other_secret = config();
        other_secret.secret_key = "different".into();
        let changed = [
            sign(&other_secret, "PUT", "/prompts/p-1", b"body", at()).unwrap(),
            sign(&config(), "PUT", "/prompts/p-1", b"other", at()).unwrap(),
            sign(&config(), "PUT", "/prompts/p-2", b"body", at()).unwrap(),
        ];
        for signature in changed {
            assert_ne!(signature.authorization, base.authorization);
        }
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("abc-1_2.3~"), "abc-1_2.3~");
        assert_eq!(uri_encode("a b/c"), "a%20b%2Fc");
    }

    #[test]
    fn test_object_path_is_path_style() {
        let storage = S3Storage {
            client: Client::new(),
            config: config(),
        };
        assert_eq!(storage.object_path("dir/a b"), "/prompts/dir/a%20b");
        assert_eq!(storage.bucket(), "prompts");
    }
}
