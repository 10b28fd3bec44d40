//! S3-backed object store.
//!
//! Implements [`ObjectStore`](crate::store::ObjectStore) against the S3
//! REST API with AWS Signature V4 authentication, using only pure-Rust
//! signing (`hmac`, `sha2`). Supports custom endpoints for S3-compatible
//! services (MinIO, LocalStack) and `ListObjectsV2` pagination.
//!
//! `put_if_absent` maps to a conditional PUT with `If-None-Match: *`;
//! S3 answers `412 Precondition Failed` when the key already exists,
//! which gives the same exactly-one-winner guarantee as the filesystem
//! backend's `create_new`.
//!
//! # Environment Variables
//!
//! Credentials are read from environment variables:
//! - `AWS_ACCESS_KEY_ID` — required
//! - `AWS_SECRET_ACCESS_KEY` — required
//! - `AWS_SESSION_TOKEN` — optional (for temporary credentials)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::config::S3StoreConfig;
use crate::store::ObjectStore;

type HmacSha256 = Hmac<Sha256>;

pub struct S3Store {
    config: S3StoreConfig,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3Store {
    /// Create a store for the configured bucket, reading credentials from
    /// the environment.
    pub fn new(config: S3StoreConfig) -> Result<Self> {
        Ok(Self {
            config,
            creds: AwsCredentials::from_env()?,
            client: reqwest::Client::new(),
        })
    }

    fn host(&self) -> String {
        if let Some(ref endpoint) = self.config.endpoint_url {
            endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string()
        } else {
            format!("{}.s3.{}.amazonaws.com", self.config.bucket, self.config.region)
        }
    }

    fn scheme(&self) -> &'static str {
        match &self.config.endpoint_url {
            Some(endpoint) if endpoint.starts_with("http://") => "http",
            _ => "https",
        }
    }

    /// Full object key including the configured bucket prefix.
    fn full_key(&self, key: &str) -> String {
        if self.config.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.config.prefix.trim_end_matches('/'), key)
        }
    }

    /// Build and send a signed S3 request.
    async fn signed_request(
        &self,
        method: reqwest::Method,
        canonical_uri: &str,
        query: &[(String, String)],
        body: Vec<u8>,
        extra_headers: &[(&str, &str)],
    ) -> Result<reqwest::Response> {
        let host = self.host();
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(&body);

        let mut sorted_query = query.to_vec();
        sorted_query.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical_querystring: String = sorted_query
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        for (k, v) in extra_headers {
            headers.push((k.to_string(), v.to_string()));
        }
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String =
            headers.iter().map(|(k, v)| format!("{}:{}\n", k, v)).collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method.as_str(),
            canonical_uri,
            canonical_querystring,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.config.region,
            "s3",
        );
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());
        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let url = if canonical_querystring.is_empty() {
            format!("{}://{}{}", self.scheme(), host, canonical_uri)
        } else {
            format!("{}://{}{}?{}", self.scheme(), host, canonical_uri, canonical_querystring)
        };

        let mut req = self
            .client
            .request(method, &url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);
        for (k, v) in extra_headers {
            req = req.header(*k, *v);
        }
        if let Some(ref token) = self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }
        if !body.is_empty() {
            req = req.body(body);
        }

        req.send()
            .await
            .with_context(|| format!("S3 request to {} failed", url))
    }

    fn object_uri(&self, key: &str) -> String {
        let full = self.full_key(key);
        let encoded = full.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        format!("/{}", encoded)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let resp = self
            .signed_request(reqwest::Method::GET, &self.object_uri(key), &[], Vec::new(), &[])
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            bail!("S3 GetObject failed (HTTP {}) for key '{}'", resp.status(), key);
        }
        Ok(Some(resp.bytes().await?.to_vec()))
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let resp = self
            .signed_request(
                reqwest::Method::PUT,
                &self.object_uri(key),
                &[],
                data.to_vec(),
                &[],
            )
            .await?;
        if !resp.status().is_success() {
            bail!("S3 PutObject failed (HTTP {}) for key '{}'", resp.status(), key);
        }
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, data: &[u8]) -> Result<bool> {
        let resp = self
            .signed_request(
                reqwest::Method::PUT,
                &self.object_uri(key),
                &[],
                data.to_vec(),
                &[("if-none-match", "*")],
            )
            .await?;
        if resp.status() == reqwest::StatusCode::PRECONDITION_FAILED {
            return Ok(false);
        }
        if !resp.status().is_success() {
            bail!(
                "S3 conditional PutObject failed (HTTP {}) for key '{}'",
                resp.status(),
                key
            );
        }
        Ok(true)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let full_prefix = self.full_key(prefix);
        let strip = if self.config.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.config.prefix.trim_end_matches('/'))
        };

        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
                ("prefix".to_string(), full_prefix.clone()),
            ];
            if let Some(ref token) = continuation_token {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            let resp = self
                .signed_request(reqwest::Method::GET, "/", &query, Vec::new(), &[])
                .await?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "S3 ListObjectsV2 failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
            }

            let xml = resp.text().await?;
            let (batch, is_truncated, next_token) = parse_list_objects_response(&xml);
            for full in batch {
                if let Some(rel) = full.strip_prefix(&strip) {
                    keys.push(rel.to_string());
                }
            }

            if is_truncated {
                continuation_token = next_token;
            } else {
                break;
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let resp = self
            .signed_request(reqwest::Method::HEAD, &self.object_uri(key), &[], Vec::new(), &[])
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !resp.status().is_success() {
            bail!("S3 HeadObject failed (HTTP {}) for key '{}'", resp.status(), key);
        }
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let resp = self
            .signed_request(reqwest::Method::DELETE, &self.object_uri(key), &[], Vec::new(), &[])
            .await?;
        // S3 returns 204 for both deleted and never-existed keys.
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            bail!("S3 DeleteObject failed (HTTP {}) for key '{}'", resp.status(), key);
        }
        Ok(())
    }
}

// ============ AWS Credentials ============

/// AWS credentials loaded from environment variables.
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

// ============ AWS SigV4 Helpers ============

/// Compute the hex-encoded SHA-256 hash of data.
fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute HMAC-SHA256 of data with the given key.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a string per RFC 3986 (used in SigV4 canonical requests).
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

// ============ XML Parsing (minimal, no extra deps) ============

/// Parse a `ListObjectsV2` XML response into object keys plus the
/// pagination state.
fn parse_list_objects_response(xml: &str) -> (Vec<String>, bool, Option<String>) {
    let is_truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let mut keys = Vec::new();
    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];
        if let Some(key) = extract_xml_value(block, "Key") {
            if !key.is_empty() && !key.ends_with('/') {
                keys.push(key);
            }
        }
        remaining = &remaining[block_start + end + "</Contents>".len()..];
    }

    (keys, is_truncated, next_token)
}

/// Extract the text content of an XML tag (simple, non-nested).
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_encode_unreserved_passthrough() {
        assert_eq!(uri_encode("abc-DEF_0.9~"), "abc-DEF_0.9~");
        assert_eq!(uri_encode("a b/c"), "a%20b%2Fc");
    }

    #[test]
    fn test_signing_key_deterministic() {
        let a = derive_signing_key("secret", "20260826", "us-east-1", "s3");
        let b = derive_signing_key("secret", "20260826", "us-east-1", "s3");
        assert_eq!(a, b);
        assert_ne!(a, derive_signing_key("secret", "20260827", "us-east-1", "s3"));
    }

    #[test]
    fn test_parse_list_objects_pagination() {
        let xml = r#"<ListBucketResult>
            <IsTruncated>true</IsTruncated>
            <NextContinuationToken>tok123</NextContinuationToken>
            <Contents><Key>batch/abc/info.json</Key></Contents>
            <Contents><Key>batch/def/info.json</Key></Contents>
            <Contents><Key>batch/folder/</Key></Contents>
        </ListBucketResult>"#;
        let (keys, truncated, token) = parse_list_objects_response(xml);
        assert_eq!(keys, vec!["batch/abc/info.json", "batch/def/info.json"]);
        assert!(truncated);
        assert_eq!(token.as_deref(), Some("tok123"));
    }
}
