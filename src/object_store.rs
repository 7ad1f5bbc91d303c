//! Pull result artifacts from an S3-compatible object store.
//!
//! Requests use path-style addressing and AWS Signature V4 with an unsigned payload.

use crate::error::EvalError;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use regex::Regex;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

pub const DEFAULT_REGION: &str = "us-east-1";

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

static KEY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<Key>(.*?)</Key>").expect("valid key pattern"));
static NEXT_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<NextContinuationToken>(.*?)</NextContinuationToken>").expect("valid token pattern")
});

#[derive(Clone)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Read the key pair from the process environment
    pub fn from_env() -> Result<Self, EvalError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Both `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY` must resolve to non-empty values
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EvalError> {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.is_empty());
        match (non_empty("AWS_ACCESS_KEY_ID"), non_empty("AWS_SECRET_ACCESS_KEY")) {
            (Some(access_key), Some(secret_key)) => Ok(Self { access_key, secret_key }),
            _ => Err(EvalError::MissingCredentials),
        }
    }
}

/// Percent-encode everything outside the unreserved set
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn canonical_query(params: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k, true), uri_encode(v, true)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn hmac_sha256(key: &[u8], data: &str) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// One page of a ListObjectsV2 response
#[derive(Debug, Default, PartialEq)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub next_token: Option<String>,
}

/// Keys and continuation token from a ListObjectsV2 XML body
pub fn parse_list_page(body: &str) -> ListPage {
    ListPage {
        keys: KEY.captures_iter(body).map(|caps| unescape_xml(&caps[1])).collect(),
        next_token: NEXT_TOKEN
            .captures(body)
            .map(|caps| unescape_xml(&caps[1]))
            .filter(|token| !token.is_empty()),
    }
}

/// Local destination for `key`, relative to the listed prefix.
///
/// None when the key would resolve outside `local`.
pub fn local_target(local: &Path, prefix: &str, key: &str) -> Option<PathBuf> {
    let mut relative = key.strip_prefix(prefix).unwrap_or(key).trim_start_matches('/');
    if relative.is_empty() {
        // the prefix named a single object
        relative = key.rsplit('/').next().unwrap_or(key);
    }

    let contained = Path::new(relative)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    (contained && !relative.is_empty()).then(|| local.join(relative))
}

/// Read-only client for one bucket of an S3-compatible store
pub struct ObjectStore {
    client: Client,
    endpoint: String,
    host: String,
    bucket: String,
    region: String,
    credentials: Credentials,
}

impl ObjectStore {
    pub fn new(endpoint_url: &str, bucket: &str, region: &str, credentials: Credentials) -> Result<Self> {
        let endpoint = endpoint_url.trim_end_matches('/').to_string();
        let url = reqwest::Url::parse(&endpoint).with_context(|| format!("Invalid endpoint URL: {endpoint_url}"))?;
        let host_name = url.host_str().context("Endpoint URL has no host")?;
        let host = match url.port() {
            Some(port) => format!("{host_name}:{port}"),
            None => host_name.to_string(),
        };

        Ok(Self {
            client: Client::new(),
            endpoint,
            host,
            bucket: bucket.to_string(),
            region: region.to_string(),
            credentials,
        })
    }

    /// `Authorization` header value for a GET of `canonical_uri`
    fn authorization(&self, canonical_uri: &str, query: &str, now: DateTime<Utc>) -> String {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let scope = format!("{date}/{}/s3/aws4_request", self.region);

        let canonical_request = format!(
            "GET\n{canonical_uri}\n{query}\nhost:{}\nx-amz-content-sha256:{UNSIGNED_PAYLOAD}\nx-amz-date:{amz_date}\n\n{SIGNED_HEADERS}\n{UNSIGNED_PAYLOAD}",
            self.host
        );
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let k_date = hmac_sha256(format!("AWS4{}", self.credentials.secret_key).as_bytes(), &date);
        let k_region = hmac_sha256(&k_date, &self.region);
        let k_service = hmac_sha256(&k_region, "s3");
        let k_signing = hmac_sha256(&k_service, "aws4_request");
        let signature = hex::encode(hmac_sha256(&k_signing, &string_to_sign));

        format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
            self.credentials.access_key
        )
    }

    async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<reqwest::Response> {
        let canonical_uri = uri_encode(path, false);
        let query = canonical_query(params);
        let url = if query.is_empty() {
            format!("{}{canonical_uri}", self.endpoint)
        } else {
            format!("{}{canonical_uri}?{query}", self.endpoint)
        };

        let now = Utc::now();
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(&url)
            .header("x-amz-date", now.format("%Y%m%dT%H%M%SZ").to_string())
            .header("x-amz-content-sha256", UNSIGNED_PAYLOAD)
            .header("Authorization", self.authorization(&canonical_uri, &query, now))
            .send()
            .await
            .with_context(|| format!("Failed to send request to {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("GET {} failed with status {}: {}", path, status.as_u16(), body.trim());
        }
        Ok(response)
    }

    /// Every key under `prefix`, following continuation tokens
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let path = format!("/{}", self.bucket);
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut params = vec![("list-type", "2"), ("prefix", prefix)];
            if let Some(token) = token.as_deref() {
                params.push(("continuation-token", token));
            }

            let body = self
                .get(&path, &params)
                .await?
                .text()
                .await
                .context("Failed to read listing response")?;
            let page = parse_list_page(&body);
            keys.extend(page.keys);

            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        Ok(keys)
    }

    /// Download every object under `prefix` into `local`; returns the number of files written
    pub async fn download_prefix(&self, prefix: &str, local: &Path) -> Result<usize> {
        let keys = self.list_keys(prefix).await?;
        let mut downloaded = 0;

        for key in keys.iter().filter(|key| !key.ends_with('/')) {
            let Some(target) = local_target(local, prefix, key) else {
                warn!(key, "Skipping key that resolves outside the download directory");
                continue;
            };
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }

            let bytes = self
                .get(&format!("/{}/{}", self.bucket, key), &[])
                .await?
                .bytes()
                .await
                .with_context(|| format!("Failed to read object body: {key}"))?;
            tokio::fs::write(&target, &bytes)
                .await
                .with_context(|| format!("Failed to write file: {}", target.display()))?;

            debug!(key, path = %target.display(), "Downloaded");
            downloaded += 1;
        }

        info!(prefix, count = downloaded, local = %local.display(), "Download complete");
        Ok(downloaded)
    }
}
