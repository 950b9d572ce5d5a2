//! AWS Signature Version 4 request signing shared by the S3 and Secrets
//! Manager clients.

use crate::error::StorageError;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

impl AwsCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    /// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional
    /// `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self, StorageError> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            StorageError::Credentials("AWS_ACCESS_KEY_ID environment variable not set".to_string())
        })?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            StorageError::Credentials(
                "AWS_SECRET_ACCESS_KEY environment variable not set".to_string(),
            )
        })?;
        let session_token = std::env::var("AWS_SESSION_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty());

        Ok(Self::new(access_key_id, secret_access_key, session_token))
    }

    /// Environment variables first, then the container credentials
    /// endpoint, then the EC2 instance metadata service.
    pub async fn resolve() -> Result<Self, StorageError> {
        let env_error = match Self::from_env() {
            Ok(credentials) => return Ok(credentials),
            Err(error) => error,
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let relative = std::env::var("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI").ok();
        let full = std::env::var("AWS_CONTAINER_CREDENTIALS_FULL_URI").ok();
        if let Some(url) = container_credentials_url(relative.as_deref(), full.as_deref()) {
            let token = std::env::var("AWS_CONTAINER_AUTHORIZATION_TOKEN").ok();
            debug!(%url, "fetching container credentials");
            return Self::from_container_endpoint(&client, &url, token.as_deref()).await;
        }

        let imds_disabled = std::env::var("AWS_EC2_METADATA_DISABLED")
            .is_ok_and(|value| value.eq_ignore_ascii_case("true"));
        if imds_disabled {
            return Err(env_error);
        }
        Self::from_instance_metadata(&client, INSTANCE_METADATA_ENDPOINT)
            .await
            .map_err(|error| StorageError::Credentials(format!("{env_error}; {error}")))
    }

    pub async fn from_container_endpoint(
        client: &Client,
        url: &str,
        authorization: Option<&str>,
    ) -> Result<Self, StorageError> {
        let mut request = client.get(url);
        if let Some(token) = authorization {
            request = request.header("authorization", token);
        }
        let body = fetch_text(request, "container credentials", url).await?;
        parse_credentials_document(&body)
    }

    /// IMDSv2: session token, role name, then the role's credentials.
    pub async fn from_instance_metadata(client: &Client, base: &str) -> Result<Self, StorageError> {
        let base = base.trim_end_matches('/');
        let token_url = format!("{base}/latest/api/token");
        let token = fetch_text(
            client
                .put(&token_url)
                .header("x-aws-ec2-metadata-token-ttl-seconds", "21600"),
            "instance metadata token",
            &token_url,
        )
        .await?;

        let roles_url = format!("{base}/latest/meta-data/iam/security-credentials/");
        let roles = fetch_text(
            client
                .get(&roles_url)
                .header("x-aws-ec2-metadata-token", token.trim()),
            "instance role",
            &roles_url,
        )
        .await?;
        let role = roles
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| {
                StorageError::Credentials("instance has no IAM role attached".to_string())
            })?;

        let credentials_url = format!("{roles_url}{role}");
        let body = fetch_text(
            client
                .get(&credentials_url)
                .header("x-aws-ec2-metadata-token", token.trim()),
            "instance credentials",
            &credentials_url,
        )
        .await?;
        parse_credentials_document(&body)
    }
}

pub const INSTANCE_METADATA_ENDPOINT: &str = "http://169.254.169.254";
const CONTAINER_CREDENTIALS_HOST: &str = "http://169.254.170.2";

/// The relative URI wins over the full one, as in the AWS SDKs.
pub fn container_credentials_url(relative: Option<&str>, full: Option<&str>) -> Option<String> {
    match (relative, full) {
        (Some(path), _) if !path.trim().is_empty() => {
            Some(format!("{CONTAINER_CREDENTIALS_HOST}{}", path.trim()))
        }
        (_, Some(url)) if !url.trim().is_empty() => Some(url.trim().to_string()),
        _ => None,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialsDocument {
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    token: Option<String>,
    code: Option<String>,
}

/// Parses the JSON served by both the container endpoint and IMDS.
pub fn parse_credentials_document(body: &str) -> Result<AwsCredentials, StorageError> {
    let document: CredentialsDocument = serde_json::from_str(body).map_err(|error| {
        StorageError::Credentials(format!("unreadable credentials document: {error}"))
    })?;
    if let Some(code) = document.code.filter(|code| code != "Success") {
        return Err(StorageError::Credentials(format!(
            "credentials provider returned {code}"
        )));
    }
    match (document.access_key_id, document.secret_access_key) {
        (Some(access_key_id), Some(secret_access_key)) => Ok(AwsCredentials::new(
            access_key_id,
            secret_access_key,
            document.token.filter(|token| !token.is_empty()),
        )),
        _ => Err(StorageError::Credentials(
            "credentials document lacks AccessKeyId or SecretAccessKey".to_string(),
        )),
    }
}

async fn fetch_text(
    request: reqwest::RequestBuilder,
    what: &str,
    url: &str,
) -> Result<String, StorageError> {
    let response = request.send().await.map_err(|error| {
        StorageError::Credentials(format!("{what} request to {url} failed: {error}"))
    })?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(StorageError::Credentials(format!(
            "{what} request to {url} returned HTTP {}",
            status.as_u16()
        )));
    }
    Ok(body)
}

pub struct SigningRequest<'a> {
    pub method: &'a str,
    pub host: &'a str,
    /// Path, already URI-encoded.
    pub canonical_uri: &'a str,
    /// Unencoded query parameters.
    pub query: &'a [(String, String)],
    /// Additional headers to sign, beyond host, date and payload hash.
    pub headers: &'a [(&'a str, String)],
    pub payload_hash: &'a str,
    pub service: &'a str,
    pub region: &'a str,
}

/// Returns the headers to attach to the request, `authorization` included.
/// `host` is signed but not returned since the HTTP client sets it.
pub fn sign(
    request: &SigningRequest<'_>,
    credentials: &AwsCredentials,
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();

    let mut headers: Vec<(String, String)> = vec![
        ("host".to_string(), request.host.to_string()),
        (
            "x-amz-content-sha256".to_string(),
            request.payload_hash.to_string(),
        ),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(token) = &credentials.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    for (name, value) in request.headers {
        headers.push((name.to_ascii_lowercase(), value.trim().to_string()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method,
        request.canonical_uri,
        canonical_query(request.query),
        canonical_headers,
        signed_headers,
        request.payload_hash
    );

    let credential_scope = format!(
        "{}/{}/{}/aws4_request",
        date_stamp, request.region, request.service
    );
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(
        &credentials.secret_access_key,
        &date_stamp,
        request.region,
        request.service,
    );
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        credentials.access_key_id, credential_scope, signed_headers, signature
    );

    let mut out: Vec<(String, String)> = headers
        .into_iter()
        .filter(|(name, _)| name != "host")
        .collect();
    out.push(("authorization".to_string(), authorization));
    out
}

/// Sorted, RFC 3986 encoded `key=value` pairs joined with `&`.
pub fn canonical_query(query: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(key, value)| (uri_encode(key), uri_encode(value)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Encodes everything except the unreserved set `A-Z a-z 0-9 - _ . ~`.
pub fn uri_encode(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{byte:02X}")),
        }
    }
    result
}

/// Encodes each path segment of an object key, keeping the slashes.
pub fn encode_key(key: &str) -> String {
    key.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}

pub fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{secret_key}").as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}
