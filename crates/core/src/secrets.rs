use crate::aws::{hex_sha256, sign, AwsCredentials, SigningRequest};
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn secret(&self, name: &str) -> Result<String, StorageError>;
}

/// A secret supplied directly, e.g. from a CLI flag or environment variable.
pub struct StaticSecret(String);

impl StaticSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

#[async_trait]
impl SecretSource for StaticSecret {
    async fn secret(&self, name: &str) -> Result<String, StorageError> {
        if self.0.trim().is_empty() {
            return Err(StorageError::EmptySecret(name.to_string()));
        }
        Ok(self.0.clone())
    }
}

/// AWS Secrets Manager `GetSecretValue` over the JSON 1.1 protocol.
pub struct SecretsManager {
    client: Client,
    region: String,
    credentials: AwsCredentials,
}

#[derive(Debug, Deserialize)]
struct GetSecretValueResponse {
    #[serde(rename = "SecretString")]
    secret_string: Option<String>,
}

impl SecretsManager {
    pub fn new(region: impl Into<String>, credentials: AwsCredentials) -> Self {
        Self {
            client: Client::new(),
            region: region.into(),
            credentials,
        }
    }

    fn host(&self) -> String {
        format!("secretsmanager.{}.amazonaws.com", self.region)
    }
}

#[async_trait]
impl SecretSource for SecretsManager {
    async fn secret(&self, name: &str) -> Result<String, StorageError> {
        let host = self.host();
        let body = serde_json::to_vec(&json!({ "SecretId": name }))
            .map_err(|error| StorageError::MalformedResponse {
                service: "secretsmanager",
                details: error.to_string(),
            })?;
        let payload_hash = hex_sha256(&body);

        let extra = [
            ("content-type", "application/x-amz-json-1.1".to_string()),
            ("x-amz-target", "secretsmanager.GetSecretValue".to_string()),
        ];
        let headers = sign(
            &SigningRequest {
                method: "POST",
                host: &host,
                canonical_uri: "/",
                query: &[],
                headers: &extra,
                payload_hash: &payload_hash,
                service: "secretsmanager",
                region: &self.region,
            },
            &self.credentials,
            Utc::now(),
        );

        let mut request = self.client.post(format!("https://{host}/")).body(body);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let details = response.text().await.unwrap_or_default();
            return Err(StorageError::Backend {
                operation: "GetSecretValue",
                target: name.to_string(),
                status,
                details: details.chars().take(500).collect(),
            });
        }

        let text = response.text().await?;
        parse_secret(name, &text)
    }
}

fn parse_secret(name: &str, body: &str) -> Result<String, StorageError> {
    let parsed: GetSecretValueResponse =
        serde_json::from_str(body).map_err(|error| StorageError::MalformedResponse {
            service: "secretsmanager",
            details: error.to_string(),
        })?;

    parsed
        .secret_string
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| StorageError::EmptySecret(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_string_is_extracted() {
        let body = r#"{"ARN":"arn:aws:secretsmanager:us-east-1:1:secret:x","Name":"hackathon/gemini/api_key","SecretString":"key-123\n"}"#;
        assert_eq!(parse_secret("hackathon/gemini/api_key", body).unwrap(), "key-123");
    }

    #[test]
    fn binary_only_secret_is_empty() {
        let body = r#"{"Name":"x","SecretBinary":"AAEC"}"#;
        assert!(matches!(
            parse_secret("x", body),
            Err(StorageError::EmptySecret(name)) if name == "x"
        ));
    }

    #[tokio::test]
    async fn static_secret_rejects_blank_values() {
        assert_eq!(StaticSecret::new("k").secret("any").await.unwrap(), "k");
        assert!(StaticSecret::new("  ").secret("any").await.is_err());
    }
}
