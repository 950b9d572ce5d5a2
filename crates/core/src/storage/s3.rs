use super::{ObjectInfo, ObjectStore};
use crate::aws::{canonical_query, encode_key, hex_sha256, sign, AwsCredentials, SigningRequest};
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, Response};
use serde::Deserialize;
use std::path::Path;
use url::Url;

const MAX_KEYS: &str = "1000";

/// S3 REST client. Uses virtual-hosted addressing against AWS and path-style
/// addressing when a custom endpoint (MinIO, LocalStack) is configured.
pub struct S3Store {
    client: Client,
    bucket: String,
    region: String,
    credentials: AwsCredentials,
    endpoint: Option<Url>,
}

#[derive(Debug, Deserialize)]
struct ListBucketResult {
    #[serde(rename = "Contents", default)]
    contents: Vec<ListedObject>,
    #[serde(rename = "IsTruncated", default)]
    is_truncated: bool,
    #[serde(rename = "NextContinuationToken", default)]
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Size", default)]
    size: u64,
}

struct Target {
    url: String,
    host: String,
    canonical_uri: String,
}

impl S3Store {
    pub fn new(
        bucket: impl Into<String>,
        region: impl Into<String>,
        credentials: AwsCredentials,
    ) -> Self {
        Self {
            client: Client::new(),
            bucket: bucket.into(),
            region: region.into(),
            credentials,
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self, StorageError> {
        self.endpoint = Some(Url::parse(endpoint)?);
        Ok(self)
    }

    fn target(&self, key: &str) -> Result<Target, StorageError> {
        let encoded = encode_key(key);

        match &self.endpoint {
            Some(endpoint) => {
                let host_name = endpoint.host_str().ok_or_else(|| {
                    StorageError::Url(url::ParseError::EmptyHost)
                })?;
                let host = match endpoint.port() {
                    Some(port) => format!("{host_name}:{port}"),
                    None => host_name.to_string(),
                };
                let canonical_uri = if encoded.is_empty() {
                    format!("/{}", self.bucket)
                } else {
                    format!("/{}/{}", self.bucket, encoded)
                };
                Ok(Target {
                    url: format!("{}://{}{}", endpoint.scheme(), host, canonical_uri),
                    host,
                    canonical_uri,
                })
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", self.bucket, self.region);
                let canonical_uri = format!("/{encoded}");
                Ok(Target {
                    url: format!("https://{host}{canonical_uri}"),
                    host,
                    canonical_uri,
                })
            }
        }
    }

    async fn send(
        &self,
        operation: &'static str,
        method: Method,
        key: &str,
        query: &[(String, String)],
        body: Option<Vec<u8>>,
    ) -> Result<Response, StorageError> {
        let target = self.target(key)?;
        let payload_hash = hex_sha256(body.as_deref().unwrap_or_default());
        let query_string = canonical_query(query);

        let headers = sign(
            &SigningRequest {
                method: method.as_str(),
                host: &target.host,
                canonical_uri: &target.canonical_uri,
                query,
                headers: &[],
                payload_hash: &payload_hash,
                service: "s3",
                region: &self.region,
            },
            &self.credentials,
            Utc::now(),
        );

        let url = if query_string.is_empty() {
            target.url
        } else {
            format!("{}?{}", target.url, query_string)
        };

        let mut request = self.client.request(method, &url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let details = response.text().await.unwrap_or_default();
            return Err(StorageError::Backend {
                operation,
                target: format!("s3://{}/{}", self.bucket, key),
                status,
                details: details.chars().take(500).collect(),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), MAX_KEYS.to_string()),
            ];
            if !prefix.is_empty() {
                query.push(("prefix".to_string(), prefix.to_string()));
            }
            if let Some(token) = &continuation_token {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            let response = self
                .send("ListObjectsV2", Method::GET, "", &query, None)
                .await?;
            let page = parse_list_response(&response.text().await?)?;

            objects.extend(page.contents.into_iter().map(|object| ObjectInfo {
                key: object.key,
                size: object.size,
            }));

            match page.next_continuation_token {
                Some(token) if page.is_truncated => continuation_token = Some(token),
                _ => break,
            }
        }

        objects.sort_by(|left, right| left.key.cmp(&right.key));
        Ok(objects)
    }

    async fn download(&self, key: &str, dest: &Path) -> Result<(), StorageError> {
        let response = self.send("GetObject", Method::GET, key, &[], None).await?;
        let bytes = response.bytes().await?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }

    async fn upload(&self, src: &Path, key: &str) -> Result<(), StorageError> {
        let body = tokio::fs::read(src).await?;
        self.send("PutObject", Method::PUT, key, &[], Some(body))
            .await?;
        Ok(())
    }
}

fn parse_list_response(xml: &str) -> Result<ListBucketResult, StorageError> {
    quick_xml::de::from_str(xml).map_err(|error| StorageError::MalformedResponse {
        service: "s3",
        details: error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> S3Store {
        S3Store::new(
            "hackathondataq",
            "us-east-1",
            AwsCredentials::new("AKIDEXAMPLE", "secret", None),
        )
    }

    #[test]
    fn aws_targets_use_virtual_hosted_style() {
        let target = store().target("ifc-data/my house.ifc").unwrap();
        assert_eq!(target.host, "hackathondataq.s3.us-east-1.amazonaws.com");
        assert_eq!(target.canonical_uri, "/ifc-data/my%20house.ifc");
        assert_eq!(
            target.url,
            "https://hackathondataq.s3.us-east-1.amazonaws.com/ifc-data/my%20house.ifc"
        );
    }

    #[test]
    fn custom_endpoints_use_path_style() {
        let store = store().with_endpoint("http://localhost:9000").unwrap();

        let object = store.target("vector_store/manifest.json").unwrap();
        assert_eq!(object.host, "localhost:9000");
        assert_eq!(object.canonical_uri, "/hackathondataq/vector_store/manifest.json");
        assert_eq!(
            object.url,
            "http://localhost:9000/hackathondataq/vector_store/manifest.json"
        );

        let bucket = store.target("").unwrap();
        assert_eq!(bucket.canonical_uri, "/hackathondataq");
    }

    #[test]
    fn parses_a_truncated_listing() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>hackathondataq</Name>
  <Prefix>ifc-data/</Prefix>
  <KeyCount>2</KeyCount>
  <MaxKeys>2</MaxKeys>
  <IsTruncated>true</IsTruncated>
  <Contents>
    <Key>ifc-data/a.ifc</Key>
    <LastModified>2024-05-01T10:00:00.000Z</LastModified>
    <ETag>"abc"</ETag>
    <Size>1024</Size>
    <StorageClass>STANDARD</StorageClass>
  </Contents>
  <Contents>
    <Key>ifc-data/b.ifc</Key>
    <LastModified>2024-05-01T10:00:00.000Z</LastModified>
    <ETag>"def"</ETag>
    <Size>2048</Size>
    <StorageClass>STANDARD</StorageClass>
  </Contents>
  <NextContinuationToken>token-2</NextContinuationToken>
</ListBucketResult>"#;

        let page = parse_list_response(xml).unwrap();
        assert!(page.is_truncated);
        assert_eq!(page.next_continuation_token.as_deref(), Some("token-2"));
        assert_eq!(page.contents.len(), 2);
        assert_eq!(page.contents[1].key, "ifc-data/b.ifc");
        assert_eq!(page.contents[1].size, 2048);
    }

    #[test]
    fn parses_an_empty_listing() {
        let xml = r#"<ListBucketResult><Name>b</Name><KeyCount>0</KeyCount><IsTruncated>false</IsTruncated></ListBucketResult>"#;
        let page = parse_list_response(xml).unwrap();
        assert!(page.contents.is_empty());
        assert!(!page.is_truncated);
    }
}
