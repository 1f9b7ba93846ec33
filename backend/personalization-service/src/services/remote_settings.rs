// ============================================
// Remote Settings (遠端配置)
// ============================================
//
// Recipes and model blobs are records keyed by name. The engine never sees
// a missing record: adapters return an empty object instead.

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{PersonalizationError, Result};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteSettings: Send + Sync {
    /// Record stored under `key`; absent records come back as `{}`.
    async fn get(&self, key: &str) -> Result<Value>;
}

fn empty_record() -> Value {
    Value::Object(Map::new())
}

fn normalize(value: Value) -> Value {
    if value.is_null() {
        empty_record()
    } else {
        value
    }
}

/// Records read from `{root}/{key}.json`.
pub struct DirectoryRemoteSettings {
    root: PathBuf,
}

impl DirectoryRemoteSettings {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn record_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(PersonalizationError::RemoteSettings(format!(
                "invalid settings key: {}",
                key
            )));
        }
        Ok(self.root.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl RemoteSettings for DirectoryRemoteSettings {
    async fn get(&self, key: &str) -> Result<Value> {
        let path = self.record_path(key)?;

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(normalize(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(key = %key, path = %path.display(), "Settings record not found");
                Ok(empty_record())
            }
            Err(e) => Err(PersonalizationError::RemoteSettings(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Records served as JSON from `GET {base_url}/{key}`.
pub struct HttpRemoteSettings {
    client: HttpClient,
    base_url: String,
}

impl HttpRemoteSettings {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = HttpClient::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RemoteSettings for HttpRemoteSettings {
    async fn get(&self, key: &str) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, key);
        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(key = %key, "Settings record not found");
            return Ok(empty_record());
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            warn!(key = %key, status = %status, "Remote settings request failed");
            return Err(PersonalizationError::RemoteSettings(format!(
                "GET {} returned {}: {}",
                url, status, error_text
            )));
        }

        Ok(normalize(response.json().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_directory_reads_records() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("personality-provider-recipe.json"),
            r#"{"models": ["sports"]}"#,
        )
        .await
        .unwrap();

        let settings = DirectoryRemoteSettings::new(dir.path());
        let record = settings.get("personality-provider-recipe").await.unwrap();
        assert_eq!(record, json!({"models": ["sports"]}));
    }

    #[tokio::test]
    async fn test_missing_and_null_records_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("nb-model-news.json"), "null")
            .await
            .unwrap();

        let settings = DirectoryRemoteSettings::new(dir.path());
        assert_eq!(settings.get("nmf-model-news").await.unwrap(), json!({}));
        assert_eq!(settings.get("nb-model-news").await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let settings = DirectoryRemoteSettings::new(dir.path());

        assert!(settings.get("../secrets").await.is_err());
        assert!(settings.get("").await.is_err());
    }

    fn http_settings(server: &MockServer) -> HttpRemoteSettings {
        HttpRemoteSettings::new(&format!("{}/", server.uri()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_http_fetches_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nb-model-sports"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"classes": []})))
            .expect(1)
            .mount(&server)
            .await;

        let record = http_settings(&server).get("nb-model-sports").await.unwrap();
        assert_eq!(record, json!({"classes": []}));
    }

    #[tokio::test]
    async fn test_http_missing_and_null_records_are_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/personality-provider-recipe"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/nmf-model-sports"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Value::Null))
            .mount(&server)
            .await;

        let settings = http_settings(&server);
        assert_eq!(
            settings.get("personality-provider-recipe").await.unwrap(),
            json!({})
        );
        assert_eq!(settings.get("nmf-model-sports").await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_http_server_error_is_propagated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nb-model-sports"))
            .respond_with(ResponseTemplate::new(500).set_body_string("backend down"))
            .mount(&server)
            .await;

        let err = http_settings(&server).get("nb-model-sports").await.unwrap_err();
        match err {
            PersonalizationError::RemoteSettings(message) => {
                assert!(message.contains("500"), "{}", message);
                assert!(message.contains("backend down"), "{}", message);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("broken.json"), "{not json")
            .await
            .unwrap();

        let settings = DirectoryRemoteSettings::new(dir.path());
        assert!(matches!(
            settings.get("broken").await,
            Err(PersonalizationError::Serialization(_))
        ));
    }
}
