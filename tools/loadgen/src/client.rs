use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a single request to the item API did not succeed
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
    #[error("undecodable response body: {0}")]
    Decode(#[source] reqwest::Error),
}

impl RequestError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RequestError::Status(StatusCode::NOT_FOUND))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RequestError::Timeout(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Item {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemList {
    pub items: Vec<Item>,
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub item_count: usize,
}

#[derive(Debug, Serialize)]
struct ItemBody<'a> {
    name: &'a str,
    description: &'a str,
}

#[derive(Debug, Deserialize)]
struct Ignored {}

/// Thin typed client over the item API. Cheap to clone, every clone
/// shares one connection pool.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub async fn health(&self) -> Result<HealthStatus, RequestError> {
        self.send(self.http.get(self.url("/health")), StatusCode::OK)
            .await
    }

    pub async fn create(&self, name: &str, description: &str) -> Result<Item, RequestError> {
        let req = self
            .http
            .post(self.url("/items"))
            .json(&ItemBody { name, description });
        self.send(req, StatusCode::CREATED).await
    }

    pub async fn list(&self) -> Result<ItemList, RequestError> {
        self.send(self.http.get(self.url("/items")), StatusCode::OK)
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Item, RequestError> {
        self.send(self.http.get(self.item_url(id)), StatusCode::OK)
            .await
    }

    pub async fn update(
        &self,
        id: &str,
        name: &str,
        description: &str,
    ) -> Result<Item, RequestError> {
        let req = self
            .http
            .put(self.item_url(id))
            .json(&ItemBody { name, description });
        self.send(req, StatusCode::OK).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), RequestError> {
        self.send::<Ignored>(self.http.delete(self.item_url(id)), StatusCode::OK)
            .await
            .map(|_| ())
    }

    async fn send<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        expect: StatusCode,
    ) -> Result<T, RequestError> {
        let resp = req.send().await.map_err(|err| self.classify(err))?;
        if resp.status() != expect {
            return Err(RequestError::Status(resp.status()));
        }
        resp.json::<T>().await.map_err(|err| self.classify(err))
    }

    fn classify(&self, err: reqwest::Error) -> RequestError {
        if err.is_timeout() {
            RequestError::Timeout(self.timeout)
        } else if err.is_decode() {
            RequestError::Decode(err)
        } else {
            RequestError::Transport(err)
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    fn item_url(&self, id: &str) -> String {
        format!("{}/items/{id}", self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_is_normalized() {
        let client = ApiClient::new("http://localhost:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base(), "http://localhost:8080");
        assert_eq!(client.item_url("abc"), "http://localhost:8080/items/abc");
    }

    #[test]
    fn not_found_detection() {
        assert!(RequestError::Status(StatusCode::NOT_FOUND).is_not_found());
        assert!(!RequestError::Status(StatusCode::BAD_REQUEST).is_not_found());
        assert!(RequestError::Timeout(Duration::from_millis(5)).is_timeout());
    }

    #[tokio::test]
    async fn refused_connection_is_transport() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let client = ApiClient::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
        let err = client.health().await.unwrap_err();
        assert!(matches!(err, RequestError::Transport(_)), "{err:?}");
    }
}
