//! # HTTP client for an etcd-like v2 keys API.
//!
//! [`EtcdStore`] maps the [`KvStore`](crate::KvStore) verbs onto the v2 wire
//! protocol:
//!
//! - CAS create: `PUT ?prevExist=false` (error 105 means already exists)
//! - TTL refresh: `PUT ?prevExist=true&refresh=true` (emits no watch event)
//! - watch: long-poll `GET ?wait=true&recursive=true&waitIndex=N`
//!   (error 401 means the index was compacted)
//! - the store index rides on the `X-Etcd-Index` response header
//!
//! Several endpoints may be configured; requests fall through to the next on
//! transport failure. Credentials, TLS and the rest of connection handling
//! belong to the [`reqwest::Client`] passed in at construction.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::kv::store::{KvError, KvEvent, KvEventKind, KvNode, KvResponse, KvStore};

// etcd v2 error codes the gateway distinguishes.
const CODE_KEY_NOT_FOUND: u64 = 100;
const CODE_NODE_EXIST: u64 = 105;
const CODE_INDEX_CLEARED: u64 = 401;

const INDEX_HEADER: &str = "X-Etcd-Index";

#[derive(Debug, Deserialize)]
struct WireResponse {
    action: String,
    node: WireNode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireNode {
    key: String,
    value: Option<String>,
    #[serde(default)]
    dir: bool,
    ttl: Option<i64>,
    modified_index: Option<u64>,
    #[serde(default)]
    nodes: Vec<WireNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireError {
    error_code: u64,
    message: String,
}

impl From<WireNode> for KvNode {
    fn from(w: WireNode) -> Self {
        KvNode {
            key: w.key,
            value: w.value,
            dir: w.dir,
            ttl: w.ttl.and_then(|t| u64::try_from(t).ok()),
            nodes: w.nodes.into_iter().map(KvNode::from).collect(),
        }
    }
}

/// [`KvStore`] backed by an etcd-like v2 HTTP API.
#[derive(Clone)]
pub struct EtcdStore {
    endpoints: Vec<String>,
    http: reqwest::Client,
}

impl EtcdStore {
    /// Creates a store client for the given endpoints
    /// (e.g. `http://127.0.0.1:2379`).
    pub fn new(endpoints: Vec<String>) -> Self {
        Self::with_client(endpoints, reqwest::Client::new())
    }

    /// Creates a store client with a caller-configured HTTP client
    /// (timeouts, TLS, auth).
    pub fn with_client(endpoints: Vec<String>, http: reqwest::Client) -> Self {
        let endpoints = endpoints
            .into_iter()
            .map(|e| e.trim_end_matches('/').to_string())
            .collect();
        Self { endpoints, http }
    }

    /// Sends `build(url)` against each endpoint in turn, returning the first
    /// response that made it over the wire.
    async fn send(
        &self,
        path: &str,
        build: impl Fn(String) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, KvError> {
        let mut last: Option<reqwest::Error> = None;
        for endpoint in &self.endpoints {
            let url = format!("{endpoint}/v2/keys{path}");
            match build(url).send().await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    debug!("endpoint {} unreachable: {}", endpoint, e);
                    last = Some(e);
                }
            }
        }
        Err(KvError::Backend {
            reason: match last {
                Some(e) => e.to_string(),
                None => "no endpoints configured".to_string(),
            },
        })
    }

    /// Maps a non-2xx response body onto a [`KvError`].
    async fn error_from(path: &str, resp: reqwest::Response) -> KvError {
        let status = resp.status();
        let body = match resp.text().await {
            Ok(b) => b,
            Err(e) => {
                return KvError::Backend {
                    reason: e.to_string(),
                }
            }
        };
        match serde_json::from_str::<WireError>(&body) {
            Ok(err) => match err.error_code {
                CODE_KEY_NOT_FOUND => KvError::NotFound {
                    path: path.to_string(),
                },
                CODE_NODE_EXIST => KvError::AlreadyExists {
                    path: path.to_string(),
                },
                CODE_INDEX_CLEARED => KvError::IndexCleared,
                code => KvError::Backend {
                    reason: format!("etcd error {code}: {}", err.message),
                },
            },
            Err(_) => KvError::Backend {
                reason: format!("unexpected status {status}: {body}"),
            },
        }
    }

    fn index_of(resp: &reqwest::Response) -> u64 {
        resp.headers()
            .get(INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    async fn decode(path: &str, resp: reqwest::Response) -> Result<WireResponse, KvError> {
        if !resp.status().is_success() {
            return Err(Self::error_from(path, resp).await);
        }
        resp.json::<WireResponse>()
            .await
            .map_err(|e| KvError::Backend {
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl KvStore for EtcdStore {
    async fn get(&self, path: &str, recursive: bool) -> Result<KvResponse, KvError> {
        let recursive = recursive.to_string();
        let resp = self
            .send(path, |url| {
                self.http
                    .get(url)
                    .query(&[("recursive", recursive.as_str()), ("sorted", "true")])
            })
            .await?;
        let index = Self::index_of(&resp);

        if resp.status().is_success() {
            let wire = Self::decode(path, resp).await?;
            return Ok(KvResponse {
                node: Some(wire.node.into()),
                index,
            });
        }
        match Self::error_from(path, resp).await {
            KvError::NotFound { .. } => Ok(KvResponse { node: None, index }),
            err => Err(err),
        }
    }

    async fn create_if_absent(
        &self,
        path: &str,
        value: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<(), KvError> {
        let mut form: Vec<(&str, String)> = vec![("prevExist", "false".to_string())];
        match value {
            Some(v) => form.push(("value", v.to_string())),
            None => form.push(("dir", "true".to_string())),
        }
        if let Some(ttl) = ttl {
            form.push(("ttl", ttl.as_secs().max(1).to_string()));
        }

        let resp = self
            .send(path, |url| self.http.put(url).form(&form))
            .await?;
        Self::decode(path, resp).await.map(|_| ())
    }

    async fn refresh_ttl(&self, path: &str, ttl: Duration, dir: bool) -> Result<(), KvError> {
        let mut form: Vec<(&str, String)> = vec![
            ("prevExist", "true".to_string()),
            ("refresh", "true".to_string()),
            ("ttl", ttl.as_secs().max(1).to_string()),
        ];
        if dir {
            form.push(("dir", "true".to_string()));
        }

        let resp = self
            .send(path, |url| self.http.put(url).form(&form))
            .await?;
        Self::decode(path, resp).await.map(|_| ())
    }

    async fn delete(&self, path: &str, recursive: bool) -> Result<(), KvError> {
        let resp = self
            .send(path, |url| {
                let req = self.http.delete(url);
                if recursive {
                    req.query(&[("recursive", "true")])
                } else {
                    req
                }
            })
            .await?;
        Self::decode(path, resp).await.map(|_| ())
    }

    async fn watch(&self, prefix: &str, after_index: u64) -> Result<KvEvent, KvError> {
        let wait_index = (after_index + 1).to_string();
        let resp = self
            .send(prefix, |url| {
                self.http.get(url).query(&[
                    ("wait", "true"),
                    ("recursive", "true"),
                    ("waitIndex", wait_index.as_str()),
                ])
            })
            .await?;
        let wire = Self::decode(prefix, resp).await?;

        let kind = match wire.action.as_str() {
            "create" => KvEventKind::Create,
            "set" | "update" | "compareAndSwap" => KvEventKind::Set,
            "delete" | "compareAndDelete" => KvEventKind::Delete,
            "expire" => KvEventKind::Expire,
            other => {
                return Err(KvError::Backend {
                    reason: format!("unknown watch action: {other}"),
                })
            }
        };
        Ok(KvEvent {
            kind,
            index: wire.node.modified_index.unwrap_or(after_index + 1),
            dir: wire.node.dir,
            path: wire.node.key,
        })
    }
}
