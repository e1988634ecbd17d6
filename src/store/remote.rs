use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{decode_lists, RemoteStoreFactory, ReplicaStore, StoreError, StoreKind, StoreResult};
use crate::models::{DailyStats, Settings, VocabList};
use crate::services::stats::date_key;

const USER_SETTINGS_DOC: &str = "settings/user";

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum BatchOp {
    Set,
    Delete,
}

#[derive(Debug, Serialize)]
struct BatchWrite<'a> {
    op: BatchOp,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a VocabList>,
}

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    writes: Vec<BatchWrite<'a>>,
}

/// Settings as stored remotely; the API key has no field here.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoteSettings<'a> {
    source_lang: &'a str,
    target_lang: &'a str,
    keep_images: bool,
}

impl<'a> From<&'a Settings> for RemoteSettings<'a> {
    fn from(settings: &'a Settings) -> Self {
        Self {
            source_lang: &settings.source_lang,
            target_lang: &settings.target_lang,
            keep_images: settings.keep_images,
        }
    }
}

fn list_path(id: &str) -> String {
    format!("lists/{}", urlencoding::encode(id))
}

/// Per-user document store reached over HTTP.
#[derive(Clone)]
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    user_id: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpRemoteStore {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        user_id: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id: user_id.into(),
            token,
            timeout,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/users/{}/{}",
            self.base_url,
            urlencoding::encode(&self.user_id),
            path
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, resource: &str) -> StoreResult<Response> {
        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                StoreError::Timeout(self.timeout)
            } else {
                StoreError::Request(err)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        match status {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(resource.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(StoreError::Unauthorized(format!("{resource}: {status}")))
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(StoreError::HttpStatus {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    async fn read_json(&self, response: Response) -> StoreResult<Value> {
        let bytes = response.bytes().await.map_err(|err| {
            if err.is_timeout() {
                StoreError::Timeout(self.timeout)
            } else {
                StoreError::Request(err)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn batch(&self, writes: Vec<BatchWrite<'_>>) -> StoreResult<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let count = writes.len();
        let body = BatchRequest { writes };
        self.send(self.request(Method::POST, "batch").json(&body), "batch")
            .await?;
        debug!(user_id = %self.user_id, writes = count, "remote batch committed");
        Ok(())
    }
}

#[async_trait]
impl ReplicaStore for HttpRemoteStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Remote
    }

    async fn load_lists(&self) -> StoreResult<Vec<VocabList>> {
        let response = self.send(self.request(Method::GET, "lists"), "lists").await?;
        match self.read_json(response).await? {
            Value::Array(items) => Ok(decode_lists(items, StoreKind::Remote)),
            other => Err(StoreError::DataShape {
                kind: "list collection",
                reason: format!("expected array, got {}", json_type(&other)),
            }),
        }
    }

    async fn save_lists(&self, lists: &[VocabList]) -> StoreResult<()> {
        let writes = lists
            .iter()
            .map(|list| BatchWrite {
                op: BatchOp::Set,
                path: list_path(&list.id),
                data: Some(list),
            })
            .collect();
        self.batch(writes).await
    }

    async fn save_list(&self, list: &VocabList) -> StoreResult<()> {
        let path = list_path(&list.id);
        self.send(self.request(Method::PUT, &path).json(list), &path)
            .await?;
        Ok(())
    }

    async fn delete_list(&self, id: &str) -> StoreResult<()> {
        let path = list_path(id);
        match self.send(self.request(Method::DELETE, &path), &path).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn load_settings(&self) -> StoreResult<Option<Settings>> {
        let response = match self
            .send(self.request(Method::GET, USER_SETTINGS_DOC), USER_SETTINGS_DOC)
            .await
        {
            Ok(response) => response,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };

        let value = self.read_json(response).await?;
        match serde_json::from_value::<Settings>(value) {
            Ok(settings) => Ok(Some(settings)),
            Err(err) => {
                warn!(user_id = %self.user_id, error = %err, "ignoring malformed remote settings");
                Ok(None)
            }
        }
    }

    async fn save_settings(&self, settings: &Settings) -> StoreResult<()> {
        let body = RemoteSettings::from(settings);
        self.send(
            self.request(Method::PUT, USER_SETTINGS_DOC).json(&body),
            USER_SETTINGS_DOC,
        )
        .await?;
        Ok(())
    }

    async fn load_daily_stats(&self, start: NaiveDate, end: NaiveDate) -> StoreResult<Vec<DailyStats>> {
        let builder = self
            .request(Method::GET, "dailyStats")
            .query(&[("start", date_key(start)), ("end", date_key(end))]);
        let response = match self.send(builder, "dailyStats").await {
            Ok(response) => response,
            Err(err) if err.is_not_found() => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        match self.read_json(response).await? {
            Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|item| match serde_json::from_value::<DailyStats>(item) {
                    Ok(day) => Some(day),
                    Err(err) => {
                        warn!(user_id = %self.user_id, error = %err, "dropping daily stats record");
                        None
                    }
                })
                .collect()),
            other => Err(StoreError::DataShape {
                kind: "daily stats collection",
                reason: format!("expected array, got {}", json_type(&other)),
            }),
        }
    }

    async fn save_daily_stats(&self, stats: &DailyStats) -> StoreResult<()> {
        let path = format!("dailyStats/{}", stats.date);
        self.send(self.request(Method::PUT, &path).json(stats), &path)
            .await?;
        Ok(())
    }

    async fn clear_all(&self) -> StoreResult<()> {
        let ids: Vec<String> = match self.load_lists().await {
            Ok(lists) => lists.into_iter().map(|l| l.id).collect(),
            Err(err) if err.is_not_found() => Vec::new(),
            Err(err) => return Err(err),
        };
        let writes = ids
            .into_iter()
            .map(|id| BatchWrite {
                op: BatchOp::Delete,
                path: list_path(&id),
                data: None,
            })
            .collect();
        self.batch(writes).await?;

        match self
            .send(self.request(Method::DELETE, USER_SETTINGS_DOC), USER_SETTINGS_DOC)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Shares one HTTP client across every signed-in user.
pub struct HttpRemoteFactory {
    client: Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpRemoteFactory {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> StoreResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            token,
            timeout,
        })
    }
}

impl RemoteStoreFactory for HttpRemoteFactory {
    fn for_user(&self, user_id: &str) -> Arc<dyn ReplicaStore> {
        Arc::new(HttpRemoteStore::new(
            self.client.clone(),
            self.base_url.clone(),
            user_id,
            self.token.clone(),
            self.timeout,
        ))
    }
}
