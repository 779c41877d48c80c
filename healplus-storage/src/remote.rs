//! HTTP + WebSocket document store client.
//!
//! Wire protocol:
//!
//! - `GET  {base}/v1/collections/{path}?orderBy=createdAt&direction=desc` returns
//!   `{"documents": [{"id": .., "fields": {..}}]}`
//! - `GET  {base}/v1/collections/{path}/{id}` returns one document, 404 if absent
//! - `POST {base}/v1/collections/{path}` with the fields returns `{"id": ..}`
//! - `{ws}/v1/collections/{path}/watch` pushes one text frame per snapshot,
//!   each shaped like the query response

use crate::store::{DocumentStore, RemoteDocument, SnapshotStream, StoreError, StoreResult};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use healplus_core::{EndpointConfig, RemoteError, Service};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

const ORDER_QUERY: [(&str, &str); 2] = [("orderBy", "createdAt"), ("direction", "desc")];

#[derive(Debug, Deserialize)]
struct DocumentPage {
    documents: Vec<RemoteDocument>,
}

#[derive(Debug, Deserialize)]
struct Appended {
    id: String,
}

#[derive(Clone)]
pub struct RestDocumentStore {
    client: reqwest::Client,
    base_url: String,
    ws_url: String,
}

impl RestDocumentStore {
    pub fn new(base_url: &str, ws_url: &str) -> StoreResult<Self> {
        let client = reqwest::Client::builder().build().map_err(transport)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            ws_url: ws_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(endpoints: &EndpointConfig) -> StoreResult<Self> {
        Self::new(&endpoints.store_base, &endpoints.store_ws)
    }

    fn collection_url(&self, path: &str) -> String {
        format!("{}/v1/collections/{}", self.base_url, path.trim_matches('/'))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> StoreResult<reqwest::Response> {
        let response = request.send().await.map_err(|err| {
            warn!(error = %err, "document store unreachable");
            transport(err)
        })?;
        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "document store rejected request");
            return Err(rejected(status));
        }
        Ok(response)
    }
}

#[async_trait]
impl DocumentStore for RestDocumentStore {
    async fn query_newest_first(&self, path: &str) -> StoreResult<Vec<RemoteDocument>> {
        let request = self.client.get(self.collection_url(path)).query(&ORDER_QUERY);
        let response = self.send(request).await?;
        let page: DocumentPage = decode_body(response).await?;
        debug!(path, documents = page.documents.len(), "collection queried");
        Ok(page.documents)
    }

    async fn get_document(&self, path: &str, id: &str) -> StoreResult<Option<RemoteDocument>> {
        let url = format!("{}/{}", self.collection_url(path), id);
        let response = self.client.get(url).send().await.map_err(transport)?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(rejected(status));
        }
        decode_body(response).await.map(Some)
    }

    async fn append(&self, path: &str, fields: Map<String, Value>) -> StoreResult<String> {
        let request = self.client.post(self.collection_url(path)).json(&fields);
        let response = self.send(request).await?;
        let appended: Appended = decode_body(response).await?;
        Ok(appended.id)
    }

    async fn watch_newest_first(&self, path: &str) -> StoreResult<SnapshotStream> {
        let url = format!("{}/v1/collections/{}/watch", self.ws_url, path.trim_matches('/'));
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|err| {
                warn!(url = %url, error = %err, "document store watch failed to connect");
                transport(err)
            })?;
        debug!(path, "watch connected");

        // After a socket error the stream ends.
        let snapshots = stream::unfold(Some(socket), |socket| async move {
            let mut socket = socket?;
            loop {
                match socket.next().await {
                    None | Some(Ok(Message::Close(_))) => return None,
                    Some(Ok(Message::Text(text))) => {
                        let snapshot = serde_json::from_str::<DocumentPage>(&text)
                            .map(|page| page.documents)
                            .map_err(decode);
                        return Some((snapshot, Some(socket)));
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => return Some((Err(transport(err)), None)),
                }
            }
        });
        Ok(snapshots.boxed())
    }
}

async fn decode_body<T: DeserializeOwned>(response: reqwest::Response) -> StoreResult<T> {
    let body = response.bytes().await.map_err(transport)?;
    serde_json::from_slice(&body).map_err(decode)
}

fn transport(err: impl std::fmt::Display) -> StoreError {
    RemoteError::transport(Service::DocumentStore, err.to_string()).into()
}

fn rejected(status: StatusCode) -> StoreError {
    RemoteError::rejected(
        Service::DocumentStore,
        status.as_u16(),
        status.canonical_reason().unwrap_or("unknown status"),
    )
    .into()
}

fn decode(err: serde_json::Error) -> StoreError {
    RemoteError::decode(Service::DocumentStore, err.to_string()).into()
}
