//! Cloud Storage JSON API client.

use super::{ContentStream, ObjectAttributes, ObjectInfo, ObjectPage, StorageClient};
use crate::error::TransferError;
use crate::types::AclRule;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::header::LOCATION;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::debug;

/// Public Cloud Storage endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// [`StorageClient`] backed by the Cloud Storage JSON API.
///
/// Uploads use a resumable session so object attributes travel as JSON
/// while the body is streamed, never buffered.
#[derive(Debug, Clone)]
pub struct GcsClient {
    http: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
}

impl GcsClient {
    /// Creates a client for `endpoint` that sends `token` as a bearer
    /// credential, if given.
    pub fn new(endpoint: &str, token: Option<String>) -> Result<Self, TransferError> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            TransferError::Configuration(format!("invalid storage endpoint {endpoint:?}: {e}"))
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(TransferError::Configuration(format!(
                "invalid storage endpoint {endpoint}"
            )));
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("bucketsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            endpoint,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, TransferError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                TransferError::Configuration(format!("invalid storage endpoint {}", self.endpoint))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ObjectResource<'a> {
    name: &'a str,
    content_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_encoding: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    acl: Option<&'a [AclRule]>,
}

impl<'a> ObjectResource<'a> {
    fn new(name: &'a str, attributes: &'a ObjectAttributes) -> Self {
        Self {
            name,
            content_type: &attributes.content_type,
            content_encoding: attributes.content_encoding.as_deref(),
            cache_control: attributes.cache_control.as_deref(),
            metadata: (!attributes.metadata.is_empty()).then_some(&attributes.metadata),
            acl: (!attributes.acl.is_empty()).then_some(attributes.acl.as_slice()),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ListedObject>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedObject {
    name: String,
    // The JSON API reports sizes as decimal strings.
    size: Option<String>,
    content_encoding: Option<String>,
}

impl From<ListResponse> for ObjectPage {
    fn from(response: ListResponse) -> Self {
        Self {
            objects: response
                .items
                .into_iter()
                .map(|item| ObjectInfo {
                    size: item.size.and_then(|s| s.parse().ok()),
                    content_encoding: item.content_encoding.filter(|e| !e.is_empty()),
                    name: item.name,
                })
                .collect(),
            next_page_token: response.next_page_token.filter(|t| !t.is_empty()),
        }
    }
}

async fn check_status(response: Response, subject: &str) -> Result<Response, TransferError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(TransferError::NotFound(subject.to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("unknown status").to_string()
    } else {
        body.trim().to_string()
    };
    Err(TransferError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl StorageClient for GcsClient {
    async fn write_object(
        &self,
        bucket: &str,
        key: &str,
        body: ContentStream,
        attributes: &ObjectAttributes,
    ) -> Result<(), TransferError> {
        let subject = format!("{bucket}/{key}");
        let mut url = self.url(&["upload", "storage", "v1", "b", bucket, "o"])?;
        url.query_pairs_mut().append_pair("uploadType", "resumable");

        let response = self
            .authorize(self.http.post(url))
            .header("X-Upload-Content-Type", &attributes.content_type)
            .json(&ObjectResource::new(key, attributes))
            .send()
            .await?;
        let response = check_status(response, &subject).await?;
        let session = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| TransferError::Rejected {
                status: response.status().as_u16(),
                message: "upload session has no Location header".to_string(),
            })?
            .to_string();
        debug!("opened upload session for {}", subject);

        let response = self
            .authorize(self.http.put(session))
            .header(reqwest::header::CONTENT_TYPE, &attributes.content_type)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(body)))
            .send()
            .await?;
        check_status(response, &subject).await?;
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<String>,
    ) -> Result<ObjectPage, TransferError> {
        let mut url = self.url(&["storage", "v1", "b", bucket, "o"])?;
        {
            let mut query = url.query_pairs_mut();
            if !prefix.is_empty() {
                query.append_pair("prefix", prefix);
            }
            if let Some(token) = &page_token {
                query.append_pair("pageToken", token);
            }
        }

        let response = self.authorize(self.http.get(url)).send().await?;
        let response = check_status(response, bucket).await?;
        let listing: ListResponse = serde_json::from_slice(&response.bytes().await?)?;
        Ok(listing.into())
    }

    async fn read_object(&self, bucket: &str, key: &str) -> Result<ContentStream, TransferError> {
        let mut url = self.url(&["storage", "v1", "b", bucket, "o", key])?;
        url.query_pairs_mut().append_pair("alt", "media");

        let response = self.authorize(self.http.get(url)).send().await?;
        let response = check_status(response, &format!("{bucket}/{key}")).await?;
        let stream = Box::pin(response.bytes_stream().map_err(io::Error::other));
        Ok(Box::new(StreamReader::new(stream)))
    }
}
