use std::time::Duration;

use bytes::Bytes;
use fileshare_core::{
    ApiBase, DOWNLOAD_QUERY_KEY, DeleteRequest, ENDPOINT_DELETE, ENDPOINT_DOWNLOAD,
    ENDPOINT_FILES, ENDPOINT_LOCAL_IP, ENDPOINT_UPLOAD, FileListing, InterfaceTable,
    UploadRequest,
};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::ClientError;

/// Thin transport over the file server's endpoints. Holds no session state.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: ApiBase,
}

impl ApiClient {
    /// `timeout` of `None` leaves requests unbounded.
    pub fn new(base: ApiBase, timeout: Option<Duration>) -> Result<Self, ClientError> {
        // The server sits on the local network; system proxies never apply.
        let mut builder = reqwest::Client::builder().no_proxy();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(ClientError::Build)?;
        Ok(Self { http, base })
    }

    pub fn base(&self) -> &ApiBase {
        &self.base
    }

    pub fn set_base(&mut self, base: ApiBase) {
        self.base = base;
    }

    pub async fn local_ip(&self) -> Result<InterfaceTable, ClientError> {
        let url = self.base.endpoint(ENDPOINT_LOCAL_IP)?;
        let response = self.send(ENDPOINT_LOCAL_IP, self.http.get(url)).await?;
        decode_json(ENDPOINT_LOCAL_IP, response).await
    }

    pub async fn list_files(&self) -> Result<FileListing, ClientError> {
        let url = self.base.endpoint(ENDPOINT_FILES)?;
        let response = self.send(ENDPOINT_FILES, self.http.get(url)).await?;
        decode_json(ENDPOINT_FILES, response).await
    }

    pub async fn upload(&self, request: &UploadRequest) -> Result<(), ClientError> {
        let url = self.base.endpoint(ENDPOINT_UPLOAD)?;
        self.send(ENDPOINT_UPLOAD, self.http.post(url).json(request))
            .await
            .map(drop)
    }

    pub async fn download(&self, filename: &str) -> Result<Bytes, ClientError> {
        let url = self.base.endpoint(ENDPOINT_DOWNLOAD)?;
        let request = self.http.get(url).query(&[(DOWNLOAD_QUERY_KEY, filename)]);
        let response = self.send(ENDPOINT_DOWNLOAD, request).await?;
        response
            .bytes()
            .await
            .map_err(|source| ClientError::Transport {
                endpoint: ENDPOINT_DOWNLOAD.to_owned(),
                source,
            })
    }

    pub async fn delete(&self, filename: &str) -> Result<(), ClientError> {
        let url = self.base.endpoint(ENDPOINT_DELETE)?;
        let body = DeleteRequest {
            name: filename.to_owned(),
        };
        self.send(ENDPOINT_DELETE, self.http.delete(url).json(&body))
            .await
            .map(drop)
    }

    async fn send(&self, endpoint: &str, request: RequestBuilder) -> Result<Response, ClientError> {
        debug!(endpoint, base = %self.base, "sending request");
        let response = request
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                endpoint: endpoint.to_owned(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(endpoint, %status, "server rejected request");
        Err(ClientError::Server {
            endpoint: endpoint.to_owned(),
            status,
            body,
        })
    }
}

async fn decode_json<T: DeserializeOwned>(
    endpoint: &str,
    response: Response,
) -> Result<T, ClientError> {
    response
        .json::<T>()
        .await
        .map_err(|source| ClientError::Decode {
            endpoint: endpoint.to_owned(),
            source,
        })
}
