//! Remote object-store backend over HTTP.
//!
//! Objects live at `{endpoint}/{bucket}/{key}`. `GET {bucket}?list` returns
//! a JSON array of keys and `DELETE` on the bucket drops every object.
//! Requests carry basic auth when an access key is configured.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};

use super::{Backend, BackendError, BackendKind};
use crate::config::CloudConfig;

#[derive(Debug, Clone)]
pub struct CloudBackend {
    client: Client,
    bucket_url: Url,
    access_key: String,
    secret_key: String,
}

impl CloudBackend {
    pub fn new(config: &CloudConfig) -> Result<Self, BackendError> {
        if !config.is_configured() {
            return Err(BackendError::Misconfigured(
                "cloud endpoint and bucket must both be set".into(),
            ));
        }

        let mut bucket_url = Url::parse(&config.endpoint).map_err(|e| {
            BackendError::Misconfigured(format!("invalid endpoint {}: {e}", config.endpoint))
        })?;
        bucket_url
            .path_segments_mut()
            .map_err(|_| {
                BackendError::Misconfigured(format!("endpoint {} cannot carry a path", config.endpoint))
            })?
            .pop_if_empty()
            .push(&config.bucket);

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BackendError::Misconfigured(format!("http client: {e}")))?;

        Ok(Self {
            client,
            bucket_url,
            access_key: config.credentials.access_key.clone(),
            secret_key: config.credentials.secret_key.clone(),
        })
    }

    fn object_url(&self, key: &str) -> Url {
        let mut url = self.bucket_url.clone();
        // bucket_url was validated as a base URL in `new`
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(key);
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if self.access_key.is_empty() {
            request
        } else {
            request.basic_auth(&self.access_key, Some(&self.secret_key))
        }
    }

    async fn send(&self, request: RequestBuilder, url: &Url) -> Result<Response, BackendError> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| request_error(url, e))
    }
}

fn request_error(url: &Url, error: reqwest::Error) -> BackendError {
    BackendError::Request {
        url: url.to_string(),
        transient: error.is_timeout() || error.is_connect(),
        message: error.to_string(),
    }
}

fn check_status(url: &Url, response: Response) -> Result<Response, BackendError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(BackendError::Status {
            url: url.to_string(),
            status: response.status().as_u16(),
        })
    }
}

#[async_trait]
impl Backend for CloudBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let url = self.object_url(key);
        let response = self.send(self.client.get(url.clone()), &url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(&url, response)?;
        let body = response.bytes().await.map_err(|e| request_error(&url, e))?;
        Ok(Some(body.to_vec()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), BackendError> {
        let url = self.object_url(key);
        let request = self.client.put(url.clone()).body(value.to_vec());
        let response = self.send(request, &url).await?;
        check_status(&url, response)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        let url = self.object_url(key);
        let response = self.send(self.client.delete(url.clone()), &url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(&url, response)?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), BackendError> {
        let url = self.bucket_url.clone();
        let response = self.send(self.client.delete(url.clone()), &url).await?;
        check_status(&url, response)?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, BackendError> {
        let mut url = self.bucket_url.clone();
        url.set_query(Some("list"));
        let response = self.send(self.client.get(url.clone()), &url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = check_status(&url, response)?;
        response
            .json::<Vec<String>>()
            .await
            .map_err(|e| request_error(&url, e))
    }
}
