use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::{
    Client, Method, StatusCode, Url,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use tracing::{debug, info, instrument, warn};

use super::{
    ObjectStore, StorageError,
    sigv4::{Signer, sha256_hex, uri_encode},
};
use crate::config::MinioConfig;

const MAX_ATTEMPTS: usize = 3;
const BASE_BACKOFF_MS: u64 = 150;

/// Path-style S3 client. Requests go to `endpoint`, presigned URLs are
/// built against `public_endpoint` so browsers can reach them.
pub struct S3Store {
    client: Client,
    endpoint: Url,
    public_endpoint: Url,
    bucket: String,
    signer: Signer,
}

fn host_of(url: &Url) -> Result<String, StorageError> {
    let host = url
        .host_str()
        .ok_or_else(|| StorageError::Endpoint(url.to_string()))?;

    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn parse_endpoint(raw: &str) -> Result<Url, StorageError> {
    Url::parse(raw.trim_end_matches('/')).map_err(|e| StorageError::Endpoint(format!("{raw}: {e}")))
}

impl S3Store {
    pub fn new(config: &MinioConfig) -> Result<Self, StorageError> {
        let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) else {
            return Err(StorageError::MissingCredentials);
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            endpoint: parse_endpoint(&config.endpoint)?,
            public_endpoint: parse_endpoint(&config.public_endpoint)?,
            bucket: config.bucket.clone(),
            signer: Signer::new(access_key, secret_key, &config.region),
        })
    }

    fn path(&self, key: Option<&str>) -> String {
        let base = self.endpoint.path().trim_end_matches('/');
        match key {
            Some(key) => format!("{base}/{}/{}", self.bucket, uri_encode(key, true)),
            None => format!("{base}/{}", self.bucket),
        }
    }

    /// Sends a signed request, retrying transport errors and 5xx answers.
    #[instrument(name = "s3_send", skip(self, body))]
    async fn send(
        &self,
        method: Method,
        key: Option<&str>,
        body: Option<(Bytes, &str)>,
    ) -> Result<StatusCode, StorageError> {
        let host = host_of(&self.endpoint)?;
        let path = self.path(key);
        let mut url = self.endpoint.clone();
        url.set_path(&path);

        let payload = body.as_ref().map(|(bytes, _)| &bytes[..]);
        let payload_sha256 = sha256_hex(payload.unwrap_or_default());

        let mut attempt = 0;
        loop {
            attempt += 1;

            let signed = self.signer.sign_request(
                method.as_str(),
                &host,
                &path,
                &payload_sha256,
                Utc::now(),
            );
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .header(AUTHORIZATION, signed.authorization)
                .header("x-amz-date", signed.amz_date)
                .header("x-amz-content-sha256", signed.content_sha256);
            if let Some((bytes, content_type)) = &body {
                request = request
                    .header(CONTENT_TYPE, *content_type)
                    .body(bytes.clone());
            }

            match request.send().await {
                Ok(response) if !response.status().is_server_error() => {
                    return Ok(response.status());
                }
                Ok(response) if attempt >= MAX_ATTEMPTS => {
                    return Ok(response.status());
                }
                Err(e) if attempt >= MAX_ATTEMPTS => return Err(e.into()),
                Ok(response) => warn!("S3 {method} {path} answered {}", response.status()),
                Err(e) => warn!("S3 {method} {path} failed: {e}"),
            }

            tokio::time::sleep(Duration::from_millis(
                BASE_BACKOFF_MS.saturating_mul(attempt as u64),
            ))
            .await;
        }
    }
}

fn expect_success(op: &'static str, key: &str, status: StatusCode) -> Result<(), StorageError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(StorageError::Status {
            op,
            key: key.to_string(),
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn ensure_bucket(&self) -> Result<(), StorageError> {
        let status = self.send(Method::HEAD, None, None).await?;
        if status.is_success() {
            debug!("Bucket {} present", self.bucket);
            return Ok(());
        }
        if status != StatusCode::NOT_FOUND {
            return expect_success("head bucket", &self.bucket, status);
        }

        info!("Creating bucket {}", self.bucket);
        let status = self.send(Method::PUT, None, None).await?;
        expect_success("create bucket", &self.bucket, status)
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StorageError> {
        let status = self
            .send(Method::PUT, Some(key), Some((body, content_type)))
            .await?;
        expect_success("put", key, status)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let status = self.send(Method::DELETE, Some(key), None).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        expect_success("delete", key, status)
    }

    fn presign_get(&self, key: &str, expires_secs: u64) -> Result<String, StorageError> {
        let host = host_of(&self.public_endpoint)?;
        let base = self.public_endpoint.path().trim_end_matches('/');
        let path = format!("{base}/{}/{}", self.bucket, uri_encode(key, true));

        let query = self
            .signer
            .presign_get(&host, &path, Utc::now(), expires_secs);

        Ok(format!(
            "{}://{host}{path}?{query}",
            self.public_endpoint.scheme()
        ))
    }
}
