//! [`BlobSource`] over plain HTTP(S).
//!
//! Metadata comes from a `HEAD` request (`Content-Length`, `Last-Modified`);
//! the download is a full `GET`. The poller thread drives the async client by
//! blocking on a tokio runtime handle, so this must never be called from
//! inside an async task.

use std::time::{Duration, SystemTime};

use freshet_core::{BlobMetadata, BlobSource, Error as CoreError};
use reqwest::header::{CONTENT_LENGTH, HeaderMap, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use tokio::runtime::Handle;

use crate::error::{Result, ServerError};

#[derive(Debug, Clone)]
pub struct HttpBlobSource {
    client: Client,
    url: String,
    handle: Handle,
}

impl HttpBlobSource {
    pub fn new(url: impl Into<String>, handle: Handle) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(client, url, handle))
    }

    pub fn with_client(client: Client, url: impl Into<String>, handle: Handle) -> Self {
        Self {
            client,
            url: url.into(),
            handle,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn head(&self) -> Result<(StatusCode, HeaderMap)> {
        self.handle.block_on(async {
            let response = self.client.head(&self.url).send().await?;
            Ok::<_, ServerError>((response.status(), response.headers().clone()))
        })
    }
}

fn parse_metadata(url: &str, headers: &HeaderMap) -> freshet_core::Result<BlobMetadata> {
    let size = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| CoreError::blob(format!("{url}: missing or invalid Content-Length")))?;
    let last_modified = headers
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| CoreError::blob(format!("{url}: missing Last-Modified")))
        .and_then(|v| {
            httpdate::parse_http_date(v)
                .map_err(|e| CoreError::blob(format!("{url}: bad Last-Modified {v:?}: {e}")))
        })?;
    Ok(BlobMetadata {
        size,
        last_modified,
    })
}

fn blob_error(url: &str, e: ServerError) -> CoreError {
    CoreError::blob(format!("{url}: {e}"))
}

impl BlobSource for HttpBlobSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn exists(&self) -> freshet_core::Result<bool> {
        let (status, _) = self.head().map_err(|e| blob_error(&self.url, e))?;
        match status {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(false),
            s => Err(CoreError::blob(format!("{}: HEAD returned {s}", self.url))),
        }
    }

    fn metadata(&self) -> freshet_core::Result<BlobMetadata> {
        let (status, headers) = self.head().map_err(|e| blob_error(&self.url, e))?;
        if !status.is_success() {
            return Err(CoreError::blob(format!("{}: HEAD returned {status}", self.url)));
        }
        parse_metadata(&self.url, &headers)
    }

    fn download(&self) -> freshet_core::Result<Vec<u8>> {
        let body = self.handle.block_on(async {
            let response = self.client.get(&self.url).send().await?.error_for_status()?;
            Ok::<_, ServerError>(response.bytes().await?.to_vec())
        });
        body.map_err(|e| blob_error(&self.url, e))
    }
}

/// Last-Modified value for `time`, as an origin would send it.
pub fn http_date(time: SystemTime) -> String {
    httpdate::fmt_http_date(time)
}
