//! The node's HTTP interface for streamable files.

use reqwest::header::CONTENT_LENGTH;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{segment::Asset, util::http::HttpClient, StreamError, StreamResult};

/// Body of a `/streamFileInfo` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamFileInfo {
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "Size", default)]
    pub size: Option<u64>,
}

impl StreamFileInfo {
    /// Both a name and a positive size are required. The node reports size 0 for files it
    /// does not have.
    pub fn into_asset(self, mime_type: &str) -> StreamResult<Asset> {
        let name = self
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| StreamError::InvalidMetadata("missing name".to_string()))?;
        let size = self
            .size
            .filter(|size| *size > 0)
            .ok_or_else(|| StreamError::InvalidMetadata(format!("{name} has no size")))?;

        Ok(Asset::new(name, size, mime_type))
    }
}

#[derive(Clone)]
pub struct Origin {
    client: HttpClient,
    base: Url,
}

impl Origin {
    pub fn new(client: HttpClient, base: Url) -> StreamResult<Self> {
        if base.cannot_be_a_base() {
            return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase.into());
        }
        Ok(Self { client, base })
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// `{base}/streaming/{name}`, with `name` percent-encoded as one path segment.
    pub fn asset_url(&self, name: &str) -> Url {
        self.endpoint(&["streaming", name])
    }

    pub async fn stream_file_info(&self, name: &str) -> StreamResult<StreamFileInfo> {
        let url = self.endpoint(&["streamFileInfo"]);
        let response = self
            .client
            .post(url)
            .body(name.to_string())
            .send()
            .await
            .map_err(|e| StreamError::MetadataUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::MetadataUnavailable(format!(
                "{name}: HTTP {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| StreamError::MetadataUnavailable(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| StreamError::InvalidMetadata(e.to_string()))
    }

    /// `Content-Length` of the asset as reported by a HEAD request.
    pub async fn content_length(&self, name: &str) -> StreamResult<Option<u64>> {
        let response = self.client.head(self.asset_url(name)).send().await?;
        if !response.status().is_success() {
            return Err(StreamError::HttpError(response.status()));
        }

        Ok(response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok()))
    }

    /// Compare the declared size against the HEAD response. Only logs; the declared size wins.
    pub async fn verify_size(&self, asset: &Asset) {
        match self.content_length(&asset.name).await {
            Ok(Some(length)) if length != asset.total_size => tracing::warn!(
                "{} is declared as {} bytes but served as {length} bytes.",
                asset.name,
                asset.total_size
            ),
            Ok(Some(_)) => tracing::debug!("Size of {} verified.", asset.name),
            Ok(None) => tracing::debug!("No content length for {}.", asset.name),
            Err(e) => tracing::warn!("Could not verify size of {}: {e}", asset.name),
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}
