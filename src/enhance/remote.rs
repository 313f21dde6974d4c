//! Operator that delegates each tile to an HTTP enhancement service.
//!
//! The tile is posted as a multipart form with a PNG `file` part and a
//! `scale` text field; the response body is the enhanced image.

use std::time::Duration;

use reqwest::blocking::{multipart, Client};
use tracing::debug;

use crate::core::buffer::ImageBuffer;
use crate::core::scale::Scale;
use crate::enhance::EnhanceOperator;
use crate::error::EnhanceError;
use crate::io;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct RemoteOperator {
    client: Client,
    url: String,
    name: String,
}

impl RemoteOperator {
    pub fn new(url: impl Into<String>) -> Result<Self, EnhanceError> {
        Self::with_timeout(url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, EnhanceError> {
        let url = url.into();
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            name: format!("remote:{url}"),
            url,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl EnhanceOperator<u8> for RemoteOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn enhance(&self, tile: &ImageBuffer<u8>, scale: Scale) -> Result<ImageBuffer<u8>, EnhanceError> {
        let png = io::encode_png(tile)?;
        let form = multipart::Form::new().text("scale", scale.to_string()).part(
            "file",
            multipart::Part::bytes(png)
                .file_name("tile.png")
                .mime_str("image/png")?,
        );

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()?
            .error_for_status()?;
        let body = response.bytes()?;
        debug!(url = %self.url, bytes = body.len(), "remote enhance response");

        let enhanced = image::load_from_memory(&body)?;
        Ok(io::with_channels(enhanced, tile.channels())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_includes_url() {
        let op = RemoteOperator::new("http://127.0.0.1:9/enhance").unwrap();
        assert_eq!(op.name(), "remote:http://127.0.0.1:9/enhance");
        assert_eq!(op.url(), "http://127.0.0.1:9/enhance");
    }

    #[test]
    fn test_unreachable_service_is_remote_error() {
        // bind then drop to get a port nobody listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let op = RemoteOperator::with_timeout(format!("http://127.0.0.1:{port}/enhance"), Duration::from_secs(2))
            .unwrap();
        let tile = ImageBuffer::filled(4, 4, &[1u8, 2, 3]).unwrap();
        let err = op.enhance(&tile, Scale::integer(2)).unwrap_err();
        assert!(matches!(err, EnhanceError::Remote(_)), "{err}");
    }
}
