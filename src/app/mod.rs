use pixfetch::services::{
    accounting::DownloadLedger,
    downloader::{ImageDownloader, RequestTransform},
    transport::{OutboundRequest, ReqwestTransport, Transport},
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use std::sync::Arc;

use self::{
    config::{DownloaderConfig, CONFIG},
    error::{AppError, ConvertError},
};

pub mod cli;
pub mod config;
pub mod error;
pub mod log;

pub struct AppData {
    pub ledger: Arc<DownloadLedger>,
    transport: Arc<dyn Transport>,
    modify_request: Arc<RequestTransform>,
}

impl AppData {
    pub fn setup() -> Result<Self, AppError> {
        Ok(Self {
            ledger: Arc::new(DownloadLedger::new()),
            transport: Arc::new(ReqwestTransport::default()),
            modify_request: request_transform(&CONFIG.downloader)?,
        })
    }

    /// A fresh handle sharing the transport and the ledger.
    pub fn downloader(&self) -> ImageDownloader {
        ImageDownloader::new(
            self.transport.clone(),
            self.modify_request.clone(),
            self.ledger.clone(),
        )
    }
}

pub fn request_transform(config: &DownloaderConfig) -> Result<Arc<RequestTransform>, AppError> {
    let mut headers = HeaderMap::new();
    if let Some(user_agent) = &config.user_agent {
        let value = HeaderValue::from_str(user_agent).map_internal("Invalid user agent")?;
        headers.insert(USER_AGENT, value);
    }
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_internal("Invalid header name")?;
        let value = HeaderValue::from_str(value).map_internal("Invalid header value")?;
        headers.insert(name, value);
    }
    let timeout = config.timeout;

    Ok(Arc::new(move |mut request: OutboundRequest| {
        request.headers.extend(headers.clone());
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        request
    }))
}
