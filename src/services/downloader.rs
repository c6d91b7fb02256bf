use super::{
    accounting::Accounting,
    image_processing::{decompress, Bitmap},
    transport::{
        OutboundRequest, ReqwestTransport, ResponseHead, Transport, TransportError, TransportReply,
    },
};
use reqwest::{StatusCode, Url};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError, Weak,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("{0}")]
    Transport(#[from] TransportError),
    #[error("Response is not an HTTP response")]
    InvalidResponse,
    #[error("Unexpected status code {0}")]
    InvalidStatusCode(StatusCode),
    #[error("Expected {expected} bytes, {}", describe_received(.received))]
    InvalidContentLength {
        expected: i64,
        received: Option<usize>,
    },
    #[error("Failed to decode image")]
    Decode,
}

fn describe_received(received: &Option<usize>) -> String {
    match received {
        Some(bytes) => format!("received {bytes}"),
        None => "received no body".to_owned(),
    }
}

pub type DownloadResult<T> = Result<T, DownloadError>;

/// Terminal result of one download.
pub type Outcome = DownloadResult<Bitmap>;

pub type RequestTransform = dyn Fn(OutboundRequest) -> OutboundRequest + Send + Sync;

struct InFlight {
    active: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl InFlight {
    fn stop(&self) {
        self.cancel.cancel();
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Downloads one image at a time and delivers each outcome at most once.
///
/// Cancelling, starting another download or dropping the downloader silences
/// the pending completion, even if the transport still finishes the exchange.
pub struct ImageDownloader {
    transport: Arc<dyn Transport>,
    modify_request: Arc<RequestTransform>,
    accounting: Arc<dyn Accounting>,
    in_flight: Mutex<Option<InFlight>>,
}

impl ImageDownloader {
    pub fn new(
        transport: Arc<dyn Transport>,
        modify_request: Arc<RequestTransform>,
        accounting: Arc<dyn Accounting>,
    ) -> Self {
        Self {
            transport,
            modify_request,
            accounting,
            in_flight: Mutex::new(None),
        }
    }

    pub fn with_defaults(accounting: Arc<dyn Accounting>) -> Self {
        Self::new(
            Arc::new(ReqwestTransport::default()),
            Arc::new(|request: OutboundRequest| request),
            accounting,
        )
    }

    pub fn is_active(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|fetch| fetch.active.load(Ordering::SeqCst))
    }

    /// Starts fetching `url` on the current tokio runtime and returns immediately.
    ///
    /// # Panics
    ///
    /// Panics if called outside the context of a tokio runtime.
    pub fn download<F>(&self, url: Url, completion: F)
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let previous = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(InFlight {
                active: active.clone(),
                cancel: cancel.clone(),
            });
        if let Some(previous) = previous {
            debug!(%url, "Superseding previous download");
            previous.stop();
        }

        let request = (self.modify_request)(OutboundRequest::new(url.clone()));
        let transport = self.transport.clone();
        let accounting = self.accounting.clone();
        let handle = Arc::downgrade(&active);
        let span = info_span!("download", %url);
        debug!(parent: &span, "Starting download");

        let task = async move {
            let reply = transport.send(request, cancel).await;
            if !claim(&handle) {
                debug!("Dropping completion of cancelled download");
                return;
            }
            let outcome = evaluate(&url, reply, accounting.as_ref());
            completion(outcome);
        };
        tokio::spawn(task.instrument(span));
    }

    /// Cancels the pending download, if any. Safe to call repeatedly.
    pub fn cancel(&self) {
        let guard = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(fetch) = guard.as_ref() {
            if fetch.active.load(Ordering::SeqCst) {
                debug!("Cancelling download");
            }
            fetch.stop();
        }
    }
}

impl Drop for ImageDownloader {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Turns the handle inactive if it is still alive and active. Only one caller can win.
fn claim(handle: &Weak<AtomicBool>) -> bool {
    let Some(active) = handle.upgrade() else {
        return false;
    };
    active
        .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

fn evaluate(url: &Url, reply: TransportReply, accounting: &dyn Accounting) -> Outcome {
    let outcome = validate(reply).and_then(|body| {
        let bitmap = decompress(&body).ok_or(DownloadError::Decode)?;
        accounting.record(url, body.len());
        Ok((bitmap, body.len()))
    });
    match outcome {
        Ok((bitmap, bytes)) => {
            let (width, height) = bitmap.dimensions();
            let normalized = bitmap.is_normalized();
            info!(bytes, width, height, normalized, "Downloaded image");
            Ok(bitmap)
        }
        Err(e) => {
            warn!(error = %e, "Download failed");
            Err(e)
        }
    }
}

fn validate(reply: TransportReply) -> DownloadResult<bytes::Bytes> {
    if let Some(error) = reply.error {
        return Err(error.into());
    }
    let head = reply.head.ok_or(DownloadError::InvalidResponse)?;
    if head.status != StatusCode::OK {
        return Err(DownloadError::InvalidStatusCode(head.status));
    }
    match reply.body {
        Some(body) if length_satisfied(&head, body.len()) => Ok(body),
        body => Err(DownloadError::InvalidContentLength {
            expected: head.expected_content_length,
            received: body.map(|body| body.len()),
        }),
    }
}

/// An unknown (negative) declared length accepts any body.
fn length_satisfied(head: &ResponseHead, received: usize) -> bool {
    match u64::try_from(head.expected_content_length) {
        Ok(expected) => received as u64 >= expected,
        Err(_) => true,
    }
}
