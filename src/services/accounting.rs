use reqwest::Url;
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

/// Sink for the byte count of each successful download.
pub trait Accounting: Send + Sync {
    fn record(&self, url: &Url, bytes: usize);
}

/// Last successful byte count per URL. Later downloads of the same URL overwrite earlier ones.
#[derive(Debug, Default)]
pub struct DownloadLedger {
    entries: RwLock<HashMap<Url, usize>>,
}

impl DownloadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_downloaded(&self, url: &Url) -> Option<usize> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .copied()
    }

    pub fn snapshot(&self) -> HashMap<Url, usize> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn total(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }
}

impl Accounting for DownloadLedger {
    fn record(&self, url: &Url, bytes: usize) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.clone(), bytes);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoAccounting;

impl Accounting for NoAccounting {
    fn record(&self, _url: &Url, _bytes: usize) {}
}
