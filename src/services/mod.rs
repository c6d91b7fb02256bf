pub mod accounting;
pub mod downloader;
pub mod image_processing;
pub mod transport;
