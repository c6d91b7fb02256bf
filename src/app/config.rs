use crate::app::log::LogConfig;
use config::{Config, Environment, File, FileFormat};
use dotenv::dotenv;
use lazy_static::lazy_static;
use serde::{de::DeserializeOwned, Deserialize};
use serde_with::{serde_as, DurationSeconds};
use std::{collections::HashMap, time::Duration};

lazy_static! {
    pub static ref CONFIG: AppConfig = init();
}

fn init<T: DeserializeOwned>() -> T {
    dotenv().ok();
    Config::builder()
        .add_source(
            File::with_name("config.json")
                .format(FileFormat::Json)
                .required(false),
        )
        .add_source(Environment::default().separator("__"))
        .build()
        .expect("Failed to load configuration")
        .try_deserialize::<T>()
        .expect("Failed to deserialize configuration")
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log: LogConfig,
    pub downloader: DownloaderConfig,
}

/// Shapes every outbound request.
#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
    pub headers: HashMap<String, String>,
}
