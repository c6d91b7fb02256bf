use clap::Parser;
use reqwest::Url;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Parser)]
#[command(name = "pixfetch", version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
pub struct Cli {
    /// Image URLs to fetch
    #[arg(required = true)]
    pub urls: Vec<Url>,
    /// Directory the decoded images are written to
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,
}

impl Cli {
    /// `<index>-<file stem>.png`, the index keeps same-named resources apart.
    pub fn output_path(&self, index: usize, url: &Url) -> PathBuf {
        let stem = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .and_then(|name| Path::new(name).file_stem())
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .unwrap_or("image");
        self.output.join(format!("{index}-{stem}.png"))
    }
}
