pub mod app;

use app::{
    cli::Cli,
    error::{AppError, ConvertError},
    AppData,
};
use clap::Parser;
use tokio::{signal, sync::oneshot};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    app::log::setup();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = %e, "Fetch failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let app_data = AppData::setup()?;
    tokio::fs::create_dir_all(&cli.output).await?;

    let mut downloaders = Vec::with_capacity(cli.urls.len());
    let mut pending = Vec::with_capacity(cli.urls.len());
    for url in cli.urls.iter().cloned() {
        let downloader = app_data.downloader();
        let (tx, rx) = oneshot::channel();
        downloader.download(url.clone(), move |outcome| {
            tx.send(outcome).ok();
        });
        downloaders.push(downloader);
        pending.push((url, rx));
    }

    let interrupt = signal::ctrl_c();
    tokio::pin!(interrupt);
    let total = pending.len();
    let mut failed = 0;
    for (index, (url, rx)) in pending.into_iter().enumerate() {
        let outcome = tokio::select! {
            outcome = rx => outcome.map_internal("Download ended without an outcome")?,
            _ = &mut interrupt => {
                warn!("Interrupted, cancelling downloads");
                downloaders.iter().for_each(|downloader| downloader.cancel());
                return Err(AppError::Interrupted);
            }
        };
        match outcome {
            Ok(bitmap) => {
                let path = cli.output_path(index, &url);
                tokio::fs::write(&path, bitmap.to_png()?).await?;
                info!(%url, path = %path.display(), "Saved image");
            }
            Err(e) => {
                error!(%url, error = %e, "Failed to fetch image");
                failed += 1;
            }
        }
    }

    for (url, bytes) in app_data.ledger.snapshot() {
        info!(%url, bytes, "Bytes downloaded");
    }
    info!(total = app_data.ledger.total(), "Total bytes downloaded");

    if failed > 0 {
        return Err(AppError::Incomplete { failed, total });
    }
    Ok(())
}
