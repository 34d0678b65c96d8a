mod config;

use anyhow::Context;
use clap::Parser as _;
use config::Config;
use switchbind::{
    Callbacks, JsonFetcher, Outcome, ParamKey, Pipeline,
    source::{IdentifierSource, StreamSource, WatchedFile},
};
use tracing::{error, info, instrument};
use tracing_subscriber::EnvFilter;

#[tokio::main]
#[instrument]
pub async fn main() -> anyhow::Result<()> {
    let config = Config::parse().validate()?;

    let filter = if config.verbose {
        EnvFilter::new("switchbind=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting switchbind with config: {:?}", config);

    let fetcher = JsonFetcher::builder()
        .base_url(config.base_url.clone())
        .collection(config.collection.clone())
        .build();
    let transformer = ParamKey::new(config.key.clone());

    let outcome = if config.watch {
        run(WatchedFile(config.params.clone()), transformer, fetcher).await?
    } else {
        let params = WatchedFile::read_params(&config.params).await?;
        let source = StreamSource::new(tokio_stream::once(params));
        run(source, transformer, fetcher).await?
    };

    match outcome {
        Outcome::Value | Outcome::Completed => Ok(()),
        Outcome::Failed(e) => Err(e).context("Fetch failed"),
        Outcome::Cancelled => Err(anyhow::anyhow!("Pipeline was cancelled")),
    }
}

async fn run<S: IdentifierSource>(
    source: S,
    transformer: ParamKey,
    fetcher: JsonFetcher,
) -> anyhow::Result<Outcome> {
    let pipeline = Pipeline::new(source, transformer, fetcher);

    let callbacks = Callbacks::new()
        .on_value(|entity: serde_json::Value| match serde_json::to_string_pretty(&entity) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => error!("Failed to render entity: {}", e),
        })
        .on_error(|e| error!("Error getting entity: {}", e))
        .on_complete(|| info!("Pipeline complete"));

    let mut handle = pipeline.subscribe(callbacks).await?;

    tokio::select! {
        _ = handle.terminated() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping pipeline");
        }
    }

    Ok(handle.stop().await?)
}
