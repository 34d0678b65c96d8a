/// Identifier sources deliver parameter containers over time. A pipeline subscribes exactly once;
/// the returned receiver is the live subscription, and closing and dropping it is the unsubscribe.
/// Sources stop producing as soon as a send fails.
use crate::params::ParamMap;
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use futures_util::Stream;
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

const SOURCE_BUFFER: usize = 100;

#[async_trait]
pub trait IdentifierSource: Send + Sync {
    /// Start delivering parameter containers.
    async fn subscribe(&self) -> Result<mpsc::Receiver<ParamMap>, anyhow::Error>;
}

/// A source backed by a pre-made channel. The sequence cannot be restarted, so only the first
/// subscribe succeeds.
pub struct ChannelSource {
    rx: Mutex<Option<mpsc::Receiver<ParamMap>>>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<ParamMap>) -> Self {
        Self {
            rx: Mutex::new(Some(rx)),
        }
    }

    /// A source together with the sender that feeds it.
    pub fn channel(buffer: usize) -> (mpsc::Sender<ParamMap>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl IdentifierSource for ChannelSource {
    async fn subscribe(&self) -> Result<mpsc::Receiver<ParamMap>, anyhow::Error> {
        self.rx
            .lock()
            .map_err(|_| anyhow!("channel source lock poisoned"))?
            .take()
            .ok_or_else(|| anyhow!("channel source already subscribed"))
    }
}

/// Forwards any stream of containers. Single use, like [`ChannelSource`].
pub struct StreamSource<S> {
    stream: Mutex<Option<S>>,
}

impl<S> StreamSource<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
        }
    }
}

#[async_trait]
impl<S> IdentifierSource for StreamSource<S>
where
    S: Stream<Item = ParamMap> + Send + Unpin + 'static,
{
    async fn subscribe(&self) -> Result<mpsc::Receiver<ParamMap>, anyhow::Error> {
        let mut stream = self
            .stream
            .lock()
            .map_err(|_| anyhow!("stream source lock poisoned"))?
            .take()
            .ok_or_else(|| anyhow!("stream source already subscribed"))?;

        let (tx, rx) = mpsc::channel(SOURCE_BUFFER);
        tokio::spawn(async move {
            while let Some(params) = stream.next().await {
                if tx.send(params).await.is_err() {
                    debug!("Stream source unsubscribed");
                    break;
                }
            }
        });
        Ok(rx)
    }
}

/// Reads parameter containers from a JSON file: once on subscribe, then again every time the file
/// is modified.
pub struct WatchedFile(pub PathBuf);

impl WatchedFile {
    /// Read and parse the file once.
    pub async fn read_params(path: &Path) -> Result<ParamMap, anyhow::Error> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read params file {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse params file {}", path.display()))?;
        ParamMap::from_json(&value)
            .ok_or_else(|| anyhow!("Params file {} is not a JSON object", path.display()))
    }
}

#[async_trait]
impl IdentifierSource for WatchedFile {
    async fn subscribe(&self) -> Result<mpsc::Receiver<ParamMap>, anyhow::Error> {
        let (params_tx, params_rx) = mpsc::channel(SOURCE_BUFFER);
        let (file_tx, mut file_rx) = mpsc::channel(SOURCE_BUFFER);

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = file_tx.blocking_send(res);
            },
            NotifyConfig::default(),
        )?;
        watcher.watch(&self.0, RecursiveMode::NonRecursive)?;

        let initial = Self::read_params(&self.0).await?;
        params_tx
            .send(initial)
            .await
            .map_err(|_| anyhow!("Subscriber went away before the first params were read"))?;

        let path = self.0.clone();
        tokio::spawn(async move {
            // The watcher lives as long as this task; dropping it stops file notifications.
            let _watcher = watcher;
            loop {
                let res = tokio::select! {
                    _ = params_tx.closed() => break,
                    res = file_rx.recv() => match res {
                        Some(res) => res,
                        None => break,
                    },
                };
                match res {
                    Ok(event) if event.kind.is_modify() => {
                        info!("Params file changed, re-reading {}", path.display());
                        match Self::read_params(&path).await {
                            Ok(params) => {
                                if params_tx.send(params).await.is_err() {
                                    break;
                                }
                            }
                            // No error channel on the container sequence: skip this snapshot.
                            Err(e) => warn!("Ignoring unreadable params file: {:#}", e),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => error!("Watch error: {}", e),
                }
            }
            debug!("Stopped watching {}", path.display());
        });

        Ok(params_rx)
    }
}
