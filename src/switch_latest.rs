//! Switch-latest combinator
//!
//! Keeps a single "current request" slot keyed to the most recent identifier. Each identifier
//! starts a fresh fetch in its own task, tagged with a monotonically increasing [`RequestToken`].
//! A newer identifier supersedes the slot immediately, regardless of which fetch would finish
//! first: the old task is aborted (best effort) and any result it already queued is dropped by
//! the token check in [`SwitchLatest::on_fetch_settled`].
//!
//! The combinator is driven from a single task, so the slot never has concurrent writers.
use crate::errors::FetchError;
use crate::fetcher::ResourceFetcher;
use crate::params::Identifier;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Tags one fetch request. Tokens only ever increase within a combinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(u64);

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A fetch that finished, successfully or not.
#[derive(Debug)]
pub struct Settled<E> {
    pub token: RequestToken,
    pub result: Result<E, FetchError>,
}

struct InFlight {
    token: RequestToken,
    task: JoinHandle<()>,
}

pub struct SwitchLatest<F: ResourceFetcher> {
    fetcher: Arc<F>,
    next_token: u64,
    current: Option<InFlight>,
    settled_tx: mpsc::UnboundedSender<Settled<F::Entity>>,
    settled_rx: mpsc::UnboundedReceiver<Settled<F::Entity>>,
}

impl<F> SwitchLatest<F>
where
    F: ResourceFetcher + 'static,
{
    pub fn new(fetcher: Arc<F>) -> Self {
        let (settled_tx, settled_rx) = mpsc::unbounded_channel();
        Self {
            fetcher,
            next_token: 0,
            current: None,
            settled_tx,
            settled_rx,
        }
    }

    /// Supersede whatever is in flight and start fetching `id`.
    ///
    /// Repeating the previous identifier still starts a new request.
    pub fn on_identifier(&mut self, id: Option<Identifier>) -> RequestToken {
        if let Some(stale) = self.current.take() {
            debug!("Superseding request {} with a new identifier", stale.token);
            stale.task.abort();
        }

        let token = RequestToken(self.next_token);
        self.next_token += 1;

        let fetcher = Arc::clone(&self.fetcher);
        let settled_tx = self.settled_tx.clone();
        debug!(?id, "Starting request {}", token);
        let task = tokio::spawn(async move {
            let result = fetcher.fetch(id).await;
            // The combinator may already be gone; nobody is listening then.
            let _ = settled_tx.send(Settled { token, result });
        });

        self.current = Some(InFlight { token, task });
        token
    }

    /// Accept the result for `token` if it is still current, otherwise drop it.
    ///
    /// Accepting clears the slot; a token settles at most once.
    pub fn on_fetch_settled(
        &mut self,
        token: RequestToken,
        result: Result<F::Entity, FetchError>,
    ) -> Option<Result<F::Entity, FetchError>> {
        match &self.current {
            Some(current) if current.token == token => {
                self.current = None;
                Some(result)
            }
            _ => {
                trace!("Dropping stale result for request {}", token);
                None
            }
        }
    }

    /// Wait for the next settlement of any request, current or stale.
    ///
    /// Never resolves while nothing is in flight and nothing is queued, so callers should gate it
    /// on [`is_pending`](Self::is_pending).
    pub async fn next_settled(&mut self) -> Settled<F::Entity> {
        loop {
            // The combinator holds a sender itself, so the channel never closes.
            if let Some(settled) = self.settled_rx.recv().await {
                return settled;
            }
        }
    }

    /// Wait until the current request settles, skipping stale ones.
    ///
    /// Returns `None` immediately if nothing is current.
    pub async fn next_current(&mut self) -> Option<Result<F::Entity, FetchError>> {
        while self.is_pending() {
            let Settled { token, result } = self.next_settled().await;
            if let Some(result) = self.on_fetch_settled(token, result) {
                return Some(result);
            }
        }
        None
    }

    /// Whether a current request is still outstanding.
    pub fn is_pending(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_token(&self) -> Option<RequestToken> {
        self.current.as_ref().map(|c| c.token)
    }

    /// Release the current request, aborting its task. Nothing it produces will be accepted.
    pub fn cancel(&mut self) {
        if let Some(in_flight) = self.current.take() {
            debug!("Cancelling request {}", in_flight.token);
            in_flight.task.abort();
        }
    }
}

impl<F: ResourceFetcher> Drop for SwitchLatest<F> {
    fn drop(&mut self) {
        if let Some(in_flight) = self.current.take() {
            in_flight.task.abort();
        }
    }
}
