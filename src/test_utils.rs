//! Test doubles for driving pipelines deterministically.
//!
//! Compiled only for this crate's own tests or with the `test-utils` feature.
use crate::errors::FetchError;
use crate::fetcher::ResourceFetcher;
use crate::params::{Identifier, ParamMap};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, watch};

type Reply<E> = oneshot::Sender<Result<E, FetchError>>;

/// A fetcher whose calls stay pending until the test settles them, in whatever order it likes.
///
/// Identifiers registered with [`respond_with`](MockFetcher::respond_with) settle immediately
/// instead.
pub struct MockFetcher<E> {
    calls: Mutex<Vec<Option<Identifier>>>,
    pending: Mutex<HashMap<Option<Identifier>, VecDeque<Reply<E>>>>,
    canned: Mutex<HashMap<Option<Identifier>, Result<E, FetchError>>>,
    call_count: watch::Sender<usize>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<E> Default for MockFetcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> MockFetcher<E> {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
            canned: Mutex::new(HashMap::new()),
            call_count: watch::channel(0).0,
        }
    }

    /// Settle every future fetch of `id` immediately with `result`.
    pub fn respond_with(self, id: &str, result: Result<E, FetchError>) -> Self {
        lock(&self.canned).insert(Some(Identifier::from(id)), result);
        self
    }

    /// Every identifier fetched so far, in call order.
    pub fn calls(&self) -> Vec<Option<Identifier>> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.borrow()
    }

    /// Wait until at least `n` fetches have been issued.
    pub async fn wait_for_calls(&self, n: usize) {
        let mut rx = self.call_count.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    /// Settle the oldest pending fetch of `id`. Returns `false` if there was none, or if its
    /// caller has already gone away.
    pub fn resolve(&self, id: &str, result: Result<E, FetchError>) -> bool {
        self.resolve_key(Some(Identifier::from(id)), result)
    }

    /// Settle the oldest pending fetch issued without an identifier.
    pub fn resolve_absent(&self, result: Result<E, FetchError>) -> bool {
        self.resolve_key(None, result)
    }

    fn resolve_key(&self, key: Option<Identifier>, result: Result<E, FetchError>) -> bool {
        let reply = lock(&self.pending)
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        match reply {
            Some(reply) => reply.send(result).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl<E> ResourceFetcher for MockFetcher<E>
where
    E: Clone + Send + 'static,
{
    type Entity = E;

    async fn fetch(&self, id: Option<Identifier>) -> Result<E, FetchError> {
        lock(&self.calls).push(id.clone());
        let canned = lock(&self.canned).get(&id).cloned();
        let rx = match canned {
            Some(result) => {
                self.call_count.send_modify(|count| *count += 1);
                return result;
            }
            None => {
                let (tx, rx) = oneshot::channel();
                lock(&self.pending).entry(id).or_default().push_back(tx);
                rx
            }
        };
        self.call_count.send_modify(|count| *count += 1);
        rx.await
            .unwrap_or_else(|_| Err(FetchError::Other("mock fetch abandoned".to_string())))
    }
}

/// Shorthand for a container holding a single `id` entry.
pub fn id_params(id: &str) -> ParamMap {
    [("id", id)].into_iter().collect()
}
