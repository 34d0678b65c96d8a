//! Resource fetcher abstraction for resolving an identifier into an entity
//!
//! This module provides the interface the pipeline uses to turn an identifier into a fetched
//! entity, allowing different implementations (HTTP, closures, mock fetchers for testing, etc.)
//! to be used interchangeably. Each call is independent and yields exactly one result.
use crate::errors::FetchError;
use crate::params::Identifier;
use async_trait::async_trait;
use axum::http::{StatusCode, Uri};
use bon::Builder;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

pub type HyperClient = Client<
    hyper_tls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
    axum::body::Body,
>;

#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    type Entity: Send + 'static;

    /// Fetch the entity for `id`. What an absent identifier means is up to the implementation.
    async fn fetch(&self, id: Option<Identifier>) -> Result<Self::Entity, FetchError>;
}

/// Adapts an async closure into a [`ResourceFetcher`]. See [`fetch_fn`].
pub struct FnFetcher<F, E> {
    f: F,
    _entity: PhantomData<fn() -> E>,
}

/// Use an async closure as a fetcher.
pub fn fetch_fn<F, Fut, E>(f: F) -> FnFetcher<F, E>
where
    F: Fn(Option<Identifier>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<E, FetchError>> + Send + 'static,
    E: Send + 'static,
{
    FnFetcher {
        f,
        _entity: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, E> ResourceFetcher for FnFetcher<F, E>
where
    F: Fn(Option<Identifier>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<E, FetchError>> + Send + 'static,
    E: Send + 'static,
{
    type Entity = E;

    async fn fetch(&self, id: Option<Identifier>) -> Result<E, FetchError> {
        (self.f)(id).await
    }
}

/// An [`HttpFetcher`] that hands back raw JSON.
pub type JsonFetcher = HttpFetcher<serde_json::Value>;

/// Fetches JSON entities with `GET {base_url}/api/{collection}/{id}`.
///
/// An absent identifier fails with [`FetchError::MissingIdentifier`] without touching the network.
#[derive(Debug, Clone, Builder)]
pub struct HttpFetcher<T> {
    base_url: Url,
    #[builder(into, default = "users".to_string())]
    collection: String,
    #[builder(default = create_hyper_client())]
    client: HyperClient,
    #[builder(skip)]
    _entity: PhantomData<fn() -> T>,
}

impl<T> HttpFetcher<T> {
    /// The URL an identifier resolves to.
    pub fn entity_url(&self, id: &Identifier) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::Other(format!("cannot use {} as a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(["api", self.collection.as_str(), id.as_str()]);
        Ok(url)
    }
}

#[async_trait]
impl<T> ResourceFetcher for HttpFetcher<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Entity = T;

    #[instrument(skip(self))]
    async fn fetch(&self, id: Option<Identifier>) -> Result<T, FetchError> {
        let id = id.ok_or(FetchError::MissingIdentifier)?;
        let url = self.entity_url(&id)?;
        let uri: Uri = url
            .as_str()
            .parse()
            .map_err(|e| FetchError::Other(format!("invalid uri {url}: {e}")))?;

        let req = axum::http::Request::get(uri)
            .header("accept", "application/json")
            .body(axum::body::Body::empty())
            .map_err(|e| FetchError::Other(e.to_string()))?;

        debug!("Fetching {}", url);
        let res: hyper::Response<hyper::body::Incoming> = self
            .client
            .request(req)
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(id.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                id: id.to_string(),
                status: status.as_u16(),
            });
        }

        let body = axum::body::to_bytes(axum::body::Body::new(res.into_body()), usize::MAX)
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

/// Idle pooled connections are dropped after this long.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

pub fn create_hyper_client() -> HyperClient {
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_timer(TokioTimer::new())
        .build(hyper_tls::HttpsConnector::new())
}
