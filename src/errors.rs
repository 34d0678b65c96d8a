/// Failures a [`ResourceFetcher`](crate::fetcher::ResourceFetcher) can report for one fetch.
///
/// Cloneable so the same failure can be logged and handed to the error callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The parameter container carried no identifier.
    #[error("no identifier to fetch")]
    MissingIdentifier,

    #[error("not found: {0}")]
    NotFound(String),

    /// The upstream answered with a non-success status other than 404.
    #[error("unexpected status {status} fetching {id}")]
    Status { id: String, status: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode entity: {0}")]
    Decode(String),

    /// Any other fetcher-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Errors raised while wiring or awaiting a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to subscribe to identifier source: {0:#}")]
    Subscribe(anyhow::Error),

    /// The driver task panicked or was torn down by the runtime.
    #[error("pipeline task ended abnormally")]
    TaskPanicked,

    /// The settled fetch failed. Only returned by [`Pipeline::first_value`](crate::Pipeline::first_value).
    #[error(transparent)]
    Fetch(#[from] FetchError),
}
