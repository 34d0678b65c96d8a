//! Switchbind - bind a changing identifier to a fetched resource
//!
//! An identifier source emits parameter containers over time (a routed parameter, a watched
//! file, a channel). Each container is projected to an identifier, and every new identifier
//! starts a fetch that supersedes whatever was in flight: only the latest fetch may deliver.
//! The first result to get through (success or failure) ends the whole pipeline, after which the
//! source is unsubscribed and further identifiers are ignored.
//!
//! ```ignore
//! let pipeline = Pipeline::new(
//!     WatchedFile("params.json".into()),
//!     ParamKey::default(),
//!     JsonFetcher::builder().base_url(base_url).build(),
//! );
//!
//! let handle = pipeline
//!     .subscribe(Callbacks::new().on_value(|user| println!("{user}")))
//!     .await?;
//! handle.join().await?;
//! ```
//!
//! A pipeline only ever reacts to identifier changes until its first result. Callers that need
//! to follow later changes must start a new pipeline.

pub mod errors;
pub mod fetcher;
pub mod gate;
pub mod params;
pub mod pipeline;
pub mod source;
pub mod subscription;
pub mod switch_latest;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use errors::{FetchError, PipelineError};
pub use fetcher::{HttpFetcher, JsonFetcher, ResourceFetcher, fetch_fn};
pub use gate::FirstValueGate;
pub use params::{Identifier, ParamKey, ParamMap, Transformer};
pub use pipeline::Pipeline;
pub use source::IdentifierSource;
pub use subscription::{Callbacks, Outcome, PipelineState, SubscriptionHandle};
pub use switch_latest::{RequestToken, SwitchLatest};
