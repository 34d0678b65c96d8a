//! Subscription lifecycle
//!
//! Binds the three observer callbacks to a running pipeline and guarantees the terminal contract:
//! either one `on_value` followed by one `on_complete`, or one `on_error`, or (when the source ends
//! without producing a settled fetch) a lone `on_complete`. Callbacks are `FnOnce` and are taken out
//! of their slots when fired, so nothing can run after termination.
//!
//! A running pipeline is observed and controlled through a [`SubscriptionHandle`]:
//!
//! ```ignore
//! let handle = pipeline
//!     .subscribe(
//!         Callbacks::new()
//!             .on_value(|user| println!("{user}"))
//!             .on_error(|e| eprintln!("{e}")),
//!     )
//!     .await?;
//!
//! // Later, either wait for the outcome or tear the pipeline down.
//! let outcome = handle.stop().await?;
//! ```
use crate::errors::{FetchError, PipelineError};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pipeline-wide state. `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Active,
    Terminated,
}

/// How a pipeline ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// `on_value` then `on_complete` fired.
    Value,
    /// `on_error` fired with this failure.
    Failed(FetchError),
    /// The source ended before any fetch settled; only `on_complete` fired.
    Completed,
    /// Torn down from outside; no callback fired.
    Cancelled,
}

type ValueCallback<E> = Box<dyn FnOnce(E) + Send + 'static>;
type ErrorCallback = Box<dyn FnOnce(FetchError) + Send + 'static>;
type CompleteCallback = Box<dyn FnOnce() + Send + 'static>;

/// The three observer slots, registered once when the pipeline starts.
///
/// Unset slots fall back to logging, so a failure is always reported somewhere observable.
pub struct Callbacks<E> {
    on_value: Option<ValueCallback<E>>,
    on_error: Option<ErrorCallback>,
    on_complete: Option<CompleteCallback>,
}

impl<E> Default for Callbacks<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Callbacks<E> {
    pub fn new() -> Self {
        Self {
            on_value: None,
            on_error: None,
            on_complete: None,
        }
    }

    #[must_use]
    pub fn on_value<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(E) + Send + 'static,
    {
        self.on_value = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(FetchError) + Send + 'static,
    {
        self.on_error = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }
}

/// Owns the callbacks and the state for one pipeline run. Each terminal method consumes it.
pub(crate) struct Lifecycle<E> {
    callbacks: Callbacks<E>,
    state: watch::Sender<PipelineState>,
}

impl<E> Lifecycle<E> {
    pub(crate) fn new(callbacks: Callbacks<E>) -> (Self, watch::Receiver<PipelineState>) {
        let (state, state_rx) = watch::channel(PipelineState::Idle);
        (Self { callbacks, state }, state_rx)
    }

    pub(crate) fn activate(&self) {
        self.state.send_replace(PipelineState::Active);
    }

    /// Deliver the single item that made it through the gate.
    pub(crate) fn deliver(self, item: Result<E, FetchError>) -> Outcome {
        let Callbacks {
            on_value,
            on_error,
            on_complete,
        } = self.callbacks;
        self.state.send_replace(PipelineState::Terminated);

        match item {
            Ok(entity) => {
                if let Some(on_value) = on_value {
                    on_value(entity);
                }
                fire_complete(on_complete);
                info!("Pipeline delivered its value and completed");
                Outcome::Value
            }
            Err(e) => {
                match on_error {
                    Some(on_error) => on_error(e.clone()),
                    None => error!("Error fetching entity: {}", e),
                }
                info!("Pipeline terminated with an error");
                Outcome::Failed(e)
            }
        }
    }

    /// The source ended and nothing is left in flight.
    pub(crate) fn complete_empty(self) -> Outcome {
        self.state.send_replace(PipelineState::Terminated);
        info!("Identifier source ended before any fetch settled");
        fire_complete(self.callbacks.on_complete);
        Outcome::Completed
    }

    /// External cancellation: terminate without firing anything.
    pub(crate) fn cancel(self) -> Outcome {
        self.state.send_replace(PipelineState::Terminated);
        debug!("Pipeline cancelled");
        Outcome::Cancelled
    }
}

fn fire_complete(on_complete: Option<CompleteCallback>) {
    match on_complete {
        Some(on_complete) => on_complete(),
        None => debug!("Pipeline complete"),
    }
}

/// Handle to a running pipeline.
///
/// Dropping the handle sends a best-effort stop signal. Call [`stop()`](Self::stop) to cancel
/// and observe the outcome, or [`join()`](Self::join) to wait for the pipeline to end by itself.
pub struct SubscriptionHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Outcome>>,
    state: watch::Receiver<PipelineState>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        stop_tx: oneshot::Sender<()>,
        task: JoinHandle<Outcome>,
        state: watch::Receiver<PipelineState>,
    ) -> Self {
        Self {
            stop_tx: Some(stop_tx),
            task: Some(task),
            state,
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == PipelineState::Terminated
    }

    /// Wait until the pipeline reaches `Terminated`, without consuming the handle.
    pub async fn terminated(&mut self) {
        let _ = self
            .state
            .wait_for(|state| *state == PipelineState::Terminated)
            .await;
    }

    /// Signal cancellation without waiting. Has no effect once the pipeline has terminated.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Cancel the pipeline and wait for it to finish.
    ///
    /// If the pipeline had already ended on its own, that outcome is returned instead.
    pub async fn stop(mut self) -> Result<Outcome, PipelineError> {
        self.cancel();
        self.wait().await
    }

    /// Wait for the pipeline to end on its own.
    pub async fn join(mut self) -> Result<Outcome, PipelineError> {
        self.wait().await
    }

    async fn wait(&mut self) -> Result<Outcome, PipelineError> {
        let task = self.task.take().ok_or(PipelineError::TaskPanicked)?;
        let outcome = task.await.map_err(|_| PipelineError::TaskPanicked)?;
        // Nothing left to cancel.
        self.stop_tx = None;
        Ok(outcome)
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        let Some(task) = self.task.as_ref() else {
            return;
        };
        if task.is_finished() {
            return;
        }
        warn!("Subscription handle dropped without stop(); cancelling pipeline");
        self.cancel();
    }
}
