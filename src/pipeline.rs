//! The binding pipeline: identifier source → transformer → switch-latest → first-value gate →
//! callbacks.
//!
//! All notifications (new containers, settled fetches, cancellation) are processed one at a time
//! by a single driver task, so the switch-latest slot and the gate are never touched concurrently.
//!
//! Note that the gate ends the whole pipeline after the first settled fetch: identifiers arriving
//! after that are never looked at, even if the source keeps emitting. That is the observable
//! contract here, not an oversight to be papered over in callers.
use crate::errors::PipelineError;
use crate::fetcher::ResourceFetcher;
use crate::gate::FirstValueGate;
use crate::params::{ParamMap, Transformer};
use crate::source::IdentifierSource;
use crate::subscription::{Callbacks, Lifecycle, Outcome, SubscriptionHandle};
use crate::switch_latest::{Settled, SwitchLatest};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument};

pub struct Pipeline<S, T, F> {
    source: S,
    transformer: Arc<T>,
    fetcher: Arc<F>,
}

impl<S, T, F> Pipeline<S, T, F>
where
    S: IdentifierSource,
    T: Transformer + 'static,
    F: ResourceFetcher + 'static,
{
    pub fn new(source: S, transformer: T, fetcher: F) -> Self {
        Self {
            source,
            transformer: Arc::new(transformer),
            fetcher: Arc::new(fetcher),
        }
    }

    /// Share a fetcher that is also used elsewhere.
    pub fn with_shared_fetcher(source: S, transformer: T, fetcher: Arc<F>) -> Self {
        Self {
            source,
            transformer: Arc::new(transformer),
            fetcher,
        }
    }

    /// Subscribe to the source and start the pipeline (`Idle → Active`).
    ///
    /// Fails only if the source refuses the subscription; no callback has fired in that case.
    #[instrument(skip_all)]
    pub async fn subscribe(
        &self,
        callbacks: Callbacks<F::Entity>,
    ) -> Result<SubscriptionHandle, PipelineError> {
        let (lifecycle, state_rx) = Lifecycle::new(callbacks);
        let params_rx = self
            .source
            .subscribe()
            .await
            .map_err(PipelineError::Subscribe)?;

        lifecycle.activate();
        info!("Pipeline subscribed to identifier source");

        let (stop_tx, stop_rx) = oneshot::channel();
        let driver = Driver {
            transformer: Arc::clone(&self.transformer),
            switch: SwitchLatest::new(Arc::clone(&self.fetcher)),
            gate: FirstValueGate::new(),
        };
        let task = tokio::spawn(driver.run(params_rx, stop_rx, lifecycle));

        Ok(SubscriptionHandle::new(stop_tx, task, state_rx))
    }

    /// Run the pipeline to its end and hand back the single result.
    ///
    /// `Ok(None)` means the source ended before any fetch settled.
    pub async fn first_value(&self) -> Result<Option<F::Entity>, PipelineError> {
        let (value_tx, value_rx) = oneshot::channel();
        let handle = self
            .subscribe(Callbacks::new().on_value(move |entity| {
                let _ = value_tx.send(entity);
            }))
            .await?;

        match handle.join().await? {
            Outcome::Value => Ok(value_rx.await.ok()),
            Outcome::Failed(e) => Err(PipelineError::Fetch(e)),
            Outcome::Completed | Outcome::Cancelled => Ok(None),
        }
    }
}

struct Driver<T, F: ResourceFetcher> {
    transformer: Arc<T>,
    switch: SwitchLatest<F>,
    gate: FirstValueGate,
}

impl<T, F> Driver<T, F>
where
    T: Transformer + 'static,
    F: ResourceFetcher + 'static,
{
    async fn run(
        mut self,
        mut params_rx: mpsc::Receiver<ParamMap>,
        mut stop_rx: oneshot::Receiver<()>,
        lifecycle: Lifecycle<F::Entity>,
    ) -> Outcome {
        let mut source_done = false;

        let outcome = loop {
            tokio::select! {
                biased;
                // A dropped handle counts as a stop signal too.
                _ = &mut stop_rx => break lifecycle.cancel(),
                settled = self.switch.next_settled(), if self.switch.is_pending() => {
                    let Settled { token, result } = settled;
                    let Some(result) = self.switch.on_fetch_settled(token, result) else {
                        continue;
                    };
                    match self.gate.on_item(result) {
                        Some(item) => break lifecycle.deliver(item),
                        None => continue,
                    }
                }
                params = params_rx.recv(), if !source_done => match params {
                    Some(params) => {
                        let id = self.transformer.project(&params);
                        self.switch.on_identifier(id);
                    }
                    None => {
                        debug!("Identifier source ended");
                        source_done = true;
                    }
                },
            }

            // Outer sequence finished and no inner fetch is left to wait for.
            if source_done && !self.switch.is_pending() {
                break lifecycle.complete_empty();
            }
        };

        // Release the in-flight fetch and unsubscribe from the source.
        self.switch.cancel();
        params_rx.close();
        drop(params_rx);
        debug!(?outcome, "Pipeline driver finished");
        outcome
    }
}
