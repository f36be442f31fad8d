//! The aggregate handler: replays a swap's stream into state, runs the
//! executor, and appends the produced events under optimistic concurrency.
//!
//! Commands for one `swap_id` must not run concurrently; the dispatcher
//! serialises them per swap. The expected-version check still guards against
//! a racing writer, and a bounded retry re-reads the stream when it fires.

use crate::store::{EventMeta, EventStore, RecordedEvent, StoreError};
use crate::swap::command::{execute, Command, CommandMeta, ExecutorError};
use crate::swap::deps::Deps;
use crate::swap::state::State;
use crate::swap::SwapId;
use std::sync::Arc;
use tokio::sync::broadcast;

const MAX_APPEND_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fold a stream back into the current state.
pub fn replay<'a>(events: impl IntoIterator<Item = &'a RecordedEvent>) -> State {
    events
        .into_iter()
        .fold(State::zero(), |state, recorded| state.apply(&recorded.event))
}

pub struct SwapHandler {
    store: Arc<dyn EventStore>,
    deps: Deps,
    subscribers: broadcast::Sender<(SwapId, RecordedEvent)>,
}

impl SwapHandler {
    pub fn new(store: Arc<dyn EventStore>, deps: Deps) -> Self {
        let (subscribers, _) = broadcast::channel(256);
        Self {
            store,
            deps,
            subscribers,
        }
    }

    /// Observe every event this handler appends, in stream order per swap.
    pub fn subscribe(&self) -> broadcast::Receiver<(SwapId, RecordedEvent)> {
        self.subscribers.subscribe()
    }

    /// Current state of a swap, derived from its stream.
    pub async fn state_of(&self, swap_id: &SwapId) -> Result<State, HandlerError> {
        let events = self.store.read_stream(swap_id).await?;
        Ok(replay(&events))
    }

    /// Run one command against the swap and append whatever it produced.
    ///
    /// Either every event of the command is appended or none: the executor
    /// returns all events up front and the append is atomic. A version
    /// conflict re-reads the stream and retries the whole command a bounded
    /// number of times.
    ///
    /// Cancellation-safe: dropping the returned future before the append
    /// appends nothing, and a broadcast that still lands at the node is
    /// rediscovered by the next `SwapUpdate`/`NewBlock`.
    pub async fn execute(
        &self,
        swap_id: &SwapId,
        command: Command,
        meta: CommandMeta,
    ) -> Result<Vec<RecordedEvent>, HandlerError> {
        let mut attempt = 0;
        loop {
            let recorded = self.store.read_stream(swap_id).await?;
            let expected_version = recorded.len() as u64;
            let state = replay(&recorded);

            let events = execute(&state, command.clone(), &self.deps, &meta).await?;
            if events.is_empty() {
                return Ok(vec![]);
            }

            let events = events
                .into_iter()
                .map(|event| {
                    (
                        event,
                        EventMeta {
                            effective_date: meta.effective_date,
                            source: meta.source.clone(),
                        },
                    )
                })
                .collect();

            match self.store.append(swap_id, expected_version, events).await {
                Ok(appended) => {
                    for recorded in &appended {
                        // Send only fails when nobody subscribed.
                        let _ = self
                            .subscribers
                            .send((swap_id.clone(), recorded.clone()));
                    }
                    return Ok(appended);
                }
                Err(StoreError::VersionConflict { expected, actual })
                    if attempt + 1 < MAX_APPEND_ATTEMPTS =>
                {
                    attempt += 1;
                    tracing::debug!(
                        %swap_id,
                        expected,
                        actual,
                        attempt,
                        "stream moved while executing, retrying command"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
