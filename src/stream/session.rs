//! Streaming session control: supersession, cancellation and resolution

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::decoder::FrameDecoder;
use super::event::{interpret, StreamEvent};
use crate::api::error::{ClientError, Result};
use crate::api::TripPlanResponse;

pub const DEFAULT_SUCCESS_MESSAGE: &str = "Trip plan generated";
pub const DEFAULT_FAILURE_MESSAGE: &str = "Failed to generate trip plan";

struct ActiveSession {
    id: u64,
    token: CancellationToken,
}

/// Owns the single in-flight session slot.
///
/// Beginning a session cancels whatever session held the slot before, so at
/// most one session is ever live per controller.
#[derive(Default)]
pub struct SessionController {
    active: Mutex<Option<ActiveSession>>,
    next_id: AtomicU64,
}

impl SessionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for a new session, cancelling the previous holder.
    pub fn begin(&self) -> SessionHandle<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();

        let previous = self.slot().replace(ActiveSession {
            id,
            token: token.clone(),
        });
        if let Some(previous) = previous {
            tracing::debug!("Session {} superseded by session {}", previous.id, id);
            previous.token.cancel();
        }

        SessionHandle {
            controller: self,
            id,
            token,
        }
    }

    /// Cancel the in-flight session, if any. Returns whether one was running.
    pub fn cancel_current(&self) -> bool {
        match self.slot().take() {
            Some(active) => {
                tracing::debug!("Cancelling session {}", active.id);
                active.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.slot().is_some()
    }

    fn release(&self, id: u64) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|active| active.id == id) {
            *slot = None;
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held for the lifetime of one session; frees the slot on drop unless a
/// newer session already took it.
pub struct SessionHandle<'a> {
    controller: &'a SessionController,
    id: u64,
    token: CancellationToken,
}

impl SessionHandle<'_> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for SessionHandle<'_> {
    fn drop(&mut self) {
        self.controller.release(self.id);
    }
}

/// Drive one session's byte stream to its single settlement.
///
/// Every decoded event is handed to `on_event` in arrival order before it
/// is considered for resolution. The first `complete` carrying a plan
/// resolves the session and the first `error` rejects it; reading stops at
/// either. Cancellation via `token` rejects with [`ClientError::Cancelled`]
/// and no further events are delivered once it is observed.
pub async fn drive<S, B, E, F>(
    stream: S,
    token: &CancellationToken,
    mut on_event: F,
) -> Result<TripPlanResponse>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    F: FnMut(&StreamEvent),
{
    futures::pin_mut!(stream);
    let mut decoder = FrameDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(ClientError::Cancelled),
            next = stream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                for body in decoder.push(chunk.as_ref()) {
                    if let Some(settlement) = handle_frame(&body, token, &mut on_event) {
                        return settlement;
                    }
                }
            }
            Some(Err(e)) => {
                if token.is_cancelled() {
                    return Err(ClientError::Cancelled);
                }
                tracing::warn!("Event stream read failed: {}", e);
                return Err(ClientError::Network(e.to_string()));
            }
            None => break,
        }
    }

    if let Some(body) = decoder.finish() {
        if let Some(settlement) = handle_frame(&body, token, &mut on_event) {
            return settlement;
        }
    }

    if token.is_cancelled() {
        return Err(ClientError::Cancelled);
    }
    tracing::warn!("Event stream closed before a trip plan arrived");
    Err(ClientError::IncompleteStream)
}

/// Interpret and dispatch one frame. `Some` means the session settled.
fn handle_frame<F>(
    body: &str,
    token: &CancellationToken,
    on_event: &mut F,
) -> Option<Result<TripPlanResponse>>
where
    F: FnMut(&StreamEvent),
{
    if token.is_cancelled() {
        return Some(Err(ClientError::Cancelled));
    }

    let event = interpret(body)?;
    tracing::debug!("Stream event: {}", event.kind());

    if catch_unwind(AssertUnwindSafe(|| on_event(&event))).is_err() {
        tracing::error!("Progress callback panicked on {} event", event.kind());
    }

    if !event.is_terminal() {
        return None;
    }

    Some(settle(event))
}

fn settle(event: StreamEvent) -> Result<TripPlanResponse> {
    match event {
        StreamEvent::Complete {
            plan,
            message,
            requires_login,
        } => Ok(TripPlanResponse {
            success: true,
            message: message.unwrap_or_else(|| DEFAULT_SUCCESS_MESSAGE.to_string()),
            data: plan,
            requires_login,
        }),
        StreamEvent::Error { message } => Err(ClientError::Backend(
            message.unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
        )),
        other => Err(ClientError::Backend(format!(
            "Unexpected {} event settled the stream",
            other.kind()
        ))),
    }
}
