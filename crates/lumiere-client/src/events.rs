use tokio::sync::mpsc;

use lumiere_shared::{StreamId, Tip};
use lumiere_sync::LivenessState;

/// Events a [`StreamSession`](crate::session::StreamSession) emits toward
/// its UI layer.
///
/// Send failures are not events: `send_message` reports its error once,
/// directly to the caller.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The visible message sequence for the stream changed.
    MessagesChanged { stream_id: StreamId },
    /// A tip arrived (owner sessions only).
    TipReceived { stream_id: StreamId, tip: Tip },
    /// The presence-derived viewer count changed.
    ViewerCountChanged { stream_id: StreamId, count: usize },
    /// The liveness state machine moved.
    LivenessChanged {
        stream_id: StreamId,
        state: LivenessState,
    },
    /// Status polling gave up after the failure cap.
    PollExhausted { stream_id: StreamId },
}

/// Emit an event without blocking the session loops.  A UI layer that has
/// fallen behind loses events; losing an event is logged, never fatal.
pub fn emit(tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    if let Err(e) = tx.try_send(event) {
        tracing::warn!(error = %e, "Failed to emit session event");
    }
}
