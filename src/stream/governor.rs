//! # Abort/Timeout Governor
//!
//! One governor per stream. It arms a timer coroutine when assembly starts; if
//! the timer fires before every deferred value settled, it trips the request's
//! [`AbortSignal`] and wakes the assembler with [`StreamEvent::Abort`]. Aborting
//! is idempotent: the signal trips once and only the first trip sends the event.

use super::assembler::StreamEvent;
use crate::ids::RequestId;
use may::coroutine::JoinHandle;
use may::sync::mpsc;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What tripped an abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The abort delay elapsed.
    Timeout,
    /// Someone called [`AbortHandle::abort`].
    Cancelled,
    /// The transport went away.
    Disconnected,
}

impl AbortReason {
    fn code(self) -> u8 {
        match self {
            AbortReason::Timeout => 1,
            AbortReason::Cancelled => 2,
            AbortReason::Disconnected => 3,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(AbortReason::Timeout),
            2 => Some(AbortReason::Cancelled),
            3 => Some(AbortReason::Disconnected),
            _ => None,
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AbortReason::Timeout => "timeout",
            AbortReason::Cancelled => "cancelled",
            AbortReason::Disconnected => "disconnected",
        })
    }
}

/// Read side of a request's abort state. Loaders can poll it to stop work
/// nobody will receive.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    reason: Arc<AtomicU8>,
}

impl AbortSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.reason.load(Ordering::Acquire) != 0
    }

    #[must_use]
    pub fn reason(&self) -> Option<AbortReason> {
        AbortReason::from_code(self.reason.load(Ordering::Acquire))
    }

    /// Trip the signal. Returns `true` only for the first caller.
    pub(crate) fn trip(&self, reason: AbortReason) -> bool {
        self.reason
            .compare_exchange(0, reason.code(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Write side: trips the signal and wakes the stream that owns it.
#[derive(Clone)]
pub struct AbortHandle {
    signal: AbortSignal,
    events: mpsc::Sender<StreamEvent>,
}

impl AbortHandle {
    pub(crate) fn new(signal: AbortSignal, events: mpsc::Sender<StreamEvent>) -> Self {
        Self { signal, events }
    }

    /// Abort the stream. Returns `false` if it was already aborted.
    pub fn abort(&self, reason: AbortReason) -> bool {
        if !self.signal.trip(reason) {
            return false;
        }
        // The stream may have completed already; nothing left to wake.
        let _ = self.events.send(StreamEvent::Abort(reason));
        true
    }

    #[must_use]
    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortHandle")
            .field("signal", &self.signal)
            .finish_non_exhaustive()
    }
}

/// Timer that aborts a stream after a delay unless disarmed first.
pub struct AbortGovernor {
    disarmed: Arc<AtomicBool>,
    handle: AbortHandle,
    request_id: RequestId,
    timer: JoinHandle<()>,
}

impl AbortGovernor {
    /// Start the timer on its own coroutine.
    #[must_use]
    pub fn arm(delay: Duration, handle: AbortHandle, request_id: RequestId) -> Self {
        let disarmed = Arc::new(AtomicBool::new(false));
        let timer_disarmed = Arc::clone(&disarmed);
        let timer_handle = handle.clone();
        debug!(
            request_id = %request_id,
            delay_ms = delay.as_millis() as u64,
            "Abort governor armed"
        );
        let timer = may::go!(move || {
            may::coroutine::sleep(delay);
            if timer_disarmed.load(Ordering::Acquire) {
                return;
            }
            if timer_handle.abort(AbortReason::Timeout) {
                warn!(
                    request_id = %request_id,
                    delay_ms = delay.as_millis() as u64,
                    "Abort delay elapsed with deferred values pending"
                );
            }
        });
        Self {
            disarmed,
            handle,
            request_id,
            timer,
        }
    }

    /// Stop the timer from firing and release its coroutine. Returns `false`
    /// if already disarmed.
    pub fn disarm(&self) -> bool {
        let first = !self.disarmed.swap(true, Ordering::AcqRel);
        if first {
            if !self.timer.is_done() {
                // SAFETY: the timer only owns the disarm flag and an
                // `AbortHandle`; both are dropped on unwind. Cancelling wakes
                // it out of `sleep`.
                unsafe {
                    self.timer.coroutine().cancel();
                }
            }
            debug!(request_id = %self.request_id, "Abort governor disarmed");
        }
        first
    }

    #[must_use]
    pub fn is_disarmed(&self) -> bool {
        self.disarmed.load(Ordering::Acquire)
    }

    /// Abort right away, for the same effect as the timer firing.
    pub fn abort(&self, reason: AbortReason) -> bool {
        self.handle.abort(reason)
    }

    #[must_use]
    pub fn signal(&self) -> &AbortSignal {
        self.handle.signal()
    }
}
