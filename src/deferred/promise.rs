use super::error::DeferredError;
use may::sync::mpsc;
use serde_json::Value;
use std::sync::mpsc::TryRecvError;

/// Final state of a deferred value.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Resolved(Value),
    Rejected(DeferredError),
}

impl Settlement {
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Settlement::Resolved(_))
    }
}

fn dropped() -> Settlement {
    Settlement::Rejected(DeferredError::error(
        "Deferred value was dropped before it settled",
    ))
}

enum State {
    Settled(Settlement),
    Waiting(mpsc::Receiver<Settlement>),
}

/// A value a loader will produce later.
///
/// Settles exactly once. A [`Resolver`] dropped without settling rejects the
/// promise so nothing waits forever on a forgotten handle.
pub struct Promise {
    state: State,
}

impl std::fmt::Debug for Promise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.state {
            State::Settled(s) => f.debug_tuple("Promise").field(s).finish(),
            State::Waiting(_) => f.write_str("Promise(<pending>)"),
        }
    }
}

/// Write side of a [`Promise`]. Consuming methods enforce a single settlement.
pub struct Resolver {
    tx: mpsc::Sender<Settlement>,
}

impl Resolver {
    pub fn resolve(self, value: impl Into<Value>) {
        // The promise may already be gone (stream aborted, client left).
        let _ = self.tx.send(Settlement::Resolved(value.into()));
    }

    pub fn reject(self, error: DeferredError) {
        let _ = self.tx.send(Settlement::Rejected(error));
    }

    pub fn settle(self, settlement: Settlement) {
        let _ = self.tx.send(settlement);
    }
}

/// Create a connected resolver/promise pair.
#[must_use]
pub fn promise() -> (Resolver, Promise) {
    let (tx, rx) = mpsc::channel();
    (
        Resolver { tx },
        Promise {
            state: State::Waiting(rx),
        },
    )
}

impl Promise {
    /// An already-resolved promise.
    #[must_use]
    pub fn resolved(value: impl Into<Value>) -> Self {
        Self {
            state: State::Settled(Settlement::Resolved(value.into())),
        }
    }

    /// An already-rejected promise.
    #[must_use]
    pub fn rejected(error: DeferredError) -> Self {
        Self {
            state: State::Settled(Settlement::Rejected(error)),
        }
    }

    /// Run `work` on its own coroutine and settle with its result. A panic in
    /// `work` rejects the promise.
    #[must_use]
    pub fn spawn<F>(work: F) -> Self
    where
        F: FnOnce() -> Result<Value, DeferredError> + Send + 'static,
    {
        let (resolver, promise) = promise();
        let _ = may::go!(move || {
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(work)) {
                Ok(Ok(value)) => resolver.resolve(value),
                Ok(Err(err)) => resolver.reject(err),
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "deferred task panicked".to_string());
                    tracing::error!(panic_message = %message, "Deferred task panicked");
                    resolver.reject(DeferredError::error(message));
                }
            }
        });
        promise
    }

    /// Check for a settlement without blocking.
    pub fn poll_settled(&mut self) -> Option<&Settlement> {
        if let State::Waiting(rx) = &self.state {
            let settled = match rx.try_recv() {
                Ok(settlement) => settlement,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => dropped(),
            };
            self.state = State::Settled(settled);
        }
        match &self.state {
            State::Settled(s) => Some(s),
            State::Waiting(_) => None,
        }
    }

    /// Park the current coroutine (or thread) until the promise settles.
    #[must_use]
    pub fn wait(self) -> Settlement {
        match self.state {
            State::Settled(s) => s,
            State::Waiting(rx) => rx.recv().unwrap_or_else(|_| dropped()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn resolver_settles_promise() {
        let (resolver, mut promise) = promise();
        assert!(promise.poll_settled().is_none());
        resolver.resolve("R");
        assert_eq!(
            promise.poll_settled(),
            Some(&Settlement::Resolved(json!("R")))
        );
        assert_eq!(promise.wait(), Settlement::Resolved(json!("R")));
    }

    #[test]
    fn dropped_resolver_rejects() {
        let (resolver, promise) = promise();
        drop(resolver);
        match promise.wait() {
            Settlement::Rejected(DeferredError::Error { message, .. }) => {
                assert!(message.contains("dropped"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn spawned_work_settles_later() {
        let promise = Promise::spawn(|| {
            may::coroutine::sleep(Duration::from_millis(5));
            Ok(json!(42))
        });
        assert_eq!(promise.wait(), Settlement::Resolved(json!(42)));
    }

    #[test]
    fn spawned_panic_rejects() {
        let promise = Promise::spawn(|| panic!("boom"));
        match promise.wait() {
            Settlement::Rejected(DeferredError::Error { message, .. }) => assert_eq!(message, "boom"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
