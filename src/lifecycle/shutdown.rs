//! One-shot execution for shutdown.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// Runs a body at most once and hands its result to every caller.
///
/// The first caller spawns the body onto its own task, so dropping that
/// caller's future does not abandon the work. Every caller, the first one
/// included, waits for the recorded result.
#[derive(Debug)]
pub struct OneShot<T> {
    started: AtomicBool,
    outcome: Arc<watch::Sender<Option<T>>>,
}

impl<T> OneShot<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            started: AtomicBool::new(false),
            outcome: Arc::new(outcome),
        }
    }

    /// Whether some caller has already begun executing the body.
    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// The recorded result, if the body has finished.
    pub fn result(&self) -> Option<T> {
        self.outcome.borrow().clone()
    }

    pub async fn run<F>(&self, body: F) -> T
    where
        F: Future<Output = T> + Send + 'static,
    {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let outcome = Arc::clone(&self.outcome);
            tokio::spawn(async move {
                let value = body.await;
                outcome.send_replace(Some(value));
            });
        }

        let mut rx = self.outcome.subscribe();
        loop {
            let recorded = rx.borrow_and_update().clone();
            if let Some(value) = recorded {
                return value;
            }
            rx.changed()
                .await
                .expect("one-shot sender outlives its receivers");
        }
    }
}

impl<T> Default for OneShot<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
