use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::watch;

/// Cooperative shutdown coordinator shared by every worker in the process.
///
/// Implements a quit protocol with three pieces:
/// - **Join/Leave**: a counted registry of participating workers. A worker
///   joins before entering its loop and is guaranteed to leave when it
///   stops, because membership is a guard value dropped on any exit path.
/// - **Quit**: a one-shot broadcast cancellation signal observable by all
///   joined workers.
/// - **Wait**: a bounded drain that blocks until every joined worker has
///   left or a timeout elapses, reporting which occurred.
///
/// The same primitive drives both whole-process shutdown (one instance
/// shared by the listener, dispatcher, table actors and connections) and
/// single-connection teardown (one instance per connection, owned by its
/// reader/writer pair and its outbound mailbox).
///
/// ## Example
/// ```rust
/// # use rust_pubsub_db::shutdown::Shutdown;
/// # async fn demo() {
/// let shutdown = Shutdown::new();
/// let worker = shutdown.clone();
/// tokio::spawn(async move {
///     let _guard = worker.join();
///     worker.cancelled().await; // park until quit is raised
/// });
/// shutdown.quit();
/// assert!(shutdown.wait(std::time::Duration::from_secs(1)).await);
/// # }
/// ```
#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

struct Inner {
    /// Number of currently joined workers.
    joined: AtomicI64,
    /// One-shot cancellation signal; flips to `true` exactly once.
    signal: watch::Sender<bool>,
}

/// Membership token returned by [`Shutdown::join`]. Dropping it leaves the
/// quit protocol, so a panicking worker still gets counted out.
pub struct WorkerGuard {
    inner: Arc<Inner>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.inner.joined.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                joined: AtomicI64::new(0),
                signal,
            }),
        }
    }

    /// Registers the calling worker as a participant in the quit protocol.
    #[must_use = "dropping the guard immediately leaves the quit protocol"]
    pub fn join(&self) -> WorkerGuard {
        self.inner.joined.fetch_add(1, Ordering::AcqRel);
        WorkerGuard {
            inner: self.inner.clone(),
        }
    }

    /// Returns true once the quit protocol is in progress.
    pub fn is_done(&self) -> bool {
        *self.inner.signal.borrow()
    }

    /// Raises the cancellation signal. Safe to call more than once; only
    /// the first call has any effect.
    pub fn quit(&self) {
        self.inner.signal.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                true
            }
        });
    }

    /// Parks until the cancellation signal is raised. Returns immediately
    /// if it already was.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.signal.subscribe();
        // wait_for checks the current value first, so no signal is missed
        // between subscribe and await.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Number of currently joined workers.
    pub fn workers(&self) -> i64 {
        self.inner.joined.load(Ordering::Acquire)
    }

    /// Blocks until every joined worker has left or `timeout` elapses.
    /// Returns false on timeout. A zero timeout is a non-blocking probe.
    pub async fn wait(&self, timeout: Duration) -> bool {
        if timeout.is_zero() {
            return self.workers() == 0;
        }
        let deadline = tokio::time::Instant::now() + timeout;
        while self.workers() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    /// Raises the signal and waits for the drain in one step.
    pub async fn quit_and_wait(&self, timeout: Duration) -> bool {
        self.quit();
        self.wait(timeout).await
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
