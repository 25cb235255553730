//! Fragment channel between the relay task and its reader.
//!
//! The relay always runs as a task pushing into a bounded `mpsc` channel.
//! Async hosts read it as [`Fragments`] (`recv().await` or as a
//! `futures_util::Stream`). Synchronous hosts read it as
//! [`BlockingFragments`], a plain `Iterator` that parks the calling thread
//! on `blocking_recv` until the next fragment or the end of the answer.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::runtime::{self, Handle, Runtime};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Async view of one answer.
#[derive(Debug)]
pub struct Fragments {
    rx: mpsc::Receiver<String>,
}

impl Fragments {
    /// A bounded channel; the sender goes to the producing task.
    pub fn channel(capacity: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }

    /// Next fragment, or `None` once the producer has finished.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Drain the remaining fragments into one string.
    pub async fn concat(mut self) -> String {
        let mut text = String::new();
        while let Some(fragment) = self.rx.recv().await {
            text.push_str(&fragment);
        }
        text
    }

    /// Pull from a plain thread instead. The caller must keep the producing
    /// runtime alive.
    pub fn into_blocking(self) -> BlockingFragments {
        BlockingFragments { rx: self.rx, runtime: None }
    }
}

impl Stream for Fragments {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.rx.poll_recv(cx)
    }
}

/// Synchronous view of one answer.
///
/// When no tokio runtime was available to run the producer, this owns a
/// single-worker runtime created for it; dropping the iterator shuts that
/// runtime down and abandons the request.
pub struct BlockingFragments {
    // Declared before the runtime so the channel closes first on drop.
    rx: mpsc::Receiver<String>,
    runtime: Option<Runtime>,
}

impl Iterator for BlockingFragments {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.rx.blocking_recv()
    }
}

impl std::fmt::Debug for BlockingFragments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingFragments")
            .field("owns_runtime", &self.runtime.is_some())
            .finish()
    }
}

/// Run `produce` on the ambient runtime, or on a runtime created for it, and
/// return a blocking reader of what it sends.
///
/// If no runtime can be created the failure is reported as the only
/// fragment, so callers never see an error.
pub fn spawn_blocking_reader<F, Fut>(capacity: usize, produce: F) -> BlockingFragments
where
    F: FnOnce(mpsc::Sender<String>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, fragments) = Fragments::channel(capacity);

    if let Ok(handle) = Handle::try_current() {
        handle.spawn(produce(tx));
        return fragments.into_blocking();
    }

    match runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("ragflow-relay")
        .enable_all()
        .build()
    {
        Ok(rt) => {
            debug!("no ambient tokio runtime, relay runs on an owned runtime");
            rt.spawn(produce(tx));
            BlockingFragments { rx: fragments.rx, runtime: Some(rt) }
        }
        Err(e) => {
            error!(error = %e, "failed to start relay runtime");
            // Capacity is at least one and the channel is fresh.
            let _ = tx.try_send(format!("An unexpected error occurred: {e}"));
            fragments.into_blocking()
        }
    }
}
