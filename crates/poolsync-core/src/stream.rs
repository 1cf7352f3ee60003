// ── Reactive snapshot streams ──
//
// Subscription types for consuming snapshot changes from the store.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::Snapshot;

/// A subscription to the device snapshot.
///
/// Provides both point-in-time access and reactive change notification
/// via the `changed()` method or by converting to a `Stream`.
pub struct SnapshotStream {
    current: Option<Arc<Snapshot>>,
    receiver: watch::Receiver<Option<Arc<Snapshot>>>,
}

impl SnapshotStream {
    pub(crate) fn new(receiver: watch::Receiver<Option<Arc<Snapshot>>>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Get the snapshot captured at subscription time, if any poll had
    /// completed by then.
    pub fn current(&self) -> Option<&Arc<Snapshot>> {
        self.current.as_ref()
    }

    /// Get the latest snapshot (may have changed since subscription).
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next published snapshot.
    /// Returns `None` if the coordinator has been dropped.
    pub async fn changed(&mut self) -> Option<Arc<Snapshot>> {
        loop {
            self.receiver.changed().await.ok()?;
            let slot = self.receiver.borrow_and_update().clone();
            if let Some(snapshot) = slot {
                self.current = Some(Arc::clone(&snapshot));
                return Some(snapshot);
            }
        }
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> SnapshotWatchStream {
        SnapshotWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
///
/// Yields each newly published snapshot; the empty slot that precedes
/// the first successful poll is skipped.
pub struct SnapshotWatchStream {
    inner: WatchStream<Option<Arc<Snapshot>>>,
}

impl Stream for SnapshotWatchStream {
    type Item = Arc<Snapshot>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Some(snapshot))) => return Poll::Ready(Some(snapshot)),
                Poll::Ready(Some(None)) => {}
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
