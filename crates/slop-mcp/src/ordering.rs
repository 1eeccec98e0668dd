//! FIFO delivery of responses per upstream
//!
//! Every request takes a [`DeliveryTicket`] at the moment it is handed to the
//! client session. A ticket may hand its response to the caller only after
//! the ticket issued before it has been released, or once the caller's own
//! deadline has passed. Releasing happens on drop, so
//! a request that is abandoned (timeout, cancel) never stalls later ones: its
//! ticket forwards the release as soon as its own predecessor is done.

use parking_lot::Mutex;
use tokio::sync::oneshot;

#[derive(Debug, Default)]
pub(crate) struct OrderGate {
    tail: Mutex<Option<oneshot::Receiver<()>>>,
}

impl OrderGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Issue the next ticket. Callers must hold whatever lock orders
    /// submission, so ticket order equals submission order.
    pub(crate) fn issue(&self) -> DeliveryTicket {
        let (release, next) = oneshot::channel();
        let predecessor = self.tail.lock().replace(next);
        DeliveryTicket {
            predecessor,
            release: Some(release),
        }
    }
}

#[derive(Debug)]
pub(crate) struct DeliveryTicket {
    predecessor: Option<oneshot::Receiver<()>>,
    release: Option<oneshot::Sender<()>>,
}

impl DeliveryTicket {
    /// Wait until every earlier ticket has been released
    pub(crate) async fn wait_turn(&mut self) {
        // Kept in place until resolved: this future may be dropped mid-wait
        if let Some(prev) = self.predecessor.as_mut() {
            // Err means the predecessor was dropped, which also releases us
            let _ = prev.await;
            self.predecessor = None;
        }
    }
}

impl Drop for DeliveryTicket {
    fn drop(&mut self) {
        let Some(release) = self.release.take() else {
            return;
        };
        match self.predecessor.take() {
            None => {
                let _ = release.send(());
            }
            Some(mut prev) => {
                if !matches!(prev.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
                    let _ = release.send(());
                    return;
                }
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move {
                            let _ = prev.await;
                            let _ = release.send(());
                        });
                    }
                    Err(_) => {
                        let _ = release.send(());
                    }
                }
            }
        }
    }
}
