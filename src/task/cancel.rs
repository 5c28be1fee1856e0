use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Cooperative cancellation signal shared by a task and its waiters.
///
/// The wake channel never carries a message; cancellation is signaled by
/// dropping the sender, which makes every receiver return `Disconnected`
/// immediately and forever after. That gives blocked execution steps a
/// `select!`-able wake source without busy-polling.
pub(crate) struct CancelToken {
    requested: AtomicBool,
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            requested: AtomicBool::new(false),
            sender: Mutex::new(Some(sender)),
            receiver,
        }
    }

    /// Marks the token canceled. Returns true on the first call only.
    pub fn fire(&self) -> bool {
        if self.requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.sender.lock().take();
        true
    }

    pub fn is_canceled(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Channel that disconnects when the token fires.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }

    /// Blocks up to `timeout` for cancellation; true if the token fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.receiver.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("requested", &self.is_canceled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::TryRecvError;

    #[test]
    fn test_fire_once() {
        let token = CancelToken::new();
        assert!(!token.is_canceled());
        assert!(token.fire());
        assert!(token.is_canceled());
        assert!(!token.fire());
    }

    #[test]
    fn test_receiver_wakes_on_fire() {
        let token = CancelToken::new();
        assert_eq!(
            token.receiver().try_recv(),
            Err(TryRecvError::Empty),
            "live token must not look canceled"
        );
        token.fire();
        assert_eq!(token.receiver().try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn test_wait_timeout() {
        let token = CancelToken::new();
        assert!(!token.wait_timeout(Duration::from_millis(10)));
        token.fire();
        assert!(token.wait_timeout(Duration::from_millis(10)));
    }
}
