//! Process-wide shutdown signalling for the long-lived client tasks.

use tokio::sync::watch;

/// Sending half, held by whoever orchestrates the process lifecycle.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Tells all subscribed tasks to stop starting new work.
    pub fn send(&self) {
        let _ = self.tx.send(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half, polled by tasks between units of work.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn should_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn wait_for_shutdown(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                // sender dropped, treat as shutdown
                return;
            }
        }
    }
}
