//! Run-wide cancellation signal

use tokio::sync::watch;

/// Owner side: flips the run into the cancelled state
#[derive(Debug, Clone)]
pub struct RunCanceller {
    sender: watch::Sender<bool>,
}

/// Observer side, cheap to clone into every job task
#[derive(Debug, Clone)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
}

impl Default for RunCanceller {
    fn default() -> Self {
        Self::new()
    }
}

impl RunCanceller {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Cancel the run; idempotent
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            receiver: self.sender.subscribe(),
        }
    }
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the run is cancelled; never resolves if the canceller is gone
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
