use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One periodic background task. Starting it again stops the previous
/// instance first, so at most one copy runs.
pub struct Driver {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl Driver {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handle: None,
            cancel_token: None,
        }
    }

    /// Spawns the loop built by `make`, handing it the token that ends it.
    pub fn start<F, Fut>(&mut self, make: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop();

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(make(cancel_token.clone()));

        log::debug!("{} driver started", self.name);
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
    }

    /// Cancels without waiting; the loop may be blocked on the state lock
    /// held by the caller.
    pub fn stop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
            log::debug!("{} driver stopped", self.name);
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.stop();
    }
}
