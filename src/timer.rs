use std::time::Duration;
use tokio::task::JoinHandle;

/// One-shot timer slot; arming replaces any pending firing.
#[derive(Debug, Default)]
pub(crate) struct Timer {
    handle: Option<JoinHandle<()>>,
}

impl Timer {
    /// Run `on_fire` after `delay` unless cancelled first. Needs a tokio runtime.
    pub fn arm<F>(&mut self, delay: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire();
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Forget the pending handle without aborting it; used by the firing task itself
    pub fn disarm(&mut self) {
        self.handle.take();
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}
