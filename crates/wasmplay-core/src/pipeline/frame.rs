//! Execution-frame seam.
//!
//! A frame is a fresh, isolated context that receives the linked module plus
//! [`BOOTSTRAP`] and reports back twice: once when the module has finished
//! running and once when the frame itself has loaded. The session is not
//! done until both have arrived, in either order.

use std::io;

use tokio::sync::oneshot;

use crate::vfs::BoxFuture;

/// Minimal loader run inside every frame. Expects the runtime support
/// script (`wasm_exec.js`) to define `Go`, and `MODULE_URL` to point at the
/// module bytes.
pub const BOOTSTRAP: &str = r#"(async () => {
  const go = new Go();
  const notify = (type) => window.parent.postMessage({ type }, "*");
  window.addEventListener("load", () => notify("frame-loaded"));
  try {
    const { instance } = await WebAssembly.instantiateStreaming(fetch(MODULE_URL), go.importObject);
    await go.run(instance);
  } catch (err) {
    console.error(err);
  }
  notify("module-done");
})();
"#;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("failed to create execution frame: {0}")]
    Create(String),
    #[error("execution frame closed before signalling {0}")]
    Closed(&'static str),
    #[error("execution frame I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// The frame's two completion signals.
pub struct FrameSignals {
    module_done: oneshot::Receiver<()>,
    loaded: oneshot::Receiver<()>,
}

/// Sending halves handed to whoever drives the frame.
pub struct FrameNotifier {
    pub module_done: oneshot::Sender<()>,
    pub loaded: oneshot::Sender<()>,
}

impl FrameNotifier {
    /// Fire both signals immediately.
    pub fn complete(self) {
        let _ = self.loaded.send(());
        let _ = self.module_done.send(());
    }
}

impl FrameSignals {
    pub fn channel() -> (FrameNotifier, FrameSignals) {
        let (done_tx, done_rx) = oneshot::channel();
        let (load_tx, load_rx) = oneshot::channel();
        (
            FrameNotifier {
                module_done: done_tx,
                loaded: load_tx,
            },
            FrameSignals {
                module_done: done_rx,
                loaded: load_rx,
            },
        )
    }

    /// Wait for both signals.
    pub async fn wait(self) -> Result<(), FrameError> {
        let (done, loaded) = tokio::join!(self.module_done, self.loaded);
        done.map_err(|_| FrameError::Closed("module completion"))?;
        loaded.map_err(|_| FrameError::Closed("load"))?;
        Ok(())
    }
}

pub trait FrameHost: Send + Sync {
    /// Create a fresh frame running `module` under `bootstrap`.
    fn create<'a>(
        &'a self,
        module: &'a [u8],
        bootstrap: &'a str,
    ) -> BoxFuture<'a, Result<FrameSignals, FrameError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_waits_for_both_signals_in_any_order() {
        let (notifier, signals) = FrameSignals::channel();
        let FrameNotifier {
            module_done,
            loaded,
        } = notifier;
        let waiter = tokio::spawn(signals.wait());

        module_done.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        loaded.send(()).unwrap();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dropped_sender_is_closed() {
        let (notifier, signals) = FrameSignals::channel();
        let _ = notifier.loaded.send(());
        drop(notifier.module_done);
        let err = signals.wait().await.unwrap_err();
        assert!(matches!(err, FrameError::Closed("module completion")));
    }

    #[test]
    fn test_bootstrap_signals_both_events() {
        assert!(BOOTSTRAP.contains("module-done"));
        assert!(BOOTSTRAP.contains("frame-loaded"));
    }
}
