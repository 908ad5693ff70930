//! Frames on disk: each run gets a fresh directory holding the module, the
//! bootstrap loader and an `index.html` that can be opened in a browser.

use std::path::PathBuf;

use wasmplay_core::pipeline::{FrameError, FrameHost, FrameSignals};
use wasmplay_core::vfs::BoxFuture;

const MODULE_FILE: &str = "main.wasm";

pub struct FileFrameHost {
    dir: PathBuf,
    wasm_exec: Option<PathBuf>,
}

impl FileFrameHost {
    /// Frames are written to `<out_dir>/frame`, replacing the previous one.
    pub fn new(out_dir: PathBuf, wasm_exec: Option<PathBuf>) -> Self {
        Self {
            dir: out_dir.join("frame"),
            wasm_exec,
        }
    }

    fn index_html(&self) -> String {
        format!(
            "<!doctype html>\n<html>\n<head><meta charset=\"utf-8\"></head>\n<body>\n\
             <script src=\"wasm_exec.js\"></script>\n\
             <script>const MODULE_URL = \"{MODULE_FILE}\";</script>\n\
             <script src=\"bootstrap.js\"></script>\n</body>\n</html>\n"
        )
    }
}

impl FrameHost for FileFrameHost {
    fn create<'a>(
        &'a self,
        module: &'a [u8],
        bootstrap: &'a str,
    ) -> BoxFuture<'a, Result<FrameSignals, FrameError>> {
        Box::pin(async move {
            match tokio::fs::remove_dir_all(&self.dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            tokio::fs::create_dir_all(&self.dir)
                .await
                .map_err(|e| FrameError::Create(format!("{}: {}", self.dir.display(), e)))?;

            tokio::fs::write(self.dir.join(MODULE_FILE), module).await?;
            tokio::fs::write(self.dir.join("bootstrap.js"), bootstrap).await?;
            tokio::fs::write(self.dir.join("index.html"), self.index_html()).await?;
            match &self.wasm_exec {
                Some(src) => {
                    tokio::fs::copy(src, self.dir.join("wasm_exec.js")).await?;
                }
                None => log::warn!("wasm_exec.js not found; frame needs it copied in by hand"),
            }
            log::info!("frame written to {}", self.dir.display());

            // nothing runs the frame here, so both signals fire once the
            // files are in place
            let (notifier, signals) = FrameSignals::channel();
            notifier.complete();
            Ok(signals)
        })
    }
}
