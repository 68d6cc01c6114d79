//! Destinations for child process output

use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::trace;

/// Where a supervised process writes its stdout and stderr.
#[derive(Debug, Clone, Default)]
pub enum OutputSink {
    #[default]
    Stdout,
    Null,
    /// In-memory buffer, shared by every clone of the sink.
    Capture(Arc<Mutex<Vec<u8>>>),
}

impl OutputSink {
    pub fn capture() -> Self {
        Self::Capture(Arc::new(Mutex::new(Vec::new())))
    }

    /// Contents written so far to a capture sink, lossily decoded.
    pub fn captured(&self) -> String {
        match self {
            Self::Capture(buf) => {
                String::from_utf8_lossy(&buf.lock().unwrap_or_else(PoisonError::into_inner))
                    .into_owned()
            }
            _ => String::new(),
        }
    }

    /// Copies `reader` into the sink until EOF.
    pub(crate) async fn forward<R>(self, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut stdout = tokio::io::stdout();
        let mut chunk = [0u8; 8192];
        loop {
            let n = match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    trace!("Output stream closed: {}", e);
                    break;
                }
            };
            match &self {
                Self::Stdout => {
                    let _ = stdout.write_all(&chunk[..n]).await;
                    let _ = stdout.flush().await;
                }
                Self::Null => {}
                Self::Capture(buf) => buf
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]),
            }
        }
    }
}
