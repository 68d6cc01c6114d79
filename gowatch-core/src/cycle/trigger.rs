//! Manual rebuild requests read from an input stream

use crate::monitor::{ChangeEvent, ChangeQueue};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Spawns a task that queues a synthetic change for every line consisting of `key` alone.
///
/// The task ends at end of input, on a read error, or once the queue is closed.
pub fn spawn_rebuild_trigger<R>(reader: R, key: u8, queue: ChangeQueue) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();

        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => {
                    debug!("Rebuild input closed");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read rebuild input: {}", e);
                    break;
                }
            }

            if line.ends_with(b"\n") {
                line.pop();
            }
            if line.ends_with(b"\r") {
                line.pop();
            }
            if line.as_slice() != [key] {
                trace!("Ignoring input line of {} bytes", line.len());
                continue;
            }

            if !queue.push(ChangeEvent::synthetic()) {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_only_exact_key_lines_trigger() {
        let queue = ChangeQueue::new(16);
        let input = Cursor::new(b"r\nrr\n\nx\r\n r\nr\r\nr".to_vec());

        spawn_rebuild_trigger(input, b'r', queue.clone()).await.unwrap();

        assert_eq!(queue.len(), 3);
        while let Some(event) = queue.try_recv() {
            assert!(event.is_synthetic());
        }
    }

    #[tokio::test]
    async fn test_pushes_coalesce_in_default_queue() {
        let queue = ChangeQueue::default();
        let input = Cursor::new(b"r\nr\nr\n".to_vec());

        spawn_rebuild_trigger(input, b'r', queue.clone()).await.unwrap();

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.stats().dropped, 2);
    }

    #[tokio::test]
    async fn test_stops_when_queue_closed() {
        let queue = ChangeQueue::new(16);
        queue.close();
        let input = Cursor::new(b"r\nr\n".to_vec());

        spawn_rebuild_trigger(input, b'r', queue.clone()).await.unwrap();

        assert!(queue.is_empty());
        assert_eq!(queue.stats().pushed, 0);
    }
}
