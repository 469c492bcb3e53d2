use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Non-blocking destination for container diagnostic output.
///
/// Writers never wait: when the buffer is full the line is dropped and
/// counted.
#[derive(Clone)]
pub struct LogSink {
    tx: Option<mpsc::Sender<String>>,
    dropped: Arc<AtomicU64>,
}

impl LogSink {
    pub fn disabled() -> Self {
        Self {
            tx: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A sink whose lines are delivered to the returned receiver.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            tx: Some(tx),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (sink, rx)
    }

    /// A sink drained into `writer` by a background task.
    pub fn spawn<W>(mut writer: W, capacity: usize) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, mut rx) = Self::channel(capacity);

        let handle = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                let written = async {
                    writer.write_all(line.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                    writer.flush().await
                }
                .await;

                if let Err(e) = written {
                    debug!("Log sink write failed: {}", e);
                }
            }
        });

        (sink, handle)
    }

    pub fn write_line(&self, line: impl Into<String>) {
        let Some(tx) = &self.tx else {
            return;
        };

        if tx.try_send(line.into()).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("sam_local_log_lines_dropped_total").increment(1);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_sink_drops_instead_of_blocking() {
        let (sink, mut rx) = LogSink::channel(2);

        sink.write_line("one");
        sink.write_line("two");
        sink.write_line("three");

        assert_eq!(sink.dropped(), 1);
        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert_eq!(rx.recv().await.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_spawned_sink_writes_lines() {
        let (client, mut server) = tokio::io::duplex(1024);
        let (sink, handle) = LogSink::spawn(client, 16);

        sink.write_line("START RequestId: 1");
        sink.write_line("END RequestId: 1");
        drop(sink);
        handle.await.unwrap();

        let mut output = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut server, &mut output).await.unwrap();
        assert_eq!(output, "START RequestId: 1\nEND RequestId: 1\n");
    }

    #[test]
    fn test_disabled_sink_accepts_writes() {
        let sink = LogSink::disabled();
        sink.write_line("ignored");
        assert_eq!(sink.dropped(), 0);
    }
}
