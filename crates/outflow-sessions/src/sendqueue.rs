use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Result, SessionError};
use crate::types::SessionReceipt;

/// Buffered sends waiting for their slot on one session.
const QUEUE_DEPTH: usize = 64;

/// The actual transmission a queue drives. Implemented by the WhatsApp and
/// Telegram session objects; never called outside the queue's consumer task.
#[async_trait]
pub trait DirectSender: Send + Sync + 'static {
    async fn send_now(&self, to: &str, body: &str) -> Result<SessionReceipt>;
}

struct SendJob {
    to: String,
    body: String,
    reply: oneshot::Sender<Result<SessionReceipt>>,
}

/// Single-consumer send queue for one session.
///
/// All sends against a session key enqueue here and await their turn; the
/// consumer task runs them strictly FIFO and enforces `min_gap` between the
/// start of consecutive transmissions. This is the mechanism behind the
/// at-most-one-send-in-flight-per-session guarantee.
#[derive(Clone)]
pub struct SendQueue {
    tx: mpsc::Sender<SendJob>,
}

impl SendQueue {
    pub fn spawn(target: Arc<dyn DirectSender>, min_gap: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<SendJob>(QUEUE_DEPTH);
        tokio::spawn(async move {
            let mut last_start: Option<Instant> = None;
            while let Some(job) = rx.recv().await {
                if let Some(prev) = last_start {
                    let elapsed = prev.elapsed();
                    if elapsed < min_gap {
                        tokio::time::sleep(min_gap - elapsed).await;
                    }
                }
                last_start = Some(Instant::now());
                let result = target.send_now(&job.to, &job.body).await;
                if job.reply.send(result).is_err() {
                    // Caller gave up (job deadline); the send itself already
                    // happened or failed, nothing to unwind.
                    warn!("send queue caller dropped before receiving result");
                }
            }
            debug!("session send queue consumer stopped");
        });
        Self { tx }
    }

    /// Enqueue a send and await its slot and result.
    pub async fn send(&self, to: &str, body: &str) -> Result<SessionReceipt> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SendJob {
                to: to.to_string(),
                body: body.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::NotConnected("send queue closed".to_string()))?;
        reply_rx
            .await
            .map_err(|_| SessionError::NotConnected("send worker dropped".to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records when each send started, instantly succeeding.
    struct RecordingSender {
        starts: Mutex<Vec<(Instant, String)>>,
    }

    #[async_trait]
    impl DirectSender for RecordingSender {
        async fn send_now(&self, to: &str, _body: &str) -> Result<SessionReceipt> {
            self.starts
                .lock()
                .unwrap()
                .push((Instant::now(), to.to_string()));
            Ok(SessionReceipt {
                external_id: format!("ext-{to}"),
                delivered_marker_seen: true,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sends_are_fifo_with_min_gap() {
        let sender = Arc::new(RecordingSender {
            starts: Mutex::new(Vec::new()),
        });
        let queue = SendQueue::spawn(sender.clone(), Duration::from_secs(2));

        // Two campaigns racing onto the same session.
        let q1 = queue.clone();
        let q2 = queue.clone();
        let a = tokio::spawn(async move { q1.send("111", "first").await });
        let b = tokio::spawn(async move { q2.send("222", "second").await });

        let ra = a.await.unwrap().unwrap();
        let rb = b.await.unwrap().unwrap();
        assert_eq!(ra.external_id, "ext-111");
        assert_eq!(rb.external_id, "ext-222");

        let starts = sender.starts.lock().unwrap();
        assert_eq!(starts.len(), 2);
        let gap = starts[1].0.duration_since(starts[0].0);
        assert!(gap >= Duration::from_secs(2), "gap was {gap:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn never_two_sends_in_flight() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct SlowSender {
            in_flight: AtomicUsize,
            max_seen: AtomicUsize,
        }

        #[async_trait]
        impl DirectSender for SlowSender {
            async fn send_now(&self, _to: &str, _body: &str) -> Result<SessionReceipt> {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(SessionReceipt {
                    external_id: "x".into(),
                    delivered_marker_seen: true,
                })
            }
        }

        let sender = Arc::new(SlowSender {
            in_flight: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
        });
        let queue = SendQueue::spawn(sender.clone(), Duration::from_secs(2));

        let mut handles = Vec::new();
        for i in 0..4 {
            let q = queue.clone();
            handles.push(tokio::spawn(async move {
                q.send(&format!("{i}"), "body").await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(sender.max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_propagate_to_the_right_caller() {
        struct FailingSender;

        #[async_trait]
        impl DirectSender for FailingSender {
            async fn send_now(&self, to: &str, _body: &str) -> Result<SessionReceipt> {
                if to == "bad" {
                    Err(SessionError::RecipientInvalid(to.to_string()))
                } else {
                    Ok(SessionReceipt {
                        external_id: "ok".into(),
                        delivered_marker_seen: true,
                    })
                }
            }
        }

        let queue = SendQueue::spawn(Arc::new(FailingSender), Duration::from_millis(1));
        assert!(matches!(
            queue.send("bad", "x").await,
            Err(SessionError::RecipientInvalid(_))
        ));
        assert!(queue.send("good", "x").await.is_ok());
    }
}
