//! Duplex hand-off channel between the pool manager and its workers.
//!
//! The channel has two ends. The manager end is owned by the dispatcher and is
//! never contended. The worker end is shared by every relay; a mutex makes
//! each report-then-reply round trip atomic, so at most one worker is
//! mid-exchange at any instant.
//!
//! ```text
//!   relay 1 ─┐                    reports
//!   relay 2 ─┼─▶ [WorkerEnd] ══════════════▶ [ManagerEnd] ─▶ dispatcher
//!   relay N ─┘     (mutex)   ◀══════════════
//!                             replies
//! ```

use crate::protocol::WorkerMessage;
use crate::worker::WorkerId;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::debug;

/// Only the mutex holder has a report in flight, so one slot per queue suffices.
const QUEUE_CAPACITY: usize = 1;

/// One unit of work handed to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub index: usize,
    pub function: String,
    pub argument: Value,
}

/// A worker's half of an exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub worker: WorkerId,
    pub message: WorkerMessage,
}

/// The manager's answer to a report.
#[derive(Debug, Clone, PartialEq)]
pub enum Handoff {
    /// Run this task next.
    Task(Task),
    /// Nothing pending; wait until the work generation moves past `generation`.
    Park { generation: u64 },
    /// Shut the worker down.
    Retire,
}

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("hand-off channel closed")]
    Closed,

    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

/// Create a connected pair of channel ends.
pub fn duplex() -> (ManagerEnd, WorkerEnd) {
    let (report_tx, report_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (reply_tx, reply_rx) = mpsc::channel(QUEUE_CAPACITY);

    let manager = ManagerEnd {
        reports: report_rx,
        replies: reply_tx,
    };
    let worker = WorkerEnd {
        shared: Arc::new(Mutex::new(Shared {
            reports: report_tx,
            replies: reply_rx,
        })),
    };
    (manager, worker)
}

/// Manager-facing end: receives reports, sends replies.
pub struct ManagerEnd {
    reports: mpsc::Receiver<Report>,
    replies: mpsc::Sender<(WorkerId, Handoff)>,
}

impl ManagerEnd {
    /// Wait for the next report. Returns `None` once every worker end is gone.
    pub async fn recv(&mut self) -> Option<Report> {
        self.reports.recv().await
    }

    /// Non-blocking check for a pending report.
    pub fn try_recv(&mut self) -> Option<Report> {
        self.reports.try_recv().ok()
    }

    /// Answer the worker whose report was just received.
    pub async fn reply(&self, worker: WorkerId, handoff: Handoff) -> Result<(), ExchangeError> {
        self.replies
            .send((worker, handoff))
            .await
            .map_err(|_| ExchangeError::Closed)
    }

    /// Stop accepting reports. Relays blocked on the mutex see `Closed`.
    pub fn close(&mut self) {
        self.reports.close();
    }
}

struct Shared {
    reports: mpsc::Sender<Report>,
    replies: mpsc::Receiver<(WorkerId, Handoff)>,
}

/// Worker-facing end, shared by every relay.
#[derive(Clone)]
pub struct WorkerEnd {
    shared: Arc<Mutex<Shared>>,
}

impl WorkerEnd {
    /// Take the channel mutex. It stays held until the returned guard drops.
    pub async fn begin(&self) -> Exchange<'_> {
        Exchange {
            shared: self.shared.lock().await,
        }
    }

    /// Send a report and wait up to `deadline` for the matching reply.
    ///
    /// The mutex is held for the whole round trip.
    pub async fn exchange(
        &self,
        report: Report,
        deadline: Duration,
    ) -> Result<Handoff, ExchangeError> {
        let expected = report.worker;
        let mut exchange = self.begin().await;
        exchange.report(report).await?;
        exchange.await_reply(expected, deadline).await
    }
}

/// One round trip in progress, holding the channel mutex.
pub struct Exchange<'a> {
    shared: MutexGuard<'a, Shared>,
}

impl Exchange<'_> {
    pub async fn report(&mut self, report: Report) -> Result<(), ExchangeError> {
        self.shared
            .reports
            .send(report)
            .await
            .map_err(|_| ExchangeError::Closed)
    }

    /// Wait up to `deadline` for the reply addressed to `expected`.
    ///
    /// Replies for other workers are answers to exchanges that already timed
    /// out; they are discarded.
    pub async fn await_reply(
        &mut self,
        expected: WorkerId,
        deadline: Duration,
    ) -> Result<Handoff, ExchangeError> {
        let expires = Instant::now() + deadline;
        loop {
            match tokio::time::timeout_at(expires, self.shared.replies.recv()).await {
                Ok(Some((worker, handoff))) if worker == expected => return Ok(handoff),
                Ok(Some((worker, handoff))) => {
                    debug!(
                        worker_id = expected,
                        addressed_to = worker,
                        ?handoff,
                        "Discarding reply to an expired exchange"
                    );
                }
                Ok(None) => return Err(ExchangeError::Closed),
                Err(_) => return Err(ExchangeError::Timeout(deadline)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ready(worker: WorkerId) -> Report {
        Report {
            worker,
            message: WorkerMessage::Ready,
        }
    }

    #[tokio::test]
    async fn test_exchange_round_trip() {
        let (mut manager, worker) = duplex();

        let echo = tokio::spawn(async move {
            let report = manager.recv().await.unwrap();
            assert_eq!(report.message, WorkerMessage::Ready);
            let task = Task {
                index: 0,
                function: "factorial".to_string(),
                argument: json!(3),
            };
            manager
                .reply(report.worker, Handoff::Task(task))
                .await
                .unwrap();
        });

        let handoff = worker
            .exchange(ready(7), Duration::from_secs(1))
            .await
            .unwrap();
        match handoff {
            Handoff::Task(task) => assert_eq!(task.argument, json!(3)),
            other => panic!("Expected task, got {:?}", other),
        }
        echo.await.unwrap();
    }

    #[tokio::test]
    async fn test_exchange_times_out_without_reply() {
        let (mut manager, worker) = duplex();

        let silent = tokio::spawn(async move {
            let _report = manager.recv().await;
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let result = worker.exchange(ready(1), Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ExchangeError::Timeout(_))));
        silent.await.unwrap();
    }

    #[tokio::test]
    async fn test_exchange_fails_when_manager_dropped() {
        let (manager, worker) = duplex();
        drop(manager);

        let result = worker.exchange(ready(1), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ExchangeError::Closed)));
    }

    #[tokio::test]
    async fn test_reply_for_other_worker_is_skipped() {
        let (mut manager, worker) = duplex();

        tokio::spawn(async move {
            let report = manager.recv().await.unwrap();
            manager.reply(99, Handoff::Retire).await.unwrap();
            manager
                .reply(report.worker, Handoff::Park { generation: 4 })
                .await
                .unwrap();
        });

        let result = worker.exchange(ready(1), Duration::from_secs(1)).await;
        assert_eq!(result.unwrap(), Handoff::Park { generation: 4 });
    }

    #[tokio::test]
    async fn test_late_reply_does_not_reach_next_worker() {
        let (mut manager, worker) = duplex();

        let server = tokio::spawn(async move {
            // Answer worker 1 only after its deadline has passed.
            let first = manager.recv().await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            manager.reply(first.worker, Handoff::Retire).await.unwrap();

            let second = manager.recv().await.unwrap();
            assert_eq!(second.worker, 2);
            manager
                .reply(second.worker, Handoff::Park { generation: 1 })
                .await
                .unwrap();
        });

        let first = worker.exchange(ready(1), Duration::from_millis(10)).await;
        assert!(matches!(first, Err(ExchangeError::Timeout(_))));

        let second = worker.exchange(ready(2), Duration::from_secs(1)).await;
        assert_eq!(second.unwrap(), Handoff::Park { generation: 1 });
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_exchanges_never_interleave() {
        let (mut manager, worker) = duplex();
        let answered = Arc::new(AtomicUsize::new(0));

        // Only one report may be outstanding at a time.
        let counter = answered.clone();
        let server = tokio::spawn(async move {
            for _ in 0..40 {
                let report = manager.recv().await.unwrap();
                tokio::task::yield_now().await;
                assert!(manager.try_recv().is_none());
                counter.fetch_add(1, Ordering::SeqCst);
                manager
                    .reply(report.worker, Handoff::Park { generation: 0 })
                    .await
                    .unwrap();
            }
        });

        let mut clients = Vec::new();
        for id in 0..4 {
            let end = worker.clone();
            clients.push(tokio::spawn(async move {
                for _ in 0..10 {
                    let handoff = end.exchange(ready(id), Duration::from_secs(5)).await;
                    assert_eq!(handoff.unwrap(), Handoff::Park { generation: 0 });
                }
            }));
        }
        for client in clients {
            client.await.unwrap();
        }
        server.await.unwrap();
        assert_eq!(answered.load(Ordering::SeqCst), 40);
    }
}
