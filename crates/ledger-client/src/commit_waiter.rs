use crate::event_hub::EventSource;
use ledger_common::{CommitEvent, LedgerError, TransactionId, ValidationCode};
use multimap::MultiMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Final validation result of a committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitOutcome {
    pub tx_id: TransactionId,
    pub validation_code: ValidationCode,
    pub block_number: u64,
}

impl CommitOutcome {
    pub fn is_valid(&self) -> bool {
        self.validation_code == ValidationCode::Valid
    }
}

impl From<CommitEvent> for CommitOutcome {
    fn from(event: CommitEvent) -> Self {
        CommitOutcome {
            tx_id: event.tx_id,
            validation_code: event.validation_code,
            block_number: event.block_number,
        }
    }
}

type Answer = Result<CommitOutcome, LedgerError>;

enum Command {
    Register {
        tx_id: TransactionId,
        waiter_id: u64,
        tx_answer: oneshot::Sender<Answer>,
    },
    Cancel {
        tx_id: TransactionId,
        waiter_id: u64,
    },
    Shutdown,
}

/// A caller suspended on the commit of one transaction.
struct WaitingClient {
    waiter_id: u64,
    registered_at: Instant,
    tx_answer: oneshot::Sender<Answer>,
}

impl WaitingClient {
    fn notify(self, tx_id: &str, answer: Answer) {
        debug!(
            "Resolving waiter {} for {} after {:?}",
            self.waiter_id,
            tx_id,
            self.registered_at.elapsed()
        );
        if self.tx_answer.send(answer).is_err() {
            debug!("Waiter {} for {} has already gone", self.waiter_id, tx_id);
        }
    }
}

/// Handle to the commit waiting task. Cheap to clone.
#[derive(Clone)]
pub struct CommitWaiter {
    commands: mpsc::UnboundedSender<Command>,
    next_waiter_id: Arc<AtomicU64>,
}

impl CommitWaiter {
    /// Spawns the task that owns the event source and the table of waiting callers.
    pub fn start<E>(source: E) -> (CommitWaiter, JoinHandle<()>)
    where
        E: EventSource + 'static,
    {
        let (tx_commands, rx_commands) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            CommitStateManager::new().run(rx_commands, source).await;
        });
        (
            CommitWaiter {
                commands: tx_commands,
                next_waiter_id: Arc::new(AtomicU64::new(0)),
            },
            handle,
        )
    }

    /// Registers interest in `tx_id`. Events processed after this call returns
    /// are routed to the subscription.
    pub fn register(&self, tx_id: &str) -> Result<CommitSubscription, LedgerError> {
        let waiter_id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        let (tx_answer, rx_answer) = oneshot::channel();
        self.commands
            .send(Command::Register {
                tx_id: tx_id.to_string(),
                waiter_id,
                tx_answer,
            })
            .map_err(|_| LedgerError::AlreadyShutdown {
                name: "commit waiter".to_string(),
            })?;
        Ok(CommitSubscription {
            tx_id: tx_id.to_string(),
            waiter_id,
            rx_answer,
            commands: self.commands.clone(),
            finished: false,
        })
    }

    pub async fn await_commit(&self, tx_id: &str, max_wait: Duration) -> Answer {
        self.register(tx_id)?.wait(max_wait).await
    }

    /// Stops the task. Callers still waiting get `AlreadyShutdown`.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// A registered interest in one commit. Dropping it cancels the registration.
pub struct CommitSubscription {
    tx_id: TransactionId,
    waiter_id: u64,
    rx_answer: oneshot::Receiver<Answer>,
    commands: mpsc::UnboundedSender<Command>,
    finished: bool,
}

impl CommitSubscription {
    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    pub async fn wait(mut self, max_wait: Duration) -> Answer {
        let started = Instant::now();
        match timeout(max_wait, &mut self.rx_answer).await {
            Ok(Ok(answer)) => {
                self.finished = true;
                answer
            }
            Ok(Err(_)) => {
                self.finished = true;
                Err(LedgerError::StreamFailure {
                    tx_id: self.tx_id.clone(),
                    reason: "commit waiter stopped".to_string(),
                })
            }
            Err(_) => {
                warn!("Transaction {} not committed within {:?}", self.tx_id, max_wait);
                Err(LedgerError::Timeout {
                    tx_id: self.tx_id.clone(),
                    elapsed_ms: started.elapsed().as_millis(),
                })
            }
        }
    }

    /// Gives up waiting before the timeout.
    pub fn cancel(self) {}
}

impl Drop for CommitSubscription {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.commands.send(Command::Cancel {
                tx_id: self.tx_id.clone(),
                waiter_id: self.waiter_id,
            });
        }
    }
}

struct CommitStateManager {
    waiting: MultiMap<TransactionId, WaitingClient>,
    stream_failure: Option<String>,
}

impl CommitStateManager {
    fn new() -> Self {
        CommitStateManager {
            waiting: MultiMap::new(),
            stream_failure: None,
        }
    }

    async fn run<E: EventSource>(
        mut self,
        mut rx_commands: mpsc::UnboundedReceiver<Command>,
        mut source: E,
    ) {
        loop {
            tokio::select! {
                // registrations always go before events that were queued after them
                biased;

                command = rx_commands.recv() => match command {
                    Some(Command::Register { tx_id, waiter_id, tx_answer }) => {
                        self.handle_register(tx_id, waiter_id, tx_answer);
                    }
                    Some(Command::Cancel { tx_id, waiter_id }) => {
                        self.handle_cancellation(&tx_id, waiter_id);
                    }
                    Some(Command::Shutdown) | None => {
                        self.fail_all(|_| LedgerError::AlreadyShutdown {
                            name: "commit waiter".to_string(),
                        });
                        source.close().await;
                        info!("Commit waiter stopped");
                        return;
                    }
                },

                event = source.next_event(), if self.stream_failure.is_none() => match event {
                    Some(Ok(event)) => self.handle_commit(event),
                    Some(Err(e)) => self.handle_stream_failure(e.to_string()),
                    None => self.handle_stream_failure("event stream closed".to_string()),
                },
            }
        }
    }

    fn handle_register(
        &mut self,
        tx_id: TransactionId,
        waiter_id: u64,
        tx_answer: oneshot::Sender<Answer>,
    ) {
        let client = WaitingClient {
            waiter_id,
            registered_at: Instant::now(),
            tx_answer,
        };
        if let Some(reason) = &self.stream_failure {
            let answer = Err(LedgerError::StreamFailure {
                tx_id: tx_id.clone(),
                reason: reason.clone(),
            });
            client.notify(&tx_id, answer);
            return;
        }
        debug!("Waiting for commit of {} (waiter {})", tx_id, waiter_id);
        self.waiting.insert(tx_id, client);
    }

    fn handle_cancellation(&mut self, tx_id: &str, waiter_id: u64) {
        if let Some(clients) = self.waiting.get_vec_mut(tx_id) {
            clients.retain(|c| c.waiter_id != waiter_id);
            if clients.is_empty() {
                self.waiting.remove(tx_id);
            }
            debug!("Waiter {} for {} cancelled", waiter_id, tx_id);
        }
    }

    fn handle_commit(&mut self, event: CommitEvent) {
        match self.waiting.remove(&event.tx_id) {
            Some(clients) => {
                for client in clients {
                    client.notify(&event.tx_id, Ok(CommitOutcome::from(event.clone())));
                }
            }
            None => debug!(
                "No waiting clients for {} in block {}, dropping event",
                event.tx_id, event.block_number
            ),
        }
    }

    fn handle_stream_failure(&mut self, reason: String) {
        warn!("Commit event stream failed: {}", reason);
        self.fail_all(|tx_id| LedgerError::StreamFailure {
            tx_id: tx_id.to_string(),
            reason: reason.clone(),
        });
        self.stream_failure = Some(reason);
    }

    fn fail_all(&mut self, error: impl Fn(&str) -> LedgerError) {
        let waiting = std::mem::replace(&mut self.waiting, MultiMap::new());
        for (tx_id, clients) in waiting {
            for client in clients {
                client.notify(&tx_id, Err(error(&tx_id)));
            }
        }
    }

    #[cfg(test)]
    fn waiting_count(&self) -> usize {
        self.waiting.iter_all().map(|(_, clients)| clients.len()).sum()
    }
}
