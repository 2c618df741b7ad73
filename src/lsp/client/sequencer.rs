//! Latest-generation-wins scheduling for parse requests.
//!
//! Every parse attempt takes a ticket with a monotonically increasing number.
//! Only one attempt runs at a time. An attempt that is superseded by a newer
//! ticket while it waits for its turn aborts immediately with `StaleParse`
//! instead of running outdated work.

use std::future::Future;

use tokio::sync::{Mutex, watch};

use crate::error::{ClientError, ClientResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ParseTicket(u64);

impl ParseTicket {
    pub fn number(self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
pub struct ParseSequencer {
    latest: watch::Sender<u64>,
    turn: Mutex<()>,
}

impl Default for ParseSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl ParseSequencer {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(0);
        Self {
            latest,
            turn: Mutex::new(()),
        }
    }

    /// Issue a new ticket, superseding every earlier one.
    pub fn issue(&self) -> ParseTicket {
        let mut issued = 0;
        self.latest.send_modify(|latest| {
            *latest += 1;
            issued = *latest;
        });
        ParseTicket(issued)
    }

    pub fn latest(&self) -> u64 {
        *self.latest.borrow()
    }

    pub fn is_current(&self, ticket: ParseTicket) -> bool {
        self.latest() == ticket.0
    }

    /// Fail with `StaleParse` if `ticket` has been superseded.
    pub fn check(&self, ticket: ParseTicket) -> ClientResult<()> {
        let latest = self.latest();
        if latest == ticket.0 {
            Ok(())
        } else {
            Err(ClientError::StaleParse {
                ticket: ticket.0,
                latest,
            })
        }
    }

    /// Run `work` once it is this ticket's turn, unless superseded first.
    pub async fn run<F, T>(&self, ticket: ParseTicket, work: F) -> ClientResult<T>
    where
        F: Future<Output = ClientResult<T>>,
    {
        self.check(ticket)?;

        let mut latest = self.latest.subscribe();
        let _turn = tokio::select! {
            guard = self.turn.lock() => guard,
            newer = latest.wait_for(|latest| *latest != ticket.0) => {
                let latest = newer.map(|value| *value).unwrap_or(ticket.0);
                return Err(ClientError::StaleParse {
                    ticket: ticket.0,
                    latest,
                });
            }
        };

        self.check(ticket)?;
        work.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn tickets_increase_and_supersede() {
        let sequencer = ParseSequencer::new();
        let first = sequencer.issue();
        let second = sequencer.issue();
        assert!(second > first);
        assert!(!sequencer.is_current(first));
        assert!(sequencer.is_current(second));
        assert!(matches!(
            sequencer.check(first),
            Err(ClientError::StaleParse { ticket: 1, latest: 2 })
        ));
    }

    #[tokio::test]
    async fn current_ticket_runs() {
        let sequencer = ParseSequencer::new();
        let ticket = sequencer.issue();
        let value = sequencer.run(ticket, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn waiting_attempt_aborts_when_superseded() {
        let sequencer = Arc::new(ParseSequencer::new());

        let first = sequencer.issue();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let running = {
            let sequencer = Arc::clone(&sequencer);
            tokio::spawn(async move {
                sequencer
                    .run(first, async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok("first")
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        // Second attempt queues behind the first, then a third supersedes it.
        let second = sequencer.issue();
        let waiting = {
            let sequencer = Arc::clone(&sequencer);
            tokio::spawn(async move { sequencer.run(second, async { Ok("second") }).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let third = sequencer.issue();

        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::StaleParse { .. }));
        assert!(err.is_retryable());

        let _ = release_tx.send(());
        // Work already running is not interrupted.
        assert_eq!(running.await.unwrap().unwrap(), "first");
        assert_eq!(sequencer.run(third, async { Ok("third") }).await.unwrap(), "third");
    }
}
