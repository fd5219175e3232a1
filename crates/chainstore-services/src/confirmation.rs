//! Confirmation engine — decides when a submitted write has been included.
//!
//! Two strategies:
//!
//!   Polling  — query transaction status at a fixed interval
//!   TxEvent  — listen on the endpoint's inclusion event stream
//!
//! A TxEvent listener must be subscribed before the write is broadcast or
//! the inclusion event can be missed, so confirmation is split in two
//! steps: `arm` (before submit) and `Armed::wait` (after). Both steps run
//! against one deadline; a timed-out write may still land.
//!
//! Opening a subscription may take at most a quarter of the remaining
//! budget. A subscription that does not open in time is treated like one
//! that failed to open.

use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;

use chainstore_core::config::{ConfirmationConfig, ConfirmationKind};
use chainstore_core::{Endpoint, Error, LedgerError, Result};

use crate::ledger::{Gas, Ledger, TxEventStream, TxRef, TxStatus};

/// Divisor of the remaining budget granted to opening a subscription.
const SUBSCRIBE_SHARE: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Polling { interval: Duration },
    /// `fallback_poll` switches to polling at that interval when the
    /// subscription cannot be opened or drops mid-wait.
    TxEvent { fallback_poll: Option<Duration> },
}

/// Inclusion facts for a confirmed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmed {
    pub height: u64,
    pub gas_used: Gas,
}

/// A confirmation strategy ready to observe one transaction.
pub enum Armed {
    Poll {
        interval: Duration,
    },
    Listen {
        events: TxEventStream,
        fallback_poll: Option<Duration>,
    },
}

impl Confirmation {
    pub fn from_config(config: &ConfirmationConfig) -> Self {
        match config.kind {
            ConfirmationKind::Polling => Confirmation::Polling {
                interval: config.poll_interval(),
            },
            ConfirmationKind::TxEvent => Confirmation::TxEvent {
                fallback_poll: config
                    .fallback_to_polling
                    .then(|| config.poll_interval()),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Confirmation::Polling { .. } => "polling",
            Confirmation::TxEvent { .. } => "tx_event",
        }
    }

    /// Prepare to observe a write on `endpoint`. Call before submitting.
    pub async fn arm(
        &self,
        ledger: &dyn Ledger,
        endpoint: &Endpoint,
        deadline: Instant,
    ) -> Result<Armed> {
        match *self {
            Confirmation::Polling { interval } => Ok(Armed::Poll { interval }),
            Confirmation::TxEvent { fallback_poll } => match subscribe(ledger, endpoint, deadline).await {
                Ok(events) => Ok(Armed::Listen {
                    events,
                    fallback_poll,
                }),
                Err(e) => match fallback_poll {
                    Some(interval) => {
                        tracing::warn!(
                            endpoint = %endpoint.name,
                            error = %e,
                            "event subscription failed, polling instead"
                        );
                        Ok(Armed::Poll { interval })
                    }
                    None => {
                        tracing::warn!(endpoint = %endpoint.name, error = %e, "event subscription failed");
                        Err(Error::SubscriptionLost {
                            endpoint: endpoint.name.clone(),
                        })
                    }
                },
            },
        }
    }

    /// Arm and wait in one step, for writes already submitted.
    pub async fn confirm(
        &self,
        ledger: &dyn Ledger,
        endpoint: &Endpoint,
        tx: &TxRef,
        timeout: Duration,
    ) -> Result<Confirmed> {
        let deadline = Instant::now() + timeout;
        self.arm(ledger, endpoint, deadline)
            .await?
            .wait(ledger, endpoint, tx, deadline)
            .await
    }
}

/// Open the event stream within its share of the budget.
async fn subscribe(
    ledger: &dyn Ledger,
    endpoint: &Endpoint,
    deadline: Instant,
) -> std::result::Result<TxEventStream, LedgerError> {
    let window = deadline.saturating_duration_since(Instant::now()) / SUBSCRIBE_SHARE;
    match tokio::time::timeout(window, ledger.subscribe_txs(endpoint)).await {
        Ok(opened) => opened,
        Err(_) => Err(LedgerError::Transport(format!(
            "subscription not opened within {}ms",
            window.as_millis()
        ))),
    }
}

impl Armed {
    /// Wait until `tx` is included, fails, or `deadline` passes.
    pub async fn wait(
        self,
        ledger: &dyn Ledger,
        endpoint: &Endpoint,
        tx: &TxRef,
        deadline: Instant,
    ) -> Result<Confirmed> {
        let observed = match self {
            Armed::Poll { interval } => {
                tokio::time::timeout_at(deadline, poll(ledger, endpoint, tx, interval)).await
            }
            Armed::Listen {
                events,
                fallback_poll,
            } => {
                tokio::time::timeout_at(
                    deadline,
                    listen(ledger, endpoint, tx, events, fallback_poll),
                )
                .await
            }
        };

        match observed {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    endpoint = %endpoint.name,
                    tx = %tx,
                    "confirmation timed out"
                );
                Err(Error::TimedOut {
                    endpoint: endpoint.name.clone(),
                    tx_ref: tx.0.clone(),
                })
            }
        }
    }
}

async fn poll(
    ledger: &dyn Ledger,
    endpoint: &Endpoint,
    tx: &TxRef,
    interval: Duration,
) -> Result<Confirmed> {
    loop {
        match ledger.tx_status(endpoint, tx).await {
            Ok(TxStatus::Included { height, gas_used }) => {
                return Ok(Confirmed { height, gas_used });
            }
            Ok(TxStatus::Failed { code, log }) => {
                return Err(Error::ConfirmationFailed {
                    endpoint: endpoint.name.clone(),
                    tx_ref: tx.0.clone(),
                    code,
                    log,
                });
            }
            // Not yet indexed is indistinguishable from pending.
            Ok(TxStatus::Pending) | Err(LedgerError::NotFound(_)) => {}
            Err(e) => {
                tracing::debug!(endpoint = %endpoint.name, tx = %tx, error = %e, "status query failed");
            }
        }
        tokio::time::sleep(interval).await;
    }
}

async fn listen(
    ledger: &dyn Ledger,
    endpoint: &Endpoint,
    tx: &TxRef,
    mut events: TxEventStream,
    fallback_poll: Option<Duration>,
) -> Result<Confirmed> {
    loop {
        match events.next().await {
            Some(Ok(event)) if event.tx_hash.eq_ignore_ascii_case(&tx.0) => {
                if event.code == 0 {
                    return Ok(Confirmed {
                        height: event.height,
                        gas_used: event.gas_used,
                    });
                }
                return Err(Error::ConfirmationFailed {
                    endpoint: endpoint.name.clone(),
                    tx_ref: tx.0.clone(),
                    code: event.code,
                    log: event.log,
                });
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(endpoint = %endpoint.name, error = %e, "event stream error");
                break;
            }
            None => {
                tracing::warn!(endpoint = %endpoint.name, "event stream closed");
                break;
            }
        }
    }

    match fallback_poll {
        Some(interval) => {
            tracing::debug!(endpoint = %endpoint.name, tx = %tx, "falling back to polling");
            poll(ledger, endpoint, tx, interval).await
        }
        None => Err(Error::SubscriptionLost {
            endpoint: endpoint.name.clone(),
        }),
    }
}
