// Copyright (c) Tidal Contributors
// SPDX-License-Identifier: Apache-2.0

//! Single-writer host for the system state record.
//!
//! All state in the engine lives in one [`SystemState`] record that must see
//! a serialized stream of mutations. [`SystemService`] owns the record on a
//! dedicated task and applies commands one at a time from an mpsc channel;
//! [`SystemHandle`] is the cloneable client side. Events produced by the
//! engine are drained after every command and re-published on a broadcast
//! channel for storage nodes and indexers to follow.

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

use types::base::{EpochId, NodeId, TimestampMs};
use types::committee::Committee;
use types::error::{TidalError, TidalResult};
use types::events::Event;
use types::system_state::pool::NodePool;
use types::system_state::reservation::StorageReservation;
use types::system_state::staking::StakedTide;
use types::system_state::{EpochAdvanceOutcome, EpochStatus, SystemState};

const COMMAND_BUFFER: usize = 128;
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Engine(#[from] TidalError),

    #[error("system service has stopped")]
    ServiceStopped,
}

pub type NodeResult<T> = Result<T, NodeError>;

enum Command {
    ReserveSpace {
        storage_size: u64,
        epochs_ahead: u32,
        payment: u64,
        reply: oneshot::Sender<TidalResult<(StorageReservation, u64)>>,
    },
    ReleaseSpace {
        reservation: StorageReservation,
        reply: oneshot::Sender<()>,
    },
    AddPool {
        pool: NodePool,
        reply: oneshot::Sender<TidalResult<()>>,
    },
    RemovePool {
        node_id: NodeId,
        reply: oneshot::Sender<TidalResult<()>>,
    },
    AddStake {
        node_id: NodeId,
        amount: u64,
        reply: oneshot::Sender<TidalResult<StakedTide>>,
    },
    WithdrawStake {
        staked_tide: StakedTide,
        reply: oneshot::Sender<TidalResult<u64>>,
    },
    SyncDone {
        node: NodeId,
        epoch: EpochId,
        reply: oneshot::Sender<TidalResult<()>>,
    },
    AdvanceEpoch {
        epoch_start_timestamp_ms: TimestampMs,
        reply: oneshot::Sender<TidalResult<EpochAdvanceOutcome>>,
    },
    Committee {
        reply: oneshot::Sender<Committee>,
    },
    EpochStatus {
        reply: oneshot::Sender<(EpochId, EpochStatus)>,
    },
    Snapshot {
        reply: oneshot::Sender<TidalResult<Vec<u8>>>,
    },
}

/// The task that owns the system state and applies commands in order.
pub struct SystemService {
    state: SystemState,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<Event>,
}

impl SystemService {
    /// Spawn the service around `state`. Returns the client handle and the
    /// join handle of the service task; the service stops once every handle
    /// is dropped.
    pub fn spawn(state: SystemState) -> (SystemHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

        let service = Self {
            state,
            commands: command_rx,
            events: event_tx.clone(),
        };
        let join = tokio::spawn(service.run());

        (
            SystemHandle {
                commands: command_tx,
                events: event_tx,
            },
            join,
        )
    }

    async fn run(mut self) {
        info!(
            "system service started at epoch {} with {} committee members",
            self.state.epoch(),
            self.state.committee().num_members()
        );

        self.publish_events();

        while let Some(command) = self.commands.recv().await {
            self.handle_command(command);
            self.publish_events();
        }

        info!("system service stopped at epoch {}", self.state.epoch());
    }

    fn handle_command(&mut self, command: Command) {
        // A dropped reply receiver only means the caller went away.
        match command {
            Command::ReserveSpace {
                storage_size,
                epochs_ahead,
                payment,
                reply,
            } => {
                let _ = reply.send(self.state.reserve_space(storage_size, epochs_ahead, payment));
            }
            Command::ReleaseSpace { reservation, reply } => {
                self.state.release_space(reservation);
                let _ = reply.send(());
            }
            Command::AddPool { pool, reply } => {
                let _ = reply.send(self.state.request_add_pool(pool));
            }
            Command::RemovePool { node_id, reply } => {
                let _ = reply.send(self.state.request_remove_pool(node_id));
            }
            Command::AddStake {
                node_id,
                amount,
                reply,
            } => {
                let _ = reply.send(self.state.request_add_stake(node_id, amount));
            }
            Command::WithdrawStake { staked_tide, reply } => {
                let _ = reply.send(self.state.request_withdraw_stake(staked_tide));
            }
            Command::SyncDone { node, epoch, reply } => {
                let _ = reply.send(self.state.sync_done(node, epoch));
            }
            Command::AdvanceEpoch {
                epoch_start_timestamp_ms,
                reply,
            } => {
                let _ = reply.send(self.state.advance_epoch(epoch_start_timestamp_ms));
            }
            Command::Committee { reply } => {
                let _ = reply.send(self.state.committee().clone());
            }
            Command::EpochStatus { reply } => {
                let _ = reply.send((self.state.epoch(), self.state.epoch_status()));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.state.to_bytes());
            }
        }
    }

    fn publish_events(&mut self) {
        for event in self.state.take_events() {
            // Send only fails when nobody is subscribed.
            let _ = self.events.send(event);
        }
    }
}

/// Cloneable client for a running [`SystemService`].
#[derive(Clone)]
pub struct SystemHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<Event>,
}

impl SystemHandle {
    /// Subscribe to engine events from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub async fn reserve_space(
        &self,
        storage_size: u64,
        epochs_ahead: u32,
        payment: u64,
    ) -> NodeResult<(StorageReservation, u64)> {
        Ok(self
            .call(|reply| Command::ReserveSpace {
                storage_size,
                epochs_ahead,
                payment,
                reply,
            })
            .await??)
    }

    pub async fn release_space(&self, reservation: StorageReservation) -> NodeResult<()> {
        self.call(|reply| Command::ReleaseSpace { reservation, reply })
            .await
    }

    pub async fn add_pool(&self, pool: NodePool) -> NodeResult<()> {
        Ok(self.call(|reply| Command::AddPool { pool, reply }).await??)
    }

    pub async fn remove_pool(&self, node_id: NodeId) -> NodeResult<()> {
        Ok(self
            .call(|reply| Command::RemovePool { node_id, reply })
            .await??)
    }

    pub async fn add_stake(&self, node_id: NodeId, amount: u64) -> NodeResult<StakedTide> {
        Ok(self
            .call(|reply| Command::AddStake {
                node_id,
                amount,
                reply,
            })
            .await??)
    }

    pub async fn withdraw_stake(&self, staked_tide: StakedTide) -> NodeResult<u64> {
        Ok(self
            .call(|reply| Command::WithdrawStake { staked_tide, reply })
            .await??)
    }

    pub async fn sync_done(&self, node: NodeId, epoch: EpochId) -> NodeResult<()> {
        Ok(self
            .call(|reply| Command::SyncDone { node, epoch, reply })
            .await??)
    }

    pub async fn advance_epoch(
        &self,
        epoch_start_timestamp_ms: TimestampMs,
    ) -> NodeResult<EpochAdvanceOutcome> {
        Ok(self
            .call(|reply| Command::AdvanceEpoch {
                epoch_start_timestamp_ms,
                reply,
            })
            .await??)
    }

    pub async fn committee(&self) -> NodeResult<Committee> {
        self.call(|reply| Command::Committee { reply }).await
    }

    pub async fn epoch_status(&self) -> NodeResult<(EpochId, EpochStatus)> {
        self.call(|reply| Command::EpochStatus { reply }).await
    }

    /// A bcs snapshot of the full system state record.
    pub async fn snapshot(&self) -> NodeResult<Vec<u8>> {
        Ok(self.call(|reply| Command::Snapshot { reply }).await??)
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> NodeResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(make(reply_tx))
            .await
            .map_err(|_| NodeError::ServiceStopped)?;
        reply_rx.await.map_err(|_| NodeError::ServiceStopped)
    }
}
