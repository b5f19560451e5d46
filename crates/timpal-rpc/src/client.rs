use timpal_core::transaction::Transaction;
use timpal_core::types::{Address, Balance, TxHash};
use tokio::sync::{mpsc, oneshot};

use crate::types::{AccountInfo, BlocksRange, HealthInfo};

/// Why a `/send` request was refused. Coarse on purpose: these map straight
/// to status codes and say nothing about node internals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendFailure {
    WrongPin,
    WalletMismatch,
    InsufficientBalance,
    Rejected,
}

/// Commands the HTTP layer sends to the node task. The node owns the
/// ledger, mempool and wallet; handlers only ever hold this channel.
pub enum NodeCommand {
    SubmitTransaction {
        tx: Box<Transaction>,
        reply: oneshot::Sender<Result<TxHash, String>>,
    },
    SendTransfer {
        sender: Address,
        recipient: Address,
        amount_pals: Balance,
        pin: String,
        reply: oneshot::Sender<Result<TxHash, SendFailure>>,
    },
    AccountInfo {
        address: Address,
        reply: oneshot::Sender<AccountInfo>,
    },
    BlocksRange {
        start: u64,
        end: u64,
        reply: oneshot::Sender<BlocksRange>,
    },
    Health {
        reply: oneshot::Sender<HealthInfo>,
    },
}

/// Cloneable handle the axum handlers use to reach the node task.
#[derive(Clone)]
pub struct NodeClient {
    commands: mpsc::Sender<NodeCommand>,
}

impl NodeClient {
    pub fn new(commands: mpsc::Sender<NodeCommand>) -> Self {
        Self { commands }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> NodeCommand,
    ) -> Result<T, ()> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(build(reply)).await.map_err(|_| ())?;
        rx.await.map_err(|_| ())
    }

    pub async fn submit_transaction(&self, tx: Transaction) -> Result<Result<TxHash, String>, ()> {
        self.request(|reply| NodeCommand::SubmitTransaction { tx: Box::new(tx), reply })
            .await
    }

    pub async fn send_transfer(
        &self,
        sender: Address,
        recipient: Address,
        amount_pals: Balance,
        pin: String,
    ) -> Result<Result<TxHash, SendFailure>, ()> {
        self.request(|reply| NodeCommand::SendTransfer { sender, recipient, amount_pals, pin, reply })
            .await
    }

    pub async fn account_info(&self, address: Address) -> Result<AccountInfo, ()> {
        self.request(|reply| NodeCommand::AccountInfo { address, reply }).await
    }

    pub async fn blocks_range(&self, start: u64, end: u64) -> Result<BlocksRange, ()> {
        self.request(|reply| NodeCommand::BlocksRange { start, end, reply }).await
    }

    pub async fn health(&self) -> Result<HealthInfo, ()> {
        self.request(|reply| NodeCommand::Health { reply }).await
    }
}
