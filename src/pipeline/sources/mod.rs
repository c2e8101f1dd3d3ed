//! Reference implementations of the collaborator traits backed by a Solana
//! RPC node and the Jupiter quote API.

pub mod jupiter;
pub mod rpc_ledger;

pub use jupiter::JupiterRouter;
pub use rpc_ledger::RpcLedgerReader;
