#[macro_use]
extern crate serde;

pub mod ecies_ed25519;

mod channel;
mod coin;
mod config;
mod connection;
mod data;
mod election;
mod error;
mod handler;
mod identifier;
mod jsonrpc;
mod keys;
mod lao;
mod ledger;
mod meeting;
mod message;
mod network;
mod rollcall;
mod serde_b64;
mod store;
mod tally;
mod transport;
mod util;
mod vote;
mod witness;

pub use channel::*;
pub use coin::*;
pub use config::*;
pub use connection::*;
pub use data::*;
pub use election::*;
pub use error::*;
pub use handler::*;
pub use identifier::*;
pub use jsonrpc::*;
pub use keys::*;
pub use lao::*;
pub use ledger::*;
pub use meeting::*;
pub use message::*;
pub use network::*;
pub use rollcall::*;
pub use serde_b64::*;
pub use store::*;
pub use tally::*;
pub use transport::*;
pub use util::*;
pub use vote::*;
pub use witness::*;

#[cfg(test)]
mod mock;
