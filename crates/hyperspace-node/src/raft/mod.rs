//! Consensus harness: a thin adapter over the black-box consensus
//! library. `VectorDatabase` stays the single authoritative apply
//! point; everything here does is get a committed `ClientRequest` to
//! it in the same order on every replica.

pub mod harness;
pub mod network;
pub mod storage;
pub mod types;

pub use harness::{RaftHarness, RaftParams};
pub use types::{ClientRequest, CommitReply, NodeInfo};
