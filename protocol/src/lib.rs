// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # huron core library
//!
//! A leaderless, asynchronous BFT consensus engine. Validators gossip
//! signed events that reference each other, forming a DAG. Every node runs
//! the same virtual-voting algorithm over its copy of the DAG and derives
//! the same ordered sequence of blocks, without ever exchanging a vote.
//!
//! ## Architecture
//!
//! - **crypto**: Ed25519 keys, BLAKE3 and SHA-256.
//! - **peers**: validator identities and versioned peer sets.
//! - **hashgraph**: events, rounds, fame, consensus order, blocks, frames,
//!   and the stores they live in.
//! - **net**: the RPC transport between validators (in-memory and TCP).
//! - **proxy**: the boundary to the replicated application.
//! - **node**: the gossip coordinator that ties it all together.
//! - **config**: node configuration and protocol constants.
//!
//! ## Guarantees
//!
//! 1. Every honest node commits the same blocks, in the same order.
//! 2. A block is never revised once committed.
//! 3. Membership changes take effect at a round every node agrees on.

pub mod config;
pub mod crypto;
pub mod hashgraph;
pub mod net;
pub mod node;
pub mod peers;
pub mod proxy;
