//! Core of a non-custodial submarine swap daemon: the per-swap event-sourced
//! state machine, the on-chain transaction builders it drives, and the seams
//! to the wallet, node and chain collaborators around it.

pub mod bitcoin;
pub mod env;
pub mod lightning;
pub mod store;
pub mod swap;
