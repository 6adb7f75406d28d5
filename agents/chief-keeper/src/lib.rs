//! Keeps the DSChief hat on the candidate with the most approvals.
//!
//! Every tick the keeper either follows up on the single `lift` it has in
//! flight, or compares the hat's approvals with every known candidate and
//! lifts the strongest one when it outweighs the hat.

#![forbid(unsafe_code)]

pub mod chain;
pub mod error;
pub mod gas;
pub mod keeper;
pub mod manager;
pub mod settings;
pub mod signer;
pub mod tracker;
pub mod transaction;

#[cfg(test)]
mod test_utils;
