// LNP/BP Core Library implementing LNPBP specifications & standards
// Written in 2019-2023 by
//     Dr. Maxim Orlovsky <orlovsky@pandoracore.com>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

//! Two-party bitcoin payment channel constructors.
//!
//! The library builds the transactions of a revocable payment channel: the
//! funding transaction locking channel funds into a 2-of-2 output, and pairs
//! of commitment transactions splitting these funds between the parties for
//! each channel round. Commitment outputs are locked with a script having a
//! punishment branch (keyed on the holder revocation secret), a delayed
//! self-claim branch and an optional cooperative both-signatures branch.
//!
//! All constructors are deterministic and take explicit [`NetworkContext`];
//! the library does not keep any global state and performs no I/O.

// Coding conventions
#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    unused_imports,
    dead_code,
    //missing_docs
)]

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate tracing;

mod context;
mod error;
mod identity;
pub mod revocation;
pub mod scripts;

pub mod channel;
pub mod commitment;
pub mod funding;
pub mod signer;
pub mod spend;

pub use channel::Channel;
pub use commitment::{
    build_commitment, Balance, CommitmentParameters, CommitmentTransaction,
    Role, Terms,
};
pub use context::{
    NetworkContext, Policy, DEFAULT_DUST_LIMIT, MAX_MONEY,
    MAX_RELATIVE_TIMELOCK,
};
pub use error::{AmountKind, Error};
pub use funding::{build_funding, ChannelOutpoint, FundingInput};
pub use identity::{derive_identity, ChannelParty, Identity, SecretKeyMaterial};
pub use revocation::{
    digest_of, generate_secret, verify_disclosure, RevocationDigest,
    RevocationSecret,
};
pub use scripts::{Branch, CommitmentScript, ScriptGenerators};
