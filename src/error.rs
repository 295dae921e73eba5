// LNP/BP Core Library implementing LNPBP specifications & standards
// Written in 2023 by
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

#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

use bitcoin::PublicKey;

use crate::revocation::RevocationDigest;

/// Name of the amount parameter which failed validation
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub enum AmountKind {
    /// Balance of the commitment owner
    #[display("owner amount")]
    Owner,

    /// Balance of the counterparty
    #[display("counterparty amount")]
    Counterparty,

    /// Fee deducted from the channel funds
    #[display("fee")]
    Fee,

    /// Sum of both balances and the fee
    #[display("total of balances and fee")]
    Total,

    /// Value of the funding output
    #[display("funding amount")]
    Funding,

    /// Value of the output spending a commitment branch
    #[display("sweep amount")]
    Sweep,
}

/// Errors happening during construction and signing of channel transactions.
///
/// All errors are reported synchronously and are never retried: channel
/// transaction construction is deterministic, so a failed construction must
/// be fixed by correcting its inputs.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum Error {
    /// invalid {kind} value of {value} sat: it must not exceed {limit} sat
    InvalidAmount {
        kind: AmountKind,
        value: u64,
        limit: u64,
    },

    /// {kind} value of {value} sat is below the dust limit of {dust_limit}
    /// sat
    DustAmount {
        kind: AmountKind,
        value: u64,
        dust_limit: u64,
    },

    /// relative timelock value {0} is outside of the range allowed for a
    /// block-based BIP-68 lock time
    InvalidTimelock(u32),

    /// owner and counterparty revocation digests are identical ({0}), so the
    /// punishment branch can't tell which party revoked its state
    DegenerateRevocationPair(RevocationDigest),

    /// secure entropy source is unable to provide randomness for a
    /// revocation secret: {0}
    EntropyExhausted(String),

    /// signer rejected the request: {0}
    SignatureFailure(String),

    /// the provided key material is not a valid secp256k1 secret key
    InvalidKey,

    /// the provided string `{0}` is not a valid hex-encoded transaction id
    InvalidOutpoint(String),

    /// transaction has {present} inputs, so input #{requested} can't be
    /// accessed
    InputIndexOutOfRange { requested: usize, present: usize },

    /// script was not produced by the commitment script template: {0}
    MalformedScript(String),

    /// commitment number {0} does not fit into 48 bits
    CommitmentNumberOverflow(u64),

    /// provided preimage does not match revocation digest {0}
    InvalidPreimage(RevocationDigest),

    /// commitment script has no both-signatures fallback branch
    NoFallbackBranch,

    /// key {0} does not belong to any of the channel parties
    ForeignKey(PublicKey),
}
