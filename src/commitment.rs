// LNP/BP Core Library implementing LNPBP specifications & standards
// Written in 2020-2023 by
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

//! Revocable commitment transactions.
//!
//! During each channel round both parties construct a pair of commitment
//! transactions spending the same funding outpoint: one from the owner
//! perspective (the "ALBA" commitment) and a structurally symmetric one from
//! the counterparty perspective (the "standard" commitment). Each party holds
//! its own instance signed by the other party, so it can be published
//! unilaterally. Construction is deterministic: both parties build
//! byte-identical transactions from the same parameters.

use bitcoin::blockdata::script;
use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::{
    EcdsaSig, PackedLockTime, PublicKey, Script, Sequence, Transaction, TxIn,
    TxOut, Txid, Witness,
};
#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

use crate::error::AmountKind;
use crate::funding::ChannelOutpoint;
use crate::revocation::RevocationDigest;
use crate::scripts::{lex_ordered, CommitmentScript, ScriptGenerators};
use crate::{signer, ChannelParty, Error, Identity, NetworkContext};

/// Version of commitment transactions; version 2 is required for the
/// relative timelocks of the delayed-claim branch
pub const COMMITMENT_TX_VERSION: i32 = 2;

/// Commitment numbers are encoded into 48 bits of lock time and sequence
pub const MAX_COMMITMENT_NUMBER: u64 = 0xFFFF_FFFF_FFFF;

/// Perspective from which a commitment transaction is constructed
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub enum Role {
    /// Commitment held by the channel owner ("ALBA" commitment): the owner
    /// claims after the timelock, the counterparty punishes with the owner
    /// revocation secret
    #[display("ALBA")]
    Owner,

    /// Commitment held by the counterparty ("standard" commitment): the
    /// counterparty claims after the timelock, the owner punishes with the
    /// counterparty revocation secret
    #[display("standard")]
    Counterparty,
}

impl Role {
    #[inline]
    pub fn opposite(self) -> Role {
        match self {
            Role::Owner => Role::Counterparty,
            Role::Counterparty => Role::Owner,
        }
    }
}

/// Split of the channel funds for a single channel round
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct Balance {
    pub owner_amount: u64,
    pub counterparty_amount: u64,
    pub fee: u64,
}

impl Balance {
    /// Value allocated to the parties, or `None` on overflow
    #[inline]
    pub fn allocated(&self) -> Option<u64> {
        self.owner_amount.checked_add(self.counterparty_amount)
    }

    /// Value of balances and the fee, or `None` on overflow
    #[inline]
    pub fn total(&self) -> Option<u64> {
        self.allocated()?.checked_add(self.fee)
    }
}

/// Spending terms of the commitment output
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct Terms {
    /// Relative timelock of the delayed-claim branch, in blocks
    pub timelock: u32,

    /// Whether the delayed-claim branch enforces the timelock. Commitments
    /// with an already matured timelock are built unlocked.
    pub locked: bool,

    /// Whether to add the cooperative both-signatures branch
    pub bothsigs: bool,
}

/// Complete set of inputs for the commitment construction.
///
/// Parties are always given in the same order (owner first), independently
/// from the perspective selected by [`Role`].
#[derive(Getters, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct CommitmentParameters {
    #[getter(as_copy)]
    role: Role,

    #[getter(as_ref)]
    owner: ChannelParty,

    #[getter(as_ref)]
    counterparty: ChannelParty,

    #[getter(as_copy)]
    owner_digest: RevocationDigest,

    #[getter(as_copy)]
    counterparty_digest: RevocationDigest,

    #[getter(as_copy)]
    balance: Balance,

    #[getter(as_copy)]
    terms: Terms,

    /// Sequential number of the channel round
    #[getter(as_copy)]
    commitment_number: u64,
}

impl CommitmentParameters {
    pub fn with(
        role: Role,
        owner: ChannelParty,
        counterparty: ChannelParty,
        owner_digest: RevocationDigest,
        counterparty_digest: RevocationDigest,
        balance: Balance,
        terms: Terms,
    ) -> Self {
        CommitmentParameters {
            role,
            owner,
            counterparty,
            owner_digest,
            counterparty_digest,
            balance,
            terms,
            commitment_number: 0,
        }
    }

    /// Parameters of the owner-perspective ("ALBA") commitment
    #[inline]
    pub fn owner_perspective(
        owner: ChannelParty,
        counterparty: ChannelParty,
        owner_digest: RevocationDigest,
        counterparty_digest: RevocationDigest,
        balance: Balance,
        terms: Terms,
    ) -> Self {
        Self::with(
            Role::Owner,
            owner,
            counterparty,
            owner_digest,
            counterparty_digest,
            balance,
            terms,
        )
    }

    /// Parameters of the counterparty-perspective ("standard") commitment
    #[inline]
    pub fn counterparty_perspective(
        owner: ChannelParty,
        counterparty: ChannelParty,
        owner_digest: RevocationDigest,
        counterparty_digest: RevocationDigest,
        balance: Balance,
        terms: Terms,
    ) -> Self {
        Self::with(
            Role::Counterparty,
            owner,
            counterparty,
            owner_digest,
            counterparty_digest,
            balance,
            terms,
        )
    }

    #[inline]
    pub fn with_commitment_number(mut self, commitment_number: u64) -> Self {
        self.commitment_number = commitment_number;
        self
    }

    /// Same parameters from the opposite perspective
    #[inline]
    pub fn mirrored(&self) -> Self {
        let mut params = self.clone();
        params.role = self.role.opposite();
        params
    }

    /// Party holding the commitment, which claims after the timelock
    pub fn holder(&self) -> &ChannelParty {
        match self.role {
            Role::Owner => &self.owner,
            Role::Counterparty => &self.counterparty,
        }
    }

    /// Party able to punish the holder
    pub fn punisher(&self) -> &ChannelParty {
        match self.role {
            Role::Owner => &self.counterparty,
            Role::Counterparty => &self.owner,
        }
    }

    pub fn holder_digest(&self) -> RevocationDigest {
        match self.role {
            Role::Owner => self.owner_digest,
            Role::Counterparty => self.counterparty_digest,
        }
    }

    pub fn punisher_digest(&self) -> RevocationDigest {
        match self.role {
            Role::Owner => self.counterparty_digest,
            Role::Counterparty => self.owner_digest,
        }
    }

    pub fn holder_amount(&self) -> u64 {
        match self.role {
            Role::Owner => self.balance.owner_amount,
            Role::Counterparty => self.balance.counterparty_amount,
        }
    }

    pub fn punisher_amount(&self) -> u64 {
        match self.role {
            Role::Owner => self.balance.counterparty_amount,
            Role::Counterparty => self.balance.owner_amount,
        }
    }

    /// Factor obscuring the commitment number in the transaction. Depends
    /// only on the channel parties, so it is the same for both perspectives.
    #[inline]
    pub fn obscuring_factor(&self) -> u64 {
        compute_obscuring_factor(
            self.owner.public_key(),
            self.counterparty.public_key(),
        )
    }
}

fn compute_obscuring_factor(owner: PublicKey, counterparty: PublicKey) -> u64 {
    let mut engine = sha256::Hash::engine();
    engine.input(&owner.to_bytes());
    engine.input(&counterparty.to_bytes());
    let obscuring_hash = sha256::Hash::from_engine(engine);

    let mut buf = [0u8; 8];
    buf.copy_from_slice(&obscuring_hash[24..]);
    u64::from_be_bytes(buf) & MAX_COMMITMENT_NUMBER
}

fn obscure(commitment_number: u64, factor: u64) -> (PackedLockTime, Sequence) {
    // The 48-bit commitment number is obscured by XOR with the lower 48 bits
    // of the obscuring factor; lower 24 bits go into the lock time and upper
    // 24 bits into the input sequence
    let obscured = (commitment_number ^ factor) & MAX_COMMITMENT_NUMBER;
    let lock_time = (0x20u32 << 24) | (obscured & 0xFF_FFFF) as u32;
    let sequence = (0x80u32 << 24) | (obscured >> 24) as u32;
    (PackedLockTime(lock_time), Sequence(sequence))
}

/// Extracts commitment number from a transaction spending the channel
/// funding output. Returns `None` if the transaction does not carry an
/// obscured commitment number.
pub fn decode_commitment_number(
    tx: &Transaction,
    owner: PublicKey,
    counterparty: PublicKey,
) -> Option<u64> {
    let lock_time = tx.lock_time.0;
    let sequence = tx.input.first()?.sequence.0;
    if lock_time >> 24 != 0x20 || sequence >> 24 != 0x80 {
        return None;
    }
    let obscured =
        ((sequence as u64 & 0xFF_FFFF) << 24) | (lock_time as u64 & 0xFF_FFFF);
    Some(obscured ^ compute_obscuring_factor(owner, counterparty))
}

/// Unsigned commitment transaction together with the data it was built from
#[derive(Getters, Clone, PartialEq, Eq, Debug)]
pub struct CommitmentTransaction {
    params: CommitmentParameters,

    #[getter(as_copy)]
    funding: ChannelOutpoint,

    script: CommitmentScript,

    tx: Transaction,
}

impl CommitmentTransaction {
    #[inline]
    pub fn role(&self) -> Role {
        self.params.role
    }

    #[inline]
    pub fn commitment_number(&self) -> u64 {
        self.params.commitment_number
    }

    #[inline]
    pub fn txid(&self) -> Txid {
        self.tx.txid()
    }

    /// Value of the commitment output
    #[inline]
    pub fn amount(&self) -> u64 {
        self.tx.output[0].value
    }

    /// Joint script of the funding output spent by the commitment
    #[inline]
    pub fn funding_script(&self) -> Script {
        Script::alba_funding(
            self.funding.amount(),
            self.params.owner.public_key(),
            self.params.counterparty.public_key(),
        )
    }

    #[inline]
    pub fn serialize(&self) -> Vec<u8> {
        signer::serialize(&self.tx)
    }

    #[inline]
    pub fn serialize_hex(&self) -> String {
        signer::serialize_hex(&self.tx)
    }

    fn check_party(&self, pubkey: PublicKey) -> Result<(), Error> {
        if pubkey != self.params.owner.public_key()
            && pubkey != self.params.counterparty.public_key()
        {
            return Err(Error::ForeignKey(pubkey));
        }
        Ok(())
    }

    /// Signs the funding input with the key of one of the channel parties
    pub fn sign(
        &self,
        identity: &Identity,
        ctx: &NetworkContext,
    ) -> Result<EcdsaSig, Error> {
        self.check_party(identity.public_key())?;
        signer::sign_input(&self.tx, 0, identity, &self.funding_script(), ctx)
    }

    /// Verifies funding input signature of one of the channel parties
    pub fn verify_signature(
        &self,
        pubkey: PublicKey,
        sig: &EcdsaSig,
        ctx: &NetworkContext,
    ) -> Result<(), Error> {
        self.check_party(pubkey)?;
        signer::verify_input(
            &self.tx,
            0,
            &pubkey,
            &self.funding_script(),
            sig,
            ctx,
        )
    }

    /// Produces fully signed transaction from signatures of both parties,
    /// ordering them according to the funding script key order
    pub fn with_signatures(
        &self,
        sigs: [(PublicKey, EcdsaSig); 2],
        ctx: &NetworkContext,
    ) -> Result<Transaction, Error> {
        let [(pk1, sig1), (pk2, sig2)] = sigs;
        if pk1 == pk2 {
            return Err(Error::SignatureFailure(s!(
                "both signatures are produced by the same key"
            )));
        }
        self.verify_signature(pk1, &sig1, ctx)?;
        self.verify_signature(pk2, &sig2, ctx)?;
        let (sig_lo, sig_hi) = if lex_ordered(pk1, pk2)[0] == pk1 {
            (sig1, sig2)
        } else {
            (sig2, sig1)
        };
        let mut tx = self.tx.clone();
        tx.input[0].script_sig = script::Builder::new()
            .push_int(0)
            .push_slice(&sig_lo.to_vec())
            .push_slice(&sig_hi.to_vec())
            .into_script();
        Ok(tx)
    }
}

/// Constructs unsigned commitment transaction spending the channel funding
/// outpoint into a single output locked with the commitment script.
///
/// The output carries both balances; the difference between the funding
/// value and the balances is the fee. Fails if the balances and the fee
/// exceed the funding value.
pub fn build_commitment(
    funding: &ChannelOutpoint,
    params: &CommitmentParameters,
    ctx: &NetworkContext,
) -> Result<CommitmentTransaction, Error> {
    if params.commitment_number > MAX_COMMITMENT_NUMBER {
        return Err(Error::CommitmentNumberOverflow(params.commitment_number));
    }
    let script = CommitmentScript::build(params, &ctx.policy())?;

    let balance = params.balance;
    let overflow = Error::InvalidAmount {
        kind: AmountKind::Total,
        value: u64::MAX,
        limit: funding.amount(),
    };
    let total = balance.total().ok_or_else(|| overflow.clone())?;
    let allocated = balance.allocated().ok_or(overflow)?;
    if total > funding.amount() {
        return Err(Error::InvalidAmount {
            kind: AmountKind::Total,
            value: total,
            limit: funding.amount(),
        });
    }
    if total < funding.amount() {
        warn!(
            "{} commitment #{} leaves {} sat unallocated; they will go to \
             miners on top of the {} sat fee",
            params.role,
            params.commitment_number,
            funding.amount() - total,
            balance.fee
        );
    }

    let (lock_time, sequence) =
        obscure(params.commitment_number, params.obscuring_factor());
    let tx = Transaction {
        version: COMMITMENT_TX_VERSION,
        lock_time,
        input: vec![TxIn {
            previous_output: funding.outpoint(),
            script_sig: Script::new(),
            sequence,
            witness: Witness::new(),
        }],
        output: vec![TxOut::alba_commitment(allocated, &script)],
    };
    debug!(
        "constructed {} commitment #{} {} held by {}: {} sat to holder, {} \
         sat to punisher",
        params.role,
        params.commitment_number,
        tx.txid(),
        params.holder().public_key(),
        params.holder_amount(),
        params.punisher_amount()
    );

    Ok(CommitmentTransaction {
        params: params.clone(),
        funding: *funding,
        script,
        tx,
    })
}
