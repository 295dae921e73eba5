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

//! Transactions spending the commitment output through one of its branches.

use bitcoin::blockdata::script;
use bitcoin::{
    EcdsaSig, OutPoint, PackedLockTime, PublicKey, Script, Sequence,
    Transaction, TxIn, TxOut, Txid, Witness,
};

use crate::commitment::CommitmentTransaction;
use crate::error::AmountKind;
use crate::revocation::verify_disclosure;
use crate::scripts::{lex_ordered, Branch, CommitmentScript};
use crate::{Error, NetworkContext};

/// Constructs unsigned transaction sweeping the commitment output through
/// the given branch into the payout script.
///
/// Commitment inputs are not segwit, so `published` must be the id of the
/// signed commitment transaction as it was published, not of its unsigned
/// version. For the delayed-claim branch of a locked commitment the input
/// sequence is set to the relative timelock, so the transaction is not valid
/// before the timelock matures.
pub fn build_sweep(
    commitment: &CommitmentTransaction,
    published: Txid,
    branch: Branch,
    payout_script: Script,
    fee: u64,
    ctx: &NetworkContext,
) -> Result<Transaction, Error> {
    let template = commitment.script();
    if branch == Branch::Fallback && !template.bothsigs() {
        return Err(Error::NoFallbackBranch);
    }
    let value = commitment.amount().checked_sub(fee).ok_or(
        Error::InvalidAmount {
            kind: AmountKind::Fee,
            value: fee,
            limit: commitment.amount(),
        },
    )?;
    ctx.policy().validate_amount(AmountKind::Sweep, value)?;

    let sequence = match branch {
        Branch::DelayedClaim if template.locked() => {
            Sequence::from_height(template.timelock())
        }
        _ => Sequence::MAX,
    };
    let tx = Transaction {
        version: 2,
        lock_time: PackedLockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(published, 0),
            script_sig: Script::new(),
            sequence,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value,
            script_pubkey: payout_script,
        }],
    };
    debug!(
        "constructed {} sweep {} of {} commitment #{} {}",
        branch,
        tx.txid(),
        commitment.role(),
        commitment.commitment_number(),
        published
    );
    Ok(tx)
}

fn push_selectors(
    mut builder: script::Builder,
    template: &CommitmentScript,
    branch: Branch,
) -> Result<Script, Error> {
    let selectors = template
        .selectors(branch)
        .ok_or(Error::NoFallbackBranch)?;
    for selector in selectors {
        builder = builder.push_int(selector as i64);
    }
    Ok(builder.into_script())
}

/// Script satisfying the punishment branch with the punisher signature and
/// the revocation preimage disclosed by the holder
pub fn unlock_punishment(
    template: &CommitmentScript,
    sig: &EcdsaSig,
    preimage: &[u8],
) -> Result<Script, Error> {
    if !verify_disclosure(template.holder_digest(), preimage) {
        return Err(Error::InvalidPreimage(template.holder_digest()));
    }
    let builder = script::Builder::new()
        .push_slice(&sig.to_vec())
        .push_slice(preimage);
    push_selectors(builder, template, Branch::Punishment)
}

/// Script satisfying the delayed-claim branch with the holder signature
pub fn unlock_claim(
    template: &CommitmentScript,
    sig: &EcdsaSig,
) -> Result<Script, Error> {
    let builder = script::Builder::new().push_slice(&sig.to_vec());
    push_selectors(builder, template, Branch::DelayedClaim)
}

/// Script satisfying the both-signatures branch
pub fn unlock_fallback(
    template: &CommitmentScript,
    sigs: [(PublicKey, EcdsaSig); 2],
) -> Result<Script, Error> {
    let [(pk1, sig1), (pk2, sig2)] = sigs;
    for pk in [pk1, pk2] {
        if pk != template.holder() && pk != template.punisher() {
            return Err(Error::ForeignKey(pk));
        }
    }
    if pk1 == pk2 {
        return Err(Error::SignatureFailure(s!(
            "both signatures are produced by the same key"
        )));
    }
    let (sig_lo, sig_hi) = if lex_ordered(pk1, pk2)[0] == pk1 {
        (sig1, sig2)
    } else {
        (sig2, sig1)
    };
    // OP_CHECKMULTISIG consumes one extra stack element
    let builder = script::Builder::new()
        .push_int(0)
        .push_slice(&sig_lo.to_vec())
        .push_slice(&sig_hi.to_vec());
    push_selectors(builder, template, Branch::Fallback)
}
