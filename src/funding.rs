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

use bitcoin::blockdata::script;
use bitcoin::{
    EcdsaSig, OutPoint, PackedLockTime, PublicKey, Script, Sequence,
    Transaction, TxIn, TxOut, Txid, Witness,
};
#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

use crate::context::MAX_MONEY;
use crate::error::AmountKind;
use crate::scripts::{self, ScriptGenerators};
use crate::{signer, Error, Identity, NetworkContext};

/// Channel funding output: the single outpoint spent by all commitment
/// transactions of the channel, together with its value
#[derive(Getters, Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct ChannelOutpoint {
    #[getter(as_copy)]
    outpoint: OutPoint,

    #[getter(as_copy)]
    amount: u64,
}

impl ChannelOutpoint {
    #[inline]
    pub fn new(outpoint: OutPoint, amount: u64) -> Self {
        ChannelOutpoint { outpoint, amount }
    }

    #[inline]
    pub fn txid(&self) -> Txid {
        self.outpoint.txid
    }
}

/// Previous output contributed to the funding transaction by one of the
/// parties
#[derive(Getters, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct FundingInput {
    #[getter(as_copy)]
    outpoint: OutPoint,

    #[getter(as_copy)]
    value: u64,

    /// Script locking the spent output; P2PKH for the outputs of the party
    /// identities
    script_pubkey: Script,
}

impl FundingInput {
    pub fn with(outpoint: OutPoint, value: u64, script_pubkey: Script) -> Self {
        FundingInput {
            outpoint,
            value,
            script_pubkey,
        }
    }
}

/// Unsigned (or partially signed) channel funding transaction
#[derive(Getters, Clone, PartialEq, Eq, Debug)]
pub struct FundingTransaction {
    inputs: Vec<FundingInput>,
    joint_script: Script,
    tx: Transaction,
}

impl FundingTransaction {
    #[inline]
    pub fn txid(&self) -> Txid {
        self.tx.txid()
    }

    /// Funding output consumed by the channel commitment transactions.
    ///
    /// Inputs are not segwit, so the transaction id commits to the input
    /// signatures and the outpoint is known only once all inputs are signed.
    pub fn channel_outpoint(&self) -> Option<ChannelOutpoint> {
        if !self.is_signed() {
            return None;
        }
        Some(ChannelOutpoint::new(
            OutPoint::new(self.txid(), 0),
            self.tx.output[0].value,
        ))
    }

    /// Signs one of the funding inputs with the identity owning it
    pub fn sign_input(
        &self,
        input_index: usize,
        identity: &Identity,
        ctx: &NetworkContext,
    ) -> Result<EcdsaSig, Error> {
        let input = self.inputs.get(input_index).ok_or(
            Error::InputIndexOutOfRange {
                requested: input_index,
                present: self.inputs.len(),
            },
        )?;
        signer::sign_input(
            &self.tx,
            input_index,
            identity,
            &input.script_pubkey,
            ctx,
        )
    }

    /// Verifies signature and places it into P2PKH `script_sig` of the input
    pub fn set_signature(
        &mut self,
        input_index: usize,
        pubkey: PublicKey,
        sig: &EcdsaSig,
        ctx: &NetworkContext,
    ) -> Result<(), Error> {
        let input = self.inputs.get(input_index).ok_or(
            Error::InputIndexOutOfRange {
                requested: input_index,
                present: self.inputs.len(),
            },
        )?;
        if input.script_pubkey != Script::new_p2pkh(&pubkey.pubkey_hash()) {
            return Err(Error::ForeignKey(pubkey));
        }
        signer::verify_input(
            &self.tx,
            input_index,
            &pubkey,
            &input.script_pubkey,
            sig,
            ctx,
        )?;
        self.tx.input[input_index].script_sig = script::Builder::new()
            .push_slice(&sig.to_vec())
            .push_key(&pubkey)
            .into_script();
        Ok(())
    }

    /// Checks whether all inputs have their `script_sig` set
    pub fn is_signed(&self) -> bool {
        self.tx.input.iter().all(|txin| !txin.script_sig.is_empty())
    }
}

/// Constructs funding transaction spending contributed inputs into a single
/// output locked with the joint script of both parties.
///
/// Input value exceeding `amount` is left to miners as the fee. Fails with
/// [`Error::MalformedScript`] unless `joint_script` is a 2-of-2 script
/// produced by [`joint_script`].
pub fn build_funding(
    inputs: &[FundingInput],
    joint_script: &Script,
    amount: u64,
    ctx: &NetworkContext,
) -> Result<FundingTransaction, Error> {
    if amount == 0 || amount > MAX_MONEY {
        return Err(Error::InvalidAmount {
            kind: AmountKind::Funding,
            value: amount,
            limit: MAX_MONEY,
        });
    }
    ctx.policy().validate_amount(AmountKind::Funding, amount)?;
    scripts::parse_funding(joint_script)?;
    let available = inputs
        .iter()
        .try_fold(0u64, |sum, input| sum.checked_add(input.value))
        .unwrap_or(u64::MAX);
    if available < amount {
        return Err(Error::InvalidAmount {
            kind: AmountKind::Funding,
            value: amount,
            limit: available,
        });
    }

    let tx = Transaction {
        version: 2,
        lock_time: PackedLockTime::ZERO,
        input: inputs
            .iter()
            .map(|input| TxIn {
                previous_output: input.outpoint,
                script_sig: Script::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output: vec![TxOut {
            value: amount,
            script_pubkey: joint_script.clone(),
        }],
    };
    debug!(
        "constructed {} funding transaction {} for {} sat ({} sat fee)",
        ctx.network(),
        tx.txid(),
        amount,
        available - amount
    );
    Ok(FundingTransaction {
        inputs: inputs.to_vec(),
        joint_script: joint_script.clone(),
        tx,
    })
}

/// Joint 2-of-2 script of the funding output for the given pair of parties
#[inline]
pub fn joint_script(pubkey1: PublicKey, pubkey2: PublicKey) -> Script {
    Script::alba_funding(0, pubkey1, pubkey2)
}

#[cfg(test)]
mod test {
    use bitcoin::blockdata::opcodes::all::OP_CHECKMULTISIG;

    use super::*;
    use crate::identity::test::identities;
    use crate::scripts::lex_ordered;
    use crate::signer::decode_hex_id;

    fn inputs(ctx: &NetworkContext) -> (Identity, Identity, Vec<FundingInput>) {
        let (id_p, id_v) = identities(ctx);
        let inputs = vec![
            FundingInput::with(
                decode_hex_id(
                    "60ee896b9efc7553d868215cdb4c488827fb833739af75087dbe23536cc0b61c",
                    1,
                )
                .unwrap(),
                5000,
                id_p.payout_script().clone(),
            ),
            FundingInput::with(
                decode_hex_id(
                    "e618afd8ee491a005d665e1321334cc396eb4622af737e487134776f76a721d0",
                    1,
                )
                .unwrap(),
                4500,
                id_v.payout_script().clone(),
            ),
        ];
        (id_p, id_v, inputs)
    }

    #[test]
    fn test_build_funding() {
        let ctx = NetworkContext::testnet();
        let (id_p, id_v, inputs) = inputs(&ctx);
        let script = joint_script(id_p.public_key(), id_v.public_key());
        let funding = build_funding(&inputs, &script, 9000, &ctx).unwrap();

        assert_eq!(funding.tx().input.len(), 2);
        assert_eq!(funding.tx().output.len(), 1);
        assert_eq!(funding.tx().output[0].script_pubkey, script);
        assert_eq!(funding.tx().input[1].previous_output, inputs[1].outpoint());
        assert!(!funding.is_signed());
        assert_eq!(funding.channel_outpoint(), None);

        assert_eq!(
            build_funding(&inputs, &script, 9000, &ctx).unwrap(),
            funding
        );
    }

    #[test]
    fn test_insufficient_inputs() {
        let ctx = NetworkContext::testnet();
        let (id_p, id_v, inputs) = inputs(&ctx);
        let script = joint_script(id_p.public_key(), id_v.public_key());
        assert_eq!(
            build_funding(&inputs, &script, 9501, &ctx),
            Err(Error::InvalidAmount {
                kind: AmountKind::Funding,
                value: 9501,
                limit: 9500
            })
        );
        assert!(build_funding(&[], &script, 1, &ctx).is_err());
        assert!(build_funding(&inputs, &script, 0, &ctx).is_err());
        assert_eq!(
            build_funding(&inputs, &script, 545, &ctx),
            Err(Error::DustAmount {
                kind: AmountKind::Funding,
                value: 545,
                dust_limit: 546
            })
        );
    }

    #[test]
    fn test_foreign_joint_script() {
        let ctx = NetworkContext::testnet();
        let (id_p, id_v, inputs) = inputs(&ctx);
        let [lo, hi] = lex_ordered(id_p.public_key(), id_v.public_key());

        let unordered = script::Builder::new()
            .push_int(2)
            .push_key(&hi)
            .push_key(&lo)
            .push_int(2)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script();
        let same_key = script::Builder::new()
            .push_int(2)
            .push_key(&lo)
            .push_key(&lo)
            .push_int(2)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script();
        let one_of_two = script::Builder::new()
            .push_int(1)
            .push_key(&lo)
            .push_key(&hi)
            .push_int(2)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script();
        for script in [
            unordered,
            same_key,
            one_of_two,
            id_p.payout_script().clone(),
            Script::new(),
        ] {
            assert!(matches!(
                build_funding(&inputs, &script, 9000, &ctx),
                Err(Error::MalformedScript(_))
            ));
        }

        let script = joint_script(id_v.public_key(), id_p.public_key());
        assert_eq!(scripts::parse_funding(&script), Ok([lo, hi]));
    }

    #[test]
    fn test_sign_inputs() {
        let ctx = NetworkContext::testnet();
        let (id_p, id_v, inputs) = inputs(&ctx);
        let script = joint_script(id_p.public_key(), id_v.public_key());
        let mut funding = build_funding(&inputs, &script, 9000, &ctx).unwrap();
        let txid = funding.txid();

        let sig_p = funding.sign_input(0, &id_p, &ctx).unwrap();
        let sig_v = funding.sign_input(1, &id_v, &ctx).unwrap();
        assert_eq!(
            funding.set_signature(0, id_v.public_key(), &sig_v, &ctx),
            Err(Error::ForeignKey(id_v.public_key()))
        );
        assert!(matches!(
            funding.set_signature(1, id_v.public_key(), &sig_p, &ctx),
            Err(Error::SignatureFailure(_))
        ));
        funding.set_signature(0, id_p.public_key(), &sig_p, &ctx).unwrap();
        assert!(!funding.is_signed());
        assert_eq!(funding.channel_outpoint(), None);
        funding.set_signature(1, id_v.public_key(), &sig_v, &ctx).unwrap();
        assert!(funding.is_signed());

        // signing input #0 must not invalidate the signature for input #1
        assert_eq!(funding.sign_input(1, &id_v, &ctx).unwrap(), sig_v);

        assert_ne!(funding.txid(), txid);
        let outpoint = funding.channel_outpoint().unwrap();
        assert_eq!(outpoint.outpoint(), OutPoint::new(funding.txid(), 0));
        let amount: u64 = outpoint.amount();
        assert_eq!(amount, 9000);
        assert_eq!(outpoint.txid(), funding.txid());
        assert_eq!(
            funding.sign_input(2, &id_p, &ctx),
            Err(Error::InputIndexOutOfRange {
                requested: 2,
                present: 2
            })
        );
    }
}
