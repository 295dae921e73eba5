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

//! Signing and serialization of channel transactions.
//!
//! Channel outputs are bare scripts, so inputs spending them are signed with
//! the legacy `SIGHASH_ALL` signature hash over the spent script.

use bitcoin::consensus::encode;
use bitcoin::hashes::hex::FromHex;
use bitcoin::util::sighash::SighashCache;
use bitcoin::{
    EcdsaSig, EcdsaSighashType, OutPoint, PublicKey, Script, Transaction, Txid,
};
use secp256k1::schnorr::Signature as SchnorrSignature;
use secp256k1::{KeyPair, Message, XOnlyPublicKey};

use crate::{Error, Identity, NetworkContext};

fn legacy_sighash(
    tx: &Transaction,
    input_index: usize,
    spent_script: &Script,
) -> Result<Message, Error> {
    if input_index >= tx.input.len() {
        return Err(Error::InputIndexOutOfRange {
            requested: input_index,
            present: tx.input.len(),
        });
    }
    let sighash = SighashCache::new(tx)
        .legacy_signature_hash(
            input_index,
            spent_script,
            EcdsaSighashType::All.to_u32(),
        )
        .map_err(|err| Error::SignatureFailure(err.to_string()))?;
    Message::from_slice(&sighash[..])
        .map_err(|err| Error::SignatureFailure(err.to_string()))
}

/// Produces `SIGHASH_ALL` signature of the identity for the transaction
/// input spending an output locked with `spent_script`
pub fn sign_input(
    tx: &Transaction,
    input_index: usize,
    identity: &Identity,
    spent_script: &Script,
    ctx: &NetworkContext,
) -> Result<EcdsaSig, Error> {
    let msg = legacy_sighash(tx, input_index, spent_script)?;
    let sig = ctx.secp().sign_ecdsa(&msg, &identity.private_key().inner);
    trace!(
        "signed input #{} of {} with {}",
        input_index,
        tx.txid(),
        identity.public_key()
    );
    Ok(EcdsaSig {
        sig,
        hash_ty: EcdsaSighashType::All,
    })
}

/// Checks `SIGHASH_ALL` signature of the transaction input spending an
/// output locked with `spent_script`
pub fn verify_input(
    tx: &Transaction,
    input_index: usize,
    pubkey: &PublicKey,
    spent_script: &Script,
    sig: &EcdsaSig,
    ctx: &NetworkContext,
) -> Result<(), Error> {
    if sig.hash_ty != EcdsaSighashType::All {
        return Err(Error::SignatureFailure(format!(
            "unsupported sighash type {}",
            sig.hash_ty
        )));
    }
    let msg = legacy_sighash(tx, input_index, spent_script)?;
    ctx.secp()
        .verify_ecdsa(&msg, &sig.sig, &pubkey.inner)
        .map_err(|err| Error::SignatureFailure(err.to_string()))
}

/// Experimental BIP-340 signature over a 32-byte message. The signature is
/// deterministic for the same auxiliary randomness.
pub fn sign_schnorr(
    msg: [u8; 32],
    identity: &Identity,
    aux_rand: [u8; 32],
    ctx: &NetworkContext,
) -> Result<(SchnorrSignature, XOnlyPublicKey), Error> {
    let keypair =
        KeyPair::from_secret_key(ctx.secp(), &identity.private_key().inner);
    let msg = Message::from_slice(&msg)
        .map_err(|err| Error::SignatureFailure(err.to_string()))?;
    let sig = ctx.secp().sign_schnorr_with_aux_rand(&msg, &keypair, &aux_rand);
    let (pubkey, _) = XOnlyPublicKey::from_keypair(&keypair);
    Ok((sig, pubkey))
}

pub fn verify_schnorr(
    msg: [u8; 32],
    sig: &SchnorrSignature,
    pubkey: &XOnlyPublicKey,
    ctx: &NetworkContext,
) -> Result<(), Error> {
    let msg = Message::from_slice(&msg)
        .map_err(|err| Error::SignatureFailure(err.to_string()))?;
    ctx.secp()
        .verify_schnorr(sig, &msg, pubkey)
        .map_err(|err| Error::SignatureFailure(err.to_string()))
}

/// Consensus serialization of a transaction
#[inline]
pub fn serialize(tx: &Transaction) -> Vec<u8> {
    encode::serialize(tx)
}

/// Consensus serialization of a transaction as a hex string
#[inline]
pub fn serialize_hex(tx: &Transaction) -> String {
    encode::serialize_hex(tx)
}

/// Decodes outpoint from a transaction id in its usual (reversed byte order)
/// hex representation
pub fn decode_hex_id(txid: &str, vout: u32) -> Result<OutPoint, Error> {
    let txid = Txid::from_hex(txid)
        .map_err(|_| Error::InvalidOutpoint(txid.to_owned()))?;
    Ok(OutPoint::new(txid, vout))
}

#[cfg(test)]
pub(crate) mod test {
    use bitcoin::hashes::hex::ToHex;
    use bitcoin::{PackedLockTime, Sequence, TxIn, TxOut, Witness};

    use super::*;
    use crate::identity::test::identities;

    pub(crate) const FUNDING_TXID: &str =
        "da09f9ac4c16a0f988350bca3243c9e3b6b7f6b8c471db7c49c50de2cb2b3eeb";

    fn tx() -> Transaction {
        Transaction {
            version: 2,
            lock_time: PackedLockTime(0),
            input: vec![TxIn {
                previous_output: decode_hex_id(FUNDING_TXID, 0).unwrap(),
                script_sig: Script::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: 8000,
                script_pubkey: Script::new_op_return(b"alba"),
            }],
        }
    }

    #[test]
    fn test_decode_hex_id() {
        let outpoint = decode_hex_id(FUNDING_TXID, 1).unwrap();
        assert_eq!(outpoint.txid.to_string(), FUNDING_TXID);
        assert_eq!(outpoint.vout, 1);
        assert_eq!(
            decode_hex_id("da09f9", 0),
            Err(Error::InvalidOutpoint(s!("da09f9")))
        );
        assert!(decode_hex_id(&FUNDING_TXID.replace('d', "x"), 0).is_err());
    }

    #[test]
    fn test_sign_verify_input() {
        let ctx = NetworkContext::testnet();
        let (id_p, id_v) = identities(&ctx);
        let tx = tx();
        let script = id_p.payout_script().clone();
        let sig = sign_input(&tx, 0, &id_p, &script, &ctx).unwrap();
        assert_eq!(sig.hash_ty, EcdsaSighashType::All);
        assert_eq!(*sig.to_vec().last().unwrap(), 0x01);
        verify_input(&tx, 0, &id_p.public_key(), &script, &sig, &ctx).unwrap();
        assert!(matches!(
            verify_input(&tx, 0, &id_v.public_key(), &script, &sig, &ctx),
            Err(Error::SignatureFailure(_))
        ));
        let other_script = id_v.payout_script();
        assert!(matches!(
            verify_input(&tx, 0, &id_p.public_key(), other_script, &sig, &ctx),
            Err(Error::SignatureFailure(_))
        ));

        // ECDSA signing in secp256k1 is deterministic (RFC6979)
        assert_eq!(sign_input(&tx, 0, &id_p, &script, &ctx).unwrap(), sig);
    }

    #[test]
    fn test_input_out_of_range() {
        let ctx = NetworkContext::testnet();
        let (id_p, _) = identities(&ctx);
        assert_eq!(
            sign_input(&tx(), 1, &id_p, id_p.payout_script(), &ctx),
            Err(Error::InputIndexOutOfRange {
                requested: 1,
                present: 1
            })
        );
    }

    #[test]
    fn test_schnorr() {
        let ctx = NetworkContext::testnet();
        let (id_p, id_v) = identities(&ctx);
        let msg = [0x42u8; 32];
        let (sig, pubkey) = sign_schnorr(msg, &id_p, [7u8; 32], &ctx).unwrap();
        let (sig2, _) = sign_schnorr(msg, &id_p, [7u8; 32], &ctx).unwrap();
        assert_eq!(sig, sig2);
        let (sig3, pubkey3) =
            sign_schnorr(msg, &id_p, [8u8; 32], &ctx).unwrap();
        assert_ne!(sig, sig3);
        assert_eq!(pubkey, pubkey3);
        verify_schnorr(msg, &sig3, &pubkey, &ctx).unwrap();
        verify_schnorr(msg, &sig, &pubkey, &ctx).unwrap();
        assert!(verify_schnorr([0x43u8; 32], &sig, &pubkey, &ctx).is_err());

        let (_, other) = sign_schnorr(msg, &id_v, [7u8; 32], &ctx).unwrap();
        assert!(verify_schnorr(msg, &sig, &other, &ctx).is_err());
    }

    #[test]
    fn test_serialize() {
        let tx = tx();
        let data = serialize(&tx);
        assert_eq!(&data[..4], &[2, 0, 0, 0]);
        assert_eq!(serialize_hex(&tx), data.to_hex());
        let decoded: Transaction = encode::deserialize(&data).unwrap();
        assert_eq!(decoded, tx);
    }
}
