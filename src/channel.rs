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

//! Channel state tracked by one of the parties across channel rounds.
//!
//! Every round both parties generate fresh revocation secrets, exchange their
//! digests and construct the pair of commitment transactions. Once a round is
//! superseded, each party discloses its revocation preimage for it; from that
//! moment publishing the superseded commitment lets the other party take all
//! channel funds through the punishment branch. Superseded rounds are kept as
//! evidence.

use std::collections::BTreeMap;

use bitcoin::{EcdsaSig, Script, Transaction};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};

use crate::commitment::{
    build_commitment, decode_commitment_number, Balance,
    CommitmentParameters, CommitmentTransaction, Role, Terms,
};
use crate::funding::ChannelOutpoint;
use crate::revocation::{
    verify_disclosure, RevocationDigest, RevocationSecret, PREIMAGE_LEN,
};
use crate::scripts::Branch;
use crate::{spend, ChannelParty, Identity, NetworkContext};

#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum Error {
    /// Error constructing or signing channel transactions: {0}
    #[from]
    #[display(inner)]
    Construction(crate::Error),

    /// commitment #{0} is superseded by commitment #{1} and must not be
    /// signed
    Superseded(u64, u64),

    /// channel has no commitment #{0}
    UnknownRound(u64),

    /// commitment #{0} is the current channel state and can't be revoked
    RevokingCurrent(u64),

    /// preimage disclosed for commitment #{0} does not match the revocation
    /// digest provided by the remote party
    InvalidDisclosure(u64),

    /// local revocation secret for the next commitment is not generated yet
    NoPendingSecret,

    /// transaction is not a revoked remote commitment of the channel
    NotPunishable,
}

/// Single channel state with both its commitment transactions
#[derive(Getters, Clone, PartialEq, Eq, Debug)]
pub struct Round {
    #[getter(as_copy)]
    commitment_number: u64,

    #[getter(as_copy)]
    balance: Balance,

    /// Commitment held by the local party, signed by the remote party
    local_commitment: CommitmentTransaction,

    /// Commitment held by the remote party, signed by the local party
    remote_commitment: CommitmentTransaction,

    #[getter(as_copy)]
    remote_digest: RevocationDigest,

    /// Remote revocation secret, once disclosed
    #[getter(skip)]
    remote_secret: Option<RevocationSecret>,

    /// Whether the local secret for the round was disclosed
    #[getter(as_copy)]
    revoked: bool,
}

impl Round {
    /// Checks whether the remote party has revoked this round
    #[inline]
    pub fn is_revoked_remotely(&self) -> bool {
        self.remote_secret.is_some()
    }
}

/// View of a channel from one of its parties
#[derive(Getters, Debug)]
pub struct Channel {
    #[getter(skip)]
    identity: Identity,

    /// Other channel party
    remote: ChannelParty,

    /// Whether the local party is the channel owner or the counterparty
    #[getter(as_copy)]
    side: Role,

    #[getter(as_copy)]
    funding: ChannelOutpoint,

    #[getter(as_copy)]
    terms: Terms,

    /// Fee paid by every commitment transaction
    #[getter(as_copy)]
    fee: u64,

    #[getter(skip)]
    local_secrets: BTreeMap<u64, RevocationSecret>,

    #[getter(skip)]
    pending_secret: Option<RevocationSecret>,

    #[getter(skip)]
    rounds: BTreeMap<u64, Round>,
}

impl Channel {
    pub fn with(
        identity: Identity,
        remote: ChannelParty,
        side: Role,
        funding: ChannelOutpoint,
        terms: Terms,
        fee: u64,
    ) -> Self {
        Channel {
            identity,
            remote,
            side,
            funding,
            terms,
            fee,
            local_secrets: empty!(),
            pending_secret: None,
            rounds: empty!(),
        }
    }

    #[inline]
    pub fn local(&self) -> &ChannelParty {
        self.identity.party()
    }

    /// Number of the current channel round, if any round was constructed
    #[inline]
    pub fn current_number(&self) -> Option<u64> {
        self.rounds.keys().next_back().copied()
    }

    #[inline]
    pub fn current_round(&self) -> Option<&Round> {
        self.rounds.values().next_back()
    }

    #[inline]
    pub fn round(&self, commitment_number: u64) -> Option<&Round> {
        self.rounds.get(&commitment_number)
    }

    /// Generates local revocation secret for the next round and returns its
    /// digest, which must be sent to the remote party. Repeated calls before
    /// the round is constructed return the same digest.
    #[inline]
    pub fn next_digest(&mut self) -> Result<RevocationDigest, Error> {
        self.next_digest_with(&mut OsRng)
    }

    pub fn next_digest_with<R>(
        &mut self,
        rng: &mut R,
    ) -> Result<RevocationDigest, Error>
    where
        R: RngCore + CryptoRng,
    {
        if let Some(ref secret) = self.pending_secret {
            return Ok(secret.digest());
        }
        let secret = RevocationSecret::generate_with(rng)?;
        let digest = secret.digest();
        self.pending_secret = Some(secret);
        Ok(digest)
    }

    fn parameters(
        &self,
        local_amount: u64,
        remote_amount: u64,
        local_digest: RevocationDigest,
        remote_digest: RevocationDigest,
        commitment_number: u64,
    ) -> CommitmentParameters {
        let (owner, counterparty, owner_digest, counterparty_digest, balance) =
            match self.side {
                Role::Owner => (
                    self.local().clone(),
                    self.remote.clone(),
                    local_digest,
                    remote_digest,
                    Balance {
                        owner_amount: local_amount,
                        counterparty_amount: remote_amount,
                        fee: self.fee,
                    },
                ),
                Role::Counterparty => (
                    self.remote.clone(),
                    self.local().clone(),
                    remote_digest,
                    local_digest,
                    Balance {
                        owner_amount: remote_amount,
                        counterparty_amount: local_amount,
                        fee: self.fee,
                    },
                ),
            };
        CommitmentParameters::with(
            self.side,
            owner,
            counterparty,
            owner_digest,
            counterparty_digest,
            balance,
            self.terms,
        )
        .with_commitment_number(commitment_number)
    }

    /// Constructs both commitments of the next round, superseding the current
    /// one. Requires local revocation secret generated with
    /// [`Channel::next_digest`] and the remote digest for the round.
    pub fn update(
        &mut self,
        local_amount: u64,
        remote_amount: u64,
        remote_digest: RevocationDigest,
        ctx: &NetworkContext,
    ) -> Result<&Round, Error> {
        let local_digest = self
            .pending_secret
            .as_ref()
            .map(RevocationSecret::digest)
            .ok_or(Error::NoPendingSecret)?;
        let commitment_number =
            self.current_number().map(|n| n + 1).unwrap_or(0);

        let params = self.parameters(
            local_amount,
            remote_amount,
            local_digest,
            remote_digest,
            commitment_number,
        );
        let local_commitment = build_commitment(&self.funding, &params, ctx)?;
        let remote_commitment =
            build_commitment(&self.funding, &params.mirrored(), ctx)?;

        if let Some(secret) = self.pending_secret.take() {
            self.local_secrets.insert(commitment_number, secret);
        }
        debug!(
            "channel moved to round #{}: {} sat local, {} sat remote",
            commitment_number, local_amount, remote_amount
        );
        let round = Round {
            commitment_number,
            balance: params.balance(),
            local_commitment,
            remote_commitment,
            remote_digest,
            remote_secret: None,
            revoked: false,
        };
        Ok(self.rounds.entry(commitment_number).or_insert(round))
    }

    fn current_round_checked(
        &self,
        commitment_number: u64,
    ) -> Result<&Round, Error> {
        let current = self
            .current_number()
            .ok_or(Error::UnknownRound(commitment_number))?;
        if commitment_number > current {
            return Err(Error::UnknownRound(commitment_number));
        }
        if commitment_number < current {
            return Err(Error::Superseded(commitment_number, current));
        }
        self.rounds
            .get(&commitment_number)
            .ok_or(Error::UnknownRound(commitment_number))
    }

    /// Signs remote commitment of the current round, so the remote party is
    /// able to publish it
    pub fn sign_remote_commitment(
        &self,
        commitment_number: u64,
        ctx: &NetworkContext,
    ) -> Result<EcdsaSig, Error> {
        let round = self.current_round_checked(commitment_number)?;
        Ok(round.remote_commitment.sign(&self.identity, ctx)?)
    }

    /// Completes local commitment of the current round with the signature
    /// received from the remote party, producing transaction ready to be
    /// published
    pub fn sign_local_commitment(
        &self,
        commitment_number: u64,
        remote_sig: EcdsaSig,
        ctx: &NetworkContext,
    ) -> Result<Transaction, Error> {
        let round = self.current_round_checked(commitment_number)?;
        let commitment = &round.local_commitment;
        let local_sig = commitment.sign(&self.identity, ctx)?;
        Ok(commitment.with_signatures(
            [
                (self.identity.public_key(), local_sig),
                (self.remote.public_key(), remote_sig),
            ],
            ctx,
        )?)
    }

    /// Discloses local revocation preimage of a superseded round
    pub fn revoke(
        &mut self,
        commitment_number: u64,
    ) -> Result<[u8; PREIMAGE_LEN], Error> {
        if self.current_number() == Some(commitment_number) {
            return Err(Error::RevokingCurrent(commitment_number));
        }
        let round = self
            .rounds
            .get_mut(&commitment_number)
            .ok_or(Error::UnknownRound(commitment_number))?;
        let secret = self
            .local_secrets
            .get(&commitment_number)
            .ok_or(Error::UnknownRound(commitment_number))?;
        round.revoked = true;
        debug!("revoking channel round #{}", commitment_number);
        Ok(secret.disclose())
    }

    /// Accepts revocation preimage of a superseded round from the remote
    /// party
    pub fn receive_revocation(
        &mut self,
        commitment_number: u64,
        preimage: &[u8],
    ) -> Result<(), Error> {
        if self.current_number() == Some(commitment_number) {
            return Err(Error::RevokingCurrent(commitment_number));
        }
        let round = self
            .rounds
            .get_mut(&commitment_number)
            .ok_or(Error::UnknownRound(commitment_number))?;
        if preimage.len() != PREIMAGE_LEN
            || !verify_disclosure(round.remote_digest, preimage)
        {
            return Err(Error::InvalidDisclosure(commitment_number));
        }
        let mut buf = [0u8; PREIMAGE_LEN];
        buf.copy_from_slice(preimage);
        round.remote_secret = Some(RevocationSecret::with(buf));
        debug!("remote party revoked channel round #{}", commitment_number);
        Ok(())
    }

    /// Checks whether a published transaction is a revoked remote commitment
    /// and returns the round and the remote revocation preimage allowing to
    /// punish it
    pub fn punishment_for(
        &self,
        tx: &Transaction,
    ) -> Option<(u64, [u8; PREIMAGE_LEN])> {
        let (owner, counterparty) = match self.side {
            Role::Owner => {
                (self.identity.public_key(), self.remote.public_key())
            }
            Role::Counterparty => {
                (self.remote.public_key(), self.identity.public_key())
            }
        };
        let commitment_number =
            decode_commitment_number(tx, owner, counterparty)?;
        let round = self.rounds.get(&commitment_number)?;
        let unsigned = round.remote_commitment.tx();
        if tx.output != unsigned.output
            || tx.input.len() != 1
            || tx.input[0].previous_output != unsigned.input[0].previous_output
        {
            return None;
        }
        let secret = round.remote_secret.as_ref()?;
        warn!(
            "remote party published revoked commitment #{} as {}",
            commitment_number,
            tx.txid()
        );
        Some((commitment_number, secret.disclose()))
    }

    /// Constructs and signs transaction taking all funds of a published
    /// revoked remote commitment through its punishment branch
    pub fn punish(
        &self,
        tx: &Transaction,
        payout_script: Script,
        fee: u64,
        ctx: &NetworkContext,
    ) -> Result<Transaction, Error> {
        let (commitment_number, preimage) =
            self.punishment_for(tx).ok_or(Error::NotPunishable)?;
        let commitment = &self.rounds[&commitment_number].remote_commitment;
        let mut sweep = spend::build_sweep(
            commitment,
            tx.txid(),
            Branch::Punishment,
            payout_script,
            fee,
            ctx,
        )?;
        let sig = crate::signer::sign_input(
            &sweep,
            0,
            &self.identity,
            commitment.script().script(),
            ctx,
        )?;
        sweep.input[0].script_sig =
            spend::unlock_punishment(commitment.script(), &sig, &preimage)?;
        debug!(
            "constructed punishment {} for revoked commitment #{}",
            sweep.txid(),
            commitment_number
        );
        Ok(sweep)
    }
}

#[cfg(test)]
mod test {
    use bitcoin::OutPoint;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::commitment::test::funding;
    use crate::identity::test::identities;
    use crate::spend::test::verify_sweep;

    const TERMS: Terms = Terms {
        timelock: 2,
        locked: true,
        bothsigs: false,
    };

    fn channels(ctx: &NetworkContext) -> (Channel, Channel) {
        let (id_p, id_v) = identities(ctx);
        let party_p = id_p.party().clone();
        let party_v = id_v.party().clone();
        (
            Channel::with(id_p, party_v, Role::Owner, funding(), TERMS, 500),
            Channel::with(id_v, party_p, Role::Counterparty, funding(), TERMS, 500),
        )
    }

    /// Runs one channel round between both parties
    fn round(
        p: &mut Channel,
        v: &mut Channel,
        p_amount: u64,
        v_amount: u64,
        ctx: &NetworkContext,
    ) -> u64 {
        let digest_p = p.next_digest().unwrap();
        let digest_v = v.next_digest().unwrap();
        let number = p
            .update(p_amount, v_amount, digest_v, ctx)
            .unwrap()
            .commitment_number();
        v.update(v_amount, p_amount, digest_p, ctx).unwrap();
        number
    }

    #[test]
    fn test_parties_agree() {
        let ctx = NetworkContext::testnet();
        let (mut p, mut v) = channels(&ctx);
        assert_eq!(round(&mut p, &mut v, 4000, 4500, &ctx), 0);

        let round_p = p.current_round().unwrap();
        let round_v = v.current_round().unwrap();
        assert_eq!(
            round_p.local_commitment().serialize(),
            round_v.remote_commitment().serialize()
        );
        assert_eq!(
            round_p.remote_commitment().serialize(),
            round_v.local_commitment().serialize()
        );
        assert_eq!(round_p.local_commitment().role(), Role::Owner);
        assert_eq!(round_v.local_commitment().role(), Role::Counterparty);
        assert_eq!(round_p.balance().owner_amount, 4000);
        assert_eq!(round_v.balance().owner_amount, 4000);
    }

    #[test]
    fn test_next_digest() {
        let ctx = NetworkContext::testnet();
        let (mut p, _) = channels(&ctx);
        let mut rng = StdRng::seed_from_u64(1);
        let digest = p.next_digest_with(&mut rng).unwrap();
        assert_eq!(p.next_digest().unwrap(), digest);
        assert_eq!(
            p.update(4000, 4500, crate::revocation::digest_of(b"V"), &ctx)
                .unwrap()
                .local_commitment()
                .params()
                .owner_digest(),
            digest
        );
        assert_ne!(p.next_digest().unwrap(), digest);
    }

    #[test]
    fn test_no_pending_secret() {
        let ctx = NetworkContext::testnet();
        let (mut p, _) = channels(&ctx);
        assert_eq!(
            p.update(4000, 4500, crate::revocation::digest_of(b"V"), &ctx)
                .unwrap_err(),
            Error::NoPendingSecret
        );
        assert_eq!(p.current_number(), None);
    }

    #[test]
    fn test_invalid_update_keeps_secret() {
        let ctx = NetworkContext::testnet();
        let (mut p, _) = channels(&ctx);
        let digest = p.next_digest().unwrap();
        assert!(matches!(
            p.update(4000, 5000, crate::revocation::digest_of(b"V"), &ctx),
            Err(Error::Construction(crate::Error::InvalidAmount { .. }))
        ));
        assert_eq!(p.current_number(), None);
        assert_eq!(p.next_digest().unwrap(), digest);
    }

    #[test]
    fn test_signing_rounds() {
        let ctx = NetworkContext::testnet();
        let (mut p, mut v) = channels(&ctx);
        round(&mut p, &mut v, 4000, 4500, &ctx);

        let sig_v = v.sign_remote_commitment(0, &ctx).unwrap();
        let signed = p.sign_local_commitment(0, sig_v, &ctx).unwrap();
        assert_eq!(
            signed.output,
            p.current_round().unwrap().local_commitment().tx().output
        );

        round(&mut p, &mut v, 3000, 5500, &ctx);
        assert_eq!(
            v.sign_remote_commitment(0, &ctx).unwrap_err(),
            Error::Superseded(0, 1)
        );
        assert_eq!(
            p.sign_local_commitment(0, sig_v, &ctx).unwrap_err(),
            Error::Superseded(0, 1)
        );
        assert_eq!(
            v.sign_remote_commitment(2, &ctx).unwrap_err(),
            Error::UnknownRound(2)
        );
        // signature of the superseded round is not valid for the current one
        assert!(matches!(
            p.sign_local_commitment(1, sig_v, &ctx),
            Err(Error::Construction(crate::Error::SignatureFailure(_)))
        ));
        let sig_v = v.sign_remote_commitment(1, &ctx).unwrap();
        p.sign_local_commitment(1, sig_v, &ctx).unwrap();
    }

    #[test]
    fn test_revocation() {
        let ctx = NetworkContext::testnet();
        let (mut p, mut v) = channels(&ctx);
        round(&mut p, &mut v, 4000, 4500, &ctx);
        assert_eq!(p.revoke(0).unwrap_err(), Error::RevokingCurrent(0));

        round(&mut p, &mut v, 3000, 5500, &ctx);
        assert_eq!(p.revoke(7).unwrap_err(), Error::UnknownRound(7));
        let preimage = p.revoke(0).unwrap();
        assert!(p.round(0).unwrap().revoked());

        let mut wrong = preimage;
        wrong[31] ^= 0x80;
        assert_eq!(
            v.receive_revocation(0, &wrong).unwrap_err(),
            Error::InvalidDisclosure(0)
        );
        assert_eq!(
            v.receive_revocation(0, &preimage[..16]).unwrap_err(),
            Error::InvalidDisclosure(0)
        );
        assert_eq!(
            v.receive_revocation(1, &preimage).unwrap_err(),
            Error::RevokingCurrent(1)
        );
        assert!(!v.round(0).unwrap().is_revoked_remotely());
        v.receive_revocation(0, &preimage).unwrap();
        assert!(v.round(0).unwrap().is_revoked_remotely());
    }

    #[test]
    fn test_punishment() {
        let ctx = NetworkContext::testnet();
        let (mut p, mut v) = channels(&ctx);
        round(&mut p, &mut v, 4000, 4500, &ctx);
        let sig_v = v.sign_remote_commitment(0, &ctx).unwrap();
        let revoked = p.sign_local_commitment(0, sig_v, &ctx).unwrap();

        round(&mut p, &mut v, 3000, 5500, &ctx);
        let sig_v = v.sign_remote_commitment(1, &ctx).unwrap();
        let current = p.sign_local_commitment(1, sig_v, &ctx).unwrap();

        // not yet revoked
        assert_eq!(v.punishment_for(&revoked), None);
        assert_eq!(
            v.punish(&revoked, v.local().payout_script().clone(), 500, &ctx)
                .unwrap_err(),
            Error::NotPunishable
        );

        let preimage = p.revoke(0).unwrap();
        v.receive_revocation(0, &preimage).unwrap();
        assert_eq!(v.punishment_for(&revoked), Some((0, preimage)));
        assert_eq!(v.punishment_for(&current), None);
        // own commitments are never punishable
        assert_eq!(p.punishment_for(&revoked), None);

        let payout = v.local().payout_script().clone();
        let sweep = v.punish(&revoked, payout.clone(), 500, &ctx).unwrap();
        assert_eq!(sweep.input[0].previous_output, OutPoint::new(revoked.txid(), 0));
        assert_eq!(sweep.output[0].value, 8000);
        assert_eq!(sweep.output[0].script_pubkey, payout);

        let template = v.round(0).unwrap().remote_commitment().script();
        let pushes = sweep.input[0]
            .script_sig
            .instructions()
            .map(Result::unwrap)
            .collect::<Vec<_>>();
        assert_eq!(pushes.len(), 3);
        assert_eq!(
            pushes[1],
            bitcoin::blockdata::script::Instruction::PushBytes(&preimage[..])
        );
        assert_eq!(template.selectors(Branch::Punishment), Some(vec![true]));
        verify_sweep(&sweep, &revoked.output[0]).unwrap();
        // the preimage does not open the current commitment
        assert!(verify_sweep(&sweep, &current.output[0]).is_err());
    }
}
