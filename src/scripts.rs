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

//! Output script templates for the channel funding and commitment
//! transactions.
//!
//! Commitment output script has the following layout:
//!
//! ```text
//! <holder_amount> <punisher_amount> OP_2DROP <punisher_digest> OP_DROP
//! OP_IF
//!     OP_HASH256 <holder_digest> OP_EQUALVERIFY <punisher_pk> OP_CHECKSIG
//! OP_ELSE
//!     OP_IF                                       # only with `bothsigs`
//!         <timelock> OP_CSV OP_DROP               # only if `locked`
//!         <holder_pk> OP_CHECKSIG
//!     OP_ELSE                                     # only with `bothsigs`
//!         OP_2 <pk_lo> <pk_hi> OP_2 OP_CHECKMULTISIG
//!     OP_ENDIF                                    # only with `bothsigs`
//! OP_ENDIF
//! ```
//!
//! The holder is the party owning the commitment transaction; the punisher is
//! the other party, which may take the funds once the holder revokes the
//! state by disclosing the preimage of `holder_digest`. The header does not
//! consume witness data: it records the balance split of the state and the
//! punisher revocation digest, so both commitments of a channel round can be
//! matched against each other.
//!
//! Branches are selected by `OP_IF` selector pushes of the unlocking script,
//! so a single unlocking script can't satisfy more than one of them.

use bitcoin::blockdata::opcodes::all::*;
use bitcoin::blockdata::opcodes::All as Opcode;
use bitcoin::blockdata::script::{self, Instruction};
use bitcoin::{PublicKey, Script, TxOut};
#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

use crate::commitment::CommitmentParameters;
use crate::context::{Policy, MAX_MONEY};
use crate::error::AmountKind;
use crate::revocation::RevocationDigest;
use crate::Error;

/// Spending branches of the commitment output script
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub enum Branch {
    /// Immediate spending by the punisher with the disclosed holder
    /// revocation preimage
    #[display("punishment")]
    Punishment,

    /// Spending by the holder after the relative timelock (if locked)
    #[display("delayed-claim")]
    DelayedClaim,

    /// Immediate cooperative spending with both signatures
    #[display("fallback")]
    Fallback,
}

/// Returns both public keys in lexicographic order of their serialization
pub fn lex_ordered(pubkey1: PublicKey, pubkey2: PublicKey) -> [PublicKey; 2] {
    if pubkey1.to_bytes() <= pubkey2.to_bytes() {
        [pubkey1, pubkey2]
    } else {
        [pubkey2, pubkey1]
    }
}

fn push_multisig(
    builder: script::Builder,
    pk1: PublicKey,
    pk2: PublicKey,
) -> script::Builder {
    let pk = lex_ordered(pk1, pk2);
    builder
        .push_int(2)
        .push_key(&pk[0])
        .push_key(&pk[1])
        .push_int(2)
        .push_opcode(OP_CHECKMULTISIG)
}

/// Commitment output script together with the data it was built from.
///
/// Constructed either by [`CommitmentScript::build`] from the commitment
/// parameters, or by [`CommitmentScript::parse`] from an existing script.
#[derive(Getters, Clone, PartialEq, Eq, Hash, Debug)]
pub struct CommitmentScript {
    /// Party owning the commitment and able to claim it after the timelock
    #[getter(as_copy)]
    holder: PublicKey,

    /// Party able to punish the holder once the state is revoked
    #[getter(as_copy)]
    punisher: PublicKey,

    /// Revocation digest of the holder, gating the punishment branch
    #[getter(as_copy)]
    holder_digest: RevocationDigest,

    /// Revocation digest of the punisher for the same channel state
    #[getter(as_copy)]
    punisher_digest: RevocationDigest,

    /// Holder balance recorded in the script header
    #[getter(as_copy)]
    holder_amount: u64,

    /// Punisher balance recorded in the script header
    #[getter(as_copy)]
    punisher_amount: u64,

    /// Relative timelock of the delayed-claim branch, in blocks
    #[getter(as_copy)]
    timelock: u16,

    /// Whether the delayed-claim branch enforces the timelock
    #[getter(as_copy)]
    locked: bool,

    /// Whether the script has the cooperative both-signatures branch
    #[getter(as_copy)]
    bothsigs: bool,

    #[getter(as_ref)]
    script: Script,
}

impl CommitmentScript {
    /// Validates commitment parameters and composes the output script from
    /// the perspective selected by the parameter role.
    ///
    /// Checks that the revocation digests differ before anything else, so
    /// no script is produced for a degenerate revocation pair. Does not check
    /// that the balances fit into the funding output, which is a task for
    /// the transaction constructor.
    pub fn build(
        params: &CommitmentParameters,
        policy: &Policy,
    ) -> Result<Self, Error> {
        if params.owner_digest() == params.counterparty_digest() {
            return Err(Error::DegenerateRevocationPair(params.owner_digest()));
        }
        let timelock = policy.validate_timelock(params.terms().timelock)?;

        let balance = params.balance();
        policy.validate_amount(AmountKind::Owner, balance.owner_amount)?;
        policy.validate_amount(
            AmountKind::Counterparty,
            balance.counterparty_amount,
        )?;
        if balance.fee > MAX_MONEY {
            return Err(Error::InvalidAmount {
                kind: AmountKind::Fee,
                value: balance.fee,
                limit: MAX_MONEY,
            });
        }
        balance.total().ok_or(Error::InvalidAmount {
            kind: AmountKind::Total,
            value: u64::MAX,
            limit: MAX_MONEY,
        })?;

        let mut template = CommitmentScript {
            holder: params.holder().public_key(),
            punisher: params.punisher().public_key(),
            holder_digest: params.holder_digest(),
            punisher_digest: params.punisher_digest(),
            holder_amount: params.holder_amount(),
            punisher_amount: params.punisher_amount(),
            timelock,
            locked: params.terms().locked,
            bothsigs: params.terms().bothsigs,
            script: Script::new(),
        };
        template.script = template.compose();
        trace!(
            "composed {} commitment script: {:x}",
            params.role(),
            template.script
        );
        Ok(template)
    }

    fn header_script(&self) -> Script {
        script::Builder::new()
            .push_int(self.holder_amount as i64)
            .push_int(self.punisher_amount as i64)
            .push_opcode(OP_2DROP)
            .push_slice(self.punisher_digest.as_ref())
            .push_opcode(OP_DROP)
            .into_script()
    }

    fn punishment_script(&self) -> Script {
        script::Builder::new()
            .push_opcode(OP_HASH256)
            .push_slice(self.holder_digest.as_ref())
            .push_opcode(OP_EQUALVERIFY)
            .push_key(&self.punisher)
            .push_opcode(OP_CHECKSIG)
            .into_script()
    }

    fn claim_script(&self) -> Script {
        let mut builder = script::Builder::new();
        if self.locked {
            builder = builder
                .push_int(self.timelock as i64)
                .push_opcode(OP_CSV)
                .push_opcode(OP_DROP);
        }
        builder
            .push_key(&self.holder)
            .push_opcode(OP_CHECKSIG)
            .into_script()
    }

    fn fallback_script(&self) -> Option<Script> {
        if !self.bothsigs {
            return None;
        }
        Some(
            push_multisig(script::Builder::new(), self.holder, self.punisher)
                .into_script(),
        )
    }

    fn compose(&self) -> Script {
        let mut bytes = self.header_script().to_bytes();
        bytes.push(OP_IF.to_u8());
        bytes.extend(self.punishment_script().as_bytes());
        bytes.push(OP_ELSE.to_u8());
        match self.fallback_script() {
            None => bytes.extend(self.claim_script().as_bytes()),
            Some(fallback) => {
                bytes.push(OP_IF.to_u8());
                bytes.extend(self.claim_script().as_bytes());
                bytes.push(OP_ELSE.to_u8());
                bytes.extend(fallback.as_bytes());
                bytes.push(OP_ENDIF.to_u8());
            }
        }
        bytes.push(OP_ENDIF.to_u8());
        Script::from(bytes)
    }

    /// Recovers template data from a script produced by
    /// [`CommitmentScript::build`]
    pub fn parse(script: &Script) -> Result<Self, Error> {
        let sections = Sections::split(script)?;

        let holder_amount = read_amount(&sections.header[0])?;
        let punisher_amount = read_amount(&sections.header[1])?;
        expect_op(&sections.header[2], OP_2DROP)?;
        let punisher_digest = read_digest(&sections.header[3])?;
        expect_op(&sections.header[4], OP_DROP)?;

        let punishment = &sections.punishment;
        if punishment.len() != 5 {
            return Err(malformed("unexpected punishment branch length"));
        }
        expect_op(&punishment[0], OP_HASH256)?;
        let holder_digest = read_digest(&punishment[1])?;
        expect_op(&punishment[2], OP_EQUALVERIFY)?;
        let punisher = read_key(&punishment[3])?;
        expect_op(&punishment[4], OP_CHECKSIG)?;

        let claim = &sections.claim;
        let (timelock, locked, key_pos) = match claim.len() {
            2 => (0u16, false, 0usize),
            5 => {
                let timelock = read_amount(&claim[0])?;
                if timelock > u16::MAX as u64 {
                    return Err(malformed("timelock is out of range"));
                }
                expect_op(&claim[1], OP_CSV)?;
                expect_op(&claim[2], OP_DROP)?;
                (timelock as u16, true, 3usize)
            }
            _ => return Err(malformed("unexpected claim branch length")),
        };
        let holder = read_key(&claim[key_pos])?;
        expect_op(&claim[key_pos + 1], OP_CHECKSIG)?;

        let template = CommitmentScript {
            holder,
            punisher,
            holder_digest,
            punisher_digest,
            holder_amount,
            punisher_amount,
            timelock,
            locked,
            bothsigs: sections.fallback.is_some(),
            script: script.clone(),
        };
        // Remaining structure (fallback multisig, push encodings) is verified
        // by re-composing the script
        if template.compose() != *script {
            return Err(malformed("script does not match commitment template"));
        }
        Ok(template)
    }

    /// Serialized script bytes
    #[inline]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.script.to_bytes()
    }

    /// Serialized conditions of the punishment branch
    #[inline]
    pub fn punishment_condition(&self) -> Vec<u8> {
        self.punishment_script().to_bytes()
    }

    /// Serialized conditions of the delayed-claim branch
    #[inline]
    pub fn claim_condition(&self) -> Vec<u8> {
        self.claim_script().to_bytes()
    }

    /// Serialized conditions of the fallback branch, if present
    #[inline]
    pub fn fallback_condition(&self) -> Option<Vec<u8>> {
        self.fallback_script().as_ref().map(Script::to_bytes)
    }

    /// Values of the `OP_IF` selectors which must be pushed on top of the
    /// branch unlocking data (last item is on the top of the stack).
    ///
    /// Returns `None` for [`Branch::Fallback`] if the script has no
    /// both-signatures branch.
    pub fn selectors(&self, branch: Branch) -> Option<Vec<bool>> {
        match (branch, self.bothsigs) {
            (Branch::Punishment, _) => Some(vec![true]),
            (Branch::DelayedClaim, false) => Some(vec![false]),
            (Branch::DelayedClaim, true) => Some(vec![true, false]),
            (Branch::Fallback, true) => Some(vec![false, false]),
            (Branch::Fallback, false) => None,
        }
    }
}

/// Owned version of a script instruction
#[derive(Clone, PartialEq, Eq, Debug)]
enum Token {
    Push(Vec<u8>),
    Op(Opcode),
}

impl<'a> From<Instruction<'a>> for Token {
    fn from(instruction: Instruction<'a>) -> Self {
        match instruction {
            Instruction::PushBytes(data) => Token::Push(data.to_vec()),
            Instruction::Op(op) => Token::Op(op),
        }
    }
}

/// Commitment script split into its header and branch bodies
struct Sections {
    header: Vec<Token>,
    punishment: Vec<Token>,
    claim: Vec<Token>,
    fallback: Option<Vec<Token>>,
}

impl Sections {
    const HEADER_LEN: usize = 5;

    fn split(script: &Script) -> Result<Sections, Error> {
        let tokens = tokenize(script)?;
        if tokens.len() < Self::HEADER_LEN + 3 {
            return Err(malformed("script is too short"));
        }
        let (header, body) = tokens.split_at(Self::HEADER_LEN);
        let (punishment, rest) = split_conditional(body)?;
        let (claim, fallback) = match rest.first() {
            Some(Token::Op(op)) if *op == OP_IF => {
                let (claim, fallback) = split_conditional(&rest)?;
                (claim, Some(fallback))
            }
            _ => (rest, None),
        };
        Ok(Sections {
            header: header.to_vec(),
            punishment,
            claim,
            fallback,
        })
    }
}

fn tokenize(script: &Script) -> Result<Vec<Token>, Error> {
    script
        .instructions()
        .map(|res| res.map(Token::from))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| malformed(&err.to_string()))
}

/// Recovers the pair of party keys, in script order, from a funding script
/// produced by [`ScriptGenerators::alba_funding`]
pub fn parse_funding(script: &Script) -> Result<[PublicKey; 2], Error> {
    let tokens = tokenize(script)?;
    if tokens.len() != 5 {
        return Err(malformed("unexpected funding script length"));
    }
    expect_op(&tokens[0], OP_PUSHNUM_2)?;
    let pubkey1 = read_key(&tokens[1])?;
    let pubkey2 = read_key(&tokens[2])?;
    expect_op(&tokens[3], OP_PUSHNUM_2)?;
    expect_op(&tokens[4], OP_CHECKMULTISIG)?;
    if pubkey1 == pubkey2 {
        return Err(malformed("funding script uses the same key twice"));
    }
    if Script::alba_funding(0, pubkey1, pubkey2) != *script {
        return Err(malformed("funding keys are not in lexicographic order"));
    }
    Ok([pubkey1, pubkey2])
}

/// Splits `OP_IF <a> OP_ELSE <b> OP_ENDIF` into `a` and `b`, requiring the
/// conditional to span the whole token sequence
fn split_conditional(
    tokens: &[Token],
) -> Result<(Vec<Token>, Vec<Token>), Error> {
    match tokens.first() {
        Some(Token::Op(op)) if *op == OP_IF => {}
        _ => return Err(malformed("conditional must start with OP_IF")),
    }
    let mut depth = 0usize;
    let mut else_pos = None;
    for (pos, token) in tokens.iter().enumerate().skip(1) {
        match token {
            Token::Op(op) if *op == OP_IF || *op == OP_NOTIF => depth += 1,
            Token::Op(op) if *op == OP_ELSE && depth == 0 => {
                if else_pos.is_some() {
                    return Err(malformed("duplicated OP_ELSE"));
                }
                else_pos = Some(pos)
            }
            Token::Op(op) if *op == OP_ENDIF && depth == 0 => {
                if pos + 1 != tokens.len() {
                    return Err(malformed("data after the final OP_ENDIF"));
                }
                let else_pos = else_pos
                    .ok_or_else(|| malformed("conditional without OP_ELSE"))?;
                return Ok((
                    tokens[1..else_pos].to_vec(),
                    tokens[else_pos + 1..pos].to_vec(),
                ));
            }
            Token::Op(op) if *op == OP_ENDIF => depth -= 1,
            _ => {}
        }
    }
    Err(malformed("unbalanced conditional"))
}

fn malformed(details: &str) -> Error {
    Error::MalformedScript(details.to_owned())
}

fn expect_op(token: &Token, expected: Opcode) -> Result<(), Error> {
    match token {
        Token::Op(op) if *op == expected => Ok(()),
        _ => Err(malformed(&format!("{:?} was expected", expected))),
    }
}

fn read_digest(token: &Token) -> Result<RevocationDigest, Error> {
    match token {
        Token::Push(data) => RevocationDigest::from_slice(data)
            .ok_or_else(|| malformed("invalid revocation digest")),
        _ => Err(malformed("revocation digest push was expected")),
    }
}

fn read_key(token: &Token) -> Result<PublicKey, Error> {
    match token {
        Token::Push(data) => PublicKey::from_slice(data)
            .map_err(|_| malformed("invalid public key")),
        _ => Err(malformed("public key push was expected")),
    }
}

/// Reads non-negative script number of up to 8 bytes, as produced by
/// `Builder::push_int`
fn read_amount(token: &Token) -> Result<u64, Error> {
    let data = match token {
        Token::Op(op) => {
            let code = op.to_u8();
            let one = OP_PUSHNUM_1.to_u8();
            let sixteen = OP_PUSHNUM_16.to_u8();
            if (one..=sixteen).contains(&code) {
                return Ok((code - one + 1) as u64);
            }
            return Err(malformed("numeric push was expected"));
        }
        Token::Push(data) => data,
    };
    if data.is_empty() {
        return Ok(0);
    }
    if data.len() > 8 {
        return Err(malformed("numeric value is too large"));
    }
    if data[data.len() - 1] & 0x80 != 0 {
        return Err(malformed("negative numeric value"));
    }
    Ok(data
        .iter()
        .rev()
        .fold(0u64, |acc, byte| (acc << 8) | *byte as u64))
}

/// Generators of channel output scripts and outputs
pub trait ScriptGenerators {
    /// Funding output requiring signatures of both parties, with keys
    /// ordered lexicographically
    fn alba_funding(
        amount: u64,
        pubkey1: PublicKey,
        pubkey2: PublicKey,
    ) -> Self;

    /// Commitment output locked with the commitment script
    fn alba_commitment(amount: u64, script: &CommitmentScript) -> Self;
}

impl ScriptGenerators for Script {
    fn alba_funding(_: u64, pubkey1: PublicKey, pubkey2: PublicKey) -> Self {
        push_multisig(script::Builder::new(), pubkey1, pubkey2).into_script()
    }

    #[inline]
    fn alba_commitment(_: u64, script: &CommitmentScript) -> Self {
        script.script.clone()
    }
}

impl ScriptGenerators for TxOut {
    #[inline]
    fn alba_funding(
        amount: u64,
        pubkey1: PublicKey,
        pubkey2: PublicKey,
    ) -> Self {
        TxOut {
            value: amount,
            script_pubkey: Script::alba_funding(amount, pubkey1, pubkey2),
        }
    }

    #[inline]
    fn alba_commitment(amount: u64, script: &CommitmentScript) -> Self {
        TxOut {
            value: amount,
            script_pubkey: Script::alba_commitment(amount, script),
        }
    }
}
