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

use std::fmt::{self, Debug, Formatter};

use bitcoin::hashes::hex::FromHex;
use bitcoin::secp256k1::SecretKey;
use bitcoin::{Address, PrivateKey, PublicKey, Script};
#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{Error, NetworkContext};

/// Public part of a channel participant identity: everything the
/// counterparty needs to know to construct channel transactions. Immutable
/// once a channel round begins.
#[derive(Getters, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct ChannelParty {
    /// Verification key used in funding multisig and commitment branches
    #[getter(as_copy)]
    public_key: PublicKey,

    /// Default payout script (P2PKH of the public key)
    payout_script: Script,
}

impl ChannelParty {
    /// Constructs party from its public key, using P2PKH as the payout
    /// script
    pub fn with(public_key: PublicKey) -> Self {
        ChannelParty {
            public_key,
            payout_script: Script::new_p2pkh(&public_key.pubkey_hash()),
        }
    }

    /// Constructs party with a custom payout script
    pub fn with_payout(public_key: PublicKey, payout_script: Script) -> Self {
        ChannelParty {
            public_key,
            payout_script,
        }
    }
}

/// Full identity of the local channel participant, including signing key
#[derive(Getters, Clone)]
pub struct Identity {
    #[getter(skip)]
    private_key: PrivateKey,

    /// Public view of the identity
    party: ChannelParty,

    /// Address matching the default payout script
    address: Address,
}

impl Debug for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("private_key", &"<secret>")
            .field("party", &self.party)
            .field("address", &self.address)
            .finish()
    }
}

impl Identity {
    /// Public key of the identity
    #[inline]
    pub fn public_key(&self) -> PublicKey {
        self.party.public_key
    }

    /// Default payout script
    #[inline]
    pub fn payout_script(&self) -> &Script {
        &self.party.payout_script
    }

    #[inline]
    pub(crate) fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }
}

/// Key material accepted by [`derive_identity`]
pub trait SecretKeyMaterial {
    /// Extracts 32 secret bytes; fails with [`Error::InvalidKey`] if the
    /// material does not have the proper length or encoding
    fn secret_bytes(&self) -> Result<[u8; 32], Error>;
}

impl SecretKeyMaterial for [u8; 32] {
    #[inline]
    fn secret_bytes(&self) -> Result<[u8; 32], Error> {
        Ok(*self)
    }
}

impl SecretKeyMaterial for [u8] {
    fn secret_bytes(&self) -> Result<[u8; 32], Error> {
        if self.len() != 32 {
            return Err(Error::InvalidKey);
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(self);
        Ok(bytes)
    }
}

impl SecretKeyMaterial for str {
    fn secret_bytes(&self) -> Result<[u8; 32], Error> {
        let mut data =
            Vec::<u8>::from_hex(self).map_err(|_| Error::InvalidKey)?;
        let bytes = data.as_slice().secret_bytes();
        data.zeroize();
        bytes
    }
}

impl SecretKeyMaterial for String {
    #[inline]
    fn secret_bytes(&self) -> Result<[u8; 32], Error> {
        self.as_str().secret_bytes()
    }
}

/// Derives channel identity (signing key, verification key and default
/// payout script) from secret key material for the network of the context
pub fn derive_identity(
    secret_key_material: &(impl SecretKeyMaterial + ?Sized),
    ctx: &NetworkContext,
) -> Result<Identity, Error> {
    let mut bytes = secret_key_material.secret_bytes()?;
    let secret_key = SecretKey::from_slice(&bytes);
    bytes.zeroize();
    let private_key = PrivateKey::new(
        secret_key.map_err(|_| Error::InvalidKey)?,
        ctx.network(),
    );
    let public_key = private_key.public_key(ctx.secp());
    let address = Address::p2pkh(&public_key, ctx.network());
    let party = ChannelParty::with(public_key);
    debug_assert_eq!(&address.script_pubkey(), party.payout_script());
    debug!("derived channel identity {} ({})", public_key, address);
    Ok(Identity {
        private_key,
        party,
        address,
    })
}
