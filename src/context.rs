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

use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::Network;
#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

use crate::error::{AmountKind, Error};

/// Maximum value which may be encoded into a block-based BIP-68 relative
/// lock time
pub const MAX_RELATIVE_TIMELOCK: u32 = 0xFFFF;

/// Standard dust limit for P2PKH outputs
pub const DEFAULT_DUST_LIMIT: u64 = 546;

/// Maximum amount of satoshis which may ever exist
pub const MAX_MONEY: u64 = 21_000_000 * 100_000_000;

/// Local limits applied by the transaction constructors
#[derive(Getters, Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct Policy {
    /// The largest relative timelock, in blocks, which may be used by the
    /// delayed self-claim branch
    #[getter(as_copy)]
    max_timelock: u32,

    /// Non-zero channel balances below this value are rejected, since the
    /// resulting outputs will never be economical to spend
    #[getter(as_copy)]
    dust_limit: u64,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            max_timelock: MAX_RELATIVE_TIMELOCK,
            dust_limit: DEFAULT_DUST_LIMIT,
        }
    }
}

impl Policy {
    /// Constructs policy with custom limits. The timelock limit is capped by
    /// [`MAX_RELATIVE_TIMELOCK`].
    pub fn with(max_timelock: u32, dust_limit: u64) -> Self {
        Policy {
            max_timelock: max_timelock.min(MAX_RELATIVE_TIMELOCK),
            dust_limit,
        }
    }

    /// Checks that the relative timelock fits both BIP-68 block-height
    /// encoding and the local policy
    pub fn validate_timelock(&self, timelock: u32) -> Result<u16, Error> {
        if timelock > self.max_timelock {
            return Err(Error::InvalidTimelock(timelock));
        }
        Ok(timelock as u16)
    }

    /// Checks that the amount does not exceed the total bitcoin supply and,
    /// if not zero, is above the dust limit
    pub fn validate_amount(
        &self,
        kind: AmountKind,
        value: u64,
    ) -> Result<(), Error> {
        if value > MAX_MONEY {
            return Err(Error::InvalidAmount {
                kind,
                value,
                limit: MAX_MONEY,
            });
        }
        if value != 0 && value < self.dust_limit {
            return Err(Error::DustAmount {
                kind,
                value,
                dust_limit: self.dust_limit,
            });
        }
        Ok(())
    }
}

/// Explicit network configuration passed into every constructor and signer
/// call. There is no process-wide network selection.
#[derive(Getters, Clone, PartialEq, Eq, Debug)]
pub struct NetworkContext {
    /// Network used for address generation and key encoding
    #[getter(as_copy)]
    network: Network,

    /// Constructor limits
    #[getter(as_copy)]
    policy: Policy,

    #[getter(skip)]
    secp: Secp256k1<All>,
}

impl NetworkContext {
    /// Constructs context for the given network with the default policy
    pub fn new(network: Network) -> Self {
        NetworkContext::with(network, Policy::default())
    }

    /// Constructs context for the given network and policy
    pub fn with(network: Network, policy: Policy) -> Self {
        NetworkContext {
            network,
            policy,
            secp: Secp256k1::new(),
        }
    }

    /// Context for the bitcoin testnet, used by the channel tooling by
    /// default
    #[inline]
    pub fn testnet() -> Self {
        NetworkContext::new(Network::Testnet)
    }

    /// Secp256k1 context for signing and verification
    #[inline]
    pub fn secp(&self) -> &Secp256k1<All> {
        &self.secp
    }

    /// Replaces constructor policy
    #[inline]
    pub fn set_policy(&mut self, policy: Policy) {
        self.policy = policy
    }
}
