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

//! Per-state revocation secrets gating the punishment branch of commitment
//! scripts.
//!
//! Each party generates a fresh secret for every channel state. Only the
//! digest of the secret is given to the counterparty during the state setup;
//! the preimage itself is disclosed when the party invalidates the state.
//! Once the preimage is known to the counterparty, any attempt to publish the
//! revoked commitment lets the counterparty take all channel funds.

use std::fmt::{self, Debug, Display, Formatter};

use bitcoin::hashes::hex::ToHex;
use bitcoin::hashes::{sha256d, Hash};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::Error;

/// Length of the revocation secret preimage, in bytes
pub const PREIMAGE_LEN: usize = 32;

/// Digest of a revocation secret (double SHA-256 of the preimage), committed
/// into the punishment branch of commitment scripts
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
pub struct RevocationDigest(sha256d::Hash);

impl RevocationDigest {
    /// Reconstructs digest from its raw byte representation
    #[inline]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        RevocationDigest(sha256d::Hash::from_inner(bytes))
    }

    /// Returns raw digest bytes, in the order they are pushed into the
    /// commitment script
    #[inline]
    pub fn to_bytes(self) -> [u8; 32] {
        self.0.into_inner()
    }

    /// Reads digest from a script push
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        sha256d::Hash::from_slice(slice).ok().map(RevocationDigest)
    }
}

impl From<sha256d::Hash> for RevocationDigest {
    #[inline]
    fn from(hash: sha256d::Hash) -> Self {
        RevocationDigest(hash)
    }
}

impl AsRef<[u8]> for RevocationDigest {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0[..]
    }
}

impl Display for RevocationDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_ref().to_hex())
    }
}

impl Debug for RevocationDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "RevocationDigest({})", self)
    }
}

impl From<&RevocationSecret> for RevocationDigest {
    #[inline]
    fn from(secret: &RevocationSecret) -> Self {
        secret.digest
    }
}

/// Revocation secret owned by the party which generated it.
///
/// The preimage is wiped from memory when the value is dropped. It must be
/// disclosed only after the commitment it protects is superseded.
#[derive(Clone, PartialEq, Eq)]
pub struct RevocationSecret {
    preimage: [u8; PREIMAGE_LEN],
    digest: RevocationDigest,
}

impl Drop for RevocationSecret {
    fn drop(&mut self) {
        self.preimage.zeroize()
    }
}

impl Debug for RevocationSecret {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevocationSecret")
            .field("preimage", &"<secret>")
            .field("digest", &self.digest)
            .finish()
    }
}

impl RevocationSecret {
    /// Generates fresh secret using operating system entropy source.
    ///
    /// Fails with [`Error::EntropyExhausted`] if the OS is unable to provide
    /// randomness; in this case channel setup must be aborted.
    #[inline]
    pub fn generate() -> Result<Self, Error> {
        RevocationSecret::generate_with(&mut OsRng)
    }

    /// Generates fresh secret using the provided cryptographically secure
    /// random number generator
    pub fn generate_with<R>(rng: &mut R) -> Result<Self, Error>
    where
        R: RngCore + CryptoRng,
    {
        let mut preimage = [0u8; PREIMAGE_LEN];
        rng.try_fill_bytes(&mut preimage)
            .map_err(|err| Error::EntropyExhausted(err.to_string()))?;
        let secret = RevocationSecret::with(preimage);
        preimage.zeroize();
        trace!("generated revocation secret with digest {}", secret.digest);
        Ok(secret)
    }

    /// Restores revocation secret from a known preimage
    pub fn with(preimage: [u8; PREIMAGE_LEN]) -> Self {
        RevocationSecret {
            preimage,
            digest: digest_of(&preimage),
        }
    }

    /// Digest of the secret, which is shared with the counterparty
    #[inline]
    pub fn digest(&self) -> RevocationDigest {
        self.digest
    }

    /// Reveals secret preimage. Calling this is an irreversible act of
    /// revocation: once the preimage leaves the party, any commitment
    /// transaction protected by it becomes punishable.
    #[inline]
    pub fn disclose(&self) -> [u8; PREIMAGE_LEN] {
        debug!("disclosing revocation secret for digest {}", self.digest);
        self.preimage
    }
}

/// Generates fresh revocation secret from the operating system entropy
/// source
#[inline]
pub fn generate_secret() -> Result<RevocationSecret, Error> {
    RevocationSecret::generate()
}

/// Computes revocation digest for a given preimage as a double SHA-256 hash,
/// matching `OP_HASH256` used in commitment scripts
#[inline]
pub fn digest_of(preimage: impl AsRef<[u8]>) -> RevocationDigest {
    RevocationDigest(sha256d::Hash::hash(preimage.as_ref()))
}

/// Checks whether a candidate preimage, disclosed by a counterparty, matches
/// the revocation digest it has committed to
#[inline]
pub fn verify_disclosure(
    digest: RevocationDigest,
    candidate_preimage: impl AsRef<[u8]>,
) -> bool {
    digest_of(candidate_preimage) == digest
}

#[cfg(test)]
mod test {
    use bitcoin::hashes::hex::FromHex;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    struct DryRng;

    impl RngCore for DryRng {
        fn next_u32(&mut self) -> u32 {
            unreachable!()
        }
        fn next_u64(&mut self) -> u64 {
            unreachable!()
        }
        fn fill_bytes(&mut self, _: &mut [u8]) {
            unreachable!()
        }
        fn try_fill_bytes(&mut self, _: &mut [u8]) -> Result<(), rand::Error> {
            Err(rand::Error::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "entropy pool is empty",
            )))
        }
    }

    impl CryptoRng for DryRng {}

    #[test]
    fn test_digest_is_hash256() {
        // HASH256 of the empty string
        assert_eq!(
            digest_of(b"").to_bytes().to_vec(),
            Vec::<u8>::from_hex(
                "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
            )
            .unwrap()
        );
    }

    #[test]
    fn test_generated_secrets_differ() {
        let secret1 = RevocationSecret::generate().unwrap();
        let secret2 = RevocationSecret::generate().unwrap();
        assert_ne!(secret1.digest(), secret2.digest());
        assert_ne!(secret1.disclose(), secret2.disclose());
    }

    #[test]
    fn test_generate_with_rng() {
        let mut rng = StdRng::seed_from_u64(42);
        let secret = RevocationSecret::generate_with(&mut rng).unwrap();
        assert_eq!(secret.digest(), digest_of(secret.disclose()));
        assert_eq!(secret, RevocationSecret::with(secret.disclose()));
    }

    #[test]
    fn test_entropy_exhausted() {
        let err = RevocationSecret::generate_with(&mut DryRng).unwrap_err();
        assert!(matches!(err, Error::EntropyExhausted(_)));
    }

    #[test]
    fn test_verify_disclosure() {
        let secret = RevocationSecret::generate().unwrap();
        let digest = secret.digest();
        let preimage = secret.disclose();
        assert!(verify_disclosure(digest, preimage));

        for byte in 0..PREIMAGE_LEN {
            for bit in 0..8 {
                let mut flipped = preimage;
                flipped[byte] ^= 1 << bit;
                assert!(!verify_disclosure(digest, flipped));
            }
        }
        assert!(!verify_disclosure(digest, &preimage[..31]));
        assert!(!verify_disclosure(digest, b""));
        assert!(!verify_disclosure(digest, digest));
    }

    #[test]
    fn test_digest_bytes() {
        let secret = RevocationSecret::generate().unwrap();
        let digest = secret.digest();
        assert_eq!(RevocationDigest::from_bytes(digest.to_bytes()), digest);
        assert_eq!(RevocationDigest::from_slice(digest.as_ref()), Some(digest));
        assert_eq!(RevocationDigest::from_slice(&[0u8; 31]), None);
        assert_eq!(digest.to_string(), digest.as_ref().to_hex());
    }

    #[test]
    fn test_debug_hides_preimage() {
        let secret = RevocationSecret::with([0xAB; PREIMAGE_LEN]);
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("ab, ab"));
        assert!(debug.contains("<secret>"));
    }
}
