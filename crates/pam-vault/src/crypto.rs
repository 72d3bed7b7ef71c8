//! Sealing and unsealing of secret values with AES-256-GCM using `ring`.
//!
//! Every call to [`CryptoEngine::seal`] is self-contained:
//!
//! 1. A fresh 128-bit salt is drawn from the system CSPRNG.
//! 2. A one-shot 256-bit key is derived from the master key and that salt with
//!    PBKDF2-HMAC-SHA256 (100,000 iterations).
//! 3. The plaintext is encrypted under a fresh random 96-bit nonce.
//!
//! Only the resulting [`Envelope`] (ciphertext, nonce, salt, tag) is kept. The
//! derived key lives in a [`Zeroizing`] buffer and is wiped when the call
//! returns. [`CryptoEngine::unseal`] re-derives the key from the stored salt
//! and fails closed with [`VaultError::Integrity`] on any tag mismatch.

use std::num::NonZeroU32;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ring::aead::{self, Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, SealingKey, UnboundKey};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};

/// Length of the derived AES-256-GCM key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the AES-256-GCM nonce in bytes (96 bits).
pub const NONCE_LEN_BYTES: usize = NONCE_LEN;

/// Length of the per-seal PBKDF2 salt in bytes (128 bits).
pub const SALT_LEN: usize = 16;

/// Length of the GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// PBKDF2 iteration count applied on every seal and unseal.
pub const PBKDF2_ITERATIONS: NonZeroU32 = NonZeroU32::new(100_000).unwrap();

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

static AEAD_ALG: &aead::Algorithm = &aead::AES_256_GCM;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The four components produced together by one seal operation.
///
/// Components from different seals must never be mixed; the store always
/// writes all four in a single statement.
#[derive(Clone, PartialEq, Eq)]
pub struct Envelope {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; NONCE_LEN_BYTES],
    pub salt: [u8; SALT_LEN],
    pub tag: [u8; TAG_LEN],
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

/// An [`Envelope`] with each component independently base64 encoded, which
/// is how the store persists it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedEnvelope {
    pub ciphertext: String,
    pub iv: String,
    pub salt: String,
    pub tag: String,
}

impl Envelope {
    /// Base64-encode each component for storage.
    pub fn encode(&self) -> EncodedEnvelope {
        EncodedEnvelope {
            ciphertext: BASE64.encode(&self.ciphertext),
            iv: BASE64.encode(self.iv),
            salt: BASE64.encode(self.salt),
            tag: BASE64.encode(self.tag),
        }
    }
}

impl EncodedEnvelope {
    /// Decode a stored envelope.
    ///
    /// A component that is not valid base64 or has the wrong length means the
    /// record is corrupt, which is reported as [`VaultError::Integrity`].
    pub fn decode(&self) -> Result<Envelope> {
        Ok(Envelope {
            ciphertext: decode_component("ciphertext", &self.ciphertext)?,
            iv: decode_fixed("iv", &self.iv)?,
            salt: decode_fixed("salt", &self.salt)?,
            tag: decode_fixed("tag", &self.tag)?,
        })
    }
}

fn decode_component(field: &str, encoded: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(encoded)
        .map_err(|e| VaultError::Integrity {
            reason: format!("stored {field} is not valid base64: {e}"),
        })
}

fn decode_fixed<const N: usize>(field: &str, encoded: &str) -> Result<[u8; N]> {
    let bytes = decode_component(field, encoded)?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| VaultError::Integrity {
        reason: format!("stored {field} is {} bytes, expected {N}", bytes.len()),
    })
}

// ---------------------------------------------------------------------------
// Nonce handling
// ---------------------------------------------------------------------------

/// A single-use nonce sequence that yields exactly one nonce and then errors.
///
/// Each derived key is used for exactly one seal or open, so the sequence
/// never needs to advance twice.
struct SingleNonce(Option<[u8; NONCE_LEN_BYTES]>);

impl SingleNonce {
    fn new(bytes: [u8; NONCE_LEN_BYTES]) -> Self {
        Self(Some(bytes))
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Seals and unseals values under a master key.
pub struct CryptoEngine {
    master_key: Zeroizing<Vec<u8>>,
    rng: SystemRandom,
}

impl std::fmt::Debug for CryptoEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoEngine").finish_non_exhaustive()
    }
}

impl CryptoEngine {
    /// Create an engine for the given master key (typically a passphrase).
    pub fn new(master_key: impl AsRef<[u8]>) -> Self {
        Self {
            master_key: Zeroizing::new(master_key.as_ref().to_vec()),
            rng: SystemRandom::new(),
        }
    }

    /// Encrypt `plaintext` into a fresh [`Envelope`].
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::EncryptionFailed`] if random generation or
    /// `ring` fails.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Envelope> {
        let mut salt = [0u8; SALT_LEN];
        self.rng
            .fill(&mut salt)
            .map_err(|_| VaultError::EncryptionFailed {
                reason: "failed to generate random salt".into(),
            })?;

        let mut iv = [0u8; NONCE_LEN_BYTES];
        self.rng
            .fill(&mut iv)
            .map_err(|_| VaultError::EncryptionFailed {
                reason: "failed to generate random nonce".into(),
            })?;

        let key = derive_key(&self.master_key, &salt);
        let unbound_key =
            UnboundKey::new(AEAD_ALG, &key[..]).map_err(|_| VaultError::EncryptionFailed {
                reason: "failed to create AES-256-GCM key".into(),
            })?;
        let mut sealing_key = SealingKey::new(unbound_key, SingleNonce::new(iv));

        let mut ciphertext = plaintext.to_vec();
        let tag = sealing_key
            .seal_in_place_separate_tag(Aad::empty(), &mut ciphertext)
            .map_err(|_| VaultError::EncryptionFailed {
                reason: "seal_in_place failed".into(),
            })?;
        let tag = <[u8; TAG_LEN]>::try_from(tag.as_ref()).map_err(|_| {
            VaultError::EncryptionFailed {
                reason: "unexpected authentication tag length".into(),
            }
        })?;

        tracing::trace!(
            plaintext_len = plaintext.len(),
            ciphertext_len = ciphertext.len(),
            "sealed value"
        );

        Ok(Envelope {
            ciphertext,
            iv,
            salt,
            tag,
        })
    }

    /// Decrypt and verify an [`Envelope`].
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Integrity`] if the master key is wrong or any
    /// component has been altered.
    pub fn unseal(&self, envelope: &Envelope) -> Result<Zeroizing<Vec<u8>>> {
        let key = derive_key(&self.master_key, &envelope.salt);
        let unbound_key =
            UnboundKey::new(AEAD_ALG, &key[..]).map_err(|_| VaultError::Integrity {
                reason: "failed to create AES-256-GCM key".into(),
            })?;
        let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(envelope.iv));

        // `ring` expects the tag appended to the ciphertext.
        let mut in_out = Zeroizing::new(Vec::with_capacity(envelope.ciphertext.len() + TAG_LEN));
        in_out.extend_from_slice(&envelope.ciphertext);
        in_out.extend_from_slice(&envelope.tag);

        let plaintext = opening_key
            .open_in_place(Aad::empty(), &mut in_out[..])
            .map_err(|_| VaultError::Integrity {
                reason: "authentication failed: wrong master key or tampered record".into(),
            })?;
        let plaintext = Zeroizing::new(plaintext.to_vec());

        tracing::trace!(plaintext_len = plaintext.len(), "unsealed value");

        Ok(plaintext)
    }
}

/// Derive the one-shot AES key for `salt`.
fn derive_key(master_key: &[u8], salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::derive(PBKDF2_ALG, PBKDF2_ITERATIONS, salt, master_key, &mut key[..]);
    key
}

// ---------------------------------------------------------------------------
// Random bytes
// ---------------------------------------------------------------------------

/// Fill `buf` with cryptographically secure random bytes.
///
/// # Errors
///
/// Returns [`VaultError::Internal`] if the system CSPRNG fails.
pub fn fill_random(buf: &mut [u8]) -> Result<()> {
    SystemRandom::new()
        .fill(buf)
        .map_err(|_| VaultError::Internal("failed to generate random bytes".into()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
