//! AEAD, key agreement, signing-key-to-KEM-key conversion, and the
//! handful of constant-time/secure-wipe helpers the rest of the crate
//! leans on.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand_core::OsRng;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use thiserror::Error;
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret as XStaticSecret};
use zeroize::Zeroize;

pub const SESSION_KEY_CONTEXT: &str = "rootstream session key v1";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("peer public key is not a valid curve point")]
    InvalidPeerKey,
    #[error("authentication failed decrypting payload")]
    AuthFailed,
    #[error("signature verification failed")]
    BadSignature,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed peer code: {0}")]
    BadPeerCode(String),
    #[error("identity not found at {0}")]
    NotFound(std::path::PathBuf),
}

pub fn generate_keypair() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

/// Converts an Ed25519 signing key into the X25519 scalar used for key
/// agreement, via the standard SHA-512-then-clamp conversion (the same
/// one libsodium's `crypto_sign_ed25519_sk_to_curve25519` performs).
/// `XStaticSecret::from` performs the clamping itself.
fn ed25519_signing_key_to_x25519(signing_key: &SigningKey) -> XStaticSecret {
    let seed = signing_key.to_bytes();
    let hash = Sha512::digest(seed);
    let mut scalar_bytes = [0u8; 32];
    scalar_bytes.copy_from_slice(&hash[..32]);
    let secret = XStaticSecret::from(scalar_bytes);
    scalar_bytes.zeroize();
    secret
}

/// Converts an Ed25519 verifying key (an Edwards point) into the
/// corresponding X25519 Montgomery public key.
fn ed25519_verifying_key_to_x25519(
    verifying_key: &VerifyingKey,
) -> Result<XPublicKey, CryptoError> {
    let compressed = CompressedEdwardsY(verifying_key.to_bytes());
    let point = compressed.decompress().ok_or(CryptoError::InvalidPeerKey)?;
    Ok(XPublicKey::from(point.to_montgomery().to_bytes()))
}

/// Both sides derive the identical 32-byte session key from an X25519
/// Diffie-Hellman exchange over their Ed25519 identities, run through a
/// single-step BLAKE3 keyed hash so the raw DH output is never used
/// directly as a symmetric key.
pub fn derive_session(
    my_signing_key: &SigningKey,
    peer_verifying_key: &VerifyingKey,
) -> Result<[u8; 32], CryptoError> {
    let my_secret = ed25519_signing_key_to_x25519(my_signing_key);
    let peer_public = ed25519_verifying_key_to_x25519(peer_verifying_key)?;
    let shared = my_secret.diffie_hellman(&peer_public);

    let context_key = blake3::hash(SESSION_KEY_CONTEXT.as_bytes());
    let session_key = blake3::keyed_hash(context_key.as_bytes(), shared.as_bytes());
    Ok(*session_key.as_bytes())
}

fn nonce_bytes(nonce_u64: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..8].copy_from_slice(&nonce_u64.to_le_bytes());
    nonce
}

/// Seals with ChaCha20-Poly1305-IETF; the 12-byte AEAD nonce is the
/// little-endian encoding of the 64-bit counter, right-padded with
/// zeros. No associated data.
pub fn aead_seal(key: &[u8; 32], nonce_u64: u64, plaintext: &[u8]) -> Vec<u8> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = nonce_bytes(nonce_u64);
    cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .expect("encryption with a valid key and nonce length cannot fail")
}

/// Fails with `AuthFailed` on tag mismatch; never returns partial
/// plaintext on failure.
pub fn aead_open(key: &[u8; 32], nonce_u64: u64, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = nonce_bytes(nonce_u64);
    cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext)
        .map_err(|_| CryptoError::AuthFailed)
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

pub fn secure_wipe(buf: &mut [u8]) {
    buf.zeroize();
}

pub fn random_bytes(n: usize) -> Vec<u8> {
    use rand_core::RngCore;
    let mut buf = vec![0u8; n];
    OsRng.fill_bytes(&mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_session_is_symmetric() {
        let alice = generate_keypair();
        let bob = generate_keypair();
        let a_side = derive_session(&alice, &bob.verifying_key()).unwrap();
        let b_side = derive_session(&bob, &alice.verifying_key()).unwrap();
        assert_eq!(a_side, b_side);
    }

    #[test]
    fn derive_session_differs_per_peer_pair() {
        let alice = generate_keypair();
        let bob = generate_keypair();
        let carol = generate_keypair();
        let with_bob = derive_session(&alice, &bob.verifying_key()).unwrap();
        let with_carol = derive_session(&alice, &carol.verifying_key()).unwrap();
        assert_ne!(with_bob, with_carol);
    }

    #[test]
    fn aead_roundtrips() {
        let key = [42u8; 32];
        let ciphertext = aead_seal(&key, 7, b"hello session");
        let plaintext = aead_open(&key, 7, &ciphertext).unwrap();
        assert_eq!(plaintext, b"hello session");
    }

    #[test]
    fn aead_open_rejects_tampered_ciphertext() {
        let key = [1u8; 32];
        let mut ciphertext = aead_seal(&key, 0, b"payload");
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;
        assert!(matches!(
            aead_open(&key, 0, &ciphertext),
            Err(CryptoError::AuthFailed)
        ));
    }

    #[test]
    fn aead_open_rejects_wrong_nonce() {
        let key = [1u8; 32];
        let ciphertext = aead_seal(&key, 5, b"payload");
        assert!(matches!(
            aead_open(&key, 6, &ciphertext),
            Err(CryptoError::AuthFailed)
        ));
    }

    #[test]
    fn constant_time_eq_matches_and_mismatches() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn random_bytes_have_requested_length_and_are_not_all_zero() {
        let bytes = random_bytes(32);
        assert_eq!(bytes.len(), 32);
        assert!(bytes.iter().any(|&b| b != 0));
    }

    #[test]
    fn secure_wipe_zeroes_buffer() {
        let mut buf = [1u8, 2, 3, 4];
        secure_wipe(&mut buf);
        assert_eq!(buf, [0u8; 4]);
    }
}
