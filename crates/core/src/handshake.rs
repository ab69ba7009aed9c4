//! HELLO / HELLO_ACK exchange: builds and verifies the signed
//! cleartext records that establish a session key.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use rootstream_protocol::{Hello, HelloAck, CHALLENGE_LEN};
use thiserror::Error;

use crate::time::now_ms;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("signature verification failed")]
    BadSignature,
    #[error("challenge echo did not match")]
    ChallengeMismatch,
    #[error("peer public key does not match the expected identity")]
    UnexpectedPeer,
}

pub fn random_challenge() -> [u8; CHALLENGE_LEN] {
    let mut challenge = [0u8; CHALLENGE_LEN];
    rand::thread_rng().fill_bytes(&mut challenge);
    challenge
}

/// Builds a signed HELLO from this identity's keypair.
pub fn build_hello(signing_key: &SigningKey, challenge: [u8; CHALLENGE_LEN]) -> Hello {
    let public_key = signing_key.verifying_key().to_bytes();
    let timestamp_ms = now_ms();
    let region = Hello::signed_region(&public_key, &challenge, timestamp_ms);
    let signature: Signature = signing_key.sign(&region);
    Hello {
        public_key,
        challenge,
        timestamp_ms,
        signature: signature.to_bytes(),
    }
}

/// Verifies an inbound HELLO's self-signature and returns the claimed
/// public key, so the caller can decide whether to trust it.
pub fn verify_hello(hello: &Hello) -> Result<VerifyingKey, HandshakeError> {
    let verifying_key =
        VerifyingKey::from_bytes(&hello.public_key).map_err(|_| HandshakeError::BadSignature)?;
    let region = Hello::signed_region(&hello.public_key, &hello.challenge, hello.timestamp_ms);
    let signature = Signature::from_bytes(&hello.signature);
    verifying_key
        .verify(&region, &signature)
        .map_err(|_| HandshakeError::BadSignature)?;
    Ok(verifying_key)
}

/// Builds a signed HELLO_ACK echoing the peer's challenge.
pub fn build_hello_ack(
    signing_key: &SigningKey,
    echo_challenge: [u8; CHALLENGE_LEN],
    challenge: [u8; CHALLENGE_LEN],
) -> HelloAck {
    let public_key = signing_key.verifying_key().to_bytes();
    let timestamp_ms = now_ms();
    let region = HelloAck::signed_region(&public_key, &echo_challenge, &challenge, timestamp_ms);
    let signature: Signature = signing_key.sign(&region);
    HelloAck {
        public_key,
        echo_challenge,
        challenge,
        timestamp_ms,
        signature: signature.to_bytes(),
    }
}

/// Verifies an inbound HELLO_ACK's signature and that its echoed
/// challenge matches the one this side originally sent.
pub fn verify_hello_ack(
    ack: &HelloAck,
    expected_echo: &[u8; CHALLENGE_LEN],
) -> Result<VerifyingKey, HandshakeError> {
    let verifying_key =
        VerifyingKey::from_bytes(&ack.public_key).map_err(|_| HandshakeError::BadSignature)?;
    let region = HelloAck::signed_region(&ack.public_key, &ack.echo_challenge, &ack.challenge, ack.timestamp_ms);
    let signature = Signature::from_bytes(&ack.signature);
    verifying_key
        .verify(&region, &signature)
        .map_err(|_| HandshakeError::BadSignature)?;

    if &ack.echo_challenge != expected_echo {
        return Err(HandshakeError::ChallengeMismatch);
    }

    Ok(verifying_key)
}

/// Concurrent-initiation tiebreak: the lexicographically smaller
/// public key wins and keeps its initiator state; the other side
/// discards its own and becomes the responder.
pub fn wins_concurrent_initiation(my_public_key: &[u8; 32], peer_public_key: &[u8; 32]) -> bool {
    my_public_key < peer_public_key
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootstream_crypto::generate_keypair;

    #[test]
    fn hello_roundtrip_verifies() {
        let signing_key = generate_keypair();
        let challenge = random_challenge();
        let hello = build_hello(&signing_key, challenge);
        let verified = verify_hello(&hello).unwrap();
        assert_eq!(verified, signing_key.verifying_key());
    }

    #[test]
    fn tampered_hello_fails_verification() {
        let signing_key = generate_keypair();
        let mut hello = build_hello(&signing_key, random_challenge());
        hello.timestamp_ms += 1;
        assert!(verify_hello(&hello).is_err());
    }

    #[test]
    fn hello_ack_roundtrip_verifies_and_checks_echo() {
        let initiator = generate_keypair();
        let responder = generate_keypair();
        let challenge = random_challenge();

        let hello = build_hello(&initiator, challenge);
        let ack = build_hello_ack(&responder, hello.challenge, random_challenge());

        let verified = verify_hello_ack(&ack, &challenge).unwrap();
        assert_eq!(verified, responder.verifying_key());
    }

    #[test]
    fn hello_ack_rejects_mismatched_echo() {
        let responder = generate_keypair();
        let ack = build_hello_ack(&responder, random_challenge(), random_challenge());
        let unrelated_challenge = random_challenge();
        assert!(matches!(
            verify_hello_ack(&ack, &unrelated_challenge),
            Err(HandshakeError::ChallengeMismatch)
        ));
    }

    #[test]
    fn concurrent_initiation_tiebreak_is_deterministic_and_antisymmetric() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        assert!(wins_concurrent_initiation(&a, &b));
        assert!(!wins_concurrent_initiation(&b, &a));
    }

    #[test]
    fn random_challenge_is_not_constant() {
        assert_ne!(random_challenge(), random_challenge());
    }
}
