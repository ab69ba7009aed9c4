//! On-disk identity: an Ed25519 keypair plus a human-chosen label,
//! together forming the peer code peers exchange out of band.

use std::fs;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{SigningKey, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH};
use tracing::warn;

use crate::primitives::CryptoError;

const PUBLIC_KEY_FILE: &str = "identity.pub";
const SECRET_KEY_FILE: &str = "identity.key";
const LABEL_FILE: &str = "identity.txt";

pub struct Identity {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
    pub label: String,
}

impl Identity {
    /// Reads `identity.pub`, `identity.key`, `identity.txt` from
    /// `config_dir`. Returns `NotFound` if the secret key file is
    /// absent; warns (does not fail) if the secret key file has any
    /// group/other permission bit set.
    pub fn load(config_dir: &Path) -> Result<Self, CryptoError> {
        let secret_path = config_dir.join(SECRET_KEY_FILE);
        if !secret_path.exists() {
            return Err(CryptoError::NotFound(secret_path));
        }

        let mode = fs::metadata(&secret_path)?.permissions().mode();
        if mode & 0o077 != 0 {
            warn!(
                path = %secret_path.display(),
                mode = format!("{mode:o}"),
                "identity secret key file is readable by group or other"
            );
        }

        let secret_bytes = fs::read(&secret_path)?;
        let secret: [u8; SECRET_KEY_LENGTH] = secret_bytes
            .try_into()
            .map_err(|_| CryptoError::BadPeerCode("identity.key is not 32 bytes".to_string()))?;
        let signing_key = SigningKey::from_bytes(&secret);

        let public_bytes = fs::read(config_dir.join(PUBLIC_KEY_FILE))?;
        let public: [u8; PUBLIC_KEY_LENGTH] = public_bytes
            .try_into()
            .map_err(|_| CryptoError::BadPeerCode("identity.pub is not 32 bytes".to_string()))?;
        let verifying_key = VerifyingKey::from_bytes(&public)
            .map_err(|_| CryptoError::BadPeerCode("identity.pub is not a valid point".to_string()))?;

        let label = fs::read_to_string(config_dir.join(LABEL_FILE))
            .unwrap_or_default()
            .trim()
            .to_string();

        Ok(Self {
            signing_key,
            verifying_key,
            label,
        })
    }

    /// Creates `config_dir` with mode 0700 if absent, then writes the
    /// secret key with mode 0600 and the public key/label with 0644.
    pub fn save(&self, config_dir: &Path) -> Result<(), CryptoError> {
        fs::create_dir_all(config_dir)?;
        fs::set_permissions(config_dir, fs::Permissions::from_mode(0o700))?;

        write_with_mode(&config_dir.join(SECRET_KEY_FILE), &self.signing_key.to_bytes(), 0o600)?;
        write_with_mode(
            &config_dir.join(PUBLIC_KEY_FILE),
            self.verifying_key.as_bytes(),
            0o644,
        )?;
        write_with_mode(&config_dir.join(LABEL_FILE), self.label.as_bytes(), 0o644)?;
        Ok(())
    }

    /// If loading fails with `NotFound`, generates a fresh identity and
    /// saves it; any other load error propagates.
    pub fn generate_if_missing(config_dir: &Path, identity_label: &str) -> Result<Self, CryptoError> {
        match Self::load(config_dir) {
            Ok(identity) => Ok(identity),
            Err(CryptoError::NotFound(_)) => {
                let signing_key = crate::primitives::generate_keypair();
                let verifying_key = signing_key.verifying_key();
                let identity = Self {
                    signing_key,
                    verifying_key,
                    label: identity_label.to_string(),
                };
                identity.save(config_dir)?;
                Ok(identity)
            }
            Err(other) => Err(other),
        }
    }

    /// The peer code handed to another user out of band: the base64
    /// public key, `@`, and this identity's label.
    pub fn peer_code(&self) -> String {
        format!("{}@{}", BASE64.encode(self.verifying_key.as_bytes()), self.label)
    }
}

/// 16 hex characters derived from a 32-byte hash of the key, truncated
/// to 8 bytes and grouped into dash-separated quads for easy visual
/// comparison between two peers.
pub fn format_fingerprint(public_key: &[u8; PUBLIC_KEY_LENGTH]) -> String {
    let hash = blake3::hash(public_key);
    let hex = hash.as_bytes()[..8]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();
    hex.as_bytes()
        .chunks(4)
        .map(|chunk| std::str::from_utf8(chunk).unwrap())
        .collect::<Vec<_>>()
        .join("-")
}

/// Splits on the first `@`, base64-decodes the left side, and rejects
/// anything that doesn't decode to a valid, non-zero 32-byte point.
pub fn parse_peer_code(code: &str) -> Result<(VerifyingKey, String), CryptoError> {
    let (key_part, label) = code
        .split_once('@')
        .ok_or_else(|| CryptoError::BadPeerCode("missing '@' separator".to_string()))?;

    let decoded = BASE64
        .decode(key_part)
        .map_err(|e| CryptoError::BadPeerCode(format!("invalid base64: {e}")))?;

    let bytes: [u8; PUBLIC_KEY_LENGTH] = decoded
        .try_into()
        .map_err(|_| CryptoError::BadPeerCode("public key is not 32 bytes".to_string()))?;

    if bytes == [0u8; PUBLIC_KEY_LENGTH] {
        return Err(CryptoError::BadPeerCode("public key is all zero".to_string()));
    }

    let verifying_key = VerifyingKey::from_bytes(&bytes)
        .map_err(|_| CryptoError::BadPeerCode("public key is not a valid curve point".to_string()))?;

    Ok((verifying_key, label.to_string()))
}

fn write_with_mode(path: &PathBuf, bytes: &[u8], mode: u32) -> Result<(), CryptoError> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)?;
    file.write_all(bytes)?;
    // OpenOptions::mode only applies at creation time; force it here in
    // case the file already existed with different permissions.
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}
