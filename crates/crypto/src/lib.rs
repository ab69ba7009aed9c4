pub mod identity;
pub mod primitives;

pub use identity::Identity;
pub use primitives::{
    aead_open, aead_seal, constant_time_eq, derive_session, generate_keypair, random_bytes,
    secure_wipe, CryptoError,
};
