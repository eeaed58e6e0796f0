use argon2::{
    password_hash::{rand_core, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};

use lazy_static::lazy_static;

use crate::model::ModelError;

lazy_static! {
    /// Digest of an unguessable throwaway password, verified against when no account matches.
    static ref DECOY_DIGEST: String = {
        let secret: [u8; 16] = rand::random();
        hash_password(&hex::encode(secret)).unwrap_or_default()
    };
}

/// Hashes the decoy up front so the first failed lookup costs the same as later ones.
pub fn warm_decoy() {
    lazy_static::initialize(&DECOY_DIGEST);
}

pub fn hash_password(password: &str) -> Result<String, ModelError> {
    let salt = SaltString::generate(&mut rand_core::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| ModelError::Hashing(err.to_string()))
}

/// False for a wrong password and for an unparseable digest alike.
pub fn verify_password(password: &str, digest: &str) -> bool {
    match PasswordHash::new(digest) {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(err) => {
            tracing::error!("stored digest is not a valid PHC string: {}", err);
            false
        }
    }
}

/// Spends the same argon2 work as [`verify_password`] for an unknown account,
/// so response timing does not reveal which e-mails exist. Always false.
pub fn verify_decoy(password: &str) -> bool {
    verify_password(password, &DECOY_DIGEST);
    false
}
