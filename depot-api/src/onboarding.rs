//! First-run credential check.
//!
//! Operators bootstrap the admin account with `DEPOT_BOOTSTRAP_ADMIN_PASSWORD`.
//! At startup the stored hash is compared with the hash of that value; if they
//! still match, the admin has never changed the bootstrap password and we say
//! so loudly. The password itself only ever lives in the operator's
//! environment.

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::db::DbClient;

/// Hex SHA-256 of a password, the format stored in `depot_admin_users`.
pub fn password_hash(password: &SecretString) -> String {
    hex::encode(Sha256::digest(password.expose_secret().as_bytes()))
}

/// Whether `stored_hash` is the hash of the bootstrap password.
pub fn default_credential_in_use(stored_hash: &str, bootstrap: &SecretString) -> bool {
    let expected = password_hash(bootstrap);
    let stored = stored_hash.trim().to_ascii_lowercase();
    constant_time_eq(expected.as_bytes(), stored.as_bytes())
}

/// Byte comparison without an early exit. Length is public.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Log a warning if the admin account still uses the bootstrap password.
/// Returns whether it does. Lookup failures are logged and treated as "no".
pub async fn warn_if_default_credential(db: &DbClient, bootstrap: Option<&SecretString>) -> bool {
    let Some(bootstrap) = bootstrap else {
        return false;
    };

    match db.admin_password_hash().await {
        Ok(Some(stored)) if default_credential_in_use(&stored, bootstrap) => {
            tracing::warn!(
                "The admin account still uses the bootstrap password. \
                 Change it before exposing this deployment."
            );
            true
        }
        Ok(_) => false,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping bootstrap credential check");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[test]
    fn test_matching_hash_is_flagged() {
        let bootstrap = secret("first-run-password");
        let stored = password_hash(&bootstrap);
        assert!(default_credential_in_use(&stored, &bootstrap));
        assert!(default_credential_in_use(&stored.to_uppercase(), &bootstrap));
    }

    #[test]
    fn test_changed_password_is_not_flagged() {
        let stored = password_hash(&secret("rotated"));
        assert!(!default_credential_in_use(&stored, &secret("first-run-password")));
        assert!(!default_credential_in_use("", &secret("first-run-password")));
    }
}
