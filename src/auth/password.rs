use anyhow::Context;
use tracing::error;

/// Hash a password for provisioning user records.
pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    bcrypt::hash(plain, bcrypt::DEFAULT_COST).map_err(|e| {
        error!(error = %e, "bcrypt hash error");
        anyhow::anyhow!(e.to_string())
    })
}

/// Verify a submitted password against a stored bcrypt hash. The hash comes
/// out of the credential store as raw bytes.
pub fn verify_password(plain: &str, stored_hash: &[u8]) -> anyhow::Result<bool> {
    let hash = std::str::from_utf8(stored_hash).context("stored hash is not valid utf-8")?;
    bcrypt::verify(plain, hash).map_err(|e| {
        error!(error = %e, "bcrypt verify error");
        anyhow::anyhow!(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let password = "Secur3P@ssw0rd!";
        let hash = hash_password(password).expect("hashing should succeed");
        assert!(verify_password(password, hash.as_bytes()).expect("verify should succeed"));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let password = "correct-horse-battery-staple";
        let hash = hash_password(password).expect("hashing should succeed");
        assert!(
            !verify_password("wrong-password", hash.as_bytes()).expect("verify should not error")
        );
    }

    #[test]
    fn verify_errors_on_malformed_hash() {
        let err = verify_password("anything", b"not-a-valid-hash").unwrap_err();
        assert!(!err.to_string().is_empty());
    }
}
