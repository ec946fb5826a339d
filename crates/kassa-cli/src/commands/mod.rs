//! Command handler modules for kassa-cli.
//!
//! Shared utilities used by multiple command paths live here.

pub mod fetch;
pub mod report;

use anyhow::Result;
use kassa_audit::VerifyResult;
use kassa_db::CredentialModel;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Parse a CLI `--model` string into a [`CredentialModel`].
pub fn parse_credential_model(model: &str) -> Result<CredentialModel> {
    match model.trim().to_lowercase().as_str() {
        "terminal" => Ok(CredentialModel::Terminal),
        "organization" => Ok(CredentialModel::Organization),
        other => anyhow::bail!(
            "invalid --model '{}'. expected one of: terminal | organization",
            other
        ),
    }
}

/// `kassa audit verify <path>`: exits non-zero on a broken chain.
pub fn audit_verify(path: &str) -> Result<()> {
    match kassa_audit::verify_hash_chain(path)? {
        VerifyResult::Valid { entries } => {
            println!("audit_chain_ok=true entries={}", entries);
            Ok(())
        }
        VerifyResult::Broken { position, reason } => {
            println!("audit_chain_ok=false position={}", position);
            anyhow::bail!("audit chain broken at entry {}: {}", position, reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_model_is_case_insensitive() {
        assert_eq!(parse_credential_model(" Terminal ").unwrap(), CredentialModel::Terminal);
        assert_eq!(
            parse_credential_model("organization").unwrap(),
            CredentialModel::Organization
        );
        assert!(parse_credential_model("shop").is_err());
    }
}
