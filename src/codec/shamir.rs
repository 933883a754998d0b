use rand::rngs::OsRng;
use rand::RngCore;

use super::{bundle, require_keys, Credential, CredentialSpec, DecodeContext, EncodeParams, Encoded, SchemeCodec};
use crate::crypto::{self, SecureBytes, KEY_LEN};
use crate::error::{Result, VaultError};
use crate::keys::KeyMaterial;
use crate::shamir::{self, Share};
use crate::vault::BackupScheme;

/// Bundle sealed under a random data key; the data key is split into shares
pub struct ShamirCodec;

impl SchemeCodec for ShamirCodec {
    fn scheme(&self) -> BackupScheme {
        BackupScheme::ShamirSecretSharing
    }

    fn encode(&self, keys: &[KeyMaterial], params: &EncodeParams<'_>) -> Result<Encoded> {
        require_keys(keys)?;
        let shamir_params = params
            .shamir
            .ok_or_else(|| VaultError::validation("Shamir backups need a share count and threshold"))?;
        shamir_params.validate()?;
        if params.passphrase.is_some() {
            return Err(VaultError::validation(
                "Shamir backups are protected by their shares, not a passphrase",
            ));
        }

        let mut data_key = vec![0u8; KEY_LEN];
        OsRng.fill_bytes(&mut data_key);
        let data_key = SecureBytes::new(data_key);

        let plain = bundle::pack(keys)?;
        let payload = crypto::seal_with_key(&plain, &data_key)?;

        let shares = shamir::split(&data_key, shamir_params.threshold, shamir_params.total_shares)?;

        Ok(Encoded {
            payload,
            credential_spec: CredentialSpec::Shares(shares.iter().map(Share::encode).collect()),
            is_encrypted: true,
        })
    }

    fn decode(&self, payload: &[u8], credential: &Credential, ctx: &DecodeContext<'_>) -> Result<Vec<KeyMaterial>> {
        let Credential::Shares(texts) = credential else {
            return Err(VaultError::validation("Shamir backups are restored from their shares"));
        };
        let params = ctx
            .record
            .shamir
            .ok_or_else(|| VaultError::Other(format!("Backup {} has no share parameters", ctx.record.id)))?;

        let shares = collect_shares(texts)?;
        let data_key = shamir::combine(&shares, params.threshold)?;

        let plain = crypto::open_with_key(payload, &data_key)?;
        bundle::unpack(&plain)
    }
}

/// Parse the user's entries, skipping blank and placeholder fields
fn collect_shares(texts: &[String]) -> Result<Vec<Share>> {
    texts
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty() && !is_placeholder(t))
        .map(Share::parse)
        .collect()
}

/// Hint text left in an untouched entry field ("Share 2", "Paste share here", ...)
fn is_placeholder(text: &str) -> bool {
    let lower = text.to_lowercase();
    if lower.contains("...") || lower.contains('…') {
        return true;
    }
    if lower.starts_with("enter ") || lower.starts_with("paste ") {
        return true;
    }
    lower.trim_end_matches(|c: char| c.is_ascii_digit() || c == '#' || c.is_whitespace()) == "share"
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::codec::test_support::{assert_same_keys, params, record_for};
    use crate::vault::ShamirParams;

    fn encode_3_of_5(keys: &[KeyMaterial]) -> (Encoded, Vec<String>) {
        let mut p = params(None);
        p.shamir = Some(ShamirParams { total_shares: 5, threshold: 3 });
        let encoded = ShamirCodec.encode(keys, &p).unwrap();
        let CredentialSpec::Shares(shares) = encoded.credential_spec.clone() else {
            panic!("expected shares");
        };
        (encoded, shares)
    }

    #[test]
    fn test_any_three_shares_restore() {
        let keys = vec![KeyMaterial::generate_ed25519("server")];
        let (encoded, shares) = encode_3_of_5(&keys);
        assert_eq!(shares.len(), 5);

        let record = record_for(BackupScheme::ShamirSecretSharing, &encoded);
        let ctx = DecodeContext { record: &record, now: Utc::now() };

        for picked in [[0, 1, 2], [0, 2, 4], [4, 3, 1]] {
            let credential = Credential::Shares(picked.iter().map(|&i| shares[i].clone()).collect());
            let restored = ShamirCodec.decode(&encoded.payload, &credential, &ctx).unwrap();
            assert_same_keys(&keys, &restored);
        }
    }

    #[test]
    fn test_two_shares_insufficient() {
        let keys = vec![KeyMaterial::generate_ed25519("server")];
        let (encoded, shares) = encode_3_of_5(&keys);
        let record = record_for(BackupScheme::ShamirSecretSharing, &encoded);
        let ctx = DecodeContext { record: &record, now: Utc::now() };

        let credential = Credential::Shares(vec![
            shares[1].clone(),
            "Share 3".into(),
            "   ".into(),
            shares[3].clone(),
        ]);
        let result = ShamirCodec.decode(&encoded.payload, &credential, &ctx);
        assert!(matches!(
            result,
            Err(VaultError::InsufficientShares { provided: 2, required: 3 })
        ));
    }

    #[test]
    fn test_duplicate_share_rejected() {
        let keys = vec![KeyMaterial::generate_ed25519("server")];
        let (encoded, shares) = encode_3_of_5(&keys);
        let record = record_for(BackupScheme::ShamirSecretSharing, &encoded);
        let ctx = DecodeContext { record: &record, now: Utc::now() };

        let credential = Credential::Shares(vec![shares[0].clone(), shares[0].clone(), shares[1].clone()]);
        assert!(matches!(
            ShamirCodec.decode(&encoded.payload, &credential, &ctx),
            Err(VaultError::Validation(_))
        ));
    }

    #[test]
    fn test_shares_from_another_backup_fail_decryption() {
        let keys = vec![KeyMaterial::generate_ed25519("server")];
        let (encoded, _) = encode_3_of_5(&keys);
        let (_, foreign) = encode_3_of_5(&keys);
        let record = record_for(BackupScheme::ShamirSecretSharing, &encoded);
        let ctx = DecodeContext { record: &record, now: Utc::now() };

        let credential = Credential::Shares(foreign[..3].to_vec());
        assert!(matches!(
            ShamirCodec.decode(&encoded.payload, &credential, &ctx),
            Err(VaultError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_encode_validation() {
        let keys = vec![KeyMaterial::generate_ed25519("server")];

        assert!(ShamirCodec.encode(&keys, &params(None)).is_err());

        let mut p = params(None);
        p.shamir = Some(ShamirParams { total_shares: 2, threshold: 3 });
        assert!(matches!(ShamirCodec.encode(&keys, &p), Err(VaultError::Validation(_))));
    }

    #[test]
    fn test_placeholders() {
        assert!(is_placeholder("Share 1"));
        assert!(is_placeholder("share #4"));
        assert!(is_placeholder("Paste share here"));
        assert!(is_placeholder("kmss1-..."));
        assert!(!is_placeholder("kmss1-01-abcdef"));
    }
}
