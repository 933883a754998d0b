use super::{bundle, creation_passphrase, require_keys, Credential, CredentialSpec, DecodeContext, EncodeParams, Encoded, SchemeCodec};
use crate::crypto;
use crate::error::{Result, VaultError};
use crate::keys::KeyMaterial;
use crate::vault::BackupScheme;

/// All selected keys in one bundle, sealed when a passphrase is given
pub struct ArchiveCodec;

impl SchemeCodec for ArchiveCodec {
    fn scheme(&self) -> BackupScheme {
        BackupScheme::EncryptedArchive
    }

    fn encode(&self, keys: &[KeyMaterial], params: &EncodeParams<'_>) -> Result<Encoded> {
        require_keys(keys)?;
        if params.shamir.is_some() {
            return Err(VaultError::validation("share parameters only apply to Shamir backups"));
        }

        let plain = bundle::pack(keys)?;
        match creation_passphrase(params)? {
            Some(passphrase) => Ok(Encoded {
                payload: crypto::seal_with_passphrase(&plain, passphrase, params.kdf)?,
                credential_spec: CredentialSpec::Passphrase,
                is_encrypted: true,
            }),
            None => Ok(Encoded {
                payload: plain.to_vec(),
                credential_spec: CredentialSpec::None,
                is_encrypted: false,
            }),
        }
    }

    fn decode(&self, payload: &[u8], credential: &Credential, ctx: &DecodeContext<'_>) -> Result<Vec<KeyMaterial>> {
        if !ctx.record.is_encrypted {
            return bundle::unpack(payload);
        }

        let plain = crypto::open_with_passphrase(payload, credential.require_passphrase()?)?;
        bundle::unpack(&plain)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use secrecy::SecretString;

    use super::*;
    use crate::codec::test_support::{assert_same_keys, params, record_for};

    #[test]
    fn test_sealed_archive_roundtrip() {
        let keys = vec![
            KeyMaterial::generate_ed25519("work"),
            KeyMaterial::generate_ed25519("home"),
        ];
        let pass = SecretString::new("archive pass".into());

        let encoded = ArchiveCodec.encode(&keys, &params(Some(&pass))).unwrap();
        assert!(encoded.is_encrypted);
        assert!(crypto::is_sealed(&encoded.payload));
        assert_eq!(encoded.credential_spec, CredentialSpec::Passphrase);

        let record = record_for(BackupScheme::EncryptedArchive, &encoded);
        let ctx = DecodeContext { record: &record, now: Utc::now() };
        let restored = ArchiveCodec
            .decode(&encoded.payload, &Credential::passphrase("archive pass"), &ctx)
            .unwrap();

        assert_same_keys(&keys, &restored);
    }

    #[test]
    fn test_wrong_passphrase() {
        let keys = vec![KeyMaterial::generate_ed25519("work")];
        let pass = SecretString::new("archive pass".into());
        let encoded = ArchiveCodec.encode(&keys, &params(Some(&pass))).unwrap();
        let record = record_for(BackupScheme::EncryptedArchive, &encoded);
        let ctx = DecodeContext { record: &record, now: Utc::now() };

        let result = ArchiveCodec.decode(&encoded.payload, &Credential::passphrase("nope"), &ctx);
        assert!(matches!(result, Err(VaultError::DecryptionFailed)));

        let result = ArchiveCodec.decode(&encoded.payload, &Credential::None, &ctx);
        assert!(matches!(result, Err(VaultError::Validation(_))));
    }

    #[test]
    fn test_unprotected_archive_needs_no_secret() {
        let keys = vec![KeyMaterial::generate_ed25519("work")];
        let encoded = ArchiveCodec.encode(&keys, &params(None)).unwrap();
        assert!(!encoded.is_encrypted);
        assert_eq!(encoded.credential_spec, CredentialSpec::None);

        let record = record_for(BackupScheme::EncryptedArchive, &encoded);
        let ctx = DecodeContext { record: &record, now: Utc::now() };
        let restored = ArchiveCodec.decode(&encoded.payload, &Credential::None, &ctx).unwrap();

        assert_same_keys(&keys, &restored);
    }

    #[test]
    fn test_empty_key_set_rejected() {
        assert!(matches!(
            ArchiveCodec.encode(&[], &params(None)),
            Err(VaultError::Validation(_))
        ));
    }

    #[test]
    fn test_empty_passphrase_rejected() {
        let keys = vec![KeyMaterial::generate_ed25519("work")];
        let empty = SecretString::new(String::new());
        assert!(matches!(
            ArchiveCodec.encode(&keys, &params(Some(&empty))),
            Err(VaultError::Validation(_))
        ));
    }
}
