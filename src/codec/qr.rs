use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::{bundle, creation_passphrase, Credential, CredentialSpec, DecodeContext, EncodeParams, Encoded, SchemeCodec};
use crate::crypto;
use crate::error::{Result, VaultError};
use crate::keys::KeyMaterial;
use crate::vault::BackupScheme;

/// Byte capacity of a version 40 QR code at error correction level L
pub const QR_MAX_BYTES: usize = 2953;

const PLAIN_PREFIX: &str = "KMQR1:";
const SEALED_PREFIX: &str = "KMQR1E:";

/// A single key as printable text for QR rendering
pub struct QrCodec;

impl SchemeCodec for QrCodec {
    fn scheme(&self) -> BackupScheme {
        BackupScheme::QrCode
    }

    fn encode(&self, keys: &[KeyMaterial], params: &EncodeParams<'_>) -> Result<Encoded> {
        if keys.len() != 1 {
            return Err(VaultError::Validation(format!(
                "a QR code backup holds exactly one key, {} selected",
                keys.len()
            )));
        }
        if params.shamir.is_some() {
            return Err(VaultError::validation("share parameters only apply to Shamir backups"));
        }

        let plain = bundle::pack(keys)?;
        let (text, is_encrypted) = match creation_passphrase(params)? {
            Some(passphrase) => {
                let sealed = crypto::seal_with_passphrase(&plain, passphrase, params.kdf)?;
                (format!("{}{}", SEALED_PREFIX, STANDARD.encode(sealed)), true)
            }
            None => (format!("{}{}", PLAIN_PREFIX, STANDARD.encode(&*plain)), false),
        };

        if text.len() > QR_MAX_BYTES {
            return Err(VaultError::Validation(format!(
                "key is too large for a single QR code ({} bytes, limit {})",
                text.len(),
                QR_MAX_BYTES
            )));
        }

        Ok(Encoded {
            payload: text.clone().into_bytes(),
            credential_spec: CredentialSpec::QrText(text),
            is_encrypted,
        })
    }

    fn decode(&self, payload: &[u8], credential: &Credential, _ctx: &DecodeContext<'_>) -> Result<Vec<KeyMaterial>> {
        let text = match credential {
            Credential::Scanned { text, .. } => text.trim().to_string(),
            _ => String::from_utf8(payload.to_vec())
                .map_err(|_| VaultError::Other("QR payload is not text".into()))?,
        };

        if let Some(encoded) = text.strip_prefix(SEALED_PREFIX) {
            let sealed = decode_base64(encoded)?;
            let plain = crypto::open_with_passphrase(&sealed, credential.require_passphrase()?)?;
            bundle::unpack(&plain)
        } else if let Some(encoded) = text.strip_prefix(PLAIN_PREFIX) {
            let plain = crypto::SecureBytes::new(decode_base64(encoded)?);
            bundle::unpack(&plain)
        } else {
            Err(VaultError::validation("text is not a Keymaker QR backup"))
        }
    }
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| VaultError::Validation(format!("QR text is damaged: {}", e)))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use secrecy::SecretString;

    use super::*;
    use crate::codec::test_support::{assert_same_keys, params, record_for};

    #[test]
    fn test_multiple_keys_rejected() {
        let keys = vec![KeyMaterial::generate_ed25519("a"), KeyMaterial::generate_ed25519("b")];
        assert!(matches!(QrCodec.encode(&keys, &params(None)), Err(VaultError::Validation(_))));
        assert!(matches!(QrCodec.encode(&[], &params(None)), Err(VaultError::Validation(_))));
    }

    #[test]
    fn test_plain_qr_roundtrip_from_stored_payload() {
        let keys = vec![KeyMaterial::generate_ed25519("phone")];
        let encoded = QrCodec.encode(&keys, &params(None)).unwrap();

        let CredentialSpec::QrText(text) = &encoded.credential_spec else {
            panic!("expected QR text");
        };
        assert!(text.starts_with("KMQR1:"));
        assert!(text.is_ascii());

        let record = record_for(BackupScheme::QrCode, &encoded);
        let ctx = DecodeContext { record: &record, now: Utc::now() };
        let restored = QrCodec.decode(&encoded.payload, &Credential::None, &ctx).unwrap();
        assert_same_keys(&keys, &restored);
    }

    #[test]
    fn test_scanned_text_with_passphrase() {
        let keys = vec![KeyMaterial::generate_ed25519("phone")];
        let pass = SecretString::new("qr pass".into());
        let encoded = QrCodec.encode(&keys, &params(Some(&pass))).unwrap();
        assert!(encoded.is_encrypted);

        let CredentialSpec::QrText(text) = encoded.credential_spec.clone() else {
            panic!("expected QR text");
        };
        assert!(text.starts_with("KMQR1E:"));

        let record = record_for(BackupScheme::QrCode, &encoded);
        let ctx = DecodeContext { record: &record, now: Utc::now() };

        let scanned = Credential::Scanned {
            text: format!("  {}\n", text),
            passphrase: Some(SecretString::new("qr pass".into())),
        };
        let restored = QrCodec.decode(&[], &scanned, &ctx).unwrap();
        assert_same_keys(&keys, &restored);

        // Passphrase alone works against the stored payload
        let restored = QrCodec
            .decode(&encoded.payload, &Credential::passphrase("qr pass"), &ctx)
            .unwrap();
        assert_same_keys(&keys, &restored);

        let wrong = QrCodec.decode(&encoded.payload, &Credential::passphrase("bad"), &ctx);
        assert!(matches!(wrong, Err(VaultError::DecryptionFailed)));
    }

    #[test]
    fn test_foreign_text_rejected() {
        let keys = vec![KeyMaterial::generate_ed25519("phone")];
        let encoded = QrCodec.encode(&keys, &params(None)).unwrap();
        let record = record_for(BackupScheme::QrCode, &encoded);
        let ctx = DecodeContext { record: &record, now: Utc::now() };

        let scanned = Credential::Scanned {
            text: "https://example.com".into(),
            passphrase: None,
        };
        assert!(matches!(QrCodec.decode(&[], &scanned, &ctx), Err(VaultError::Validation(_))));
    }

    #[test]
    fn test_oversized_key_rejected() {
        let mut key = KeyMaterial::generate_ed25519("big");
        key.private_bytes = crypto::SecureBytes::new(vec![0x41; 4096]);
        assert!(matches!(
            QrCodec.encode(&[key], &params(None)),
            Err(VaultError::Validation(_))
        ));
    }
}
