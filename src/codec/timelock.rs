use super::{bundle, creation_passphrase, require_keys, Credential, CredentialSpec, DecodeContext, EncodeParams, Encoded, SchemeCodec};
use crate::crypto;
use crate::error::{Result, VaultError};
use crate::keys::KeyMaterial;
use crate::vault::BackupScheme;

/// Passphrase-sealed bundle that only opens after the record's unlock time
///
/// The gate is the local clock; there is no verifiable-delay proof.
pub struct TimeLockCodec;

impl SchemeCodec for TimeLockCodec {
    fn scheme(&self) -> BackupScheme {
        BackupScheme::TimeLocked
    }

    fn encode(&self, keys: &[KeyMaterial], params: &EncodeParams<'_>) -> Result<Encoded> {
        require_keys(keys)?;
        if params.shamir.is_some() {
            return Err(VaultError::validation("share parameters only apply to Shamir backups"));
        }
        let passphrase = creation_passphrase(params)?
            .ok_or_else(|| VaultError::validation("time-locked backups require a passphrase"))?;

        let plain = bundle::pack(keys)?;
        Ok(Encoded {
            payload: crypto::seal_with_passphrase(&plain, passphrase, params.kdf)?,
            credential_spec: CredentialSpec::Passphrase,
            is_encrypted: true,
        })
    }

    fn decode(&self, payload: &[u8], credential: &Credential, ctx: &DecodeContext<'_>) -> Result<Vec<KeyMaterial>> {
        if ctx.record.expires_at.is_none() {
            return Err(VaultError::Other(format!("Time-locked backup {} has no unlock time", ctx.record.id)));
        }
        if let Some(remaining) = ctx.record.lock_remaining(ctx.now) {
            return Err(VaultError::StillLocked { remaining });
        }

        let plain = crypto::open_with_passphrase(payload, credential.require_passphrase()?)?;
        bundle::unpack(&plain)
    }
}
