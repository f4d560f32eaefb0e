//! Encrypted snapshot payloads.
//!
//! A snapshot-mode version may be stored as a JSON envelope:
//!
//! ```text
//! {"format":"cfenv-aes-256-gcm-v1","kdf":"scrypt",
//!  "saltB64":..,"ivB64":..,"authTagB64":..,"ciphertextB64":..}
//! ```
//!
//! The key is scrypt(secret, salt) with N = 2^14, r = 8, p = 1 and a
//! 32-byte output; the cipher is AES-256-GCM with a 12-byte IV and a
//! detached 16-byte tag. All binary fields are standard padded base64.
//! Payloads that are not such an envelope pass through unchanged.

use crate::error::{CfenvError, CfenvResult};
use serde::{Deserialize, Serialize};

/// Envelope format tag.
pub const ENCRYPTION_FORMAT: &str = "cfenv-aes-256-gcm-v1";

/// Key derivation function tag.
pub const KDF_NAME: &str = "scrypt";

/// Size of the derived AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the scrypt salt in bytes.
pub const SALT_SIZE: usize = 16;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

#[cfg(feature = "encryption")]
const SCRYPT_LOG_N: u8 = 14;
#[cfg(feature = "encryption")]
const SCRYPT_R: u32 = 8;
#[cfg(feature = "encryption")]
const SCRYPT_P: u32 = 1;

#[cfg(feature = "encryption")]
const WRONG_KEY: &str = "failed to decrypt snapshot: encryption key is missing or incorrect";

/// An encrypted snapshot payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEnvelope {
    /// Always [`ENCRYPTION_FORMAT`].
    pub format: String,
    /// Always [`KDF_NAME`].
    pub kdf: String,
    /// scrypt salt.
    pub salt_b64: String,
    /// GCM nonce.
    pub iv_b64: String,
    /// GCM tag.
    pub auth_tag_b64: String,
    /// Ciphertext without the tag.
    pub ciphertext_b64: String,
}

impl EncryptedEnvelope {
    /// Parses `payload` as an envelope; `None` if it is anything else.
    pub fn parse(payload: &str) -> Option<Self> {
        let envelope: Self = serde_json::from_str(payload).ok()?;
        (envelope.format == ENCRYPTION_FORMAT && envelope.kdf == KDF_NAME).then_some(envelope)
    }

    /// Serializes the envelope as stored.
    pub fn to_json(&self) -> CfenvResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decrypts the envelope with `secret`.
    #[cfg(feature = "encryption")]
    pub fn decrypt(&self, secret: &str) -> CfenvResult<String> {
        use aes_gcm::aead::generic_array::GenericArray;
        use aes_gcm::aead::{Aead, KeyInit};
        use aes_gcm::{Aes256Gcm, Nonce};

        let salt = decode_field("saltB64", &self.salt_b64)?;
        let iv = decode_field("ivB64", &self.iv_b64)?;
        let tag = decode_field("authTagB64", &self.auth_tag_b64)?;
        let mut sealed = decode_field("ciphertextB64", &self.ciphertext_b64)?;
        if iv.len() != NONCE_SIZE || tag.len() != TAG_SIZE {
            return Err(CfenvError::Encryption(format!(
                "malformed envelope: expected {NONCE_SIZE}-byte IV and {TAG_SIZE}-byte tag"
            )));
        }

        let key = derive_key(secret, &salt)?;
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_slice()));
        sealed.extend_from_slice(&tag);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
            .map_err(|_| CfenvError::Encryption(WRONG_KEY.into()))?;

        String::from_utf8(plaintext)
            .map_err(|_| CfenvError::Encryption("decrypted snapshot is not UTF-8".into()))
    }

    /// Decrypting requires the `encryption` feature.
    #[cfg(not(feature = "encryption"))]
    pub fn decrypt(&self, _secret: &str) -> CfenvResult<String> {
        Err(CfenvError::Encryption(
            "snapshot is encrypted but cfenv_sync was built without the `encryption` feature"
                .into(),
        ))
    }

    /// Encrypts `plaintext` with caller-chosen salt and IV.
    ///
    /// Salt and IV must be fresh random bytes for every payload; fixed
    /// values are only acceptable for test data.
    #[cfg(feature = "encryption")]
    pub fn seal(
        plaintext: &str,
        secret: &str,
        salt: &[u8; SALT_SIZE],
        iv: &[u8; NONCE_SIZE],
    ) -> CfenvResult<Self> {
        use aes_gcm::aead::generic_array::GenericArray;
        use aes_gcm::aead::{Aead, KeyInit};
        use aes_gcm::{Aes256Gcm, Nonce};
        use base64::{engine::general_purpose::STANDARD, Engine as _};

        if secret.trim().is_empty() {
            return Err(CfenvError::Encryption("missing encryption secret".into()));
        }

        let key = derive_key(secret, salt)?;
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_slice()));
        let mut sealed = cipher
            .encrypt(Nonce::from_slice(iv), plaintext.as_bytes())
            .map_err(|_| CfenvError::Encryption("encryption failed".into()))?;
        let tag = sealed.split_off(sealed.len() - TAG_SIZE);

        Ok(Self {
            format: ENCRYPTION_FORMAT.to_string(),
            kdf: KDF_NAME.to_string(),
            salt_b64: STANDARD.encode(salt),
            iv_b64: STANDARD.encode(iv),
            auth_tag_b64: STANDARD.encode(tag),
            ciphertext_b64: STANDARD.encode(sealed),
        })
    }
}

/// Returns true if `payload` is an encrypted envelope.
pub fn is_encrypted_payload(payload: &str) -> bool {
    EncryptedEnvelope::parse(payload).is_some()
}

/// Returns the plaintext of a stored version payload.
///
/// Plain payloads are returned unchanged. Encrypted ones need a non-blank
/// `secret`.
pub fn decrypt_snapshot_payload(payload: &str, secret: Option<&str>) -> CfenvResult<String> {
    let Some(envelope) = EncryptedEnvelope::parse(payload) else {
        return Ok(payload.to_string());
    };
    let secret = secret.filter(|s| !s.trim().is_empty()).ok_or_else(|| {
        CfenvError::Encryption(
            "snapshot is encrypted; set an encryption key (CFENV_ENCRYPTION_KEY)".into(),
        )
    })?;
    envelope.decrypt(secret)
}

#[cfg(feature = "encryption")]
fn decode_field(name: &str, value: &str) -> CfenvResult<Vec<u8>> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    STANDARD
        .decode(value)
        .map_err(|_| CfenvError::Encryption(format!("malformed envelope: {name} is not base64")))
}

#[cfg(feature = "encryption")]
fn derive_key(secret: &str, salt: &[u8]) -> CfenvResult<zeroize::Zeroizing<[u8; KEY_SIZE]>> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_SIZE)
        .map_err(|_| CfenvError::Encryption("invalid scrypt parameters".into()))?;
    let mut key = zeroize::Zeroizing::new([0u8; KEY_SIZE]);
    scrypt::scrypt(secret.as_bytes(), salt, &params, key.as_mut_slice())
        .map_err(|_| CfenvError::Encryption("key derivation failed".into()))?;
    Ok(key)
}
