//! Secure-data engine (spec §4.C): authenticated encryption for
//! `ServiceDefinition.password` with legacy-format read compatibility.

use aes::Aes256;
use base64::Engine;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;
use zeroize::Zeroizing;

use crate::constants::{CRYPTO_CHUNK_BYTES, ENC_PREFIX_BARE, ENC_PREFIX_V1, ENC_PREFIX_V2};
use crate::error::CryptoError;
use crate::platform::{EventSeverity, EventSink, SecretStore};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

const MASTER_KEY_LEN: usize = 32;
const LEGACY_IV_LEN: usize = 16;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 32;
const HKDF_SALT: &[u8] = b"servy-secure-data-engine-v1-salt";
const HKDF_INFO_ENC: &[u8] = b"servy.crypto.enc";
const HKDF_INFO_MAC: &[u8] = b"servy.crypto.mac";

/// Owns the unsealed master key and legacy IV for the lifetime of the
/// process, and derives the per-purpose subkeys on each operation so a
/// single key lives in memory at a time.
pub struct SecureDataEngine {
    master_key: Zeroizing<[u8; MASTER_KEY_LEN]>,
    legacy_iv: Zeroizing<[u8; LEGACY_IV_LEN]>,
    sink: Box<dyn EventSink>,
}

impl SecureDataEngine {
    /// Loads (or, on first use, generates and seals) the master key and
    /// legacy IV through `secrets`, at the two given storage keys.
    /// Rejects identical paths per spec §4.C.
    pub fn open(
        secrets: &dyn SecretStore,
        master_key_storage: &mut dyn KeyStorage,
        legacy_iv_storage: &mut dyn KeyStorage,
        sink: Box<dyn EventSink>,
    ) -> Result<Self, CryptoError> {
        if master_key_storage.location() == legacy_iv_storage.location() {
            return Err(CryptoError::IdenticalKeyPaths);
        }

        let master_key = load_or_generate::<MASTER_KEY_LEN>(secrets, master_key_storage)?;
        let legacy_iv = load_or_generate::<LEGACY_IV_LEN>(secrets, legacy_iv_storage)?;

        Ok(Self {
            master_key: Zeroizing::new(master_key),
            legacy_iv: Zeroizing::new(legacy_iv),
            sink,
        })
    }

    /// Builds an engine directly from in-memory key material — used by
    /// tests and by callers that manage sealing themselves.
    pub fn from_key_material(
        master_key: [u8; MASTER_KEY_LEN],
        legacy_iv: [u8; LEGACY_IV_LEN],
        sink: Box<dyn EventSink>,
    ) -> Self {
        Self {
            master_key: Zeroizing::new(master_key),
            legacy_iv: Zeroizing::new(legacy_iv),
            sink,
        }
    }

    fn derive_enc_key(&self) -> Zeroizing<[u8; 32]> {
        derive_subkey(&self.master_key, HKDF_INFO_ENC)
    }

    fn derive_mac_key(&self) -> Zeroizing<[u8; 32]> {
        derive_subkey(&self.master_key, HKDF_INFO_MAC)
    }

    /// Encrypts `plaintext`, producing `"SERVY_ENC:v2:" + base64(IV‖CT‖TAG)`.
    /// Rejects empty input.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        if plaintext.is_empty() {
            return Err(CryptoError::EmptyPlaintext);
        }

        let enc_key = self.derive_enc_key();
        let mac_key = self.derive_mac_key();

        let mut iv = [0u8; IV_LEN];
        fill_random(&mut iv);

        let mut buffer = Zeroizing::new(copy_in_chunks(plaintext.as_bytes()));
        let padded_len = buffer.len() + (16 - buffer.len() % 16);
        buffer.resize(padded_len.max(16), 0);

        let ct_len = Aes256CbcEnc::new(enc_key.as_ref().into(), (&iv).into())
            .encrypt_padded_mut::<cbc::cipher::block_padding::Pkcs7>(&mut buffer, plaintext.len())
            .map_err(|e| CryptoError::Cipher(e.to_string()))?
            .len();
        let ciphertext = &buffer[..ct_len];

        let mut mac = <HmacSha256 as Mac>::new_from_slice(mac_key.as_ref())
            .map_err(|e| CryptoError::Cipher(e.to_string()))?;
        mac.update(&iv);
        mac.update(ciphertext);
        let tag = mac.finalize().into_bytes();

        let mut payload = Vec::with_capacity(IV_LEN + ciphertext.len() + TAG_LEN);
        payload.extend_from_slice(&iv);
        payload.extend_from_slice(ciphertext);
        payload.extend_from_slice(&tag);

        let encoded = base64::engine::general_purpose::STANDARD.encode(payload);
        Ok(format!("{ENC_PREFIX_V2}{encoded}"))
    }

    /// Decrypts `input` according to the three-shape contract of spec
    /// §4.C. Never raises: HMAC or parse failures fall back to returning
    /// the input verbatim (legacy-compatibility), logged at Warning.
    pub fn decrypt(&self, input: &str) -> String {
        if let Some(encoded) = input.strip_prefix(ENC_PREFIX_V2) {
            return self.decrypt_v2(input, encoded);
        }
        if let Some(encoded) = input.strip_prefix(ENC_PREFIX_V1) {
            return self.decrypt_v1(input, encoded);
        }
        if let Some(encoded) = input.strip_prefix(ENC_PREFIX_BARE) {
            if is_strictly_valid_base64(encoded) {
                return self.decrypt_v1(input, encoded);
            }
        }
        input.to_string()
    }

    fn decrypt_v2(&self, original: &str, encoded: &str) -> String {
        let Some(payload) = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .ok()
        else {
            self.warn_fallback(original, "base64 decode failed");
            return original.to_string();
        };

        if payload.len() < IV_LEN + TAG_LEN {
            self.warn_fallback(original, "payload too short");
            return original.to_string();
        }

        let (iv_and_ct, tag) = payload.split_at(payload.len() - TAG_LEN);
        let (iv, ciphertext) = iv_and_ct.split_at(IV_LEN);

        let mac_key = self.derive_mac_key();
        let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(mac_key.as_ref()) else {
            self.warn_fallback(original, "mac key initialization failed");
            return original.to_string();
        };
        mac.update(iv);
        mac.update(ciphertext);
        let expected_tag = mac.finalize().into_bytes();

        if expected_tag.as_slice().ct_eq(tag).unwrap_u8() != 1 {
            self.warn_fallback(original, "HMAC verification failed");
            return original.to_string();
        }

        let enc_key = self.derive_enc_key();
        let mut buffer = Zeroizing::new(ciphertext.to_vec());
        match Aes256CbcDec::new(enc_key.as_ref().into(), iv.into())
            .decrypt_padded_mut::<cbc::cipher::block_padding::Pkcs7>(&mut buffer)
        {
            Ok(plaintext) => String::from_utf8_lossy(plaintext).to_string(),
            Err(_) => {
                self.warn_fallback(original, "padding/cipher decode failed");
                original.to_string()
            }
        }
    }

    fn decrypt_v1(&self, original: &str, encoded: &str) -> String {
        let Some(ciphertext) = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .ok()
        else {
            self.warn_fallback(original, "legacy base64 decode failed");
            return original.to_string();
        };

        let enc_key = self.derive_enc_key();
        let mut buffer = Zeroizing::new(ciphertext);
        match Aes256CbcDec::new(enc_key.as_ref().into(), self.legacy_iv.as_ref().into())
            .decrypt_padded_mut::<cbc::cipher::block_padding::Pkcs7>(&mut buffer)
        {
            Ok(plaintext) => String::from_utf8_lossy(plaintext).to_string(),
            Err(_) => {
                self.warn_fallback(original, "legacy cipher decode failed");
                original.to_string()
            }
        }
    }

    fn warn_fallback(&self, original: &str, reason: &str) {
        warn!(reason, "decrypt fell back to returning ciphertext verbatim");
        self.sink.report(
            EventSeverity::Warning,
            None,
            &format!("secure-data decrypt fallback ({reason}) for a {} byte value", original.len()),
        );
    }
}

/// Abstracts where sealed key material lives on disk, so tests can swap
/// in an in-memory location while the real binaries use files under
/// `%ProgramData%\Servy`.
pub trait KeyStorage {
    fn location(&self) -> String;
    fn read_sealed(&self) -> std::io::Result<Option<Vec<u8>>>;
    fn write_sealed(&mut self, sealed: &[u8]) -> std::io::Result<()>;
}

fn load_or_generate<const N: usize>(
    secrets: &dyn SecretStore,
    storage: &mut dyn KeyStorage,
) -> Result<[u8; N], CryptoError> {
    if let Some(sealed) = storage
        .read_sealed()
        .map_err(|e| CryptoError::KeyUnavailable(e.to_string()))?
    {
        let unsealed = secrets.unseal(&sealed)?;
        let mut key = [0u8; N];
        if unsealed.len() != N {
            return Err(CryptoError::KeyUnavailable(format!(
                "expected {N} bytes of key material, found {}",
                unsealed.len()
            )));
        }
        key.copy_from_slice(&unsealed);
        return Ok(key);
    }

    let mut key = [0u8; N];
    fill_random(&mut key);
    let sealed = secrets.seal(&key)?;
    storage
        .write_sealed(&sealed)
        .map_err(|e| CryptoError::KeyUnavailable(e.to_string()))?;
    Ok(key)
}

fn derive_subkey(master_key: &[u8], info: &[u8]) -> Zeroizing<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), master_key);
    let mut subkey = Zeroizing::new([0u8; 32]);
    hk.expand(info, subkey.as_mut())
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    subkey
}

fn copy_in_chunks(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for chunk in data.chunks(CRYPTO_CHUNK_BYTES) {
        out.extend_from_slice(chunk);
    }
    out
}

fn fill_random(buf: &mut [u8]) {
    use std::time::{SystemTime, UNIX_EPOCH};
    // Platform-independent fallback entropy source is intentionally not
    // used here in the real build: the Windows target links against
    // `BCryptGenRandom` via the `windows` crate's `Win32_Security_Cryptography`
    // feature. This function is the single seam tests substitute.
    #[cfg(windows)]
    {
        fill_random_windows(buf);
        return;
    }
    #[cfg(not(windows))]
    {
        let mut seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        for byte in buf.iter_mut() {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            *byte = (seed >> 33) as u8;
        }
    }
}

#[cfg(windows)]
fn fill_random_windows(buf: &mut [u8]) {
    use windows::Win32::Security::Cryptography::{
        BCryptGenRandom, BCRYPT_ALG_HANDLE, BCRYPT_USE_SYSTEM_PREFERRED_RNG,
    };
    unsafe {
        let _ = BCryptGenRandom(
            BCRYPT_ALG_HANDLE::default(),
            buf,
            BCRYPT_USE_SYSTEM_PREFERRED_RNG.0 as u32,
        );
    }
}

/// "Strictly valid base64": non-empty, length divisible by 4, standard
/// alphabet, `=` padding only as the last one or two characters (spec
/// §4.C).
fn is_strictly_valid_base64(s: &str) -> bool {
    if s.is_empty() || s.len() % 4 != 0 {
        return false;
    }
    let bytes = s.as_bytes();
    let mut padding_start = bytes.len();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'=' {
            padding_start = i;
            break;
        }
        if !(b.is_ascii_alphanumeric() || b == b'+' || b == b'/') {
            return false;
        }
    }
    let padding_len = bytes.len() - padding_start;
    if padding_len > 2 {
        return false;
    }
    bytes[padding_start..].iter().all(|&b| b == b'=')
}
