//! Symmetric session ciphers.
//!
//! A key exchange yields a secret; a [`CipherFactory`] turns that secret into
//! the [`SessionCipher`] sealing every later frame. Two suites ship with the
//! crate, selected through [`CipherSuite`]:
//!
//! - **XChaCha20-Poly1305** (default): `[len u32 LE][nonce 24][ciphertext + tag 16]`,
//!   key = SHA-256 over a domain label and the secret.
//! - **AES-256-CBC**: the legacy block layout
//!   `[digest 32][digest 32][magic u32 BE][len u32 LE][iv 16][ciphertext]`
//!   with PKCS#7 padding and a fresh IV per frame.
//!
//! Any other cipher plugs in by implementing [`SessionCipher`] and handing a
//! factory to [`HandshakeKeys::with_cipher`](crate::protocol::handshake::HandshakeKeys::with_cipher).

use crate::error::{constants, ProtocolError, Result};
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use zeroize::Zeroize;

/// Nonce length of the XChaCha20-Poly1305 envelope.
pub const NONCE_LEN: usize = 24;

/// Authentication tag appended to every XChaCha20-Poly1305 ciphertext.
pub const TAG_LEN: usize = 16;

const SESSION_LABEL: &[u8] = b"packet-protocol session v1";

/// Seals and opens whole frames for one session.
///
/// Sealed frames must announce their own length somewhere in a fixed-size
/// prefix so the reader can cut them out of a byte stream.
pub trait SessionCipher: Send {
    /// Seal one plaintext frame into its wire form.
    fn seal(&mut self, frame: &[u8]) -> Result<Vec<u8>>;

    /// Open one complete sealed frame.
    fn open(&mut self, sealed: &[u8]) -> Result<Vec<u8>>;

    /// Total length of the sealed frame at the front of `wire`, once the
    /// prefix carrying it is buffered.
    fn sealed_len(&self, wire: &[u8]) -> Option<usize>;

    /// Smallest well-formed sealed frame.
    fn min_sealed_len(&self) -> usize;

    /// Upper bound of the bytes sealing adds to a frame.
    fn max_overhead(&self) -> usize;
}

/// Builds the session cipher for an exchanged secret.
pub type CipherFactory = Arc<dyn Fn(&[u8]) -> Result<Box<dyn SessionCipher>> + Send + Sync>;

/// Built-in session ciphers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CipherSuite {
    #[default]
    #[serde(rename = "xchacha20poly1305")]
    XChaCha20Poly1305,
    #[serde(rename = "aes256cbc")]
    Aes256Cbc,
}

impl CipherSuite {
    pub fn name(self) -> &'static str {
        match self {
            CipherSuite::XChaCha20Poly1305 => "xchacha20poly1305",
            CipherSuite::Aes256Cbc => "aes256cbc",
        }
    }

    /// Session cipher of this suite keyed from `secret`.
    pub fn establish(self, secret: &[u8]) -> Result<Box<dyn SessionCipher>> {
        Ok(match self {
            CipherSuite::XChaCha20Poly1305 => Box::new(Crypto::from_secret(secret)?),
            CipherSuite::Aes256Cbc => Box::new(AesCbcCipher::from_secret(secret)?),
        })
    }

    pub fn factory(self) -> CipherFactory {
        Arc::new(move |secret: &[u8]| self.establish(secret))
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherSuite {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(&['-', '_'][..], "").as_str() {
            "xchacha20poly1305" | "xchacha" => Ok(CipherSuite::XChaCha20Poly1305),
            "aes256cbc" | "aes" => Ok(CipherSuite::Aes256Cbc),
            _ => Err(ProtocolError::ConfigError(format!(
                "Unsupported cipher suite: '{s}'"
            ))),
        }
    }
}

/// Reject the empty secret every suite would otherwise key from.
pub fn require_secret(secret: &[u8]) -> Result<()> {
    if secret.is_empty() {
        return Err(ProtocolError::HandshakeError(
            constants::ERR_EMPTY_SECRET.to_string(),
        ));
    }
    Ok(())
}

/// XChaCha20-Poly1305 envelope.
pub struct Crypto {
    cipher: XChaCha20Poly1305,
}

impl Crypto {
    const OVERHEAD: usize = 4 + NONCE_LEN + TAG_LEN;

    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(key.into()),
        }
    }

    /// Build a cipher from a key exchange secret.
    pub fn from_secret(secret: &[u8]) -> Result<Self> {
        require_secret(secret)?;
        let mut key = derive_session_key(secret);
        let crypto = Self::new(&key);
        key.zeroize();
        Ok(crypto)
    }

    pub fn generate_nonce() -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        nonce
    }

    pub fn encrypt(&self, plaintext: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(XNonce::from_slice(nonce), plaintext)
            .map_err(|_| ProtocolError::EncryptionFailure)
    }

    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>> {
        self.cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| ProtocolError::DecryptionFailure)
    }
}

impl SessionCipher for Crypto {
    fn seal(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        let nonce = Self::generate_nonce();
        let ciphertext = self.encrypt(frame, &nonce)?;
        let total = 4 + NONCE_LEN + ciphertext.len();
        let len = u32::try_from(total)
            .map_err(|_| ProtocolError::EncodeError(format!("envelope of {total} bytes")))?;

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open(&mut self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < Self::OVERHEAD {
            return Err(ProtocolError::DecodeError(
                constants::ERR_SHORT_ENVELOPE.to_string(),
            ));
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&sealed[4..4 + NONCE_LEN]);
        self.decrypt(&sealed[4 + NONCE_LEN..], &nonce)
    }

    fn sealed_len(&self, wire: &[u8]) -> Option<usize> {
        read_u32_le(wire, 0)
    }

    fn min_sealed_len(&self) -> usize {
        Self::OVERHEAD
    }

    fn max_overhead(&self) -> usize {
        Self::OVERHEAD
    }
}

impl fmt::Debug for Crypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Crypto { .. }")
    }
}

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-256-CBC in the legacy block layout.
///
/// The two leading digests are written for peers that expect them; they are
/// not checked on open.
pub struct AesCbcCipher {
    key: [u8; 32],
}

impl AesCbcCipher {
    const MAGIC: u32 = 0x0100_FFFF;
    const LEN_OFFSET: usize = 0x44;
    const IV_OFFSET: usize = 0x48;
    const HEADER_LEN: usize = 0x58;
    const BLOCK: usize = 16;

    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// A secret of at least 0x50 bytes carries its key at `0x30..0x50`;
    /// shorter secrets are hashed into one.
    pub fn from_secret(secret: &[u8]) -> Result<Self> {
        require_secret(secret)?;
        let key = match secret.get(0x30..0x50) {
            Some(raw) => {
                let mut key = [0u8; 32];
                key.copy_from_slice(raw);
                key
            }
            None => derive_session_key(secret),
        };
        Ok(Self::new(key))
    }
}

impl SessionCipher for AesCbcCipher {
    fn seal(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        let mut iv = [0u8; Self::BLOCK];
        OsRng.fill_bytes(&mut iv);

        let mut buf = frame.to_vec();
        buf.resize(frame.len() + Self::BLOCK, 0);
        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_mut::<Pkcs7>(&mut buf, frame.len())
            .map_err(|_| ProtocolError::EncryptionFailure)?;

        let total = Self::HEADER_LEN + ciphertext.len();
        let len = u32::try_from(total)
            .map_err(|_| ProtocolError::EncodeError(format!("envelope of {total} bytes")))?;
        let mut out = vec![0u8; 0x40];
        out.extend_from_slice(&Self::MAGIC.to_be_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&iv);
        out.extend_from_slice(ciphertext);

        let body = Sha256::digest(&out[Self::LEN_OFFSET..]);
        out[0x20..0x40].copy_from_slice(&body);
        let head = Sha256::digest(&out[..Self::HEADER_LEN]);
        out[..0x20].copy_from_slice(&head);
        Ok(out)
    }

    fn open(&mut self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < self.min_sealed_len() {
            return Err(ProtocolError::DecodeError(
                constants::ERR_SHORT_ENVELOPE.to_string(),
            ));
        }
        let mut iv = [0u8; Self::BLOCK];
        iv.copy_from_slice(&sealed[Self::IV_OFFSET..Self::HEADER_LEN]);
        let mut buf = sealed[Self::HEADER_LEN..].to_vec();
        let plain = Aes256CbcDec::new(&self.key.into(), &iv.into())
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|_| ProtocolError::DecryptionFailure)?;
        Ok(plain.to_vec())
    }

    fn sealed_len(&self, wire: &[u8]) -> Option<usize> {
        read_u32_le(wire, Self::LEN_OFFSET)
    }

    fn min_sealed_len(&self) -> usize {
        Self::HEADER_LEN + Self::BLOCK
    }

    fn max_overhead(&self) -> usize {
        Self::HEADER_LEN + Self::BLOCK
    }
}

impl Drop for AesCbcCipher {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl fmt::Debug for AesCbcCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AesCbcCipher { .. }")
    }
}

fn read_u32_le(wire: &[u8], offset: usize) -> Option<usize> {
    let bytes: [u8; 4] = wire.get(offset..offset + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes) as usize)
}

/// SHA-256 over the domain label and the exchanged secret.
pub fn derive_session_key(secret: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(SESSION_LABEL);
    hasher.update(secret);
    let mut key = [0u8; 32];
    key.copy_from_slice(&hasher.finalize());
    key
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn roundtrip_with_derived_key() {
        let crypto = Crypto::from_secret(b"0123456789abcdef").unwrap();
        let nonce = Crypto::generate_nonce();
        let sealed = crypto.encrypt(b"frame", &nonce).unwrap();
        assert_eq!(sealed.len(), 5 + TAG_LEN);
        assert_eq!(crypto.decrypt(&sealed, &nonce).unwrap(), b"frame");
    }

    #[test]
    fn different_secrets_do_not_interoperate() {
        let a = Crypto::from_secret(b"secret a").unwrap();
        let b = Crypto::from_secret(b"secret b").unwrap();
        let nonce = [7u8; NONCE_LEN];
        let sealed = a.encrypt(b"frame", &nonce).unwrap();
        assert!(matches!(
            b.decrypt(&sealed, &nonce),
            Err(ProtocolError::DecryptionFailure)
        ));
    }

    #[test]
    fn empty_secret_is_rejected() {
        for suite in [CipherSuite::XChaCha20Poly1305, CipherSuite::Aes256Cbc] {
            assert!(matches!(
                suite.establish(&[]),
                Err(ProtocolError::HandshakeError(_))
            ));
        }
    }

    #[test]
    fn envelope_announces_its_length() {
        let mut crypto = Crypto::from_secret(b"abc").unwrap();
        let sealed = crypto.seal(b"plain frame").unwrap();
        assert_eq!(crypto.sealed_len(&sealed), Some(sealed.len()));
        assert_eq!(sealed.len(), 11 + crypto.max_overhead());
        assert_eq!(crypto.open(&sealed).unwrap(), b"plain frame");
    }

    #[test]
    fn aes_layout_matches_legacy_block() {
        let mut cipher = AesCbcCipher::from_secret(b"0123456789abcdef").unwrap();
        let sealed = cipher.seal(&[0x11; 20]).unwrap();

        // 20 bytes pad to two blocks.
        assert_eq!(sealed.len(), 0x58 + 32);
        assert_eq!(&sealed[0x40..0x44], &[0x01, 0x00, 0xFF, 0xFF]);
        assert_eq!(cipher.sealed_len(&sealed), Some(sealed.len()));
        assert_eq!(cipher.sealed_len(&sealed[..0x47]), None);
        assert_eq!(cipher.open(&sealed).unwrap(), vec![0x11; 20]);
    }

    #[test]
    fn aes_takes_key_from_long_secret() {
        let mut secret = vec![0u8; 0x50];
        secret[0x30..].copy_from_slice(&[0x42; 0x20]);
        let mut from_secret = AesCbcCipher::from_secret(&secret).unwrap();
        let mut direct = AesCbcCipher::new([0x42; 32]);
        let sealed = from_secret.seal(b"frame").unwrap();
        assert_eq!(direct.open(&sealed).unwrap(), b"frame");
    }

    #[test]
    fn aes_wrong_key_fails_to_unpad() {
        let mut a = AesCbcCipher::new([1; 32]);
        let mut b = AesCbcCipher::new([2; 32]);
        let sealed = a.seal(b"frame").unwrap();
        // A wrong key leaves random padding; a valid pad byte is possible but unlikely.
        assert_ne!(b.open(&sealed).ok().as_deref(), Some(&b"frame"[..]));
    }

    #[test]
    fn suite_names_parse() {
        assert_eq!("aes-256-cbc".parse::<CipherSuite>().ok(), Some(CipherSuite::Aes256Cbc));
        assert_eq!(
            CipherSuite::XChaCha20Poly1305.name().parse::<CipherSuite>().ok(),
            Some(CipherSuite::XChaCha20Poly1305)
        );
        assert!("rc4".parse::<CipherSuite>().is_err());
    }
}
