//! Key exchange carried by the `EncryptionRequest` packet.
//!
//! One side owns an RSA private key and the other the matching public key,
//! both stored as PEM-encoded PKCS#8 files. The side holding the public key
//! picks a session secret, RSA-encrypts it (PKCS#1 v1.5) into `rsa_data` and
//! sends the request unencrypted. The side holding the private key recovers
//! the secret. Both then key the same [`SessionCipher`] from it and every
//! later frame is sealed with that cipher. Which cipher is a per-connection
//! choice: a [`CipherSuite`] or any custom [`CipherFactory`].
//!
//! **Session state** lives in [`Session`], owned by one connection. The
//! secret is zeroized when the session is dropped.

use crate::error::{ProtocolError, Result};
use crate::protocol::message::EncryptionRequestPacket;
use crate::utils::crypto::{require_secret, CipherFactory, CipherSuite, SessionCipher};
use crate::utils::metrics::global_metrics;
use rand_core::{OsRng, RngCore};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::path::Path;
use zeroize::{Zeroize, Zeroizing};

#[allow(unused_imports)]
use tracing::{debug, instrument, warn};

/// Length of secrets produced by [`generate_secret`].
pub const SECRET_LEN: usize = 16;

/// Load a PEM-encoded PKCS#8 private key.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_private_key(path: &Path) -> Result<RsaPrivateKey> {
    RsaPrivateKey::read_pkcs8_pem_file(path)
        .map_err(|e| ProtocolError::KeyError(format!("{}: {e}", path.display())))
}

/// Load a PEM-encoded SubjectPublicKeyInfo public key.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_public_key(path: &Path) -> Result<RsaPublicKey> {
    RsaPublicKey::read_public_key_pem_file(path)
        .map_err(|e| ProtocolError::KeyError(format!("{}: {e}", path.display())))
}

/// Generate a random session secret
pub fn generate_secret() -> [u8; SECRET_LEN] {
    let mut secret = [0u8; SECRET_LEN];
    OsRng.fill_bytes(&mut secret);
    secret
}

/// Keys one connection takes part in the exchange with.
pub struct HandshakeKeys {
    /// Opens inbound requests
    decrypt: Option<RsaPrivateKey>,
    /// Seals outbound requests
    encrypt: Option<RsaPublicKey>,
    cipher: CipherFactory,
}

impl Default for HandshakeKeys {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl HandshakeKeys {
    pub fn new(decrypt: Option<RsaPrivateKey>, encrypt: Option<RsaPublicKey>) -> Self {
        Self {
            decrypt,
            encrypt,
            cipher: CipherSuite::default().factory(),
        }
    }

    /// Load whichever key files are given; absent paths leave that direction out.
    pub fn load(decrypt_path: Option<&Path>, encrypt_path: Option<&Path>) -> Result<Self> {
        let decrypt = decrypt_path.map(load_private_key).transpose()?;
        let encrypt = encrypt_path.map(load_public_key).transpose()?;
        Ok(Self::new(decrypt, encrypt))
    }

    /// Seal sessions with one of the built-in suites.
    pub fn with_suite(self, suite: CipherSuite) -> Self {
        self.with_cipher(suite.factory())
    }

    /// Seal sessions with ciphers built by `factory`.
    pub fn with_cipher(mut self, factory: CipherFactory) -> Self {
        self.cipher = factory;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.decrypt.is_none() && self.encrypt.is_none()
    }

    pub fn can_decrypt(&self) -> bool {
        self.decrypt.is_some()
    }

    pub fn can_encrypt(&self) -> bool {
        self.encrypt.is_some()
    }

    /// Handle a received request.
    ///
    /// Without a private key the request is left alone and no session is
    /// created. Otherwise `rsa_data` is replaced by the recovered secret.
    #[instrument(skip_all)]
    pub fn accept_request(&self, request: &mut EncryptionRequestPacket) -> Result<Option<Session>> {
        let Some(key) = &self.decrypt else {
            return Ok(None);
        };
        global_metrics().handshake_attempt();

        let result = decrypt_secret(key, &request.rsa_data).and_then(|secret| {
            let session = Session::with_cipher(&secret, &self.cipher)?;
            request.rsa_data = secret.to_vec();
            Ok(session)
        });
        match &result {
            Ok(_) => {
                global_metrics().handshake_success();
                debug!("Recovered session secret from key exchange");
            }
            Err(e) => {
                global_metrics().handshake_failed();
                warn!(error = %e, "Inbound key exchange failed");
            }
        }
        result.map(Some)
    }

    /// Prepare a request for sending.
    ///
    /// `request.rsa_data` holds the plaintext secret. Returns the request to
    /// put on the wire, with the secret RSA-encrypted, and the session both
    /// sides will share. Without a public key the request goes out as is.
    #[instrument(skip_all)]
    pub fn seal_request(
        &self,
        request: &EncryptionRequestPacket,
    ) -> Result<Option<(EncryptionRequestPacket, Session)>> {
        let Some(key) = &self.encrypt else {
            return Ok(None);
        };
        global_metrics().handshake_attempt();

        let result = Session::with_cipher(&request.rsa_data, &self.cipher).and_then(|session| {
            let rsa_data = encrypt_secret(key, &request.rsa_data)?;
            Ok((EncryptionRequestPacket { rsa_data }, session))
        });
        match &result {
            Ok(_) => {
                global_metrics().handshake_success();
                debug!("Sealed session secret for key exchange");
            }
            Err(e) => {
                global_metrics().handshake_failed();
                warn!(error = %e, "Outbound key exchange failed");
            }
        }
        result.map(Some)
    }
}

impl std::fmt::Debug for HandshakeKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeKeys")
            .field("decrypt", &self.can_decrypt())
            .field("encrypt", &self.can_encrypt())
            .finish_non_exhaustive()
    }
}

/// RSA-decrypt a secret taken from the wire.
///
/// The wire block drops leading zero bytes of the ciphertext, so it is
/// left-padded back to the modulus size first.
pub fn decrypt_secret(key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let size = key.size();
    if ciphertext.len() > size {
        return Err(ProtocolError::HandshakeError(format!(
            "ciphertext of {} bytes exceeds the {size}-byte modulus",
            ciphertext.len()
        )));
    }
    let mut padded = vec![0u8; size - ciphertext.len()];
    padded.extend_from_slice(ciphertext);

    key.decrypt(Pkcs1v15Encrypt, &padded)
        .map(Zeroizing::new)
        .map_err(|e| ProtocolError::HandshakeError(format!("RSA decryption failed: {e}")))
}

/// RSA-encrypt a secret for the wire.
pub fn encrypt_secret(key: &RsaPublicKey, secret: &[u8]) -> Result<Vec<u8>> {
    key.encrypt(&mut OsRng, Pkcs1v15Encrypt, secret)
        .map_err(|e| ProtocolError::HandshakeError(format!("RSA encryption failed: {e}")))
}

/// Symmetric state negotiated by one key exchange.
pub struct Session {
    secret: Vec<u8>,
    cipher: Box<dyn SessionCipher>,
}

impl Session {
    /// Session sealed with the default suite.
    pub fn establish(secret: &[u8]) -> Result<Self> {
        Self::with_cipher(secret, &CipherSuite::default().factory())
    }

    pub fn with_cipher(secret: &[u8], factory: &CipherFactory) -> Result<Self> {
        require_secret(secret)?;
        Ok(Self {
            cipher: factory(secret)?,
            secret: secret.to_vec(),
        })
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    pub fn cipher(&self) -> &dyn SessionCipher {
        self.cipher.as_ref()
    }

    pub fn seal(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        self.cipher.seal(frame)
    }

    pub fn open(&mut self, sealed: &[u8]) -> Result<Vec<u8>> {
        self.cipher.open(sealed)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("secret_len", &self.secret.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    fn keypair() -> (RsaPrivateKey, RsaPublicKey) {
        let private = RsaPrivateKey::new(&mut OsRng, 1024).expect("generate key");
        let public = RsaPublicKey::from(&private);
        (private, public)
    }

    #[test]
    fn exchange_yields_matching_sessions() {
        let (private, public) = keypair();
        let client = HandshakeKeys::new(None, Some(public));
        let server = HandshakeKeys::new(Some(private), None);

        let secret = generate_secret();
        let plain = EncryptionRequestPacket {
            rsa_data: secret.to_vec(),
        };
        let (mut wire, mut client_session) = client.seal_request(&plain).unwrap().unwrap();
        assert_ne!(wire.rsa_data, secret.to_vec());

        let mut server_session = server.accept_request(&mut wire).unwrap().unwrap();
        assert_eq!(wire.rsa_data, secret.to_vec());
        assert_eq!(server_session.secret(), client_session.secret());

        let sealed = client_session.seal(b"hello").unwrap();
        assert_eq!(server_session.open(&sealed).unwrap(), b"hello");
    }

    #[test]
    fn both_sides_use_the_chosen_suite() {
        let (private, public) = keypair();
        let client = HandshakeKeys::new(None, Some(public)).with_suite(CipherSuite::Aes256Cbc);
        let server = HandshakeKeys::new(Some(private), None).with_suite(CipherSuite::Aes256Cbc);

        let plain = EncryptionRequestPacket {
            rsa_data: generate_secret().to_vec(),
        };
        let (mut wire, mut client_session) = client.seal_request(&plain).unwrap().unwrap();
        let mut server_session = server.accept_request(&mut wire).unwrap().unwrap();

        let sealed = client_session.seal(b"hello").unwrap();
        // AES-CBC header plus one padded block.
        assert_eq!(sealed.len(), 0x58 + 16);
        assert_eq!(server_session.open(&sealed).unwrap(), b"hello");
    }

    #[test]
    fn leading_zero_ciphertext_is_restored() {
        let (private, public) = keypair();
        let secret = generate_secret();
        let ciphertext = encrypt_secret(&public, &secret).unwrap();
        let trimmed: Vec<u8> = ciphertext.iter().copied().skip_while(|b| *b == 0).collect();
        assert_eq!(decrypt_secret(&private, &trimmed).unwrap().as_slice(), &secret);
    }

    #[test]
    fn missing_keys_skip_the_exchange() {
        let keys = HandshakeKeys::default();
        assert!(keys.is_empty());
        let mut request = EncryptionRequestPacket {
            rsa_data: vec![1, 2, 3],
        };
        assert!(keys.accept_request(&mut request).unwrap().is_none());
        assert!(keys.seal_request(&request).unwrap().is_none());
        assert_eq!(request.rsa_data, vec![1, 2, 3]);
    }

    #[test]
    fn garbage_ciphertext_is_a_handshake_error() {
        let (private, _) = keypair();
        let keys = HandshakeKeys::new(Some(private), None);
        let mut request = EncryptionRequestPacket {
            rsa_data: vec![0x55; 40],
        };
        assert!(matches!(
            keys.accept_request(&mut request),
            Err(ProtocolError::HandshakeError(_))
        ));
    }

    #[test]
    fn unreadable_key_file_is_a_key_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.pem");
        assert!(matches!(
            HandshakeKeys::load(Some(&path), None),
            Err(ProtocolError::KeyError(_))
        ));
    }
}
