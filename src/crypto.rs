//! Stateless crypto primitives shared by the three transports.
//!
//! Everything here is a pure function over byte strings; session state lives
//! in the protocol modules. The RNG (`OsRng`) is the only global.

use aes::Aes128;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use md5::Md5;
use rand::rngs::OsRng;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::TapoError;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

pub fn sha1(payload: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(payload);
    hasher.finalize().into()
}

/// Lowercase hex SHA-1 of a UTF-8 string, as used by `login_device` params.
pub fn sha1_hex(payload: &str) -> String {
    hex::encode(sha1(payload.as_bytes()))
}

pub fn sha256(payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.finalize().into()
}

/// Uppercase hex SHA-256 of a UTF-8 string (H200 digest convention).
pub fn sha256_hex_upper(payload: &str) -> String {
    hex::encode_upper(sha256(payload.as_bytes()))
}

/// Uppercase hex MD5 of a UTF-8 string (H200 legacy password hash).
pub fn md5_hex_upper(payload: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(payload.as_bytes());
    hex::encode_upper(hasher.finalize())
}

pub fn b64_encode(payload: &[u8]) -> String {
    BASE64.encode(payload)
}

pub fn b64_decode(payload: &str) -> Result<Vec<u8>, TapoError> {
    BASE64
        .decode(payload.trim())
        .map_err(|e| TapoError::Protocol(format!("base64 decode: {e}")))
}

/// AES-128-CBC with PKCS#7 padding.
pub fn aes_cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    Aes128CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Inverse of [`aes_cbc_encrypt`]; bad padding is a protocol error so the
/// caller can treat it as an expired session.
pub fn aes_cbc_decrypt(
    key: &[u8; 16],
    iv: &[u8; 16],
    ciphertext: &[u8],
) -> Result<Vec<u8>, TapoError> {
    Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| TapoError::Protocol("AES-CBC padding is incorrect".into()))
}

/// Keyed MAC over arbitrary payloads.
pub fn hmac_sha256(key: &[u8], payload: &[u8]) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(payload);
    mac.finalize().into_bytes().into()
}

/// RSA keypair used to bootstrap the passthrough session.
///
/// The public half travels to the device as PKCS#8 PEM; the private half
/// recovers the symmetric session material from the handshake reply.
pub struct RsaKeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl RsaKeyPair {
    /// Generates a fresh keypair. Devices negotiate with 1024-bit keys;
    /// 2048 stays available for firmwares that reject the smaller modulus.
    pub fn generate(bits: usize) -> Result<Self, TapoError> {
        let private = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| TapoError::Protocol(format!("RSA keygen: {e}")))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    pub fn public_key_pem(&self) -> Result<String, TapoError> {
        self.public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| TapoError::Protocol(format!("RSA public key encode: {e}")))
    }

    /// OAEP decryption of the server-returned key blob.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, TapoError> {
        self.private
            .decrypt(Oaep::new::<Sha1>(), ciphertext)
            .map_err(|e| TapoError::Protocol(format!("RSA decrypt: {e}")))
    }

    /// Encryption with the public half; only exercised by handshake tests
    /// standing in for the device side.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, TapoError> {
        self.public
            .encrypt(&mut OsRng, Oaep::new::<Sha1>(), plaintext)
            .map_err(|e| TapoError::Protocol(format!("RSA encrypt: {e}")))
    }
}
