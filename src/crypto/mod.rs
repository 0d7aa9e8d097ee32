//! Block decryption for encrypted IoStore containers.
//!
//! IoStore encrypts each compression block with AES-256 in ECB mode.  The
//! on-disk block is padded to the cipher block size; the padding is random
//! filler and is discarded after decryption, never interpreted.
//!
//! Decryption is length preserving: `decrypt_in_place` transforms the buffer
//! it is given and never resizes it.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, KeyInit};
use aes::Aes256;
use thiserror::Error;

/// AES block size in bytes.  Encrypted reads are aligned to this.
pub const CIPHER_BLOCK_SIZE: usize = 16;
/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid AES key length: expected {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("Cipher input of {0} bytes is not a multiple of {CIPHER_BLOCK_SIZE}")]
    UnalignedBuffer(usize),
    #[error("Container is encrypted but no decryption key was provided")]
    MissingKey,
}

/// A length-preserving whole-buffer decryption primitive.
pub trait BlockCipher: Send + Sync {
    fn decrypt_in_place(&self, data: &mut [u8]) -> Result<(), CryptoError>;
}

/// AES-256-ECB, the cipher IoStore uses for encrypted blocks.
pub struct Aes256Ecb {
    cipher: Aes256,
}

impl Aes256Ecb {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let cipher = Aes256::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
        Ok(Self { cipher })
    }
}

impl BlockCipher for Aes256Ecb {
    fn decrypt_in_place(&self, data: &mut [u8]) -> Result<(), CryptoError> {
        if data.len() % CIPHER_BLOCK_SIZE != 0 {
            return Err(CryptoError::UnalignedBuffer(data.len()));
        }
        for chunk in data.chunks_exact_mut(CIPHER_BLOCK_SIZE) {
            self.cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Aes256Ecb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Aes256Ecb { .. }")
    }
}

/// Decrypt a copy of `data` with a raw AES-256 key.
pub fn decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut out = data.to_vec();
    Aes256Ecb::new(key)?.decrypt_in_place(&mut out)?;
    Ok(out)
}

#[cfg(test)]
pub(crate) fn encrypt_for_test(key: &[u8], data: &[u8]) -> Vec<u8> {
    use aes::cipher::BlockEncrypt;
    let cipher = Aes256::new_from_slice(key).unwrap();
    let mut out = data.to_vec();
    for chunk in out.chunks_exact_mut(CIPHER_BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
    }
    out
}
