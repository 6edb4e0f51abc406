//! Symmetric primitives used by the handshake.
//!
//! AES-CMAC-128 drives the key ladder, HMAC-SHA256 authenticates the license
//! and AES-128-CBC protects the client identity and the content keys.
use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes128;
use cmac::{Cmac, Mac};
use hmac::Hmac;
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;
type CmacAes128 = Cmac<Aes128>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// AES-CMAC-128 over the concatenation of `parts`.
#[must_use]
pub fn cmac_aes128(key: &[u8; 16], parts: &[&[u8]]) -> [u8; 16] {
    let mut mac = <CmacAes128 as Mac>::new(GenericArray::from_slice(key));
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

fn hmac_over(key: &[u8], parts: &[&[u8]]) -> Result<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| Error::SignatureMismatch(format!("Invalid HMAC key: {}", e)))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac)
}

/// HMAC-SHA256 over the concatenation of `parts`.
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32]> {
    Ok(hmac_over(key, parts)?.finalize().into_bytes().into())
}

/// Constant time check of an HMAC-SHA256 tag over `parts`.
pub fn hmac_sha256_verify(key: &[u8], parts: &[&[u8]], tag: &[u8]) -> Result<bool> {
    Ok(hmac_over(key, parts)?.verify_slice(tag).is_ok())
}

/// Append PKCS#7 padding up to a multiple of `block_size`.
///
/// A full block of padding is added when `data` is already aligned.
#[must_use]
pub fn pkcs7_pad(data: &[u8], block_size: usize) -> Vec<u8> {
    let pad = block_size - data.len() % block_size;
    let mut out = Vec::with_capacity(data.len() + pad);
    out.extend_from_slice(data);
    out.resize(data.len() + pad, pad as u8);
    out
}

/// AES-128-CBC encrypt data that is already block aligned.
pub fn aes_cbc_encrypt_aligned(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = data.to_vec();
    let len = buffer.len();
    Aes128CbcEnc::new(key.into(), iv.into())
        .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
        .map_err(|e| Error::Decryption(format!("Input is not block aligned: {}", e)))?;
    Ok(buffer)
}

/// AES-128-CBC decrypt and strip PKCS#7 padding.
pub fn aes_cbc_decrypt(key: &[u8; 16], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let iv: &[u8; 16] = iv.try_into().map_err(|_| {
        Error::Decryption(format!("Invalid IV length: expected 16, got {}", iv.len()))
    })?;

    let mut buffer = data.to_vec();
    let decrypted = Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_mut::<Pkcs7>(&mut buffer)
        .map_err(|e| Error::Decryption(format!("Failed to decrypt key: {}", e)))?;
    Ok(decrypted.to_vec())
}
