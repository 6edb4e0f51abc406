//! Session key ladder.
//!
//! The 16 byte session key from the license is expanded with AES-CMAC over
//! labelled contexts built from the serialized license request.
use crate::crypto::cmac_aes128;

const ENCRYPTION_LABEL: &[u8] = b"ENCRYPTION";
const AUTHENTICATION_LABEL: &[u8] = b"AUTHENTICATION";

/// Keys derived from the session key.
#[derive(Clone, PartialEq, Eq)]
pub struct DerivedKeys {
    /// Content key decryption.
    pub enc: [u8; 16],
    /// Server side HMAC key, verifies the license signature.
    pub auth_1: [u8; 32],
    /// Client side HMAC key, signs renewals.
    pub auth_2: [u8; 32],
}

impl std::fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKeys").finish_non_exhaustive()
    }
}

/// Encryption and authentication contexts for `message`.
///
/// `label || 0x00 || message || bits` where bits is the big endian output
/// length: 128 for encryption and 512 for authentication.
#[must_use]
pub fn derive_context(message: &[u8]) -> (Vec<u8>, Vec<u8>) {
    fn context(label: &[u8], message: &[u8], bits: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(label.len() + 1 + message.len() + 4);
        out.extend_from_slice(label);
        out.push(0);
        out.extend_from_slice(message);
        out.extend_from_slice(&bits.to_be_bytes());
        out
    }

    (
        context(ENCRYPTION_LABEL, message, 128),
        context(AUTHENTICATION_LABEL, message, 512),
    )
}

/// Run the key ladder for `message` under `session_key`.
#[must_use]
pub fn derive_keys(message: &[u8], session_key: &[u8; 16]) -> DerivedKeys {
    let (enc_context, auth_context) = derive_context(message);
    let block = |counter: u8, context: &[u8]| cmac_aes128(session_key, &[&[counter][..], context]);

    let mut auth_1 = [0u8; 32];
    auth_1[..16].copy_from_slice(&block(1, &auth_context));
    auth_1[16..].copy_from_slice(&block(2, &auth_context));

    let mut auth_2 = [0u8; 32];
    auth_2[..16].copy_from_slice(&block(3, &auth_context));
    auth_2[16..].copy_from_slice(&block(4, &auth_context));

    DerivedKeys {
        enc: block(1, &enc_context),
        auth_1,
        auth_2,
    }
}
