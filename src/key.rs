//! Decrypted license keys.
//!
//! Keys are unwrapped from the license's key containers with AES-128-CBC under
//! the derived encryption key.

use std::fmt;

use crate::crypto::aes_cbc_decrypt;
use crate::error::{Error, Result};
use crate::license_protocol::license::key_container::OperatorSessionKeyPermissions;
use crate::license_protocol::license::KeyContainer;

/// Key container type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Signing,
    Content,
    KeyControl,
    OperatorSession,
    Entitlement,
    OemContent,
    /// A wire value this crate does not know about.
    Unknown(i32),
}

impl KeyType {
    /// Name used for display and as the fallback key id.
    pub fn name(&self) -> String {
        match self {
            KeyType::Signing => "Signing".to_string(),
            KeyType::Content => "Content".to_string(),
            KeyType::KeyControl => "KeyControl".to_string(),
            KeyType::OperatorSession => "OperatorSession".to_string(),
            KeyType::Entitlement => "Entitlement".to_string(),
            KeyType::OemContent => "OemContent".to_string(),
            KeyType::Unknown(value) => value.to_string(),
        }
    }
}

impl From<i32> for KeyType {
    fn from(value: i32) -> Self {
        match value {
            1 => KeyType::Signing,
            2 => KeyType::Content,
            3 => KeyType::KeyControl,
            4 => KeyType::OperatorSession,
            5 => KeyType::Entitlement,
            6 => KeyType::OemContent,
            other => KeyType::Unknown(other),
        }
    }
}

impl From<KeyType> for i32 {
    fn from(key_type: KeyType) -> Self {
        match key_type {
            KeyType::Signing => 1,
            KeyType::Content => 2,
            KeyType::KeyControl => 3,
            KeyType::OperatorSession => 4,
            KeyType::Entitlement => 5,
            KeyType::OemContent => 6,
            KeyType::Unknown(value) => value,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Operator session permissions, one bit per flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Permissions(u8);

impl Permissions {
    pub const ALLOW_ENCRYPT: Permissions = Permissions(1 << 0);
    pub const ALLOW_DECRYPT: Permissions = Permissions(1 << 1);
    pub const ALLOW_SIGN: Permissions = Permissions(1 << 2);
    pub const ALLOW_SIGNATURE_VERIFY: Permissions = Permissions(1 << 3);

    /// Flag names in wire order.
    const TABLE: [(&'static str, Permissions); 4] = [
        ("AllowEncrypt", Permissions::ALLOW_ENCRYPT),
        ("AllowDecrypt", Permissions::ALLOW_DECRYPT),
        ("AllowSign", Permissions::ALLOW_SIGN),
        ("AllowSignatureVerify", Permissions::ALLOW_SIGNATURE_VERIFY),
    ];

    /// Flags whose wire value is exactly 1.
    pub fn from_wire(wire: &OperatorSessionKeyPermissions) -> Self {
        let values = [
            wire.allow_encrypt,
            wire.allow_decrypt,
            wire.allow_sign,
            wire.allow_signature_verify,
        ];
        values
            .iter()
            .zip(Self::TABLE.iter())
            .filter(|(value, _)| **value == Some(1))
            .fold(Permissions::default(), |acc, (_, (_, bit))| acc | *bit)
    }

    pub fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn names(self) -> Vec<String> {
        Self::TABLE
            .iter()
            .filter(|(_, bit)| self.contains(*bit))
            .map(|(name, _)| (*name).to_string())
            .collect()
    }
}

impl std::ops::BitOr for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Self) -> Self {
        Permissions(self.0 | rhs.0)
    }
}

/// A decrypted key from a license.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentKey {
    /// Key id. Falls back to the type name when the container has none.
    pub kid: Vec<u8>,
    pub key_type: KeyType,
    /// Decrypted key bytes.
    pub key: Vec<u8>,
    /// Permission names, only set for operator session keys.
    pub permissions: Vec<String>,
}

impl ContentKey {
    /// Decrypt a key container with the derived encryption key.
    pub fn from_key_container(container: &KeyContainer, enc_key: &[u8; 16]) -> Result<Self> {
        let key_type = KeyType::from(container.r#type.unwrap_or_default());

        let kid = match container.id.as_ref() {
            Some(id) => id.clone(),
            None => key_type.name().into_bytes(),
        };

        let encrypted = container
            .key
            .as_ref()
            .ok_or_else(|| Error::Parse(format!("{} key container has no key", key_type)))?;
        let iv = container
            .iv
            .as_ref()
            .ok_or_else(|| Error::Parse(format!("{} key container has no IV", key_type)))?;

        let key = aes_cbc_decrypt(enc_key, iv, encrypted)?;

        let permissions = match (key_type, container.operator_session_key_permissions.as_ref()) {
            (KeyType::OperatorSession, Some(wire)) => Permissions::from_wire(wire).names(),
            _ => Vec::new(),
        };

        Ok(Self {
            kid,
            key_type,
            key,
            permissions,
        })
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(&self.kid), hex::encode(&self.key))
    }
}
