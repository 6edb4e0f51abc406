//! License handshake for a single asset.
//!
//! A session builds one signed license request, accepts the matching license
//! response, and exposes the content keys it carried:
//!
//! ```text
//! Created -> ChallengeIssued -> Licensed
//!                            \-> Failed
//! ```

use std::fmt;
use std::sync::Arc;

use prost::Message;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::rand_core::{OsRng, RngCore};
use rsa::{Oaep, RsaPublicKey};
use sha1::Sha1;

use crate::crypto::{aes_cbc_encrypt_aligned, hmac_sha256_verify, pkcs7_pad, BLOCK_SIZE};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::kdf::{derive_keys, DerivedKeys};
use crate::key::{ContentKey, KeyType};
use crate::license_protocol::license_request::content_identification::{
    ContentIdVariant, WidevinePsshData as ContentIdPsshData,
};
use crate::license_protocol::license_request::{ContentIdentification, RequestType};
use crate::license_protocol::signed_message::MessageType;
use crate::license_protocol::{
    ClientIdentification, DrmCertificate, EncryptedClientIdentification, License, LicenseRequest,
    LicenseType, ProtocolVersion, SignedDrmCertificate, SignedMessage, WidevinePsshData,
};

/// Key control nonce sent with every request.
pub const KEY_CONTROL_NONCE: u32 = 1093602366;

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No request built yet.
    Created,
    /// A request was built and cached, waiting for the license.
    ChallengeIssued,
    /// The license was verified and its keys are available.
    Licensed,
    /// License processing failed. Start a new session to retry.
    Failed,
}

/// Init data a session requests a license for.
#[derive(Debug, Clone, PartialEq)]
pub enum InitData {
    /// Forwarded byte for byte.
    Raw(Vec<u8>),
    /// Structured header, re-encoded into the request.
    Parsed(WidevinePsshData),
}

impl InitData {
    fn to_bytes(&self) -> Vec<u8> {
        match self {
            InitData::Raw(data) => data.clone(),
            InitData::Parsed(header) => header.encode_to_vec(),
        }
    }
}

/// A parsed service certificate. Holding one turns on privacy mode.
#[derive(Debug, Clone)]
pub struct ServiceCertificate {
    signed: SignedDrmCertificate,
    certificate: DrmCertificate,
    public_key: RsaPublicKey,
}

impl ServiceCertificate {
    /// Parse a certificate, either bare or wrapped in a signed message.
    ///
    /// The root signature is not checked.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let wrapped = SignedMessage::decode(data)
            .ok()
            .and_then(|message| message.msg)
            .and_then(|msg| SignedDrmCertificate::decode(msg.as_slice()).ok());
        let signed = match wrapped {
            Some(signed) => signed,
            None => SignedDrmCertificate::decode(data)
                .map_err(|e| Error::Parse(format!("Failed to parse SignedDrmCertificate: {}", e)))?,
        };

        let certificate_bytes = signed
            .drm_certificate
            .as_ref()
            .ok_or_else(|| Error::Parse("Service certificate has no DRM certificate".to_string()))?;
        let certificate = DrmCertificate::decode(certificate_bytes.as_slice())
            .map_err(|e| Error::Parse(format!("Failed to parse DrmCertificate: {}", e)))?;

        let public_key_der = certificate
            .public_key
            .as_ref()
            .ok_or_else(|| Error::Parse("Service certificate has no public key".to_string()))?;
        let public_key = RsaPublicKey::from_pkcs1_der(public_key_der)
            .or_else(|_| RsaPublicKey::from_public_key_der(public_key_der))
            .map_err(|e| Error::Parse(format!("Invalid service certificate public key: {}", e)))?;

        Ok(Self {
            signed,
            certificate,
            public_key,
        })
    }

    pub fn signed(&self) -> &SignedDrmCertificate {
        &self.signed
    }

    pub fn certificate(&self) -> &DrmCertificate {
        &self.certificate
    }

    pub fn provider_id(&self) -> Option<&str> {
        self.certificate.provider_id.as_deref()
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Encrypt a client identity for this certificate's owner.
    ///
    /// The identity is padded and encrypted with AES-128-CBC under a fresh
    /// key, and that key is wrapped with RSA-OAEP (SHA-1).
    pub fn encrypt_client_id(&self, client_id: &ClientIdentification) -> Result<EncryptedClientIdentification> {
        let mut privacy_key = [0u8; 16];
        let mut privacy_iv = [0u8; 16];
        OsRng.fill_bytes(&mut privacy_key);
        OsRng.fill_bytes(&mut privacy_iv);

        let padded = pkcs7_pad(&client_id.encode_to_vec(), BLOCK_SIZE);
        let encrypted_client_id = aes_cbc_encrypt_aligned(&privacy_key, &privacy_iv, &padded)?;
        let encrypted_privacy_key = self
            .public_key
            .encrypt(&mut OsRng, Oaep::new::<Sha1>(), &privacy_key)?;

        Ok(EncryptedClientIdentification {
            provider_id: self.certificate.provider_id.clone(),
            service_certificate_serial_number: self.certificate.serial_number.clone(),
            encrypted_client_id: Some(encrypted_client_id),
            encrypted_client_id_iv: Some(privacy_iv.to_vec()),
            encrypted_privacy_key: Some(encrypted_privacy_key),
        })
    }
}

/// Everything a verified license produced, committed in one step.
struct LicenseMaterial {
    session_key: [u8; 16],
    derived_keys: DerivedKeys,
    content_keys: Vec<ContentKey>,
}

/// A license handshake bound to one device and one piece of init data.
pub struct Session {
    id: Vec<u8>,
    device: Arc<dyn Device>,
    init_data: InitData,
    offline: bool,
    service_certificate: Option<ServiceCertificate>,
    license_request: Option<Vec<u8>>,
    challenge: Option<Vec<u8>>,
    session_key: Option<[u8; 16]>,
    derived_keys: Option<DerivedKeys>,
    content_keys: Vec<ContentKey>,
    state: SessionState,
}

impl Session {
    /// Create a session. The id comes from the device.
    pub fn new(device: Arc<dyn Device>, init_data: InitData, offline: bool) -> Self {
        let id = device.generate_session_id();
        debug!(
            "created session {} on {:?} device",
            hex::encode(&id),
            device.device_type()
        );
        Self {
            id,
            device,
            init_data,
            offline,
            service_certificate: None,
            license_request: None,
            challenge: None,
            session_key: None,
            derived_keys: None,
            content_keys: Vec::new(),
            state: SessionState::Created,
        }
    }

    /// Try to enable privacy mode with a service certificate.
    ///
    /// Returns false and leaves the session unchanged when the bytes do not
    /// parse. Only requests built afterwards are affected.
    pub fn try_set_service_certificate(&mut self, data: &[u8]) -> bool {
        match ServiceCertificate::from_bytes(data) {
            Ok(certificate) => {
                debug!(
                    "privacy mode on, provider {:?}, certificate serial {}, {} byte signature",
                    certificate.provider_id().unwrap_or_default(),
                    hex::encode(certificate.certificate().serial_number.as_deref().unwrap_or_default()),
                    certificate.signed().signature.as_ref().map_or(0, Vec::len)
                );
                self.service_certificate = Some(certificate);
                true
            }
            Err(e) => {
                debug!("ignoring service certificate: {}", e);
                false
            }
        }
    }

    /// The signed license request, serialized.
    ///
    /// Built on first call; later calls return the same bytes.
    pub fn license_request(&mut self) -> Result<Vec<u8>> {
        if let Some(challenge) = &self.challenge {
            return Ok(challenge.clone());
        }

        let (client_id, encrypted_client_id) = match &self.service_certificate {
            Some(certificate) => (None, Some(certificate.encrypt_client_id(self.device.client_id())?)),
            None => (Some(self.device.client_id().clone()), None),
        };

        let license_type = if self.offline {
            LicenseType::Offline
        } else {
            LicenseType::Streaming
        };

        let request_time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        let request = LicenseRequest {
            client_id,
            content_id: Some(ContentIdentification {
                content_id_variant: Some(ContentIdVariant::WidevinePsshData(ContentIdPsshData {
                    pssh_data: vec![self.init_data.to_bytes()],
                    license_type: Some(license_type as i32),
                    request_id: Some(self.id.clone()),
                })),
            }),
            r#type: Some(RequestType::New as i32),
            request_time: Some(request_time),
            key_control_nonce_deprecated: None,
            protocol_version: Some(ProtocolVersion::Version21 as i32),
            key_control_nonce: Some(KEY_CONTROL_NONCE),
            encrypted_client_id,
        };

        let request_bytes = request.encode_to_vec();
        let signature = self.device.sign(&request_bytes)?;

        let challenge = SignedMessage {
            r#type: Some(MessageType::LicenseRequest as i32),
            msg: Some(request_bytes.clone()),
            signature: Some(signature),
            session_key: None,
            oemcrypto_core_message: None,
        }
        .encode_to_vec();

        info!(
            "built {:?} license request for session {} (privacy mode: {})",
            license_type,
            hex::encode(&self.id),
            self.privacy_mode()
        );

        self.license_request = Some(request_bytes);
        self.challenge = Some(challenge.clone());
        self.state = SessionState::ChallengeIssued;
        Ok(challenge)
    }

    /// Verify a license response and load its keys.
    ///
    /// A no-op once licensed. Any failure after the request check leaves the
    /// session [`SessionState::Failed`] with no keys.
    pub fn provide_license(&mut self, license: &[u8]) -> Result<()> {
        match self.state {
            SessionState::Licensed => {
                debug!("session {} already licensed, ignoring response", hex::encode(&self.id));
                return Ok(());
            }
            SessionState::Failed => {
                return Err(Error::ProtocolState(
                    "Session failed, create a new session to retry".to_string(),
                ));
            }
            SessionState::Created | SessionState::ChallengeIssued => {}
        }

        let request = self
            .license_request
            .clone()
            .ok_or_else(|| Error::ProtocolState("Generate a license request first".to_string()))?;

        match self.process_license(&request, license) {
            Ok(material) => {
                info!(
                    "license accepted for session {}: {} keys",
                    hex::encode(&self.id),
                    material.content_keys.len()
                );
                self.session_key = Some(material.session_key);
                self.derived_keys = Some(material.derived_keys);
                self.content_keys = material.content_keys;
                self.state = SessionState::Licensed;
                Ok(())
            }
            Err(e) => {
                warn!("license rejected for session {}: {}", hex::encode(&self.id), e);
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    fn process_license(&self, request: &[u8], response: &[u8]) -> Result<LicenseMaterial> {
        let signed = SignedMessage::decode(response)
            .map_err(|e| Error::Parse(format!("Failed to parse SignedMessage: {}", e)))?;

        if let Some(message_type) = signed.r#type.filter(|&t| t != MessageType::License as i32) {
            return Err(Error::Parse(format!(
                "Expected a LICENSE message, got type {}",
                message_type
            )));
        }

        let msg = signed
            .msg
            .as_ref()
            .ok_or_else(|| Error::Parse("License response has no message".to_string()))?;
        let encrypted_session_key = signed
            .session_key
            .as_ref()
            .ok_or_else(|| Error::Parse("License response has no session key".to_string()))?;
        let signature = signed
            .signature
            .as_ref()
            .ok_or_else(|| Error::Parse("License response has no signature".to_string()))?;

        let session_key = self
            .device
            .decrypt(encrypted_session_key)
            .map_err(|e| Error::Decryption(format!("Unable to decrypt session key: {}", e)))?;
        let session_key: [u8; 16] = session_key.as_slice().try_into().map_err(|_| {
            Error::Decryption(format!(
                "Session key is {} bytes, expected 16",
                session_key.len()
            ))
        })?;

        let derived_keys = derive_keys(request, &session_key);

        let core_message = signed.oemcrypto_core_message.as_deref().unwrap_or_default();
        if !hmac_sha256_verify(&derived_keys.auth_1, &[core_message, msg.as_slice()], signature)? {
            return Err(Error::SignatureMismatch(
                "License signature mismatch".to_string(),
            ));
        }

        let license = License::decode(msg.as_slice())
            .map_err(|e| Error::Parse(format!("Failed to parse License: {}", e)))?;

        let content_keys = license
            .key
            .iter()
            .filter(|container| KeyType::from(container.r#type.unwrap_or_default()) != KeyType::Signing)
            .map(|container| ContentKey::from_key_container(container, &derived_keys.enc))
            .collect::<Result<Vec<_>>>()?;

        Ok(LicenseMaterial {
            session_key,
            derived_keys,
            content_keys,
        })
    }

    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn init_data(&self) -> &InitData {
        &self.init_data
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    pub fn privacy_mode(&self) -> bool {
        self.service_certificate.is_some()
    }

    pub fn service_certificate(&self) -> Option<&ServiceCertificate> {
        self.service_certificate.as_ref()
    }

    /// Serialized license request, once built.
    pub fn license_request_bytes(&self) -> Option<&[u8]> {
        self.license_request.as_deref()
    }

    pub fn session_key(&self) -> Option<&[u8; 16]> {
        self.session_key.as_ref()
    }

    pub fn derived_keys(&self) -> Option<&DerivedKeys> {
        self.derived_keys.as_ref()
    }

    /// Keys from the license, empty until licensed. Signing keys are left out.
    pub fn content_keys(&self) -> &[ContentKey] {
        &self.content_keys
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &hex::encode(&self.id))
            .field("device_type", &self.device.device_type())
            .field("offline", &self.offline)
            .field("privacy_mode", &self.privacy_mode())
            .field("state", &self.state)
            .field("content_keys", &self.content_keys.len())
            .finish_non_exhaustive()
    }
}
