//! Shared fixtures: fixed device and service keys plus a stub license server
//! that answers challenges the way a real one would.
#![allow(dead_code)]

use std::sync::Arc;

use base64::Engine;
use prost::Message;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::rand_core::OsRng;
use rsa::{Oaep, Pss, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};

use wvcdm::crypto::{aes_cbc_decrypt, aes_cbc_encrypt_aligned, hmac_sha256, pkcs7_pad, BLOCK_SIZE};
use wvcdm::device::{self, Device, DeviceType};
use wvcdm::kdf::derive_keys;
use wvcdm::license_protocol::client_identification::NameValue;
use wvcdm::license_protocol::license::key_container::OperatorSessionKeyPermissions;
use wvcdm::license_protocol::license::KeyContainer;
use wvcdm::license_protocol::license_request::content_identification::ContentIdVariant;
use wvcdm::license_protocol::signed_message::MessageType;
use wvcdm::license_protocol::{
    ClientIdentification, DrmCertificate, EncryptedClientIdentification, License,
    LicenseIdentification, LicenseRequest, SignedDrmCertificate, SignedMessage, WidevinePsshData,
};

pub const DEVICE_PEM: &str = include_str!("../data/device_pkcs1.pem");
pub const DEVICE_PKCS8_PEM: &str = include_str!("../data/device_pkcs8.pem");
pub const SERVICE_PEM: &str = include_str!("../data/service_pkcs1.pem");

pub const SYSTEM_ID: u32 = 4464;
pub const SESSION_KEY: [u8; 16] = *b"stub-session-key";
pub const KEY_IV: [u8; 16] = *b"fixed-key-iv-16b";

pub const CONTENT_KID_1: &str = "00000000000000000000000000000001";
pub const CONTENT_KEY_1: &str = "0102030405060708090a0b0c0d0e0f10";
pub const CONTENT_KID_2: &str = "abcdefabcdefabcdefabcdefabcdefab";
pub const CONTENT_KEY_2: &str = "ffeeddccbbaa99887766554433221100";
pub const OPERATOR_KID: &str = "6f70657261746f72";
pub const OPERATOR_KEY: &str = "11111111111111112222222222222222";
pub const KEY_CONTROL_KEY: &str = "33333333333333334444444444444444";

pub fn b64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

pub fn unb64(data: &str) -> Vec<u8> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .expect("valid base64")
}

pub fn client_id() -> ClientIdentification {
    let certificate = DrmCertificate {
        system_id: Some(SYSTEM_ID),
        serial_number: Some(b"device-serial".to_vec()),
        ..Default::default()
    };
    let token = SignedDrmCertificate {
        drm_certificate: Some(certificate.encode_to_vec()),
        signature: Some(vec![0xEE; 32]),
        signer: None,
    };
    ClientIdentification {
        r#type: Some(1),
        token: Some(token.encode_to_vec()),
        client_info: vec![NameValue {
            name: Some("company_name".to_string()),
            value: Some("example".to_string()),
        }],
        ..Default::default()
    }
}

pub fn device(device_type: DeviceType) -> Arc<dyn Device> {
    device::load(device_type, &client_id().encode_to_vec(), DEVICE_PEM, None).expect("device")
}

/// Base64 init data carrying two key ids, as a bare header.
pub fn init_data_b64() -> String {
    let header = WidevinePsshData {
        key_ids: vec![
            hex::decode(CONTENT_KID_1).expect("hex"),
            hex::decode(CONTENT_KID_2).expect("hex"),
        ],
        provider: Some("example".to_string()),
        content_id: Some(b"asset-1".to_vec()),
        ..Default::default()
    };
    b64(&header.encode_to_vec())
}

fn service_key() -> RsaPrivateKey {
    RsaPrivateKey::from_pkcs1_pem(SERVICE_PEM).expect("service key")
}

/// A bare signed service certificate for the stub server.
pub fn service_certificate() -> Vec<u8> {
    let public_key = service_key()
        .to_public_key()
        .to_pkcs1_der()
        .expect("der")
        .as_bytes()
        .to_vec();
    let certificate = DrmCertificate {
        r#type: Some(3),
        serial_number: Some(b"service-serial".to_vec()),
        public_key: Some(public_key),
        provider_id: Some("license.example.com".to_string()),
        ..Default::default()
    };
    SignedDrmCertificate {
        drm_certificate: Some(certificate.encode_to_vec()),
        signature: Some(vec![0xAB; 32]),
        signer: None,
    }
    .encode_to_vec()
}

/// What the stub puts in a license on top of the defaults.
#[derive(Debug, Clone, Default)]
pub struct ResponseOptions {
    pub core_message: Option<Vec<u8>>,
    /// Overrides the session key handed to the client.
    pub session_key: Option<Vec<u8>>,
}

/// Answers license challenges with a fixed session key and key set.
pub struct LicenseServer {
    device_key: RsaPublicKey,
    service_key: RsaPrivateKey,
}

impl LicenseServer {
    pub fn new(device: &dyn Device) -> Self {
        Self {
            device_key: device.credentials().public_key().clone(),
            service_key: service_key(),
        }
    }

    /// Check the request signature and decode the request.
    pub fn open_request(&self, challenge: &[u8]) -> (Vec<u8>, LicenseRequest) {
        let signed = SignedMessage::decode(challenge).expect("signed message");
        assert_eq!(signed.r#type, Some(MessageType::LicenseRequest as i32));
        let msg = signed.msg.expect("msg");
        let signature = signed.signature.expect("signature");
        self.device_key
            .verify(Pss::new::<Sha1>(), &Sha1::digest(&msg), &signature)
            .expect("request signature");
        let request = LicenseRequest::decode(msg.as_slice()).expect("license request");
        (msg, request)
    }

    /// Recover the client identity from a privacy mode request.
    pub fn decrypt_client_id(&self, encrypted: &EncryptedClientIdentification) -> Vec<u8> {
        let privacy_key = self
            .service_key
            .decrypt(
                Oaep::new::<Sha1>(),
                encrypted.encrypted_privacy_key.as_ref().expect("wrapped key"),
            )
            .expect("unwrap privacy key");
        let privacy_key: [u8; 16] = privacy_key.as_slice().try_into().expect("16 byte key");
        aes_cbc_decrypt(
            &privacy_key,
            encrypted.encrypted_client_id_iv.as_ref().expect("iv"),
            encrypted.encrypted_client_id.as_ref().expect("ciphertext"),
        )
        .expect("decrypt client id")
    }

    pub fn respond(&self, challenge: &[u8]) -> Vec<u8> {
        self.respond_with(challenge, &ResponseOptions::default())
    }

    pub fn respond_with(&self, challenge: &[u8], options: &ResponseOptions) -> Vec<u8> {
        let (request_bytes, request) = self.open_request(challenge);
        let request_id = match request.content_id.and_then(|c| c.content_id_variant) {
            Some(ContentIdVariant::WidevinePsshData(data)) => data.request_id,
            None => None,
        };

        let keys = derive_keys(&request_bytes, &SESSION_KEY);
        let container = |key_type: i32, id: Option<&str>, key: &[u8]| KeyContainer {
            id: id.map(|id| hex::decode(id).expect("hex")),
            iv: Some(KEY_IV.to_vec()),
            key: Some(
                aes_cbc_encrypt_aligned(&keys.enc, &KEY_IV, &pkcs7_pad(key, BLOCK_SIZE))
                    .expect("encrypt key"),
            ),
            r#type: Some(key_type),
            ..Default::default()
        };

        let mut operator = container(4, Some(OPERATOR_KID), &hex::decode(OPERATOR_KEY).expect("hex"));
        operator.operator_session_key_permissions = Some(OperatorSessionKeyPermissions {
            allow_encrypt: Some(1),
            allow_decrypt: Some(0),
            allow_sign: Some(1),
            allow_signature_verify: Some(0),
        });

        let license = License {
            id: Some(LicenseIdentification {
                request_id,
                ..Default::default()
            }),
            key: vec![
                container(1, Some("5349474e"), &[0x5A; 64]),
                container(2, Some(CONTENT_KID_1), &hex::decode(CONTENT_KEY_1).expect("hex")),
                container(2, Some(CONTENT_KID_2), &hex::decode(CONTENT_KEY_2).expect("hex")),
                operator,
                container(3, None, &hex::decode(KEY_CONTROL_KEY).expect("hex")),
            ],
            license_start_time: Some(1_700_000_000),
        };
        let msg = license.encode_to_vec();

        let core = options.core_message.clone().unwrap_or_default();
        let signature = hmac_sha256(&keys.auth_1, &[core.as_slice(), msg.as_slice()]).expect("hmac");

        let session_key = options.session_key.clone().unwrap_or_else(|| SESSION_KEY.to_vec());
        let encrypted_session_key = self
            .device_key
            .encrypt(&mut OsRng, Oaep::new::<Sha1>(), &session_key)
            .expect("wrap session key");

        SignedMessage {
            r#type: Some(MessageType::License as i32),
            msg: Some(msg),
            signature: Some(signature.to_vec()),
            session_key: Some(encrypted_session_key),
            oemcrypto_core_message: options.core_message.clone(),
        }
        .encode_to_vec()
    }
}

/// The keys a client should end up with, in license order.
pub fn expected_keys() -> Vec<String> {
    vec![
        format!("{}:{}", CONTENT_KID_1, CONTENT_KEY_1),
        format!("{}:{}", CONTENT_KID_2, CONTENT_KEY_2),
        format!("{}:{}", OPERATOR_KID, OPERATOR_KEY),
        format!("{}:{}", hex::encode("KeyControl"), KEY_CONTROL_KEY),
    ]
}
