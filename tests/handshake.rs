mod common;

use std::sync::Arc;

use prost::Message;

use common::*;
use wvcdm::license_protocol::license_request::content_identification::ContentIdVariant;
use wvcdm::license_protocol::{LicenseRequest, SignedMessage};
use wvcdm::pssh::normalize;
use wvcdm::session::{InitData, Session};
use wvcdm::{Cdm, DeviceType, Error, KeyType, SessionOptions, SessionState};

fn key_strings(cdm: &Cdm) -> Vec<String> {
    cdm.get_keys().iter().map(ToString::to_string).collect()
}

fn pssh_of(request: &LicenseRequest) -> (Vec<Vec<u8>>, Option<i32>, Option<Vec<u8>>) {
    match request.content_id.clone().and_then(|c| c.content_id_variant) {
        Some(ContentIdVariant::WidevinePsshData(data)) => {
            (data.pssh_data, data.license_type, data.request_id)
        }
        None => panic!("request carries no pssh data"),
    }
}

#[test]
fn license_yields_expected_keys() {
    let device = device(DeviceType::Chrome);
    let server = LicenseServer::new(&*device);
    let mut cdm = Cdm::new(Arc::clone(&device), init_data_b64(), SessionOptions::default());

    let challenge = unb64(&cdm.get_challenge().expect("challenge"));
    let (_, request) = server.open_request(&challenge);
    assert!(request.client_id.is_some());
    assert!(request.encrypted_client_id.is_none());

    cdm.provide_license(&b64(&server.respond(&challenge)))
        .expect("license");

    assert_eq!(key_strings(&cdm), expected_keys());

    let keys = cdm.get_keys();
    let types: Vec<KeyType> = keys.iter().map(|k| k.key_type).collect();
    assert_eq!(
        types,
        vec![
            KeyType::Content,
            KeyType::Content,
            KeyType::OperatorSession,
            KeyType::KeyControl
        ]
    );
    assert_eq!(keys[2].permissions, vec!["AllowEncrypt", "AllowSign"]);
    assert!(keys[0].permissions.is_empty());

    let session = cdm.session().expect("session");
    assert_eq!(session.state(), SessionState::Licensed);
    assert_eq!(session.session_key(), Some(&SESSION_KEY));
    assert!(session.derived_keys().is_some());
}

#[test]
fn core_message_is_authenticated() {
    let device = device(DeviceType::Android);
    let server = LicenseServer::new(&*device);
    let options = ResponseOptions {
        core_message: Some(b"oemcrypto core message".to_vec()),
        ..Default::default()
    };

    let mut cdm = Cdm::new(Arc::clone(&device), init_data_b64(), SessionOptions::default());
    let challenge = unb64(&cdm.get_challenge().expect("challenge"));
    cdm.provide_license(&b64(&server.respond_with(&challenge, &options)))
        .expect("license with core message");
    assert_eq!(key_strings(&cdm), expected_keys());

    let mut cdm = Cdm::new(Arc::clone(&device), init_data_b64(), SessionOptions::default());
    let challenge = unb64(&cdm.get_challenge().expect("challenge"));
    let mut response =
        SignedMessage::decode(server.respond_with(&challenge, &options).as_slice()).expect("decode");
    response.oemcrypto_core_message = None;
    let err = cdm
        .provide_license(&b64(&response.encode_to_vec()))
        .expect_err("stripped core message");
    assert!(matches!(err, Error::SignatureMismatch(_)));
    assert!(cdm.get_keys().is_empty());
}

#[test]
fn tampered_response_is_rejected() {
    let device = device(DeviceType::Chrome);
    let server = LicenseServer::new(&*device);

    let mut first = Session::new(Arc::clone(&device), InitData::Raw(vec![0x42; 32]), false);
    let response_len = server
        .respond(&first.license_request().expect("challenge"))
        .len();

    for position in 0..response_len {
        let mut session = Session::new(Arc::clone(&device), InitData::Raw(vec![0x42; 32]), false);
        let challenge = session.license_request().expect("challenge");
        let mut response = server.respond(&challenge);
        assert_eq!(response.len(), response_len);
        response[position] ^= 0x01;

        assert!(
            session.provide_license(&response).is_err(),
            "flip at {} was accepted",
            position
        );
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.content_keys().is_empty());
        assert!(session.session_key().is_none());
    }
}

#[test]
fn untyped_license_envelope_is_accepted() {
    let device = device(DeviceType::Chrome);
    let server = LicenseServer::new(&*device);
    let mut cdm = Cdm::new(Arc::clone(&device), init_data_b64(), SessionOptions::default());

    let challenge = unb64(&cdm.get_challenge().expect("challenge"));
    let mut response = SignedMessage::decode(server.respond(&challenge).as_slice()).expect("decode");
    response.r#type = None;

    cdm.provide_license(&b64(&response.encode_to_vec()))
        .expect("license without type");
    assert_eq!(key_strings(&cdm), expected_keys());
}

#[test]
fn second_license_is_ignored() {
    let device = device(DeviceType::Chrome);
    let server = LicenseServer::new(&*device);
    let mut cdm = Cdm::new(Arc::clone(&device), init_data_b64(), SessionOptions::default());

    let challenge = unb64(&cdm.get_challenge().expect("challenge"));
    let response = b64(&server.respond(&challenge));
    cdm.provide_license(&response).expect("license");
    cdm.provide_license(&response).expect("duplicate license");
    cdm.provide_license("Z2FyYmFnZQ==").expect("garbage after licensed");

    assert_eq!(key_strings(&cdm), expected_keys());
    assert_eq!(cdm.session().map(Session::state), Some(SessionState::Licensed));
}

#[test]
fn privacy_mode_hides_client_id() {
    let device = device(DeviceType::Chrome);
    let server = LicenseServer::new(&*device);
    let options = SessionOptions {
        service_certificate: Some(b64(&service_certificate())),
        ..Default::default()
    };
    let mut cdm = Cdm::new(Arc::clone(&device), init_data_b64(), options);

    let challenge = unb64(&cdm.get_challenge().expect("challenge"));
    assert!(cdm.session().expect("session").privacy_mode());

    let (_, request) = server.open_request(&challenge);
    assert!(request.client_id.is_none());
    let encrypted = request.encrypted_client_id.expect("encrypted client id");
    assert_eq!(encrypted.provider_id.as_deref(), Some("license.example.com"));
    assert_eq!(
        encrypted.service_certificate_serial_number.as_deref(),
        Some(&b"service-serial"[..])
    );
    assert_eq!(server.decrypt_client_id(&encrypted), client_id().encode_to_vec());

    cdm.provide_license(&b64(&server.respond(&challenge)))
        .expect("license");
    assert_eq!(key_strings(&cdm), expected_keys());
}

#[test]
fn android_request_id_format() {
    let device = device(DeviceType::Android);
    let server = LicenseServer::new(&*device);
    let mut cdm = Cdm::new(Arc::clone(&device), init_data_b64(), SessionOptions::default());

    let challenge = unb64(&cdm.get_challenge().expect("challenge"));
    let (_, request) = server.open_request(&challenge);
    let (_, _, request_id) = pssh_of(&request);
    let request_id = String::from_utf8(request_id.expect("request id")).expect("ascii");

    assert_eq!(request_id.len(), 32);
    assert!(request_id[..16]
        .chars()
        .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    assert_eq!(&request_id[16..], "0100000000000000");
    assert_eq!(request_id.as_bytes(), cdm.session().expect("session").id());
}

#[test]
fn offline_raw_request() {
    let device = device(DeviceType::Chrome);
    let server = LicenseServer::new(&*device);
    let options = SessionOptions {
        offline: true,
        raw: true,
        ..Default::default()
    };
    let mut cdm = Cdm::new(Arc::clone(&device), init_data_b64(), options);

    let challenge = unb64(&cdm.get_challenge().expect("challenge"));
    let (_, request) = server.open_request(&challenge);
    let (pssh_data, license_type, _) = pssh_of(&request);

    assert_eq!(pssh_data, vec![normalize(&init_data_b64()).expect("normalize")]);
    assert_eq!(license_type, Some(2));

    cdm.provide_license(&b64(&server.respond(&challenge)))
        .expect("license");
    assert_eq!(key_strings(&cdm), expected_keys());
}

#[test]
fn license_before_challenge_keeps_state() {
    let device = device(DeviceType::Chrome);
    let server = LicenseServer::new(&*device);

    let mut other = Session::new(Arc::clone(&device), InitData::Raw(vec![1; 32]), false);
    let response = server.respond(&other.license_request().expect("challenge"));

    let mut session = Session::new(Arc::clone(&device), InitData::Raw(vec![1; 32]), false);
    let err = session.provide_license(&response).expect_err("no request yet");
    assert!(matches!(err, Error::ProtocolState(_)));
    assert_eq!(session.state(), SessionState::Created);
}

#[test]
fn failed_session_rejects_valid_license() {
    let device = device(DeviceType::Chrome);
    let server = LicenseServer::new(&*device);
    let mut session = Session::new(Arc::clone(&device), InitData::Raw(vec![2; 32]), false);

    let challenge = session.license_request().expect("challenge");
    assert!(session.provide_license(b"not a license").is_err());
    assert_eq!(session.state(), SessionState::Failed);

    let err = session
        .provide_license(&server.respond(&challenge))
        .expect_err("failed session");
    assert!(matches!(err, Error::ProtocolState(_)));
    assert!(session.content_keys().is_empty());
}

#[test]
fn short_session_key_is_decryption_error() {
    let device = device(DeviceType::Chrome);
    let server = LicenseServer::new(&*device);
    let mut session = Session::new(Arc::clone(&device), InitData::Raw(vec![3; 32]), false);

    let challenge = session.license_request().expect("challenge");
    let options = ResponseOptions {
        session_key: Some(SESSION_KEY[..15].to_vec()),
        ..Default::default()
    };
    let err = session
        .provide_license(&server.respond_with(&challenge, &options))
        .expect_err("short session key");
    assert!(matches!(err, Error::Decryption(_)));
    assert_eq!(session.state(), SessionState::Failed);
}

#[test]
fn response_for_other_request_is_rejected() {
    let device = device(DeviceType::Chrome);
    let server = LicenseServer::new(&*device);

    let mut first = Session::new(Arc::clone(&device), InitData::Raw(vec![4; 32]), false);
    let mut second = Session::new(Arc::clone(&device), InitData::Raw(vec![4; 32]), false);
    first.license_request().expect("challenge");
    let challenge = second.license_request().expect("challenge");

    let err = first
        .provide_license(&server.respond(&challenge))
        .expect_err("mismatched request");
    assert!(matches!(err, Error::SignatureMismatch(_)));
    assert!(first.content_keys().is_empty());

    second
        .provide_license(&server.respond(&challenge))
        .expect("matching request");
    assert_eq!(second.content_keys().len(), 4);
}

#[test]
fn pkcs8_device_completes_handshake() {
    let device = wvcdm::device::load(
        DeviceType::Chrome,
        &client_id().encode_to_vec(),
        DEVICE_PKCS8_PEM,
        None,
    )
    .expect("pkcs8 device");
    let server = LicenseServer::new(&*device);
    let mut cdm = Cdm::new(Arc::clone(&device), init_data_b64(), SessionOptions::default());

    let challenge = unb64(&cdm.get_challenge().expect("challenge"));
    cdm.provide_license(&b64(&server.respond(&challenge)))
        .expect("license");
    assert_eq!(key_strings(&cdm), expected_keys());
}
