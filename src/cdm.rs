//! Per-asset CDM facade.
//!
//! [`Cdm`] takes base64 in and hands base64 out, and creates its [`Session`]
//! lazily on first use. One facade serves one asset.
use std::cell::OnceCell;
use std::sync::Arc;

use base64::Engine;

use crate::device::Device;
use crate::error::{Error, Result};
use crate::key::ContentKey;
use crate::pssh::{normalize, parse_header};
use crate::session::{InitData, Session};

/// How the facade sets up its session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Base64 service certificate. Turns on privacy mode when it parses.
    pub service_certificate: Option<String>,
    /// Request an offline license.
    pub offline: bool,
    /// Forward init data as-is instead of parsing the header.
    pub raw: bool,
}

/// License acquisition for one asset.
pub struct Cdm {
    device: Arc<dyn Device>,
    init_data: String,
    options: SessionOptions,
    session: OnceCell<Session>,
}

impl Cdm {
    pub fn new(device: Arc<dyn Device>, init_data_b64: impl Into<String>, options: SessionOptions) -> Self {
        Self {
            device,
            init_data: init_data_b64.into(),
            options,
            session: OnceCell::new(),
        }
    }

    /// Wrap a session that was built explicitly.
    pub fn with_session(session: Session) -> Self {
        let options = SessionOptions {
            service_certificate: None,
            offline: session.is_offline(),
            raw: matches!(session.init_data(), InitData::Raw(_)),
        };
        Self {
            device: Arc::clone(session.device()),
            init_data: String::new(),
            options,
            session: OnceCell::from(session),
        }
    }

    /// Base64 signed license request.
    pub fn get_challenge(&mut self) -> Result<String> {
        let challenge = self.session_mut()?.license_request()?;
        Ok(base64::engine::general_purpose::STANDARD.encode(challenge))
    }

    /// Verify a base64 license response and load its keys.
    pub fn provide_license(&mut self, license_b64: &str) -> Result<()> {
        let license = base64::engine::general_purpose::STANDARD.decode(license_b64.trim())?;
        self.session_mut()?.provide_license(&license)
    }

    /// Keys from the license. Empty before a license was accepted.
    pub fn get_keys(&self) -> Vec<ContentKey> {
        self.session
            .get()
            .map(|session| session.content_keys().to_vec())
            .unwrap_or_default()
    }

    /// The session, if it was created.
    pub fn session(&self) -> Option<&Session> {
        self.session.get()
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        if self.session.get().is_none() {
            let session = self.create_session()?;
            // Empty checked above.
            let _ = self.session.set(session);
        }
        self.session
            .get_mut()
            .ok_or_else(|| Error::ProtocolState("Session was not created".to_string()))
    }

    fn create_session(&self) -> Result<Session> {
        let data = normalize(&self.init_data)?;
        let init_data = if self.options.raw {
            InitData::Raw(data)
        } else {
            InitData::Parsed(parse_header(&data)?)
        };

        let mut session = Session::new(Arc::clone(&self.device), init_data, self.options.offline);

        if let Some(certificate_b64) = &self.options.service_certificate {
            match base64::engine::general_purpose::STANDARD.decode(certificate_b64.trim()) {
                Ok(certificate) => {
                    if !session.try_set_service_certificate(&certificate) {
                        warn!("service certificate did not parse, privacy mode stays off");
                    }
                }
                Err(e) => {
                    warn!("service certificate is not valid base64: {}", e);
                }
            }
        }

        Ok(session)
    }
}
