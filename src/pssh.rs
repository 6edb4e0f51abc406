//! Init data handling.
//!
//! Manifests hand over init data as base64 that is either a complete ISO
//! `pssh` box or a bare Widevine header. [`normalize`] repairs the latter into
//! a version 0 box and [`parse_header`] recovers the structured header from
//! whatever shape the bytes end up in.
use std::io::{Cursor, Read};

use base64::Engine;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use prost::Message;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::license_protocol::WidevinePsshData;

/// Widevine DRM system id.
pub const WIDEVINE_SYSTEM_ID: Uuid = Uuid::from_u128(0xedef8ba979d64acea3c827dcd51d21ed);

/// Size of a version 0 box header: size, tag, version/flags, system id and
/// data length.
pub const BOX_HEADER_LEN: usize = 32;

/// Buffers shorter than this are never treated as boxes.
const MIN_BOX_LEN: usize = 30;

/// Offset of the system id inside a box.
const SYSTEM_ID_RANGE: std::ops::Range<usize> = 12..28;

/// Decode base64 init data and repair it into a Widevine `pssh` box.
///
/// Surrounding whitespace is trimmed and missing `=` padding is restored.
/// Decoded buffers under 30 bytes are returned unchanged; longer buffers that
/// do not carry the Widevine system id at offset 12 are wrapped with
/// [`wrap_in_box`].
pub fn normalize(init_data_b64: &str) -> Result<Vec<u8>> {
    let mut padded = init_data_b64.trim().to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }

    let data = base64::engine::general_purpose::STANDARD.decode(padded)?;
    if data.len() < MIN_BOX_LEN {
        return Ok(data);
    }

    if data[SYSTEM_ID_RANGE] == *WIDEVINE_SYSTEM_ID.as_bytes() {
        return Ok(data);
    }

    trace!("init data lacks a Widevine box header, wrapping {} bytes", data.len());
    Ok(wrap_in_box(&data))
}

/// Frame `payload` as a version 0 Widevine `pssh` box.
#[must_use]
pub fn wrap_in_box(payload: &[u8]) -> Vec<u8> {
    PsshBox {
        version: 0,
        flags: 0,
        system_id: WIDEVINE_SYSTEM_ID,
        key_ids: Vec::new(),
        data: payload.to_vec(),
    }
    .to_bytes()
}

/// Recover the structured Widevine header from init data.
///
/// Tries, in order: the bytes after a 32 byte box header, the whole buffer,
/// and the data field of a fully parsed box.
pub fn parse_header(data: &[u8]) -> Result<WidevinePsshData> {
    if let Some(payload) = data.get(BOX_HEADER_LEN..) {
        match WidevinePsshData::decode(payload) {
            Ok(header) => return Ok(header),
            Err(e) => {
                trace!("header after box prefix did not decode: {}", e);
            }
        }
    }

    match WidevinePsshData::decode(data) {
        Ok(header) => return Ok(header),
        Err(e) => {
            trace!("buffer is not a bare header: {}", e);
        }
    }

    match PsshBox::from_bytes(data).and_then(|pssh| decode_box_data(&pssh)) {
        Ok(header) => return Ok(header),
        Err(e) => {
            trace!("box data did not decode, retrying with a key id table: {}", e);
        }
    }

    // Some providers write a key id table into version 0 boxes.
    let pssh = PsshBox::from_bytes_with_key_ids(data)
        .map_err(|e| Error::Parse(format!("Init data is not a Widevine header or box: {}", e)))?;
    decode_box_data(&pssh)
}

fn decode_box_data(pssh: &PsshBox) -> Result<WidevinePsshData> {
    WidevinePsshData::decode(pssh.data.as_slice())
        .map_err(|e| Error::Parse(format!("Failed to parse WidevinePsshData: {}", e)))
}

/// An ISO common encryption `pssh` box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsshBox {
    pub version: u8,
    /// 24-bit flags.
    pub flags: u32,
    pub system_id: Uuid,
    pub key_ids: Vec<Uuid>,
    /// Opaque system specific payload.
    pub data: Vec<u8>,
}

impl PsshBox {
    /// Read a complete box.
    ///
    /// Version 1 boxes carry a key id table; its count is bounded by the bytes
    /// that remain.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::read(data, false)
    }

    /// Read a complete box that has a key id table whatever its version.
    pub fn from_bytes_with_key_ids(data: &[u8]) -> Result<Self> {
        Self::read(data, true)
    }

    fn read(data: &[u8], always_key_ids: bool) -> Result<Self> {
        let mut reader = Cursor::new(data);

        let size = reader.read_u32::<BigEndian>().map_err(truncated("box size"))?;
        let mut tag = [0u8; 4];
        reader.read_exact(&mut tag).map_err(truncated("box type"))?;
        if &tag != b"pssh" {
            return Err(Error::Parse(format!(
                "Expected a pssh box, found {:?}",
                String::from_utf8_lossy(&tag)
            )));
        }
        if size == 1 {
            reader.read_u64::<BigEndian>().map_err(truncated("large box size"))?;
        }

        let version_and_flags = reader.read_u32::<BigEndian>().map_err(truncated("version"))?;
        let version = (version_and_flags >> 24) as u8;
        let flags = version_and_flags & 0x00FF_FFFF;

        let mut system_id = [0u8; 16];
        reader.read_exact(&mut system_id).map_err(truncated("system id"))?;

        let mut key_ids = Vec::new();
        if always_key_ids || version > 0 {
            let kid_count = reader.read_u32::<BigEndian>().map_err(truncated("key id count"))? as usize;
            let remaining = data.len().saturating_sub(reader.position() as usize);
            if kid_count > remaining / 16 {
                return Err(Error::Parse(format!(
                    "Key id count {} exceeds the {} bytes left in the box",
                    kid_count, remaining
                )));
            }

            key_ids.reserve_exact(kid_count);
            for _ in 0..kid_count {
                let mut kid = [0u8; 16];
                reader.read_exact(&mut kid).map_err(truncated("key id"))?;
                key_ids.push(Uuid::from_bytes(kid));
            }
        }

        let data_len = reader.read_u32::<BigEndian>().map_err(truncated("data length"))? as usize;
        let start = reader.position() as usize;
        let payload = data
            .get(start..start.saturating_add(data_len))
            .ok_or_else(|| {
                Error::Parse(format!(
                    "Box data length {} exceeds the {} bytes left",
                    data_len,
                    data.len() - start
                ))
            })?;

        Ok(Self {
            version,
            flags,
            system_id: Uuid::from_bytes(system_id),
            key_ids,
            data: payload.to_vec(),
        })
    }

    /// Serialize the box. Version 0 boxes omit the key id table.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(24 + self.key_ids.len() * 16 + self.data.len());
        // Writes into a Vec never fail.
        let _ = body.write_u32::<BigEndian>((u32::from(self.version) << 24) | (self.flags & 0x00FF_FFFF));
        body.extend_from_slice(self.system_id.as_bytes());
        if self.version > 0 {
            let _ = body.write_u32::<BigEndian>(self.key_ids.len() as u32);
            for kid in &self.key_ids {
                body.extend_from_slice(kid.as_bytes());
            }
        }
        let _ = body.write_u32::<BigEndian>(self.data.len() as u32);
        body.extend_from_slice(&self.data);

        let mut out = Vec::with_capacity(body.len() + 8);
        let _ = out.write_u32::<BigEndian>((body.len() + 8) as u32);
        out.extend_from_slice(b"pssh");
        out.extend_from_slice(&body);
        out
    }
}

fn truncated(field: &'static str) -> impl Fn(std::io::Error) -> Error {
    move |_| Error::Parse(format!("Box truncated while reading {}", field))
}
