//! Turns raw flow bytes into the request body the conversion API expects.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::io::Write;

const JSON_CONTENT_TYPE: &str = "application/json";
const BINARY_CONTENT_TYPE: &str = "application/octet-stream";
const GZIP_ENCODING: &str = "gzip";

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("gzip compression failed")]
    Compression(#[source] std::io::Error),

    #[error("could not serialize payload")]
    Json(#[from] serde_json::Error),
}

/// Body layout expected by the deployed conversion API.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PayloadForm {
    /// `{"payload":"<base64>","encoding":"base64"}`
    #[default]
    Json,
    /// Bytes are already gzipped and are sent untouched.
    Raw,
    /// Bytes are gzipped before sending.
    Gzip,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EncodedPayload {
    pub body: Bytes,
    pub content_type: &'static str,
    pub content_encoding: Option<&'static str>,
}

#[derive(Serialize)]
struct JsonWrap<'a> {
    payload: &'a str,
    encoding: &'static str,
}

pub fn encode(form: PayloadForm, input: &[u8]) -> Result<EncodedPayload, CodecError> {
    match form {
        PayloadForm::Json => Ok(EncodedPayload {
            body: wrap_json(input)?.into(),
            content_type: JSON_CONTENT_TYPE,
            content_encoding: None,
        }),
        PayloadForm::Raw => Ok(EncodedPayload {
            body: Bytes::copy_from_slice(input),
            content_type: BINARY_CONTENT_TYPE,
            content_encoding: Some(GZIP_ENCODING),
        }),
        PayloadForm::Gzip => Ok(EncodedPayload {
            body: gzip(input)?.into(),
            content_type: BINARY_CONTENT_TYPE,
            content_encoding: Some(GZIP_ENCODING),
        }),
    }
}

fn wrap_json(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let payload = STANDARD.encode(input);
    let wrapped = JsonWrap {
        payload: &payload,
        encoding: "base64",
    };
    Ok(serde_json::to_vec(&wrapped)?)
}

fn gzip(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(input).map_err(CodecError::Compression)?;
    encoder.finish().map_err(CodecError::Compression)
}
