//! The CoAP codec seam.
//!
//! The binary CoAP layout is owned by an external codec. The transport only
//! needs two operations from it: turn a [`CoapRequest`] into bytes, and turn
//! the bytes read back from the device into a response value.
//!
//! # Implementing a codec
//!
//! ```rust
//! use mupcoap_core::{CoapCodec, CoapRequest, CodecError};
//!
//! /// Sends the path as text and hands back the raw response bytes.
//! #[derive(Clone)]
//! struct TextCodec;
//!
//! impl CoapCodec for TextCodec {
//!     type Response = Vec<u8>;
//!
//!     fn encode(&self, request: &CoapRequest<'_>) -> Vec<u8> {
//!         format!("{} {}", request.method, request.path).into_bytes()
//!     }
//!
//!     fn decode(&self, bytes: &[u8]) -> Result<Self::Response, CodecError> {
//!         Ok(bytes.to_vec())
//!     }
//! }
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for codec operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The received bytes are not a valid CoAP message.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The message is valid CoAP but not something this codec understands.
    #[error("unsupported message: {0}")]
    Unsupported(String),
}

/// CoAP request methods used for CORECONF access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Retrieve a resource.
    Get,
    /// Invoke an operation (YANG RPC/action).
    Post,
    /// Replace a resource.
    Put,
    /// Remove a resource.
    Delete,
    /// Retrieve selected instances (CORECONF).
    Fetch,
    /// Idempotent partial update (CORECONF).
    #[serde(rename = "iPATCH")]
    IPatch,
}

impl Method {
    /// Canonical method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Fetch => "FETCH",
            Method::IPatch => "iPATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown method name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown CoAP method: {0}")]
pub struct UnknownMethod(pub String);

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "FETCH" => Ok(Method::Fetch),
            "IPATCH" => Ok(Method::IPatch),
            _ => Err(UnknownMethod(s.to_string())),
        }
    }
}

/// A single CoAP request, borrowed for the duration of encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoapRequest<'a> {
    /// Request method.
    pub method: Method,
    /// URI path, typically a YANG instance identifier such as
    /// `/ietf-interfaces:interfaces`.
    pub path: &'a str,
    /// Optional opaque payload.
    pub payload: Option<&'a [u8]>,
}

impl<'a> CoapRequest<'a> {
    /// Create a request.
    pub fn new(method: Method, path: &'a str, payload: Option<&'a [u8]>) -> Self {
        Self {
            method,
            path,
            payload,
        }
    }

    /// Payload length in bytes (zero when absent).
    pub fn payload_len(&self) -> usize {
        self.payload.map_or(0, <[u8]>::len)
    }
}

/// Pluggable CoAP message codec.
///
/// Encoding is pure and infallible for the closed method set; path
/// validation is the codec's own concern. Decoding may reject bytes that do
/// not form a response.
pub trait CoapCodec: Clone + 'static {
    /// Decoded response type handed back to callers.
    type Response;

    /// Encode a request into the bytes written to the stream.
    fn encode(&self, request: &CoapRequest<'_>) -> Vec<u8>;

    /// Decode response bytes read from the stream.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] when the bytes are not a valid response.
    fn decode(&self, bytes: &[u8]) -> Result<Self::Response, CodecError>;
}
