//! Message body codecs.
//!
//! A codec turns a typed body into the bytes put on the wire and back. It also
//! provides a human-readable rendering used in error reports.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use hare_common::error::{HareError, Result};

pub trait Codec: Send + Sync {
    type Item: Send + Sync;

    fn encode(&self, item: &Self::Item) -> Result<Vec<u8>>;

    fn decode(&self, data: &[u8]) -> Result<Self::Item>;

    /// Human-readable form of a body.
    fn render(&self, item: &Self::Item) -> String;

    /// Content type stamped on published messages that don't set one.
    fn content_type(&self) -> Option<&'static str> {
        None
    }
}

/// UTF-8 text bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl Codec for TextCodec {
    type Item = String;

    fn encode(&self, item: &String) -> Result<Vec<u8>> {
        Ok(item.as_bytes().to_vec())
    }

    fn decode(&self, data: &[u8]) -> Result<String> {
        String::from_utf8(data.to_vec())
            .map_err(|e| HareError::Decode(format!("message body is not valid UTF-8: {}", e)))
    }

    fn render(&self, item: &String) -> String {
        item.clone()
    }
}

/// JSON bodies, (de)serialized with `serde_json`.
pub struct JsonCodec<T = serde_json::Value> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    type Item = T;

    fn encode(&self, item: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(item).map_err(|e| HareError::Encode(e.to_string()))
    }

    fn decode(&self, data: &[u8]) -> Result<T> {
        serde_json::from_slice(data).map_err(|e| HareError::Decode(e.to_string()))
    }

    fn render(&self, item: &T) -> String {
        serde_json::to_string_pretty(item)
            .unwrap_or_else(|e| format!("<unserializable body: {}>", e))
    }

    fn content_type(&self) -> Option<&'static str> {
        Some("application/json")
    }
}
