use std::sync::{Arc, LazyLock};

use alloy::{dyn_abi::DynSolValue, primitives::Bytes, rpc::types::Log};
use thiserror::Error;

use super::shape::EventShape;

/// Reasons a log that claims to be of a given shape cannot be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Log topic does not match the event selector")]
    SelectorMismatch,

    #[error("Payload too short: expected at least {expected} bytes, got {actual}")]
    PayloadTooShort { expected: usize, actual: usize },

    #[error("ABI decoding failed: {0}")]
    Abi(String),

    #[error("Missing field '{0}' in decoded payload")]
    MissingField(&'static str),

    #[error("Field '{field}' holds {len} bytes, expected at least 8")]
    FieldTooShort { field: &'static str, len: usize },

    #[error("Log has no block number")]
    MissingBlockNumber,
}

/// Field values of one decoded log, in the shape's field order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedFields {
    values: Vec<(&'static str, Bytes)>,
}

impl DecodedFields {
    /// Raw bytes of the named field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.values.iter().find(|(field, _)| *field == name).map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Bytes)> {
        self.values.iter().map(|(field, value)| (*field, value))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Recognises and decodes logs of a single [`EventShape`].
///
/// Decoding is pure: the same log always yields the same fields.
#[derive(Clone, Debug)]
pub struct EventDecoder {
    shape: Arc<EventShape>,
}

impl EventDecoder {
    #[must_use]
    pub fn new(shape: EventShape) -> Self {
        Self { shape: Arc::new(shape) }
    }

    /// Decoder for the deposit contract's `DepositEvent`. Every call shares one shape.
    #[must_use]
    pub fn deposit() -> Self {
        DEPOSIT_DECODER.clone()
    }

    #[must_use]
    pub fn shape(&self) -> &EventShape {
        &self.shape
    }

    /// Returns `true` iff the log's first topic is the shape's selector.
    ///
    /// Logs without topics (anonymous events) never match.
    #[must_use]
    pub fn matches(&self, log: &Log) -> bool {
        log.inner.data.topics().first() == Some(&self.shape.selector())
    }

    /// Splits the log payload into the shape's named fields.
    ///
    /// Fails without producing any field when the log does not match, when the payload is
    /// shorter than the ABI head or when field offsets point outside the payload.
    pub fn decode(&self, log: &Log) -> Result<DecodedFields, DecodeError> {
        if !self.matches(log) {
            return Err(DecodeError::SelectorMismatch);
        }

        let data = &log.inner.data.data;
        let expected = self.shape.min_data_len();
        if data.len() < expected {
            return Err(DecodeError::PayloadTooShort { expected, actual: data.len() });
        }

        let decoded = self
            .shape
            .sol_type()
            .abi_decode_sequence(data)
            .map_err(|err| DecodeError::Abi(err.to_string()))?;

        let DynSolValue::Tuple(values) = decoded else {
            return Err(DecodeError::Abi("expected a tuple of event fields".to_string()));
        };

        if values.len() != self.shape.fields().len() {
            return Err(DecodeError::Abi("decoded field count differs from shape".to_string()));
        }

        let values = self
            .shape
            .fields()
            .iter()
            .zip(values)
            .map(|(field, value)| Ok((field.name, field_bytes(field.name, value)?)))
            .collect::<Result<Vec<_>, DecodeError>>()?;

        Ok(DecodedFields { values })
    }
}

static DEPOSIT_DECODER: LazyLock<EventDecoder> =
    LazyLock::new(|| EventDecoder::new(EventShape::deposit().clone()));

fn field_bytes(name: &'static str, value: DynSolValue) -> Result<Bytes, DecodeError> {
    let bytes = match value {
        DynSolValue::Bytes(bytes) => Bytes::from(bytes),
        DynSolValue::FixedBytes(word, size) => Bytes::copy_from_slice(&word[..size]),
        DynSolValue::Uint(value, _) => Bytes::copy_from_slice(&value.to_be_bytes::<32>()),
        DynSolValue::Address(address) => Bytes::copy_from_slice(address.as_slice()),
        other => {
            let message = format!("unsupported value for field '{name}': {other:?}");
            return Err(DecodeError::Abi(message));
        }
    };
    Ok(bytes)
}
