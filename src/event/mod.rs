//! Recognition and decoding of contract events.

mod decoder;
mod deposit;
mod shape;

pub use decoder::{DecodeError, DecodedFields, EventDecoder};
pub use deposit::DecodedDeposit;
pub use shape::{EventField, EventShape, FieldKind};
