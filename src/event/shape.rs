use std::{fmt, sync::LazyLock};

use alloy::{
    dyn_abi::DynSolType,
    primitives::{B256, keccak256},
};

/// Solidity encoding of a single event field.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// Dynamic `bytes`.
    Bytes,
    /// `bytesN`, `1 <= N <= 32`.
    FixedBytes(usize),
    /// `uintN`, `N` a multiple of 8 up to 256.
    Uint(usize),
    /// `address`.
    Address,
}

impl FieldKind {
    #[must_use]
    pub fn sol_type(self) -> DynSolType {
        match self {
            FieldKind::Bytes => DynSolType::Bytes,
            FieldKind::FixedBytes(size) => DynSolType::FixedBytes(size),
            FieldKind::Uint(bits) => DynSolType::Uint(bits),
            FieldKind::Address => DynSolType::Address,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Bytes => f.write_str("bytes"),
            FieldKind::FixedBytes(size) => write!(f, "bytes{size}"),
            FieldKind::Uint(bits) => write!(f, "uint{bits}"),
            FieldKind::Address => f.write_str("address"),
        }
    }
}

/// A named, non-indexed event field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventField {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl EventField {
    #[must_use]
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// Immutable definition of one event: its name and the ordered fields of its data payload.
///
/// The selector (`topic0`) is derived from the canonical signature when the shape is built and
/// never changes afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventShape {
    name: &'static str,
    fields: Vec<EventField>,
    signature: String,
    selector: B256,
}

impl EventShape {
    #[must_use]
    pub fn new(name: &'static str, fields: Vec<EventField>) -> Self {
        let params = fields.iter().map(|field| field.kind.to_string()).collect::<Vec<_>>();
        let signature = format!("{name}({})", params.join(","));
        let selector = keccak256(signature.as_bytes());
        Self { name, fields, signature, selector }
    }

    /// The deposit contract's `DepositEvent`, built once per process.
    #[must_use]
    pub fn deposit() -> &'static EventShape {
        &DEPOSIT_EVENT
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn fields(&self) -> &[EventField] {
        &self.fields
    }

    /// Canonical signature, e.g. `DepositEvent(bytes,bytes,bytes,bytes,bytes)`.
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    #[must_use]
    pub fn selector(&self) -> B256 {
        self.selector
    }

    /// Size of the ABI head: one 32-byte word per field.
    ///
    /// A payload shorter than this cannot hold the shape, whatever the field kinds.
    #[must_use]
    pub fn min_data_len(&self) -> usize {
        self.fields.len() * 32
    }

    pub(crate) fn sol_type(&self) -> DynSolType {
        DynSolType::Tuple(self.fields.iter().map(|field| field.kind.sol_type()).collect())
    }
}

static DEPOSIT_EVENT: LazyLock<EventShape> = LazyLock::new(|| {
    EventShape::new(
        "DepositEvent",
        vec![
            EventField::new("pubkey", FieldKind::Bytes),
            EventField::new("withdrawal_credentials", FieldKind::Bytes),
            EventField::new("amount", FieldKind::Bytes),
            EventField::new("signature", FieldKind::Bytes),
            EventField::new("index", FieldKind::Bytes),
        ],
    )
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deposit_signature() {
        let shape = EventShape::deposit();

        assert_eq!(shape.signature(), "DepositEvent(bytes,bytes,bytes,bytes,bytes)");
        assert_eq!(shape.selector(), keccak256("DepositEvent(bytes,bytes,bytes,bytes,bytes)"));
        assert_eq!(shape.min_data_len(), 160);
    }

    #[test]
    fn deposit_shape_is_shared() {
        assert!(std::ptr::eq(EventShape::deposit(), EventShape::deposit()));
    }

    #[test]
    fn field_kinds_render_solidity_names() {
        let shape = EventShape::new(
            "Mixed",
            vec![
                EventField::new("a", FieldKind::Address),
                EventField::new("b", FieldKind::Uint(64)),
                EventField::new("c", FieldKind::FixedBytes(32)),
            ],
        );

        assert_eq!(shape.signature(), "Mixed(address,uint64,bytes32)");
    }
}
