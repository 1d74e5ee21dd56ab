use std::fmt;

use alloy::rpc::types::Log;

use super::decoder::{DecodeError, DecodedFields, EventDecoder};

/// A deposit as reported to the operator.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DecodedDeposit {
    pub block_number: u64,
    pub index: u64,
    pub amount: u64,
}

impl DecodedDeposit {
    /// Decodes a log that already matched the deposit shape.
    ///
    /// `index` and `amount` are the little-endian reading of the first 8 bytes of their
    /// fields; trailing bytes are ignored.
    pub fn decode(decoder: &EventDecoder, log: &Log) -> Result<Self, DecodeError> {
        let block_number = log.block_number.ok_or(DecodeError::MissingBlockNumber)?;
        let fields = decoder.decode(log)?;
        Self::from_fields(block_number, &fields)
    }

    pub fn from_fields(block_number: u64, fields: &DecodedFields) -> Result<Self, DecodeError> {
        Ok(Self {
            block_number,
            index: read_u64_le(fields, "index")?,
            amount: read_u64_le(fields, "amount")?,
        })
    }
}

impl fmt::Display for DecodedDeposit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Deposit: Block {} Index {} Amount {}",
            self.block_number, self.index, self.amount
        )
    }
}

fn read_u64_le(fields: &DecodedFields, field: &'static str) -> Result<u64, DecodeError> {
    let bytes = fields.get(field).ok_or(DecodeError::MissingField(field))?;
    let head: [u8; 8] = bytes
        .get(..8)
        .and_then(|head| head.try_into().ok())
        .ok_or(DecodeError::FieldTooShort { field, len: bytes.len() })?;
    Ok(u64::from_le_bytes(head))
}

#[cfg(test)]
mod tests {
    use alloy::primitives::Address;

    use super::*;
    use crate::test_utils::deposit_log;

    const TARGET: Address = Address::repeat_byte(0x42);

    #[test]
    fn decodes_little_endian_index_and_amount() {
        let log = deposit_log(TARGET, 1000, &[5, 0, 0, 0, 0, 0, 0, 0], &[200, 0, 0, 0, 0, 0, 0, 0]);

        let deposit = DecodedDeposit::decode(&EventDecoder::deposit(), &log).unwrap();

        assert_eq!(deposit, DecodedDeposit { block_number: 1000, index: 5, amount: 200 });
        assert_eq!(deposit.to_string(), "Deposit: Block 1000 Index 5 Amount 200");
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let gwei_32 = 32_000_000_000u64.to_le_bytes();
        let mut amount = gwei_32.to_vec();
        amount.extend_from_slice(&[0xff; 24]);
        let log = deposit_log(TARGET, 7, &u64::MAX.to_le_bytes(), &amount);

        let deposit = DecodedDeposit::decode(&EventDecoder::deposit(), &log).unwrap();

        assert_eq!(deposit.index, u64::MAX);
        assert_eq!(deposit.amount, 32_000_000_000);
    }

    #[test]
    fn short_field_is_an_error() {
        let log = deposit_log(TARGET, 7, &[1, 0, 0, 0], &[1; 8]);

        assert_eq!(
            DecodedDeposit::decode(&EventDecoder::deposit(), &log),
            Err(DecodeError::FieldTooShort { field: "index", len: 4 })
        );
    }

    #[test]
    fn pending_log_is_an_error() {
        let mut log = deposit_log(TARGET, 7, &[1; 8], &[1; 8]);
        log.block_number = None;

        assert_eq!(
            DecodedDeposit::decode(&EventDecoder::deposit(), &log),
            Err(DecodeError::MissingBlockNumber)
        );
    }

    #[test]
    fn missing_field_is_an_error() {
        use crate::event::{EventField, EventShape, FieldKind};

        let decoder = EventDecoder::new(EventShape::new(
            "DepositEvent",
            vec![
                EventField::new("pubkey", FieldKind::Bytes),
                EventField::new("withdrawal_credentials", FieldKind::Bytes),
                EventField::new("amount", FieldKind::Bytes),
                EventField::new("signature", FieldKind::Bytes),
                EventField::new("nonce", FieldKind::Bytes),
            ],
        ));
        let log = deposit_log(TARGET, 7, &[1; 8], &[1; 8]);

        assert_eq!(
            DecodedDeposit::decode(&decoder, &log),
            Err(DecodeError::MissingField("index"))
        );
    }
}
