//! Fixed-point price decoding
//!
//! The oracle publishes prices as an integer mantissa and a base-10 exponent
//! (`price = mantissa * 10^expo`). Decoding goes through `rust_decimal` so the
//! scaling itself is exact; the only lossy step is the final rounding to
//! [`PRICE_DECIMALS`] places and the conversion to `f64` for the JSON frame.

use crate::error::{Result, TypesError};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places kept in relayed prices
pub const PRICE_DECIMALS: u32 = 4;

/// Largest exponent magnitude a 96-bit decimal can carry
const MAX_EXPONENT: i32 = 28;

/// Decode `mantissa * 10^expo`, rounded half away from zero to four places
pub fn decode_price(mantissa: i64, expo: i32) -> Result<f64> {
    if !(-MAX_EXPONENT..=MAX_EXPONENT).contains(&expo) {
        return Err(TypesError::ExponentOutOfRange { expo });
    }

    let value = if expo < 0 {
        Decimal::try_new(mantissa, expo.unsigned_abs())
            .map_err(|_| TypesError::ExponentOutOfRange { expo })?
    } else {
        let mut scaled = Decimal::from(mantissa);
        for _ in 0..expo {
            scaled = scaled
                .checked_mul(Decimal::TEN)
                .ok_or(TypesError::Overflow { mantissa, expo })?;
        }
        scaled
    };

    let rounded = value.round_dp_with_strategy(PRICE_DECIMALS, RoundingStrategy::MidpointAwayFromZero);
    rounded.to_f64().ok_or_else(|| TypesError::NotRepresentable {
        value: rounded.to_string(),
    })
}

/// Parse a mantissa sent as a decimal string
pub fn parse_mantissa(raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| TypesError::InvalidMantissa {
            input: raw.to_string(),
        })
}
