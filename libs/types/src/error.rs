//! Error types for wire decoding

use thiserror::Error;

/// Result alias for the types crate
pub type Result<T> = std::result::Result<T, TypesError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypesError {
    /// Exponent cannot be represented by a 96-bit decimal
    #[error("Price exponent {expo} is outside the supported range")]
    ExponentOutOfRange { expo: i32 },

    /// Mantissa string is not an integer
    #[error("Invalid price mantissa: '{input}'")]
    InvalidMantissa { input: String },

    /// Decoded value overflowed during scaling
    #[error("Price overflow: {mantissa} * 10^{expo}")]
    Overflow { mantissa: i64, expo: i32 },

    /// Decimal value has no f64 representation
    #[error("Price {value} cannot be represented as f64")]
    NotRepresentable { value: String },
}
