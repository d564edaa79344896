//! Crypto error types.

use thiserror::Error;
use trellis_proto::EncodingError;

use crate::CurveId;

/// Errors from curve arithmetic, key handling and sealing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Operands belong to different curves.
    #[error("curve mismatch: expected {expected}, got {actual}")]
    CurveMismatch {
        /// Curve of the receiver.
        expected: CurveId,
        /// Curve of the offending operand.
        actual: CurveId,
    },

    /// Curve tag not assigned to any parameter set.
    #[error("unknown curve tag: 0x{0:02x}")]
    UnknownCurve(u8),

    /// Coordinates do not satisfy the curve equation.
    #[error("point is not on curve {0}")]
    NotOnCurve(CurveId),

    /// Point (or y-coordinate) is annihilated by the cofactor.
    #[error("low-order point on curve {0}")]
    LowOrder(CurveId),

    /// Value has no modular inverse.
    #[error("no modular inverse")]
    NoInverse,

    /// Scalar outside its allowed range.
    #[error("scalar out of range")]
    ScalarOutOfRange,

    /// Fixed-size field has the wrong length.
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Required length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Signature does not verify.
    #[error("invalid signature")]
    InvalidSignature,

    /// Authenticated decryption failed or ciphertext is malformed.
    #[error("sealed box could not be opened")]
    Unseal,

    /// Encryption or key derivation failed.
    #[error("sealing failed")]
    Seal,

    /// Key material could not be decoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err =
            CryptoError::CurveMismatch { expected: CurveId::Curve25519, actual: CurveId::Mdc };
        assert_eq!(err.to_string(), "curve mismatch: expected Curve25519, got MDC");
        assert_eq!(CryptoError::UnknownCurve(7).to_string(), "unknown curve tag: 0x07");
    }
}
