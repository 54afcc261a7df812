#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("not a valid curve point")]
    InvalidPoint,
    #[error("secret key is zero after reduction")]
    ZeroScalar,
    #[error("hex string malformed: {0}")]
    BadHex(String),
}
