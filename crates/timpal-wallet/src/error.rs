use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid recovery phrase (checksum failed)")]
    InvalidPhrase,

    #[error("incorrect password")]
    WrongPassword,

    #[error("incorrect PIN")]
    WrongPin,

    #[error("PIN must be at least {0} digits, numbers only")]
    InvalidPin(usize),

    #[error("invalid derivation path: {0}")]
    InvalidPath(String),

    #[error("wallet file is corrupted or has been tampered with")]
    Corrupted,

    #[error("wallet not initialized — create or restore first")]
    NotInitialized,

    #[error("unsupported wallet version: {0}")]
    UnsupportedVersion(u32),

    #[error("crypto error: {0}")]
    CryptoError(String),

    #[error("wallet io error: {0}")]
    Io(String),

    #[error("wallet serialization error: {0}")]
    Serialization(String),
}
