use thiserror::Error;

/// Errors raised while encoding or decoding protocol frames.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Frame carries no signer public key")]
    MissingSignature,

    #[error("Frame payload is empty")]
    EmptyPayload,

    #[error("Signature verification failed")]
    InvalidSignature,

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Invalid signature bytes")]
    InvalidSignatureBytes,

    #[error("Signature does not verify")]
    SignatureMismatch,
}
