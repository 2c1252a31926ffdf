use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Issuance was refused because `[broker] enabled = false`.
    #[error("Token broker is disabled")]
    Disabled,

    /// Unknown, expired or revoked token. Deliberately carries no detail.
    #[error("Invalid token")]
    TokenInvalid,
}

pub type Result<T> = std::result::Result<T, BrokerError>;
