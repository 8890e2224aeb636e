use thiserror::Error;

/// Error returned when a decimal amount cannot be parsed into [`Money`](crate::Money).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseMoneyError {
    #[error("amount is empty")]
    Empty,

    #[error("invalid amount '{0}'")]
    Invalid(String),

    /// More than two fractional digits were supplied.
    #[error("amount '{0}' has more than 2 decimal places")]
    TooPrecise(String),

    #[error("amount '{0}' is out of range")]
    Overflow(String),
}

/// Error returned when a nature flag is neither `C` nor `D`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid nature '{0}', expected 'C' or 'D'")]
pub struct ParseNatureError(pub String);
