use std::fmt::Formatter;
use web3::types::{Address, U256};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// missing or malformed external parameter
    Config(String),
    /// a roster row failed validation under the abort policy
    Validation { line: usize, reason: RejectReason },
    /// a live guard read did not allow the transition
    Precondition(Precondition),
    /// the transaction was rejected by the node or reverted on chain
    Submission { call: String, reason: String },
    /// transport / rpc failure, surfaced verbatim
    Collaborator(String),
    Io(std::io::Error),
    Csv(csv::Error),
    Json(serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    MissingField(&'static str),
    InvalidIdentifier(String),
    InvalidAddress(String),
    NotEoa(Address),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    DrawInProgress,
    RandomNotReady,
    NoActiveDraw,
    FeeExceedsCeiling { price: U256, ceiling: U256 },
    WrapperHasNoCode(Address),
    NotOwner { owner: Address, signer: Address },
}

impl Error {
    pub fn is_precondition(&self) -> bool {
        matches!(self, Error::Precondition(_))
    }

    /// attach the contract function name to a node-side rejection
    pub(crate) fn in_call(self, func: &str) -> Self {
        match self {
            Error::Submission { reason, .. } => Error::Submission {
                call: func.to_string(),
                reason,
            },
            other => other,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config(e) => write!(f, "configuration error: {}", e),
            Error::Validation { line, reason } => write!(f, "invalid roster row at line {}: {}", line, reason),
            Error::Precondition(p) => write!(f, "precondition failed: {}", p),
            Error::Submission { call, reason } => write!(f, "{} submission failed: {}", call, reason),
            Error::Collaborator(e) => write!(f, "chain gateway error: {}", e),
            Error::Io(e) => write!(f, "Io error {:?}", e),
            Error::Csv(e) => write!(f, "csv error: {}", e),
            Error::Json(e) => write!(f, "json error: {}", e),
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::MissingField(col) => write!(f, "{} is empty", col),
            RejectReason::InvalidIdentifier(v) => write!(f, "user_id {:?} is not a positive integer", v),
            RejectReason::InvalidAddress(v) => write!(f, "wallet_address {:?} is not a valid address", v),
            RejectReason::NotEoa(a) => write!(f, "wallet_address {:?} is a contract, only EOAs are allowed", a),
        }
    }
}

impl std::fmt::Display for Precondition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Precondition::DrawInProgress => write!(f, "a draw is in progress"),
            Precondition::RandomNotReady => write!(f, "random word is not ready, wait for the VRF callback"),
            Precondition::NoActiveDraw => write!(f, "no draw in progress"),
            Precondition::FeeExceedsCeiling { price, ceiling } => {
                write!(f, "VRF fee {} wei exceeds ceiling {} wei", price, ceiling)
            }
            Precondition::WrapperHasNoCode(a) => write!(f, "VRF wrapper {:?} has no contract code", a),
            Precondition::NotOwner { owner, signer } => {
                write!(f, "signer {:?} is not the contract owner {:?}", signer, owner)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Csv(e) => Some(e),
            Error::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Error::Csv(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<Precondition> for Error {
    fn from(p: Precondition) -> Self {
        Error::Precondition(p)
    }
}

impl From<web3::Error> for Error {
    fn from(e: web3::Error) -> Self {
        match e {
            // the node refused the request: revert during estimation, bad nonce, underpriced
            web3::Error::Rpc(rpc) => Error::Submission {
                call: "rpc".to_string(),
                reason: rpc.message,
            },
            other => Error::Collaborator(other.to_string()),
        }
    }
}

impl From<web3::contract::Error> for Error {
    fn from(e: web3::contract::Error) -> Self {
        match e {
            web3::contract::Error::Api(api) => api.into(),
            other => Error::Collaborator(crate::utils::handle_error(other)),
        }
    }
}

impl From<web3::ethabi::Error> for Error {
    fn from(e: web3::ethabi::Error) -> Self {
        Error::Collaborator(format!("Abi error: {}", e))
    }
}
