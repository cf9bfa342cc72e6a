pub mod client;
pub mod config;
pub mod locate;
pub mod mutate;
pub mod provenance;
mod session;

pub use client::{RdmApi, RdmClient};
pub use config::RdmConfig;
pub use session::{RdmSession, RdmToken};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RdmError {
    #[error("invalid source reference: {0}")]
    InvalidSource(String),
    #[error("malformed RO-Crate: {0}")]
    MalformedCrate(String),
    #[error("RDM API returned status {status}")]
    Upstream { status: u16 },
    #[error("no RDM token attached to the session")]
    MissingToken,
    #[error("token belongs to service '{actual}', configured service is '{expected}'")]
    ServiceMismatch { expected: String, actual: String },
    #[error("unexpected action status '{0}'")]
    UnexpectedActionStatus(String),
}
