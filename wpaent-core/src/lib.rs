pub mod config;
pub mod error;
pub mod logging;
pub mod state;

pub use config::{InnerMethod, LogLevel, OuterMethod, SecurityMode, SupplicantConfig};
pub use error::{Error, FailureKind, Result};
pub use state::{
    AuthResult, CipherMetadata, HandshakeState, LeapStage, MainStage, Phase2Result, SubStage,
};
