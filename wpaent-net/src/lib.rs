pub mod avp;
pub mod cursor;
pub mod eap;
pub mod eap_mschapv2;
pub mod eap_tls;
pub mod eapol;
pub mod error;
pub mod fragment;
pub mod leap;
pub mod mschapv2;
pub mod tunnel;

pub use error::CodecError;
