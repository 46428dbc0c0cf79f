//! Mechanisms and the native parameter structures some of them need.

mod arena;
pub use self::arena::Arena;

mod mechanism;
pub use self::mechanism::Mechanism;

pub mod native;

pub mod params;
pub use self::params::{GcmParams, ecdh1_derive_params, ecdh_aes_key_wrap_params};
