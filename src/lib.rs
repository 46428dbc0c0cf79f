//! The _p11_ library crate.
//!
//! Session-scoped access to the objects held by a PKCS#11 token: attribute
//! reads and writes, object duplication and destruction, and the four
//! single-shot cryptographic verbs on key objects. Mechanism parameters that
//! need memory the token can read (and sometimes write back into) are built
//! over an explicit [`crypto::Arena`].

pub mod config;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod object;
pub mod session;

pub use self::error::{BoundaryError, Error};
pub use self::keys::{PrivateKey, PublicKey};
pub use self::object::{Attribute, Object};
pub use self::session::{Session, SessionBackend, SessionGuard};
