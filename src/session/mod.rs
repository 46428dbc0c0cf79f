//! The session every object and key operation runs against.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use pkcs11::types::{CK_ATTRIBUTE_TYPE, CK_OBJECT_HANDLE};

use crate::crypto::Mechanism;
use crate::error::BoundaryError;
use crate::object::Attribute;

mod context;
pub use self::context::Pkcs11Context;

mod backend;
pub use self::backend::Pkcs11Backend;

//------------ SessionBackend ------------------------------------------------

/// The native calls available on one open token session.
///
/// Implementations make exactly one native call per method, except that
/// attribute reads may use the two-pass length/value protocol. They are only
/// ever invoked through a [`SessionGuard`], so no two calls on the same
/// backend overlap.
///
/// When an object does not have a requested attribute the implementation must
/// fail with `BoundaryError::Status(CKR_ATTRIBUTE_TYPE_INVALID)`.
pub trait SessionBackend: Send {
    fn get_attribute_value(
        &mut self,
        object: CK_OBJECT_HANDLE,
        types: &[CK_ATTRIBUTE_TYPE],
    ) -> Result<Vec<Attribute>, BoundaryError>;

    fn set_attribute_value(&mut self, object: CK_OBJECT_HANDLE, template: &[Attribute]) -> Result<(), BoundaryError>;

    fn copy_object(
        &mut self,
        object: CK_OBJECT_HANDLE,
        template: &[Attribute],
    ) -> Result<CK_OBJECT_HANDLE, BoundaryError>;

    fn destroy_object(&mut self, object: CK_OBJECT_HANDLE) -> Result<(), BoundaryError>;

    fn decrypt_init(&mut self, mechanism: &Mechanism<'_>, key: CK_OBJECT_HANDLE) -> Result<(), BoundaryError>;

    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, BoundaryError>;

    fn sign_init(&mut self, mechanism: &Mechanism<'_>, key: CK_OBJECT_HANDLE) -> Result<(), BoundaryError>;

    fn sign(&mut self, data: &[u8]) -> Result<Vec<u8>, BoundaryError>;

    fn verify_init(&mut self, mechanism: &Mechanism<'_>, key: CK_OBJECT_HANDLE) -> Result<(), BoundaryError>;

    fn verify(&mut self, data: &[u8], signature: &[u8]) -> Result<(), BoundaryError>;

    fn encrypt_init(&mut self, mechanism: &Mechanism<'_>, key: CK_OBJECT_HANDLE) -> Result<(), BoundaryError>;

    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, BoundaryError>;
}

//------------ Session -------------------------------------------------------

/// An open session with a token, shared by all objects found through it.
///
/// The backend can only be reached by taking the session lock, which every
/// public operation holds from its first native call to its last. Operations
/// on one session are therefore atomic with respect to each other, while
/// different sessions don't coordinate at all.
pub struct Session {
    backend: Mutex<Box<dyn SessionBackend>>,
    acquisitions: AtomicU64,
}

impl Session {
    pub fn new(backend: impl SessionBackend + 'static) -> Self {
        Session {
            backend: Mutex::new(Box::new(backend)),
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Takes the session lock, blocking until it is available.
    ///
    /// The lock is not reentrant: taking it again on the same thread while
    /// the guard is alive deadlocks.
    pub fn lock(&self) -> SessionGuard<'_> {
        // A panic while holding the lock leaves at most an unfinished native
        // operation behind, which the next init call replaces.
        let inner = self.backend.lock().unwrap_or_else(PoisonError::into_inner);
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        SessionGuard { inner }
    }

    /// Takes the session lock if nobody else holds it.
    pub fn try_lock(&self) -> Option<SessionGuard<'_>> {
        let inner = match self.backend.try_lock() {
            Ok(inner) => inner,
            Err(TryLockError::Poisoned(err)) => err.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        Some(SessionGuard { inner })
    }

    /// How many times the session lock has been taken so far.
    pub fn lock_count(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("lock_count", &self.lock_count()).finish()
    }
}

//------------ SessionGuard --------------------------------------------------

/// Exclusive access to a session's backend. The lock is released when the
/// guard is dropped.
pub struct SessionGuard<'a> {
    inner: MutexGuard<'a, Box<dyn SessionBackend>>,
}

impl Deref for SessionGuard<'_> {
    type Target = dyn SessionBackend;

    fn deref(&self) -> &Self::Target {
        &**self.inner
    }
}

impl DerefMut for SessionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.inner
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{CallLog, MockBackend};

    #[test]
    fn lock_is_exclusive_and_released_on_drop() {
        let session = Session::new(MockBackend::new(CallLog::default()));

        let guard = session.lock();
        assert!(session.try_lock().is_none());
        drop(guard);

        assert!(session.try_lock().is_some());
        assert_eq!(session.lock_count(), 2);
    }

    #[test]
    fn lock_survives_panicking_holder() {
        let session = Session::new(MockBackend::new(CallLog::default()));

        let res = std::thread::scope(|s| {
            s.spawn(|| {
                let _guard = session.lock();
                panic!("holder panics");
            })
            .join()
        });
        assert!(res.is_err());

        let _guard = session.lock();
    }
}
