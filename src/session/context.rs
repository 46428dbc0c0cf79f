use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, OnceLock, PoisonError, Weak},
};

use log::{debug, info, warn};
use pkcs11::{
    Ctx,
    errors::Error as Pkcs11Error,
    types::{CK_C_INITIALIZE_ARGS, CKF_OS_LOCKING_OK, CKR_CRYPTOKI_ALREADY_INITIALIZED},
};

use crate::error::{BoundaryError, Error};

/// Loaded libraries by file name.
///
/// A PKCS#11 library must be initialized only once per process, however many
/// sessions are opened with it. The file name rather than the full path is
/// the key so that two copies of the same library at different locations are
/// not both loaded. Entries are weak: the library is finalized when the last
/// session using it is gone, and loaded afresh on the next request.
static CONTEXTS: OnceLock<Mutex<HashMap<String, Weak<Pkcs11Context>>>> = OnceLock::new();

/// A loaded and initialized PKCS#11 library.
#[derive(Debug)]
pub struct Pkcs11Context {
    lib_path: PathBuf,
    ctx: Ctx,
}

impl Pkcs11Context {
    /// Returns the context for the library at `lib_path`, loading and
    /// initializing it if no live context for a library with that file name
    /// exists yet.
    pub fn get_or_load(lib_path: &Path) -> Result<Arc<Self>, Error> {
        let lib_file_name = lib_path
            .file_name()
            .ok_or_else(|| {
                BoundaryError::Library(format!(
                    "PKCS#11 library path '{}' does not point to a file",
                    lib_path.display()
                ))
            })?
            .to_string_lossy()
            .to_string();

        let contexts = CONTEXTS.get_or_init(|| Mutex::new(HashMap::new()));
        let mut contexts = contexts.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(context) = contexts.get(&lib_file_name).and_then(Weak::upgrade) {
            debug!("PKCS#11: Reusing loaded library '{}'", lib_file_name);
            return Ok(context);
        }

        let context = Arc::new(Self::load(lib_path)?);
        contexts.insert(lib_file_name, Arc::downgrade(&context));
        Ok(context)
    }

    /// Loads and initializes the library at `lib_path`, bypassing the
    /// process wide registry.
    pub fn load(lib_path: &Path) -> Result<Self, Error> {
        info!("PKCS#11: Loading library '{}'", lib_path.display());

        let mut ctx = Ctx::new(lib_path).map_err(|err| {
            BoundaryError::Library(format!(
                "Failed to load PKCS#11 library '{}': {}",
                lib_path.display(),
                err
            ))
        })?;

        if !ctx.is_initialized() {
            // Let the library use the native OS locking primitives, we do our
            // own session level locking on top of that.
            let mut args = CK_C_INITIALIZE_ARGS::new();
            args.CreateMutex = None;
            args.DestroyMutex = None;
            args.LockMutex = None;
            args.UnlockMutex = None;
            args.flags = CKF_OS_LOCKING_OK;

            match ctx.initialize(Some(args)) {
                Ok(()) => {}
                Err(Pkcs11Error::Pkcs11(CKR_CRYPTOKI_ALREADY_INITIALIZED)) => {
                    debug!("PKCS#11: Library '{}' was already initialized", lib_path.display());
                }
                Err(err) => {
                    warn!("PKCS#11: Failed to initialize library '{}': {}", lib_path.display(), err);
                    return Err(err.into());
                }
            }
        }

        Ok(Pkcs11Context {
            lib_path: lib_path.to_path_buf(),
            ctx,
        })
    }

    pub fn lib_path(&self) -> &Path {
        &self.lib_path
    }

    pub(super) fn ctx(&self) -> &Ctx {
        &self.ctx
    }
}

impl Drop for Pkcs11Context {
    fn drop(&mut self) {
        if self.ctx.is_initialized() {
            debug!("PKCS#11: Finalizing library '{}'", self.lib_path.display());
            if let Err(err) = self.ctx.finalize() {
                warn!("PKCS#11: Failed to finalize library '{}': {}", self.lib_path.display(), err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_reject_path_without_file_name() {
        let err = Pkcs11Context::get_or_load(Path::new("/")).unwrap_err();
        assert!(matches!(err, Error::Boundary(BoundaryError::Library(_))));
    }

    #[test]
    fn should_fail_on_missing_library() {
        let err = Pkcs11Context::load(Path::new("/nonexistent/libp11-missing.so")).unwrap_err();
        match err {
            Error::Boundary(BoundaryError::Library(msg)) => {
                assert!(msg.contains("libp11-missing.so"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
