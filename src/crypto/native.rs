//! Copying fixed-layout PKCS#11 structures to and from plain bytes.
//!
//! A mechanism parameter travels to the token as an opaque byte string whose
//! contents are the in-memory representation of the C structure the
//! mechanism expects. These helpers do that conversion for the structures in
//! [`NativeLayout`].

use std::{mem, ptr, slice};

use pkcs11::types::{CK_ECDH1_DERIVE_PARAMS, CK_ECDH_AES_KEY_WRAP_PARAMS, CK_GCM_PARAMS};

use crate::error::Error;

/// A C structure made only of integer and pointer fields without padding, so
/// that every byte string of the right size is a valid value.
///
/// # Safety
///
/// Implement this only for `#[repr(C)]` (or packed) structures for which any
/// bit pattern is a valid value.
pub unsafe trait NativeLayout: Sized {}

unsafe impl NativeLayout for CK_GCM_PARAMS {}
unsafe impl NativeLayout for CK_ECDH1_DERIVE_PARAMS {}
unsafe impl NativeLayout for CK_ECDH_AES_KEY_WRAP_PARAMS {}

/// Returns a copy of the bytes making up `value`.
pub fn to_bytes<T: NativeLayout>(value: &T) -> Vec<u8> {
    let bytes = unsafe { slice::from_raw_parts((value as *const T).cast::<u8>(), mem::size_of::<T>()) };
    bytes.to_vec()
}

/// Reads a structure back out of bytes produced by [`to_bytes`].
pub fn from_bytes<T: NativeLayout>(bytes: &[u8]) -> Result<T, Error> {
    let expected = mem::size_of::<T>();
    if bytes.len() != expected {
        return Err(Error::ParameterLayout {
            expected,
            found: bytes.len(),
        });
    }
    Ok(unsafe { ptr::read_unaligned(bytes.as_ptr().cast::<T>()) })
}
