//! Builders for mechanism parameters that carry pointers.
//!
//! Units follow the PKCS#11 definitions of each structure exactly: lengths of
//! data buffers are in bytes, `ulIvBits`, `ulTagBits` and `ulAESKeyBits` are
//! in bits.

use std::{ptr, slice};

use log::trace;
use pkcs11::types::{CK_ECDH1_DERIVE_PARAMS, CK_ECDH_AES_KEY_WRAP_PARAMS, CK_GCM_PARAMS, CK_ULONG, CKD_NULL};

use crate::constants::ECDH_AES_KEY_WRAP_KEY_BITS;
use crate::crypto::{Arena, native};
use crate::error::Error;

//------------ GcmParams -----------------------------------------------------

/// Parameters for the AES-GCM mechanism.
///
/// Nothing is allocated until the parameters are realized, which happens
/// when a [`Mechanism`] is built from them. Some tokens, AWS CloudHSM among
/// them, ignore the IV that was passed in and write their own into the IV
/// buffer, also after the encrypt call has returned. The buffers are
/// therefore not released at the end of the call, nor when the parameters
/// are dropped, but only by an explicit [`GcmParams::free`]. The mechanism
/// borrows the parameters until it is last used:
///
/// ```no_run
/// # use p11::{PublicKey, crypto::{GcmParams, Mechanism}};
/// # use pkcs11::types::CKM_AES_GCM;
/// # fn example(key: PublicKey<'_>, plaintext: &[u8]) -> Result<(), p11::Error> {
/// let mut gcm = GcmParams::new(vec![0; 12], Vec::new(), 128);
/// let mech = Mechanism::with_gcm_params(CKM_AES_GCM, &mut gcm)?;
/// let ciphertext = key.encrypt(&mech, plaintext)?;
/// let iv = gcm.iv();
/// gcm.free();
/// # Ok(())
/// # }
/// ```
///
/// [`Mechanism`]: crate::crypto::Mechanism
#[derive(Debug)]
pub struct GcmParams {
    iv: Vec<u8>,
    aad: Vec<u8>,
    tag_bits: usize,
    realized: Option<RealizedGcm>,
}

#[derive(Debug)]
struct RealizedGcm {
    arena: Arena,
    params: CK_GCM_PARAMS,
}

impl GcmParams {
    /// Creates parameters from an IV, additional authenticated data and a tag
    /// size in bits. An empty IV or AAD is left out of the native structure.
    pub fn new(iv: Vec<u8>, aad: Vec<u8>, tag_bits: usize) -> Self {
        GcmParams {
            iv,
            aad,
            tag_bits,
            realized: None,
        }
    }

    pub fn tag_bits(&self) -> usize {
        self.tag_bits
    }

    pub fn aad(&self) -> &[u8] {
        &self.aad
    }

    pub fn is_realized(&self) -> bool {
        self.realized.is_some()
    }

    /// Lays the parameters out as a `CK_GCM_PARAMS` over freshly allocated
    /// buffers and returns the bytes of that structure.
    ///
    /// A previous realization is freed first. If laying out fails, whatever
    /// was allocated for it is freed again.
    pub fn realize(&mut self) -> Result<Vec<u8>, Error> {
        self.free();

        let mut arena = Arena::new();
        let params = match self.layout(&mut arena) {
            Ok(params) => params,
            Err(err) => {
                arena.free();
                return Err(err);
            }
        };

        let bytes = native::to_bytes(&params);
        self.realized = Some(RealizedGcm { arena, params });
        Ok(bytes)
    }

    fn layout(&self, arena: &mut Arena) -> Result<CK_GCM_PARAMS, Error> {
        let mut params = CK_GCM_PARAMS {
            pIv: ptr::null_mut(),
            ulIvLen: 0,
            ulIvBits: 0,
            pAAD: ptr::null_mut(),
            ulAADLen: 0,
            ulTagBits: CK_ULONG::try_from(self.tag_bits)?,
        };

        if !self.iv.is_empty() {
            let (iv, iv_len) = arena.allocate(&self.iv)?;
            params.pIv = iv;
            params.ulIvLen = iv_len;
            params.ulIvBits = CK_ULONG::try_from(self.iv.len() * 8)?;
        }
        if !self.aad.is_empty() {
            let (aad, aad_len) = arena.allocate(&self.aad)?;
            params.pAAD = aad;
            params.ulAADLen = aad_len;
        }
        Ok(params)
    }

    /// Returns a copy of the IV as it currently is in the realized buffer,
    /// which may differ from the one passed in if the token rewrote it.
    ///
    /// Returns `None` if the parameters are not realized or were freed.
    pub fn iv(&self) -> Option<Vec<u8>> {
        let realized = self.realized.as_ref()?;
        let iv = realized.params.pIv;
        if iv.is_null() {
            return Some(Vec::new());
        }

        let len = realized.params.ulIvLen as usize;
        Some(unsafe { slice::from_raw_parts(iv, len) }.to_vec())
    }

    /// Releases the realized buffers. Does nothing if there is nothing to
    /// free.
    pub fn free(&mut self) {
        if let Some(mut realized) = self.realized.take() {
            realized.arena.free();
        }
    }
}

//------------ ECDH ----------------------------------------------------------

/// Builds a `CK_ECDH1_DERIVE_PARAMS` for the other party's public key data,
/// without key derivation function and without shared data.
///
/// The returned arena holds the copy of `public_data` the structure points
/// at. It belongs to the caller, who must keep it until the derive call is
/// done and then free it. Ignoring it leaks the copy.
#[must_use = "the returned arena must be freed once the derive call is done"]
pub fn ecdh1_derive_params(public_data: &[u8]) -> Result<(Vec<u8>, Arena), Error> {
    let mut arena = Arena::new();
    let (public, public_len) = arena.allocate(public_data)?;

    let params = CK_ECDH1_DERIVE_PARAMS {
        kdf: CKD_NULL,
        ulSharedDataLen: 0,
        pSharedData: ptr::null_mut(),
        ulPublicDataLen: public_len,
        pPublicData: public,
    };
    trace!("PKCS#11: built ECDH1 derive parameters for {} bytes of public data", public_len);

    Ok((native::to_bytes(&params), arena))
}

/// Builds a `CK_ECDH_AES_KEY_WRAP_PARAMS` for a 256 bit AES key, without key
/// derivation function and without shared data.
pub fn ecdh_aes_key_wrap_params() -> Vec<u8> {
    let params = CK_ECDH_AES_KEY_WRAP_PARAMS {
        ulAESKeyBits: ECDH_AES_KEY_WRAP_KEY_BITS,
        kdf: CKD_NULL,
        ulSharedDataLen: 0,
        pSharedData: ptr::null_mut(),
    };
    native::to_bytes(&params)
}

//------------ Tests ---------------------------------------------------------
