use std::fmt;
use std::marker::PhantomData;

use pkcs11::types::CK_MECHANISM_TYPE;

use crate::crypto::params::GcmParams;
use crate::error::Error;

//------------ Mechanism -----------------------------------------------------

/// A mechanism type together with its parameter, as given to the init call
/// of a cryptographic operation.
///
/// The parameter is kept as the opaque bytes of the native parameter
/// structure. When those bytes contain pointers, as they do for AES-GCM, the
/// mechanism borrows the parameters it was built from: they can be neither
/// dropped, freed nor realized again while the mechanism is around.
///
/// ```compile_fail
/// # use p11::crypto::{GcmParams, Mechanism};
/// # use pkcs11::types::CKM_AES_GCM;
/// let mut gcm = GcmParams::new(vec![0; 12], Vec::new(), 128);
/// let mech = Mechanism::with_gcm_params(CKM_AES_GCM, &mut gcm).unwrap();
/// gcm.free();
/// println!("{}", mech);
/// ```
///
/// ```compile_fail
/// # use p11::crypto::{GcmParams, Mechanism};
/// # use pkcs11::types::CKM_AES_GCM;
/// let mech = {
///     let mut gcm = GcmParams::new(vec![0; 12], Vec::new(), 128);
///     Mechanism::with_gcm_params(CKM_AES_GCM, &mut gcm).unwrap()
/// };
/// println!("{}", mech);
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Mechanism<'a> {
    mechanism_type: CK_MECHANISM_TYPE,
    parameter: Vec<u8>,
    marker: PhantomData<&'a ()>,
}

impl<'a> Mechanism<'a> {
    /// A mechanism that takes no parameter.
    pub fn new(mechanism_type: CK_MECHANISM_TYPE) -> Self {
        Mechanism {
            mechanism_type,
            parameter: Vec::new(),
            marker: PhantomData,
        }
    }

    /// A mechanism with a parameter that holds no pointers, or only pointers
    /// the caller keeps valid by other means, such as an [`Arena`] it frees
    /// after the operation.
    ///
    /// [`Arena`]: crate::crypto::Arena
    pub fn with_parameter(mechanism_type: CK_MECHANISM_TYPE, parameter: impl Into<Vec<u8>>) -> Self {
        Mechanism {
            mechanism_type,
            parameter: parameter.into(),
            marker: PhantomData,
        }
    }

    /// Realizes `params` and uses the result as the parameter.
    ///
    /// The IV the token ends up using can be read from `params` once the
    /// mechanism is no longer used. Call [`GcmParams::free`] after that.
    pub fn with_gcm_params(mechanism_type: CK_MECHANISM_TYPE, params: &'a mut GcmParams) -> Result<Self, Error> {
        let parameter = params.realize()?;
        Ok(Mechanism {
            mechanism_type,
            parameter,
            marker: PhantomData,
        })
    }

    pub fn mechanism_type(&self) -> CK_MECHANISM_TYPE {
        self.mechanism_type
    }

    pub fn parameter(&self) -> &[u8] {
        &self.parameter
    }
}

impl fmt::Display for Mechanism<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.parameter.is_empty() {
            write!(f, "0x{:08X}", self.mechanism_type)
        } else {
            write!(f, "0x{:08X} ({})", self.mechanism_type, hex::encode(&self.parameter))
        }
    }
}
