use std::{ptr, sync::Arc};

use log::{trace, warn};
use pkcs11::errors::Error as Pkcs11Error;
use pkcs11::types::{
    CK_ATTRIBUTE, CK_ATTRIBUTE_TYPE, CK_MECHANISM, CK_OBJECT_HANDLE, CK_RV, CK_SESSION_HANDLE, CK_SLOT_ID,
    CK_ULONG, CKF_RW_SESSION, CKF_SERIAL_SESSION, CKR_OK,
};

use crate::crypto::Mechanism;
use crate::error::{BoundaryError, Error};
use crate::object::Attribute;
use crate::session::{Pkcs11Context, SessionBackend};

//------------ Pkcs11Backend -------------------------------------------------

/// A [`SessionBackend`] making real calls into a loaded PKCS#11 library.
///
/// The session is opened on an explicitly given slot and closed on drop. No
/// login is done here: whoever needs a logged in session logs in through the
/// library before handing the session out.
#[derive(Debug)]
pub struct Pkcs11Backend {
    context: Arc<Pkcs11Context>,
    handle: CK_SESSION_HANDLE,
}

impl Pkcs11Backend {
    pub fn open(context: Arc<Pkcs11Context>, slot_id: CK_SLOT_ID, read_write: bool) -> Result<Self, Error> {
        // C_OpenSession: "For legacy reasons, the CKF_SERIAL_SESSION bit must
        // always be set".
        let mut flags = CKF_SERIAL_SESSION;
        if read_write {
            flags |= CKF_RW_SESSION;
        }

        let handle = context.ctx().open_session(slot_id, flags, None, None)?;
        trace!("PKCS#11: Opened session {} on slot {}", handle, slot_id);

        Ok(Pkcs11Backend { context, handle })
    }

    pub fn handle(&self) -> CK_SESSION_HANDLE {
        self.handle
    }

    /// Runs `op` with a `CK_MECHANISM` for `mechanism`.
    ///
    /// The parameter is copied into an 8 byte aligned buffer first as the
    /// library reads it as a C structure.
    fn with_mechanism(
        mechanism: &Mechanism<'_>,
        op: impl FnOnce(&CK_MECHANISM) -> Result<(), Pkcs11Error>,
    ) -> Result<(), BoundaryError> {
        let parameter = mechanism.parameter();
        let parameter_len = CK_ULONG::try_from(parameter.len()).map_err(|_| {
            BoundaryError::Library(format!("mechanism parameter of {} bytes is too large", parameter.len()))
        })?;
        let mut aligned = vec![0u64; parameter.len().div_ceil(8)];
        unsafe { ptr::copy_nonoverlapping(parameter.as_ptr(), aligned.as_mut_ptr().cast::<u8>(), parameter.len()) };

        let ck_mechanism = CK_MECHANISM {
            mechanism: mechanism.mechanism_type(),
            pParameter: if parameter.is_empty() {
                ptr::null_mut()
            } else {
                aligned.as_mut_ptr().cast()
            },
            ulParameterLen: parameter_len,
        };
        Ok(op(&ck_mechanism)?)
    }
}

impl Drop for Pkcs11Backend {
    fn drop(&mut self) {
        trace!("PKCS#11: Closing session {}", self.handle);
        if let Err(err) = self.context.ctx().close_session(self.handle) {
            warn!("PKCS#11: Failed to close session {}: {}", self.handle, err);
        }
    }
}

fn check_rv(rv: CK_RV) -> Result<(), BoundaryError> {
    if rv == CKR_OK {
        Ok(())
    } else {
        Err(BoundaryError::Status(rv))
    }
}

fn ck_template(template: &[Attribute]) -> Vec<CK_ATTRIBUTE> {
    template
        .iter()
        .map(|attr| CK_ATTRIBUTE::new(attr.attr_type).with_bytes(&attr.value))
        .collect()
}

impl SessionBackend for Pkcs11Backend {
    fn get_attribute_value(
        &mut self,
        object: CK_OBJECT_HANDLE,
        types: &[CK_ATTRIBUTE_TYPE],
    ) -> Result<Vec<Attribute>, BoundaryError> {
        let ctx = self.context.ctx();
        trace!("PKCS#11: C_GetAttributeValue({}, {:?})", object, types);

        // First pass: learn the lengths
        let mut template: Vec<CK_ATTRIBUTE> = types.iter().map(|t| CK_ATTRIBUTE::new(*t)).collect();
        let lengths: Vec<CK_ULONG> = {
            let (rv, res) = ctx.get_attribute_value(self.handle, object, &mut template)?;
            check_rv(rv)?;
            res.iter().map(|attr| attr.ulValueLen).collect()
        };

        // CK_UNAVAILABLE_INFORMATION only comes with a failure status, don't
        // try to allocate it should a library report it anyway.
        if lengths.contains(&CK_ULONG::MAX) {
            return Err(BoundaryError::Library(
                "attribute value length reported as unavailable".to_string(),
            ));
        }

        // Second pass: fetch the values
        let mut values: Vec<Vec<u8>> = lengths.iter().map(|len| vec![0; *len as usize]).collect();
        let mut template: Vec<CK_ATTRIBUTE> = types
            .iter()
            .zip(values.iter_mut())
            .map(|(t, value)| CK_ATTRIBUTE::new(*t).with_bytes(value.as_mut_slice()))
            .collect();
        let (rv, res) = ctx.get_attribute_value(self.handle, object, &mut template)?;
        check_rv(rv)?;

        let attributes = res
            .iter()
            .zip(values)
            .map(|(attr, mut value)| {
                value.truncate(attr.ulValueLen as usize);
                Attribute::new(attr.attrType, value)
            })
            .collect();
        Ok(attributes)
    }

    fn set_attribute_value(&mut self, object: CK_OBJECT_HANDLE, template: &[Attribute]) -> Result<(), BoundaryError> {
        trace!("PKCS#11: C_SetAttributeValue({}, {} attribute(s))", object, template.len());
        let ck_template = ck_template(template);
        Ok(self
            .context
            .ctx()
            .set_attribute_value(self.handle, object, &ck_template)?)
    }

    fn copy_object(
        &mut self,
        object: CK_OBJECT_HANDLE,
        template: &[Attribute],
    ) -> Result<CK_OBJECT_HANDLE, BoundaryError> {
        trace!("PKCS#11: C_CopyObject({}, {} attribute(s))", object, template.len());
        let ck_template = ck_template(template);
        Ok(self.context.ctx().copy_object(self.handle, object, &ck_template)?)
    }

    fn destroy_object(&mut self, object: CK_OBJECT_HANDLE) -> Result<(), BoundaryError> {
        trace!("PKCS#11: C_DestroyObject({})", object);
        Ok(self.context.ctx().destroy_object(self.handle, object)?)
    }

    fn decrypt_init(&mut self, mechanism: &Mechanism<'_>, key: CK_OBJECT_HANDLE) -> Result<(), BoundaryError> {
        trace!("PKCS#11: C_DecryptInit({}, {})", mechanism, key);
        let ctx = self.context.ctx();
        Self::with_mechanism(mechanism, |mech| ctx.decrypt_init(self.handle, mech, key))?;
        Ok(())
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, BoundaryError> {
        trace!("PKCS#11: C_Decrypt({} bytes)", ciphertext.len());
        Ok(self.context.ctx().decrypt(self.handle, ciphertext)?)
    }

    // Note: this fails for keys with CKA_ALWAYS_AUTHENTICATE set, as those need
    // a C_Login immediately before C_SignInit.
    fn sign_init(&mut self, mechanism: &Mechanism<'_>, key: CK_OBJECT_HANDLE) -> Result<(), BoundaryError> {
        trace!("PKCS#11: C_SignInit({}, {})", mechanism, key);
        let ctx = self.context.ctx();
        Self::with_mechanism(mechanism, |mech| ctx.sign_init(self.handle, mech, key))?;
        Ok(())
    }

    fn sign(&mut self, data: &[u8]) -> Result<Vec<u8>, BoundaryError> {
        trace!("PKCS#11: C_Sign({} bytes)", data.len());
        Ok(self.context.ctx().sign(self.handle, data)?)
    }

    fn verify_init(&mut self, mechanism: &Mechanism<'_>, key: CK_OBJECT_HANDLE) -> Result<(), BoundaryError> {
        trace!("PKCS#11: C_VerifyInit({}, {})", mechanism, key);
        let ctx = self.context.ctx();
        Self::with_mechanism(mechanism, |mech| ctx.verify_init(self.handle, mech, key))?;
        Ok(())
    }

    fn verify(&mut self, data: &[u8], signature: &[u8]) -> Result<(), BoundaryError> {
        trace!("PKCS#11: C_Verify({} bytes, {} byte signature)", data.len(), signature.len());
        Ok(self.context.ctx().verify(self.handle, data, signature)?)
    }

    fn encrypt_init(&mut self, mechanism: &Mechanism<'_>, key: CK_OBJECT_HANDLE) -> Result<(), BoundaryError> {
        trace!("PKCS#11: C_EncryptInit({}, {})", mechanism, key);
        let ctx = self.context.ctx();
        Self::with_mechanism(mechanism, |mech| ctx.encrypt_init(self.handle, mech, key))?;
        Ok(())
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, BoundaryError> {
        trace!("PKCS#11: C_Encrypt({} bytes)", plaintext.len());
        Ok(self.context.ctx().encrypt(self.handle, plaintext)?)
    }
}
