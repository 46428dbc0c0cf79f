use std::fmt;

use pkcs11::types::{CK_ATTRIBUTE_TYPE, CK_OBJECT_HANDLE, CKA_LABEL, CKA_VALUE, CKR_ATTRIBUTE_TYPE_INVALID};

use crate::error::Error;
use crate::session::Session;

//------------ Attribute -----------------------------------------------------

/// An attribute type with its value.
#[derive(Clone, Eq, PartialEq)]
pub struct Attribute {
    pub attr_type: CK_ATTRIBUTE_TYPE,
    pub value: Vec<u8>,
}

impl Attribute {
    pub fn new(attr_type: CK_ATTRIBUTE_TYPE, value: impl Into<Vec<u8>>) -> Self {
        Attribute {
            attr_type,
            value: value.into(),
        }
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("attr_type", &format_args!("0x{:08X}", self.attr_type))
            .field("value", &hex::encode(&self.value))
            .finish()
    }
}

//------------ Object --------------------------------------------------------

/// A handle to an object on the token, tied to the session it was found
/// with.
///
/// An `Object` is a reference, not an owner: copies of it all name the same
/// token object. Once the session is closed, or the object destroyed, further
/// operations fail with whatever the token reports. Operations may also
/// depend on the login state of the session.
#[derive(Clone, Copy, Debug)]
pub struct Object<'a> {
    session: &'a Session,
    handle: CK_OBJECT_HANDLE,
}

impl<'a> Object<'a> {
    pub fn new(session: &'a Session, handle: CK_OBJECT_HANDLE) -> Self {
        Object { session, handle }
    }

    pub fn session(&self) -> &'a Session {
        self.session
    }

    pub fn handle(&self) -> CK_OBJECT_HANDLE {
        self.handle
    }

    /// Returns the label of the object, or an empty string if it has none.
    pub fn label(&self) -> Result<String, Error> {
        let label = self.attribute(CKA_LABEL)?.unwrap_or_default();
        Ok(String::from_utf8_lossy(&label).into_owned())
    }

    /// Returns the `CKA_VALUE` of the object, or nothing if it has none.
    pub fn value(&self) -> Result<Vec<u8>, Error> {
        Ok(self.attribute(CKA_VALUE)?.unwrap_or_default())
    }

    /// Gets exactly one attribute.
    ///
    /// An attribute the object does not have (`CKR_ATTRIBUTE_TYPE_INVALID`)
    /// gives `None` rather than an error. Getting back no attribute at all,
    /// or more than one, is an error.
    pub fn attribute(&self, attr_type: CK_ATTRIBUTE_TYPE) -> Result<Option<Vec<u8>>, Error> {
        let mut session = self.session.lock();

        let mut attrs = match session.get_attribute_value(self.handle, &[attr_type]) {
            Ok(attrs) => attrs,
            Err(err) if err.is_status(CKR_ATTRIBUTE_TYPE_INVALID) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        match attrs.len() {
            0 => Err(Error::AttributeNotFound),
            1 => Ok(attrs.pop().map(|attr| attr.value)),
            n => Err(Error::TooManyAttributes(n)),
        }
    }

    /// Sets exactly one attribute.
    pub fn set(&self, attr_type: CK_ATTRIBUTE_TYPE, value: impl Into<Vec<u8>>) -> Result<(), Error> {
        let template = [Attribute::new(attr_type, value)];
        self.session.lock().set_attribute_value(self.handle, &template)?;
        Ok(())
    }

    /// Makes a copy of the object on the token with the attributes in
    /// `template` applied on top, if the token allows it.
    pub fn copy(&self, template: &[Attribute]) -> Result<Object<'a>, Error> {
        let handle = self.session.lock().copy_object(self.handle, template)?;
        Ok(Object::new(self.session, handle))
    }

    /// Destroys the object on the token.
    ///
    /// This and any other copies of the object are dangling afterwards, using
    /// them fails with whatever the token reports for an unknown handle.
    pub fn destroy(&self) -> Result<(), Error> {
        self.session.lock().destroy_object(self.handle)?;
        Ok(())
    }
}

//------------ Tests ---------------------------------------------------------
