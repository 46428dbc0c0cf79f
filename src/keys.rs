//! Public and private key views on token objects.
//!
//! Any [`Object`] can be turned into a [`PublicKey`] or [`PrivateKey`] and
//! back, nothing is checked. It is up to the caller to make sure the object
//! really is such a key, for instance because it was found with a template
//! that includes `CKA_CLASS` set to `CKO_PUBLIC_KEY` or `CKO_PRIVATE_KEY`.
//!
//! Each operation holds the session lock for both the init call and the
//! call doing the actual work. If the init call fails the second call is not
//! made.

use crate::crypto::Mechanism;
use crate::error::Error;
use crate::object::Object;

//------------ PublicKey -----------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct PublicKey<'a>(Object<'a>);

impl<'a> PublicKey<'a> {
    pub fn object(&self) -> Object<'a> {
        self.0
    }

    /// Verifies a signature over a message. A signature that does not match
    /// is an error for which [`Error::is_signature_invalid`] holds.
    pub fn verify(&self, mechanism: &Mechanism<'_>, message: &[u8], signature: &[u8]) -> Result<(), Error> {
        let mut session = self.0.session().lock();
        session.verify_init(mechanism, self.0.handle())?;
        session.verify(message, signature)?;
        Ok(())
    }

    /// Encrypts a plaintext.
    pub fn encrypt(&self, mechanism: &Mechanism<'_>, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let mut session = self.0.session().lock();
        session.encrypt_init(mechanism, self.0.handle())?;
        Ok(session.encrypt(plaintext)?)
    }
}

impl<'a> From<Object<'a>> for PublicKey<'a> {
    fn from(object: Object<'a>) -> Self {
        PublicKey(object)
    }
}

impl<'a> From<PublicKey<'a>> for Object<'a> {
    fn from(key: PublicKey<'a>) -> Self {
        key.0
    }
}

//------------ PrivateKey ----------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct PrivateKey<'a>(Object<'a>);

impl<'a> PrivateKey<'a> {
    pub fn object(&self) -> Object<'a> {
        self.0
    }

    /// Decrypts a ciphertext.
    pub fn decrypt(&self, mechanism: &Mechanism<'_>, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        let mut session = self.0.session().lock();
        session.decrypt_init(mechanism, self.0.handle())?;
        Ok(session.decrypt(ciphertext)?)
    }

    /// Signs a message.
    pub fn sign(&self, mechanism: &Mechanism<'_>, message: &[u8]) -> Result<Vec<u8>, Error> {
        let mut session = self.0.session().lock();
        session.sign_init(mechanism, self.0.handle())?;
        Ok(session.sign(message)?)
    }
}

impl<'a> From<Object<'a>> for PrivateKey<'a> {
    fn from(object: Object<'a>) -> Self {
        PrivateKey(object)
    }
}

impl<'a> From<PrivateKey<'a>> for Object<'a> {
    fn from(key: PrivateKey<'a>) -> Self {
        key.0
    }
}

//------------ Object conversions --------------------------------------------

impl<'a> Object<'a> {
    pub fn into_public_key(self) -> PublicKey<'a> {
        PublicKey(self)
    }

    pub fn into_private_key(self) -> PrivateKey<'a> {
        PrivateKey(self)
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use pkcs11::types::{
        CKA_LABEL, CKM_AES_GCM, CKM_RSA_PKCS, CKM_SHA256_RSA_PKCS, CKR_KEY_HANDLE_INVALID, CKR_SIGNATURE_INVALID,
    };

    use super::*;
    use crate::crypto::GcmParams;
    use crate::error::BoundaryError;
    use crate::session::Session;
    use crate::test::{Call, CallLog, MockBackend};

    #[test]
    fn decrypt_runs_init_then_decrypt() {
        let log = CallLog::default();
        let session = Session::new(MockBackend::new(log.clone()).with_output(b"plaintext".to_vec()));
        let key = Object::new(&session, 21).into_private_key();

        let plaintext = key.decrypt(&Mechanism::new(CKM_RSA_PKCS), b"ciphertext").unwrap();
        assert_eq!(plaintext, b"plaintext");
        assert_eq!(
            log.calls(),
            vec![
                Call::DecryptInit {
                    mechanism: CKM_RSA_PKCS,
                    key: 21
                },
                Call::Decrypt {
                    key: 21,
                    input: b"ciphertext".to_vec()
                },
            ]
        );
    }

    #[test]
    fn encrypt_runs_init_then_encrypt() {
        let log = CallLog::default();
        let session = Session::new(MockBackend::new(log.clone()).with_output(b"ciphertext".to_vec()));
        let key = PublicKey::from(Object::new(&session, 4));

        let mut gcm = GcmParams::new(vec![0; 12], Vec::new(), 128);
        let mech = Mechanism::with_gcm_params(CKM_AES_GCM, &mut gcm).unwrap();
        assert_eq!(key.encrypt(&mech, b"plaintext").unwrap(), b"ciphertext");
        assert_eq!(gcm.iv(), Some(vec![0; 12]));
        gcm.free();

        assert_eq!(log.calls().len(), 2);
        assert_eq!(
            log.calls()[0],
            Call::EncryptInit {
                mechanism: CKM_AES_GCM,
                key: 4
            }
        );
    }

    #[test]
    fn verify_reports_invalid_signature() {
        let log = CallLog::default();
        let session = Session::new(MockBackend::new(log.clone()).failing_operation(CKR_SIGNATURE_INVALID));
        let key = Object::new(&session, 8).into_public_key();

        let err = key
            .verify(&Mechanism::new(CKM_SHA256_RSA_PKCS), b"hello", b"bad signature")
            .unwrap_err();
        assert!(err.is_signature_invalid());
        assert_eq!(log.calls().len(), 2);
        assert!(session.try_lock().is_some());
    }

    #[test]
    fn verify_accepts_matching_signature() {
        let session = Session::new(MockBackend::new(CallLog::default()).with_signature(b"sig".to_vec()));
        let key = Object::new(&session, 8).into_public_key();

        key.verify(&Mechanism::new(CKM_SHA256_RSA_PKCS), b"hello", b"sig").unwrap();
    }

    #[test]
    fn init_failure_skips_operation() {
        let log = CallLog::default();
        let session = Session::new(MockBackend::new(log.clone()).failing_init(CKR_KEY_HANDLE_INVALID));
        let key = Object::new(&session, 99).into_private_key();

        let err = key.sign(&Mechanism::new(CKM_SHA256_RSA_PKCS), b"hello").unwrap_err();
        assert_eq!(err, Error::Boundary(BoundaryError::Status(CKR_KEY_HANDLE_INVALID)));
        assert_eq!(
            log.calls(),
            vec![Call::SignInit {
                mechanism: CKM_SHA256_RSA_PKCS,
                key: 99
            }]
        );
        assert!(session.try_lock().is_some());
    }

    #[test]
    fn key_views_alias_the_same_object() {
        let session = Session::new(MockBackend::new(CallLog::default()).with_attribute(12, CKA_LABEL, b"rsa".to_vec()));
        let private = Object::new(&session, 12).into_private_key();

        let object: Object = private.into();
        let public = PublicKey::from(object);
        assert_eq!(public.object().handle(), 12);
        assert_eq!(private.object().label().unwrap(), "rsa");
    }
}
