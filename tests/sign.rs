//! Signing and verifying through key views on a shared session.

use p11::crypto::Mechanism;
use p11::test::{Call, CallLog, MockBackend, init_logging};
use p11::{Object, PrivateKey, PublicKey, Session};
use pkcs11::types::{CKA_LABEL, CKM_SHA256_RSA_PKCS};

const SIGNATURE: &[u8] = &[0x30, 0x45, 0x02, 0x21, 0x00, 0xA1];

#[test]
fn sign_hello() {
    init_logging();

    let log = CallLog::default();
    let session = Session::new(MockBackend::new(log.clone()).with_signature(SIGNATURE.to_vec()));
    let key = PrivateKey::from(Object::new(&session, 0x42));

    let signature = key.sign(&Mechanism::new(CKM_SHA256_RSA_PKCS), b"hello").unwrap();

    assert_eq!(signature, SIGNATURE);
    assert_eq!(session.lock_count(), 1);
    assert_eq!(
        log.calls(),
        vec![
            Call::SignInit {
                mechanism: CKM_SHA256_RSA_PKCS,
                key: 0x42
            },
            Call::Sign {
                key: 0x42,
                input: b"hello".to_vec()
            },
        ]
    );
    assert!(session.try_lock().is_some());
}

#[test]
fn sign_then_verify_with_public_key() {
    init_logging();

    let log = CallLog::default();
    let session = Session::new(
        MockBackend::new(log.clone())
            .with_signature(SIGNATURE.to_vec())
            .with_attribute(1, CKA_LABEL, b"signer".to_vec())
            .with_attribute(2, CKA_LABEL, b"signer".to_vec()),
    );
    let private = Object::new(&session, 1).into_private_key();
    let public: PublicKey = Object::new(&session, 2).into();
    assert_eq!(private.object().label().unwrap(), public.object().label().unwrap());

    let mechanism = Mechanism::new(CKM_SHA256_RSA_PKCS);
    let signature = private.sign(&mechanism, b"hello").unwrap();
    public.verify(&mechanism, b"hello", &signature).unwrap();

    let err = public.verify(&mechanism, b"hello", b"forged").unwrap_err();
    assert!(err.is_signature_invalid());

    let inits = log.calls().into_iter().filter(Call::is_init).count();
    assert_eq!(inits, 3);
}
