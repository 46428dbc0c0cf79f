use std::fmt;
use std::num::TryFromIntError;

use pkcs11::errors::Error as Pkcs11Error;
use pkcs11::types::*;

//------------ BoundaryError -------------------------------------------------

/// A failure reported by the layer that makes the actual native calls.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BoundaryError {
    /// The token returned a status other than `CKR_OK`.
    Status(CK_RV),

    /// The binding itself failed before or around the native call, e.g. the
    /// loaded library does not export a required function.
    Library(String),
}

impl BoundaryError {
    pub fn status(&self) -> Option<CK_RV> {
        match self {
            BoundaryError::Status(rv) => Some(*rv),
            BoundaryError::Library(_) => None,
        }
    }

    pub fn is_status(&self, rv: CK_RV) -> bool {
        self.status() == Some(rv)
    }
}

impl fmt::Display for BoundaryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BoundaryError::Status(rv) => match status_name(*rv) {
                Some(name) => write!(f, "PKCS#11 call failed with {} (0x{:08X})", name, rv),
                None => write!(f, "PKCS#11 call failed with status 0x{:08X}", rv),
            },
            BoundaryError::Library(msg) => write!(f, "PKCS#11 library error: {}", msg),
        }
    }
}

impl std::error::Error for BoundaryError {}

impl From<Pkcs11Error> for BoundaryError {
    fn from(err: Pkcs11Error) -> Self {
        match err {
            Pkcs11Error::Pkcs11(rv) => BoundaryError::Status(rv),
            other => BoundaryError::Library(other.to_string()),
        }
    }
}

/// Names of the status codes most often seen from tokens. Anything else is
/// shown as a bare number.
fn status_name(rv: CK_RV) -> Option<&'static str> {
    let name = match rv {
        CKR_OK => "CKR_OK",
        CKR_HOST_MEMORY => "CKR_HOST_MEMORY",
        CKR_GENERAL_ERROR => "CKR_GENERAL_ERROR",
        CKR_FUNCTION_FAILED => "CKR_FUNCTION_FAILED",
        CKR_ARGUMENTS_BAD => "CKR_ARGUMENTS_BAD",
        CKR_ATTRIBUTE_READ_ONLY => "CKR_ATTRIBUTE_READ_ONLY",
        CKR_ATTRIBUTE_SENSITIVE => "CKR_ATTRIBUTE_SENSITIVE",
        CKR_ATTRIBUTE_TYPE_INVALID => "CKR_ATTRIBUTE_TYPE_INVALID",
        CKR_ATTRIBUTE_VALUE_INVALID => "CKR_ATTRIBUTE_VALUE_INVALID",
        CKR_DATA_INVALID => "CKR_DATA_INVALID",
        CKR_DATA_LEN_RANGE => "CKR_DATA_LEN_RANGE",
        CKR_DEVICE_ERROR => "CKR_DEVICE_ERROR",
        CKR_DEVICE_REMOVED => "CKR_DEVICE_REMOVED",
        CKR_ENCRYPTED_DATA_INVALID => "CKR_ENCRYPTED_DATA_INVALID",
        CKR_ENCRYPTED_DATA_LEN_RANGE => "CKR_ENCRYPTED_DATA_LEN_RANGE",
        CKR_FUNCTION_NOT_SUPPORTED => "CKR_FUNCTION_NOT_SUPPORTED",
        CKR_KEY_HANDLE_INVALID => "CKR_KEY_HANDLE_INVALID",
        CKR_KEY_TYPE_INCONSISTENT => "CKR_KEY_TYPE_INCONSISTENT",
        CKR_KEY_FUNCTION_NOT_PERMITTED => "CKR_KEY_FUNCTION_NOT_PERMITTED",
        CKR_MECHANISM_INVALID => "CKR_MECHANISM_INVALID",
        CKR_MECHANISM_PARAM_INVALID => "CKR_MECHANISM_PARAM_INVALID",
        CKR_OBJECT_HANDLE_INVALID => "CKR_OBJECT_HANDLE_INVALID",
        CKR_OPERATION_ACTIVE => "CKR_OPERATION_ACTIVE",
        CKR_OPERATION_NOT_INITIALIZED => "CKR_OPERATION_NOT_INITIALIZED",
        CKR_SESSION_CLOSED => "CKR_SESSION_CLOSED",
        CKR_SESSION_HANDLE_INVALID => "CKR_SESSION_HANDLE_INVALID",
        CKR_SESSION_READ_ONLY => "CKR_SESSION_READ_ONLY",
        CKR_SIGNATURE_INVALID => "CKR_SIGNATURE_INVALID",
        CKR_SIGNATURE_LEN_RANGE => "CKR_SIGNATURE_LEN_RANGE",
        CKR_TEMPLATE_INCOMPLETE => "CKR_TEMPLATE_INCOMPLETE",
        CKR_TEMPLATE_INCONSISTENT => "CKR_TEMPLATE_INCONSISTENT",
        CKR_TOKEN_NOT_PRESENT => "CKR_TOKEN_NOT_PRESENT",
        CKR_USER_NOT_LOGGED_IN => "CKR_USER_NOT_LOGGED_IN",
        CKR_BUFFER_TOO_SMALL => "CKR_BUFFER_TOO_SMALL",
        CKR_CRYPTOKI_NOT_INITIALIZED => "CKR_CRYPTOKI_NOT_INITIALIZED",
        _ => return None,
    };
    Some(name)
}

//------------ Error ---------------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// The native layer reported a failure. Passed on as is, never retried.
    Boundary(BoundaryError),

    /// A single attribute was requested but none came back.
    AttributeNotFound,

    /// A single attribute was requested but this many came back.
    TooManyAttributes(usize),

    /// Foreign memory for a mechanism parameter could not be allocated.
    Allocation { len: usize },

    /// Bytes did not have the size of the native structure they were read as.
    ParameterLayout { expected: usize, found: usize },

    /// A length or size does not fit the native `CK_ULONG`.
    IntConversion(TryFromIntError),
}

impl Error {
    /// Returns the native status code, if this error carries one.
    pub fn status(&self) -> Option<CK_RV> {
        match self {
            Error::Boundary(err) => err.status(),
            _ => None,
        }
    }

    /// Whether a verification failed because the signature did not match,
    /// as opposed to failing for any other reason.
    pub fn is_signature_invalid(&self) -> bool {
        self.status() == Some(CKR_SIGNATURE_INVALID)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Boundary(e) => e.fmt(f),
            Error::AttributeNotFound => write!(f, "attribute not found"),
            Error::TooManyAttributes(n) => write!(f, "too many attributes found: expected 1, got {}", n),
            Error::Allocation { len } => write!(f, "could not allocate {} bytes of parameter memory", len),
            Error::ParameterLayout { expected, found } => write!(
                f,
                "parameter has the wrong size for its native layout: expected {} bytes, found {}",
                expected, found
            ),
            Error::IntConversion(e) => write!(f, "value does not fit a CK_ULONG: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Boundary(e) => Some(e),
            Error::IntConversion(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BoundaryError> for Error {
    fn from(e: BoundaryError) -> Self {
        Error::Boundary(e)
    }
}

impl From<TryFromIntError> for Error {
    fn from(e: TryFromIntError) -> Self {
        Error::IntConversion(e)
    }
}

impl From<Pkcs11Error> for Error {
    fn from(e: Pkcs11Error) -> Self {
        Error::Boundary(e.into())
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_name_well_known_status_codes() {
        let err = BoundaryError::Status(CKR_SIGNATURE_INVALID);
        assert_eq!(
            err.to_string(),
            "PKCS#11 call failed with CKR_SIGNATURE_INVALID (0x000000C0)"
        );

        let err = BoundaryError::Status(0x8000_0001);
        assert_eq!(err.to_string(), "PKCS#11 call failed with status 0x80000001");
    }

    #[test]
    fn should_recognise_invalid_signature() {
        assert!(Error::from(BoundaryError::Status(CKR_SIGNATURE_INVALID)).is_signature_invalid());
        assert!(!Error::from(BoundaryError::Status(CKR_DEVICE_ERROR)).is_signature_invalid());
        assert!(!Error::AttributeNotFound.is_signature_invalid());
    }

    #[test]
    fn should_keep_status_from_binding_errors() {
        let err: BoundaryError = Pkcs11Error::Pkcs11(CKR_KEY_HANDLE_INVALID).into();
        assert_eq!(err, BoundaryError::Status(CKR_KEY_HANDLE_INVALID));
    }

    #[test]
    fn should_report_int_conversion_failures() {
        let err: Error = u8::try_from(300u32).unwrap_err().into();
        assert!(matches!(err, Error::IntConversion(_)));
        assert!(err.to_string().starts_with("value does not fit a CK_ULONG"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
