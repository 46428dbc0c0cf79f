use pkcs11::types::CK_ULONG;

pub const P11_ENV_LOG_LEVEL: &str = "P11_LOG_LEVEL";

pub const DEFAULT_LOG_FILE: &str = "./p11.log";
pub const DEFAULT_SYSLOG_FACILITY: &str = "daemon";

/// Size of the key encryption key used by the ECDH AES key wrap mechanism, in
/// bits.
pub const ECDH_AES_KEY_WRAP_KEY_BITS: CK_ULONG = 256;
