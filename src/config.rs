use std::{
    env, fmt,
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
    str::FromStr,
};

use log::{LevelFilter, info};
use pkcs11::types::CK_SLOT_ID;
use serde::{Deserialize, Deserializer, de};
#[cfg(unix)]
use syslog::Facility;

use crate::constants::{DEFAULT_LOG_FILE, DEFAULT_SYSLOG_FACILITY, P11_ENV_LOG_LEVEL};
use crate::error::Error;
use crate::session::{Pkcs11Backend, Pkcs11Context, Session};

//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn log_level() -> LevelFilter {
        match env::var(P11_ENV_LOG_LEVEL) {
            Ok(level) => match LevelFilter::from_str(&level) {
                Ok(level) => level,
                Err(_) => {
                    eprintln!(
                        "Unrecognized value '{}' for log level in env var {}, using 'info'",
                        level, P11_ENV_LOG_LEVEL
                    );
                    LevelFilter::Info
                }
            },
            _ => LevelFilter::Info,
        }
    }
    fn log_type() -> LogType {
        LogType::Stderr
    }
    fn log_file() -> PathBuf {
        PathBuf::from(DEFAULT_LOG_FILE)
    }
    fn syslog_facility() -> String {
        DEFAULT_SYSLOG_FACILITY.to_string()
    }
    fn read_write() -> bool {
        true
    }
}

//------------ Config --------------------------------------------------------

/// Logging setup and, optionally, the token to open a session with.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "ConfigDefaults::log_level", deserialize_with = "de_level_filter")]
    log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    log_type: LogType,

    #[serde(default = "ConfigDefaults::log_file")]
    log_file: PathBuf,

    #[serde(default = "ConfigDefaults::syslog_facility")]
    syslog_facility: String,

    pub pkcs11: Option<Pkcs11Config>,
}

impl Config {
    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn log_type(&self) -> &LogType {
        &self.log_type
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    pub fn read_config(file: &Path) -> Result<Self, ConfigError> {
        let mut v = String::new();
        let mut f = File::open(file)?;
        f.read_to_string(&mut v)?;

        let c: Config = toml::from_str(&v)?;
        Ok(c)
    }

    pub fn verify(&self) -> Result<(), ConfigError> {
        if self.log_type == LogType::File && self.log_file.as_os_str().is_empty() {
            return Err(ConfigError::other("log_type \"file\" requires a log_file"));
        }

        if let Some(pkcs11) = &self.pkcs11 {
            if pkcs11.lib_path.as_os_str().is_empty() {
                return Err(ConfigError::other("pkcs11.lib_path must not be empty"));
            }
        }

        Ok(())
    }

    /// Installs the logger described by this config as the global logger.
    pub fn init_logging(&self) -> Result<(), ConfigError> {
        self.dispatch()?
            .apply()
            .map_err(|e| ConfigError::Other(format!("Failed to init {} logging: {}", self.log_type, e)))
    }

    /// Builds the logger for the configured log type without installing it.
    pub fn dispatch(&self) -> Result<fern::Dispatch, ConfigError> {
        let dispatch = self.fern_logger();
        match self.log_type {
            LogType::Stderr => Ok(dispatch.chain(io::stderr())),
            LogType::File => {
                let file = fern::log_file(&self.log_file).map_err(|err| {
                    ConfigError::Other(format!("Failed to open log file '{}': {}", self.log_file.display(), err))
                })?;
                Ok(dispatch.chain(file))
            }
            #[cfg(unix)]
            LogType::Syslog => {
                let facility = Facility::from_str(&self.syslog_facility)
                    .map_err(|_| ConfigError::Other(format!("Invalid syslog_facility: {}", self.syslog_facility)))?;
                Ok(dispatch.chain(Self::syslog_output(facility)?))
            }
            #[cfg(not(unix))]
            LogType::Syslog => Err(ConfigError::other("syslog is only supported on unix")),
        }
    }

    /// Connects to syslog through the local socket, or failing that over
    /// TCP or UDP on localhost.
    #[cfg(unix)]
    fn syslog_output(facility: Facility) -> Result<fern::Output, ConfigError> {
        let process = env::current_exe()
            .ok()
            .and_then(|path| path.file_name().and_then(|name| name.to_str()).map(ToString::to_string))
            .unwrap_or_else(|| String::from("p11"));
        let formatter = syslog::Formatter3164 {
            facility,
            hostname: None,
            process,
            pid: std::process::id(),
        };
        syslog::unix(formatter.clone())
            .or_else(|_| syslog::tcp(formatter.clone(), ("127.0.0.1", 601)))
            .or_else(|_| syslog::udp(formatter, ("127.0.0.1", 0), ("127.0.0.1", 514)))
            .map(fern::Output::from)
            .map_err(|err| ConfigError::Other(format!("Cannot connect to syslog: {}", err)))
    }

    /// Creates and returns a fern logger at the configured level.
    fn fern_logger(&self) -> fern::Dispatch {
        let show_target = self.log_level == LevelFilter::Trace || self.log_level == LevelFilter::Debug;
        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
    }
}

fn de_level_filter<'de, D>(d: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let string = String::deserialize(d)?;
    LevelFilter::from_str(&string).map_err(de::Error::custom)
}

//------------ Pkcs11Config --------------------------------------------------

/// Where to find the token: the library to load and the slot to open a
/// session on.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Pkcs11Config {
    pub lib_path: PathBuf,

    pub slot_id: CK_SLOT_ID,

    #[serde(default = "ConfigDefaults::read_write")]
    pub read_write: bool,
}

impl Pkcs11Config {
    /// Loads the library, if no other session uses it already, and opens a
    /// session on the configured slot.
    pub fn open_session(&self) -> Result<Session, Error> {
        let context = Pkcs11Context::get_or_load(&self.lib_path)?;
        let backend = Pkcs11Backend::open(context, self.slot_id, self.read_write)?;
        info!(
            "PKCS#11: Opened {} session on slot {} using '{}'",
            if self.read_write { "read/write" } else { "read-only" },
            self.slot_id,
            self.lib_path.display()
        );
        Ok(Session::new(backend))
    }
}

//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    TomlError(toml::de::Error),
    Other(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => e.fmt(f),
            ConfigError::TomlError(e) => e.fmt(f),
            ConfigError::Other(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    pub fn other(s: &str) -> ConfigError {
        ConfigError::Other(s.to_string())
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::IoError(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::TomlError(e)
    }
}

//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LogType {
    Stderr,
    File,
    Syslog,
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LogType::Stderr => write!(f, "stderr"),
            LogType::File => write!(f, "file"),
            LogType::Syslog => write!(f, "syslog"),
        }
    }
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(d: D) -> Result<LogType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        match string.as_str() {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            "syslog" => Ok(LogType::Syslog),
            _ => Err(de::Error::custom(format!(
                "expected \"stderr\", \"file\" or \"syslog\", found: \"{}\"",
                string
            ))),
        }
    }
}

//------------ Tests ---------------------------------------------------------
