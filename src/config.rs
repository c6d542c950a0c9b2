//! Parse/build configuration and the process-wide default.

use crate::encoding::EncodingChars;
use crate::error::{Hl7Error, Result};
use crate::reference::ReferenceLibrary;
use crate::schema::{SchemaProvider, SchemaVersion};
use once_cell::sync::OnceCell;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

static GLOBAL: OnceCell<Config> = OnceCell::new();

/// How strictly structure is enforced while building a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationLevel {
    /// Unknown names, cardinality overflow and bad values fail at construction.
    Strict,
    /// Irregular structure is accepted; `validate()` still reports it.
    #[default]
    Tolerant,
    /// Like `Tolerant`, without logging downgrades.
    Quiet,
}

impl ValidationLevel {
    pub fn is_strict(self) -> bool {
        self == ValidationLevel::Strict
    }

    pub fn is_quiet(self) -> bool {
        self == ValidationLevel::Quiet
    }
}

impl FromStr for ValidationLevel {
    type Err = Hl7Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(ValidationLevel::Strict),
            "tolerant" => Ok(ValidationLevel::Tolerant),
            "quiet" => Ok(ValidationLevel::Quiet),
            _ => Err(Hl7Error::OperationNotAllowed(format!(
                "unknown validation level {}",
                s
            ))),
        }
    }
}

/// Everything a tree needs besides its text: version, strictness, separators and
/// the schema to resolve names against. Cheap to clone.
#[derive(Clone)]
pub struct Config {
    pub version: SchemaVersion,
    pub validation_level: ValidationLevel,
    pub encoding_chars: EncodingChars,
    pub schema: Arc<dyn SchemaProvider>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("version", &self.version)
            .field("validation_level", &self.validation_level)
            .field("encoding_chars", &self.encoding_chars)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Defaults over the bundled reference schemas.
    pub fn new() -> Result<Self> {
        let schema: Arc<dyn SchemaProvider> = ReferenceLibrary::bundled()?;
        Ok(Config {
            version: SchemaVersion::default(),
            validation_level: ValidationLevel::default(),
            encoding_chars: EncodingChars::default(),
            schema,
        })
    }

    pub fn with_schema(schema: Arc<dyn SchemaProvider>) -> Self {
        Config {
            version: SchemaVersion::default(),
            validation_level: ValidationLevel::default(),
            encoding_chars: EncodingChars::default(),
            schema,
        }
    }

    pub fn version(mut self, version: SchemaVersion) -> Self {
        self.version = version;
        self
    }

    pub fn validation_level(mut self, level: ValidationLevel) -> Self {
        self.validation_level = level;
        self
    }

    pub fn encoding_chars(mut self, encoding_chars: EncodingChars) -> Self {
        self.encoding_chars = encoding_chars;
        self
    }

    pub fn strict(self) -> Self {
        self.validation_level(ValidationLevel::Strict)
    }

    /// Process-wide default, built from [`Config::new`] on first use unless
    /// [`Config::init_global`] ran before.
    pub fn global() -> Result<&'static Config> {
        GLOBAL.get_or_try_init(Config::new)
    }

    /// Install the process-wide default; fails once a default exists.
    pub fn init_global(config: Config) -> Result<()> {
        GLOBAL.set(config).map_err(|_| {
            Hl7Error::OperationNotAllowed("global configuration already initialised".to_string())
        })
    }
}
