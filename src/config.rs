//! Policies for the two situations the chain cannot resolve on its own: a
//! rejection nobody handles, and a second attempt to settle a deferred.
use crate::Error;
use std::{env, str::FromStr};

pub const UNHANDLED_REJECTION_VAR: &str = "DEFERRED_UNHANDLED_REJECTION";
pub const DOUBLE_SETTLE_VAR: &str = "DEFERRED_DOUBLE_SETTLE";

/// What happens when a rejection finds no error handler down the chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnhandledRejection {
    /// Log it at `error` level, count it on the runtime and carry on.
    #[default]
    Report,
    /// Report it, then panic inside the running task.
    Panic,
}

/// What happens when a settled deferred is asked to settle again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DoubleSettle {
    /// The first settlement wins; later ones are logged and dropped.
    #[default]
    Ignore,
    Panic,
}

impl FromStr for UnhandledRejection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "report" => Ok(UnhandledRejection::Report),
            "panic" => Ok(UnhandledRejection::Panic),
            _ => Err(Error::InvalidConfig {
                key: UNHANDLED_REJECTION_VAR,
                value: s.to_owned(),
            }),
        }
    }
}

impl FromStr for DoubleSettle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ignore" => Ok(DoubleSettle::Ignore),
            "panic" => Ok(DoubleSettle::Panic),
            _ => Err(Error::InvalidConfig {
                key: DOUBLE_SETTLE_VAR,
                value: s.to_owned(),
            }),
        }
    }
}

/// Runtime configuration.
///
/// # Examples
///
/// ```
/// use deferred_chain::{Config, UnhandledRejection};
/// let config = Config::default().unhandled_rejection(UnhandledRejection::Panic);
/// assert_eq!(config.unhandled_rejection, UnhandledRejection::Panic);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Config {
    pub unhandled_rejection: UnhandledRejection,
    pub double_settle: DoubleSettle,
}

impl Config {
    pub fn unhandled_rejection(mut self, policy: UnhandledRejection) -> Self {
        self.unhandled_rejection = policy;
        self
    }

    pub fn double_settle(mut self, policy: DoubleSettle) -> Self {
        self.double_settle = policy;
        self
    }

    /// Reads `DEFERRED_UNHANDLED_REJECTION` and `DEFERRED_DOUBLE_SETTLE`.
    /// Unset variables keep their defaults.
    ///
    /// The thread's default runtime does not read the environment; pass the
    /// result to [`Runtime::new`](crate::Runtime::new) and
    /// [`enter`](crate::Runtime::enter) it.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Config::default();
        if let Some(value) = lookup(UNHANDLED_REJECTION_VAR) {
            config.unhandled_rejection = value.parse()?;
        }
        if let Some(value) = lookup(DOUBLE_SETTLE_VAR) {
            config.double_settle = value.parse()?;
        }
        Ok(config)
    }
}
