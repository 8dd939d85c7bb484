//! Allocator configuration.
//!
//! Values come from four environment variables:
//!
//! | Variable        | Meaning                                   | Default |
//! |-----------------|-------------------------------------------|---------|
//! | `MALLOCVERBOSE` | print the statistics report at exit       | on      |
//! | `MALLOCCHECK`   | run the heap validator after every call   | on in debug builds |
//! | `MALLOCLOG`     | minimum lifecycle log level kept          | `warn`  |
//! | `MALLOCGROWTH`  | minimum bytes requested per heap growth   | 64 KiB  |
//!
//! Parsing is pure and never allocates: callers supply a lookup function, so
//! the process heap can read the environment through `getenv` while it is
//! still bootstrapping itself.

use crate::malloc::header::align_up;
use crate::malloc::{AllocatorLogLevel, HeapViolation};

pub const ENV_VERBOSE: &str = "MALLOCVERBOSE";
pub const ENV_CHECK: &str = "MALLOCCHECK";
pub const ENV_LOG: &str = "MALLOCLOG";
pub const ENV_GROWTH: &str = "MALLOCGROWTH";

/// Default number of bytes requested from the heap source per growth.
pub const DEFAULT_GROWTH_INCREMENT: usize = 64 * 1024;

/// When the heap validator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckMode {
    /// Only on explicit `check_heap` calls.
    Off,
    /// After every mutating operation.
    EveryOperation,
}

impl CheckMode {
    #[must_use]
    pub const fn default_for_build() -> Self {
        if cfg!(debug_assertions) {
            Self::EveryOperation
        } else {
            Self::Off
        }
    }

    /// Parses a check mode string, ignoring ASCII case.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        let s = s.trim();
        let any = |names: &[&str]| names.iter().any(|n| n.eq_ignore_ascii_case(s));
        if any(&["off", "none", "no", "0", "false"]) {
            Some(Self::Off)
        } else if any(&["on", "every", "always", "full", "yes", "1", "true"]) {
            Some(Self::EveryOperation)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn checks_every_operation(self) -> bool {
        matches!(self, Self::EveryOperation)
    }
}

/// Called with the first violation found by an automatic heap check.
///
/// Runs after the heap guard has been released.
pub type ViolationHandler = fn(&HeapViolation);

/// Default handler: panic with the diagnostic.
pub fn panic_on_violation(violation: &HeapViolation) {
    panic!("heap check failed: {violation}");
}

/// Tunables for one heap instance.
#[derive(Debug, Clone, Copy)]
pub struct HeapConfig {
    /// Minimum number of bytes requested from the source per growth.
    pub growth_increment: usize,
    pub check_mode: CheckMode,
    /// Minimum level of lifecycle records retained.
    pub log_level: AllocatorLogLevel,
    /// Print the statistics report when the process exits.
    pub report_at_exit: bool,
    pub violation_handler: ViolationHandler,
}

impl HeapConfig {
    pub const DEFAULT: Self = Self {
        growth_increment: DEFAULT_GROWTH_INCREMENT,
        check_mode: CheckMode::default_for_build(),
        log_level: AllocatorLogLevel::Warn,
        report_at_exit: true,
        violation_handler: panic_on_violation,
    };

    /// Builds a config from an environment-style lookup.
    ///
    /// Unset or unparseable variables keep their defaults.
    pub fn from_lookup<'a, F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let mut config = Self::DEFAULT;
        if let Some(value) = lookup(ENV_VERBOSE) {
            config.report_at_exit = parse_verbose(value);
        }
        if let Some(mode) = lookup(ENV_CHECK).and_then(CheckMode::from_str_loose) {
            config.check_mode = mode;
        }
        if let Some(level) = lookup(ENV_LOG).and_then(AllocatorLogLevel::from_str_loose) {
            config.log_level = level;
        }
        if let Some(bytes) = lookup(ENV_GROWTH).and_then(parse_growth) {
            config.growth_increment = bytes;
        }
        config
    }

    /// Reads the process environment through `std::env`.
    ///
    /// Allocates; not for use from inside the process heap.
    #[must_use]
    pub fn from_env() -> Self {
        let vars: Vec<(String, String)> = [ENV_VERBOSE, ENV_CHECK, ENV_LOG, ENV_GROWTH]
            .iter()
            .filter_map(|&name| std::env::var(name).ok().map(|v| (name.to_owned(), v)))
            .collect();
        Self::from_lookup(|name: &str| {
            vars.iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        })
    }

    #[must_use]
    pub const fn with_growth_increment(mut self, bytes: usize) -> Self {
        self.growth_increment = bytes;
        self
    }

    #[must_use]
    pub const fn with_check_mode(mut self, mode: CheckMode) -> Self {
        self.check_mode = mode;
        self
    }

    #[must_use]
    pub const fn with_log_level(mut self, level: AllocatorLogLevel) -> Self {
        self.log_level = level;
        self
    }

    #[must_use]
    pub const fn with_report_at_exit(mut self, report: bool) -> Self {
        self.report_at_exit = report;
        self
    }

    #[must_use]
    pub const fn with_violation_handler(mut self, handler: ViolationHandler) -> Self {
        self.violation_handler = handler;
        self
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// `NO` (and the usual spellings of off) disables the report.
fn parse_verbose(value: &str) -> bool {
    let value = value.trim();
    !["no", "off", "0", "false"]
        .iter()
        .any(|n| n.eq_ignore_ascii_case(value))
}

fn parse_growth(value: &str) -> Option<usize> {
    let bytes: usize = value.trim().parse().ok()?;
    if bytes == 0 {
        return None;
    }
    align_up(bytes)
}
