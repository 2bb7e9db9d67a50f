//! Link configuration parsing and validation.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::{AppError, Result};

/// Baud rate used when none is configured.
pub const DEFAULT_BAUD_RATE: u32 = 57_600;

/// Default upper bound for a single pending incoming line: 1 MiB.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1_048_576;

/// Device-acceptance filter used when no explicit port is configured.
///
/// A port is accepted when every populated field matches its USB
/// descriptor. Non-USB ports never match a filter.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PortFilter {
    /// USB vendor id.
    #[serde(default)]
    pub usb_vendor_id: Option<u16>,
    /// USB product id; only meaningful together with a vendor id.
    #[serde(default)]
    pub usb_product_id: Option<u16>,
}

impl PortFilter {
    /// Check a USB vendor/product pair against this filter.
    #[must_use]
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.usb_vendor_id.map_or(true, |vid| vid == vendor_id)
            && self.usb_product_id.map_or(true, |pid| pid == product_id)
    }
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_true() -> bool {
    true
}

fn default_new_line_character() -> String {
    "\n".into()
}

fn default_max_line_bytes() -> usize {
    DEFAULT_MAX_LINE_BYTES
}

/// Serial link configuration.
///
/// Every field has a default, so an empty TOML document is valid.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LinkConfig {
    /// Line speed passed to the transport.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Log every decoded incoming line.
    #[serde(default)]
    pub log_incoming_serial_data: bool,
    /// Log every encoded outgoing line.
    #[serde(default)]
    pub log_outgoing_serial_data: bool,
    /// Turn numeric-looking strings in outgoing payloads into numbers.
    #[serde(default = "default_true")]
    pub parse_strings_as_numbers: bool,
    /// Warn when an event arrives for a name that was never registered.
    #[serde(default = "default_true")]
    pub warn_about_unregistered_events: bool,
    /// Terminator appended to every outgoing line.
    #[serde(default = "default_new_line_character")]
    pub new_line_character: String,
    /// Port acceptance filters; empty accepts any port.
    #[serde(default)]
    pub filters: Vec<PortFilter>,
    /// Explicit device path, bypassing filter-based selection.
    #[serde(default)]
    pub port: Option<String>,
    /// Maximum length of a pending incoming line before it is discarded.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            log_incoming_serial_data: false,
            log_outgoing_serial_data: false,
            parse_strings_as_numbers: true,
            warn_about_unregistered_events: true,
            new_line_character: default_new_line_character(),
            filters: Vec::new(),
            port: None,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl LinkConfig {
    /// Default configuration with a custom baud rate.
    #[must_use]
    pub fn with_baud_rate(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Self::default()
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check field invariants.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(AppError::Config(
                "baud_rate must be greater than zero".into(),
            ));
        }

        if self.new_line_character.is_empty() {
            return Err(AppError::Config(
                "new_line_character must not be empty".into(),
            ));
        }

        if self.max_line_bytes == 0 {
            return Err(AppError::Config(
                "max_line_bytes must be greater than zero".into(),
            ));
        }

        if self
            .filters
            .iter()
            .any(|f| f.usb_product_id.is_some() && f.usb_vendor_id.is_none())
        {
            return Err(AppError::Config(
                "filters: usb_product_id requires usb_vendor_id".into(),
            ));
        }

        Ok(())
    }
}
