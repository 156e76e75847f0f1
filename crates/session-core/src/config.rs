//! Session identity, reset kinds, and runtime options.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use session_file::ConfigurationHeader;

use crate::SessionError;

/// Default delay between two hardware button deliveries, in milliseconds.
pub const DEFAULT_BUTTON_EVENT_THRESHOLD_MS: u64 = 100;
/// Default capacity of each input event queue.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 64;
/// Default name of the dedicated execution thread.
pub const DEFAULT_THREAD_NAME: &str = "session-cpu";

const ROM_FILE_PREFIX: &str = "file:";
const ROM_EMBEDDED_PREFIX: &str = "embedded:";

/// Emulated device model identifier, such as `PalmIIIc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Device(String);

impl Device {
    /// Creates a device identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier string.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the ROM image comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RomSource {
    /// ROM image file on the host.
    File(PathBuf),
    /// ROM image bundled with a bound emulator.
    Embedded {
        /// Name the bound image was registered under.
        name: String,
    },
}

impl RomSource {
    /// Encodes the source as the reference string stored in session files.
    #[must_use]
    pub fn to_reference(&self) -> String {
        match self {
            Self::File(path) => format!("{ROM_FILE_PREFIX}{}", path.display()),
            Self::Embedded { name } => format!("{ROM_EMBEDDED_PREFIX}{name}"),
        }
    }

    /// Decodes a reference string produced by [`RomSource::to_reference`].
    #[must_use]
    pub fn from_reference(reference: &str) -> Option<Self> {
        if let Some(path) = reference.strip_prefix(ROM_FILE_PREFIX) {
            return (!path.is_empty()).then(|| Self::File(PathBuf::from(path)));
        }
        reference
            .strip_prefix(ROM_EMBEDDED_PREFIX)
            .filter(|name| !name.is_empty())
            .map(|name| Self::Embedded {
                name: name.to_owned(),
            })
    }
}

/// Identity of one emulated machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Device model.
    pub device: Device,
    /// Installed RAM in KiB.
    pub ram_size_kib: u32,
    /// ROM image source.
    pub rom: RomSource,
}

impl Configuration {
    /// Creates a configuration.
    #[must_use]
    pub const fn new(device: Device, ram_size_kib: u32, rom: RomSource) -> Self {
        Self {
            device,
            ram_size_kib,
            rom,
        }
    }

    /// RAM size in bytes.
    #[must_use]
    pub const fn ram_size_bytes(&self) -> usize {
        self.ram_size_kib as usize * 1024
    }

    /// Converts to the session-file header form.
    #[must_use]
    pub fn to_header(&self) -> ConfigurationHeader {
        ConfigurationHeader {
            device: self.device.id().to_owned(),
            rom: self.rom.to_reference(),
            ram_size_kib: self.ram_size_kib,
        }
    }

    /// Rebuilds a configuration from a session-file header.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidSessionFile`] for an empty device id, an
    /// unrecognized ROM reference, or a zero RAM size.
    pub fn from_header(header: &ConfigurationHeader) -> Result<Self, SessionError> {
        let invalid = |reason: &str| SessionError::InvalidSessionFile {
            reason: reason.to_owned(),
        };
        if header.device.is_empty() {
            return Err(invalid("empty device identifier"));
        }
        if header.ram_size_kib == 0 {
            return Err(invalid("zero RAM size"));
        }
        let rom = RomSource::from_reference(&header.rom)
            .ok_or_else(|| invalid("unrecognized ROM reference"))?;
        Ok(Self::new(Device::new(&header.device), header.ram_size_kib, rom))
    }
}

/// Severity of a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResetKind {
    /// OS-level restart; hardware state is kept.
    Sys,
    /// Warm reset; storage survives.
    Soft,
    /// Cold reset with the power key held, which offers to erase storage.
    Hard,
    /// Reset with the down key held, which starts the debug boot path.
    Debug,
}

/// Reset request: a kind plus whether system extensions load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResetType {
    /// Reset severity.
    pub kind: ResetKind,
    /// Holds the up key during boot so system extensions are skipped.
    pub no_extensions: bool,
}

impl ResetType {
    /// System reset.
    pub const SYS: Self = Self::new(ResetKind::Sys);
    /// Soft reset.
    pub const SOFT: Self = Self::new(ResetKind::Soft);
    /// Hard reset.
    pub const HARD: Self = Self::new(ResetKind::Hard);
    /// Debug reset.
    pub const DEBUG: Self = Self::new(ResetKind::Debug);

    /// Creates a reset of `kind` with extensions enabled.
    #[must_use]
    pub const fn new(kind: ResetKind) -> Self {
        Self {
            kind,
            no_extensions: false,
        }
    }

    /// Same reset with system extensions disabled.
    #[must_use]
    pub const fn without_extensions(self) -> Self {
        Self {
            kind: self.kind,
            no_extensions: true,
        }
    }

    /// Returns `true` for every kind except [`ResetKind::Sys`].
    #[must_use]
    pub const fn is_hardware(self) -> bool {
        !matches!(self.kind, ResetKind::Sys)
    }
}

/// Whether execution gets a dedicated thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadMode {
    /// A dedicated execution thread runs the engine.
    #[default]
    Dedicated,
    /// The controller's event loop drives the engine through
    /// `execute_incremental`.
    Cooperative,
}

/// Runtime options for a session. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Execution thread model.
    pub thread_mode: ThreadMode,
    /// Minimum delay between two hardware button deliveries.
    pub button_event_threshold_ms: u64,
    /// Capacity of each input event queue.
    pub event_queue_capacity: usize,
    /// Name given to the dedicated execution thread.
    pub thread_name: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            thread_mode: ThreadMode::Dedicated,
            button_event_threshold_ms: DEFAULT_BUTTON_EVENT_THRESHOLD_MS,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
        }
    }
}

impl SessionOptions {
    /// Parses options from JSON. Missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Options`] for malformed JSON or mistyped fields.
    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Button throttle threshold as a duration.
    #[must_use]
    pub const fn button_event_threshold(&self) -> Duration {
        Duration::from_millis(self.button_event_threshold_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Configuration {
        Configuration::new(
            Device::new("PalmIIIc"),
            8192,
            RomSource::File(PathBuf::from("roms/iiic.rom")),
        )
    }

    #[test]
    fn header_round_trip_preserves_configuration() {
        let config = sample();
        assert_eq!(Configuration::from_header(&config.to_header()).unwrap(), config);

        let bound = Configuration::new(
            Device::new("PalmVx"),
            4096,
            RomSource::Embedded {
                name: "bound".to_owned(),
            },
        );
        assert_eq!(Configuration::from_header(&bound.to_header()).unwrap(), bound);
    }

    #[test]
    fn malformed_headers_are_invalid_session_files() {
        let mut header = sample().to_header();
        header.rom = "ftp://elsewhere".to_owned();
        assert!(matches!(
            Configuration::from_header(&header),
            Err(SessionError::InvalidSessionFile { .. })
        ));

        let mut header = sample().to_header();
        header.ram_size_kib = 0;
        assert!(Configuration::from_header(&header).is_err());

        let mut header = sample().to_header();
        header.device.clear();
        assert!(Configuration::from_header(&header).is_err());
    }

    #[test]
    fn empty_rom_references_are_rejected() {
        assert_eq!(RomSource::from_reference("file:"), None);
        assert_eq!(RomSource::from_reference("embedded:"), None);
    }

    #[test]
    fn only_sys_reset_is_not_hardware() {
        assert!(!ResetType::SYS.is_hardware());
        assert!(ResetType::SOFT.is_hardware());
        assert!(ResetType::HARD.without_extensions().is_hardware());
        assert!(ResetType::DEBUG.without_extensions().no_extensions);
    }

    #[test]
    fn options_fill_missing_fields_with_defaults() {
        let options = SessionOptions::from_json(r#"{ "thread_mode": "cooperative" }"#).unwrap();
        assert_eq!(options.thread_mode, ThreadMode::Cooperative);
        assert_eq!(
            options.button_event_threshold(),
            Duration::from_millis(DEFAULT_BUTTON_EVENT_THRESHOLD_MS)
        );
        assert_eq!(options.event_queue_capacity, DEFAULT_EVENT_QUEUE_CAPACITY);
    }

    #[test]
    fn malformed_options_are_rejected() {
        assert!(matches!(
            SessionOptions::from_json(r#"{ "event_queue_capacity": "lots" }"#),
            Err(SessionError::Options(_))
        ));
    }
}
