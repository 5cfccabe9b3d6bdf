//! Unified error types for the FireCAM firmware.
//!
//! Each subsystem defines its own small error enum; all of them funnel into
//! the top-level [`Error`] so that `main`'s task-entry boundary can format
//! any failure uniformly via `anyhow`.

use std::fmt;

/// Firmware-wide `Result` alias for the top-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Every fallible operation that isn't already scoped to a subsystem error
/// funnels into this type.
#[derive(Debug)]
pub enum Error {
    /// A networking operation failed.
    Net(NetError),
    /// The command/response protocol failed to parse or handle a message.
    Proto(ProtoError),
    /// A camera or thermal imager operation failed.
    Imager(ImagerError),
    /// An SD card operation failed.
    Card(CardError),
    /// The persistent store or RTC failed.
    Store(StoreError),
    /// Peripheral initialisation failed.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Net(e) => write!(f, "net: {e}"),
            Self::Proto(e) => write!(f, "proto: {e}"),
            Self::Imager(e) => write!(f, "imager: {e}"),
            Self::Card(e) => write!(f, "card: {e}"),
            Self::Store(e) => write!(f, "store: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

impl From<NetError> for Error {
    fn from(e: NetError) -> Self {
        Self::Net(e)
    }
}

impl From<ProtoError> for Error {
    fn from(e: ProtoError) -> Self {
        Self::Proto(e)
    }
}

impl From<ImagerError> for Error {
    fn from(e: ImagerError) -> Self {
        Self::Imager(e)
    }
}

impl From<CardError> for Error {
    fn from(e: CardError) -> Self {
        Self::Card(e)
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

// ---------------------------------------------------------------------------
// Networking errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    /// The configured Wi-Fi password is invalid (wrong length for WPA2).
    InvalidPassword,
    /// The configured Wi-Fi SSID is invalid (wrong length).
    InvalidSsid,
    /// The Wi-Fi driver failed to initialise.
    InitFailed,
    /// The Wi-Fi driver failed to apply a configuration.
    ConfigFailed,
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPassword => write!(f, "invalid Wi-Fi password"),
            Self::InvalidSsid => write!(f, "invalid Wi-Fi SSID"),
            Self::InitFailed => write!(f, "Wi-Fi driver initialization failed"),
            Self::ConfigFailed => write!(f, "Wi-Fi driver configuration failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Protocol errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtoError {
    /// The payload was not valid JSON.
    BadJson,
    /// The envelope carried no `cmd` field.
    NoCommand,
    /// The command's `args` did not match the expected shape.
    BadArgs,
    /// The `cmd` field named a command this firmware doesn't implement.
    UnknownCommand,
}

impl fmt::Display for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadJson => write!(f, "malformed JSON payload"),
            Self::NoCommand => write!(f, "missing command"),
            Self::BadArgs => write!(f, "invalid command arguments"),
            Self::UnknownCommand => write!(f, "unknown command"),
        }
    }
}

// ---------------------------------------------------------------------------
// Imager errors (ArduCAM JPEG imager and Lepton radiometric imager)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagerError {
    /// The camera's FIFO length register reported an implausible value.
    FifoLengthOutOfRange(u32),
    /// An SPI transfer to or from the imager failed.
    SpiTransfer,
    /// A CCI (I2C control) register access timed out.
    CciTimeout,
    /// The Lepton reported a non-zero result code for the last command.
    CciResult(u8),
}

impl fmt::Display for ImagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FifoLengthOutOfRange(len) => write!(f, "FIFO length out of range: {len}"),
            Self::SpiTransfer => write!(f, "SPI transfer failed"),
            Self::CciTimeout => write!(f, "CCI register access timed out"),
            Self::CciResult(code) => write!(f, "Lepton command failed with code {code}"),
        }
    }
}

// ---------------------------------------------------------------------------
// SD card errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardError {
    /// No card is present in the slot.
    NotPresent,
    /// The card failed to mount.
    MountFailed,
    /// A directory could not be created.
    Directory(String),
    /// A file could not be created or written.
    Write(String),
}

impl fmt::Display for CardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPresent => write!(f, "no SD card present"),
            Self::MountFailed => write!(f, "SD card mount failed"),
            Self::Directory(path) => write!(f, "could not create directory {path}"),
            Self::Write(path) => write!(f, "could not write {path}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Persistent store / RTC errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Reading from the RTC (time or SRAM) failed.
    DeviceRead,
    /// Writing to the RTC (time or SRAM) failed.
    DeviceWrite,
    /// The store task is no longer running.
    TaskGone,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceRead => write!(f, "RTC read failed"),
            Self::DeviceWrite => write!(f, "RTC write failed"),
            Self::TaskGone => write!(f, "store task is no longer running"),
        }
    }
}
