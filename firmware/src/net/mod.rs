//! Networking: Wi-Fi configuration and bring-up.

pub mod wifi;
