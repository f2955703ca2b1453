//! Library side of the `streamgo` command: logging and settings.

pub mod logging;
pub mod settings;
