//! Companion service lifecycle for StreamGo.
//!
//! The host application depends on a separate background executable (the
//! companion service). This crate locates it, starts it detached, remembers
//! whether this process started it, and terminates it only when it is ours.
//!
//! # Architecture
//!
//! - [`probe`]: the [`ProcessProbe`] liveness queries and the wider
//!   [`ProcessControl`] seam (spawn and kill) with an OS-backed
//!   implementation, [`SystemProcesses`].
//! - [`controller`]: [`ServiceController`], generic over the process seam so
//!   the ownership rules can be tested without touching real processes.
//! - [`config`]: names, paths and delays, loadable from settings files.
//!
//! # Example
//!
//! ```no_run
//! use sg_companion::{CompanionConfig, ServiceController, TerminationOutcome};
//!
//! async fn run() -> sg_companion::Result<()> {
//!     let mut controller = ServiceController::system(CompanionConfig::default())?;
//!     let handle = controller.start().await?;
//!     println!("companion at {} (ours: {})", handle.executable_path.display(), handle.started_by_us);
//!
//!     if let TerminationOutcome::Skipped(_) = controller.terminate().await {
//!         println!("left running, someone else owns it");
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod controller;
pub mod error;
pub mod probe;

pub use config::CompanionConfig;
pub use controller::{
    RestartOutcome, ServiceController, ServiceHandle, ServiceState, ServiceStatus, SkipReason,
    TerminationOutcome,
};
pub use error::{Result, ServiceError};
pub use probe::{KillOutcome, LaunchCommand, ProcessControl, ProcessProbe, SystemProcesses};
