//! # netgather - Fleet-wide diagnostic collection over SSH
//!
//! `netgather` opens one interactive shell per network device, sends a fixed
//! batch of `show` commands, and captures the output until the device's
//! privileged prompt (`<hostname>#`) reappears. All devices run concurrently;
//! a device that cannot be reached or stalls only affects its own outcome.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netgather::device::{Credential, read_inventory};
//! use netgather::session::{
//!     CommandBatch, Orchestrator, SessionSettings, SshConnector, aggregate_lines,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let devices = read_inventory("hosts.txt")?;
//!     let credential = Credential::new("admin", "password")?;
//!
//!     let settings = SessionSettings::default();
//!     let orchestrator = Orchestrator::new(SshConnector::new(settings.clone()), settings);
//!     let outcomes = orchestrator
//!         .run(devices, credential, CommandBatch::default())
//!         .await;
//!
//!     for line in aggregate_lines(&outcomes) {
//!         println!("{line}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`device`] - Devices, the shared credential and the inventory format
//! - [`session::Orchestrator`] - Concurrent per-device sessions, one outcome each
//! - [`session::collect_transcript`] - Command dispatch and prompt detection
//! - [`session::aggregate_lines`] - Flattened output for display
//! - [`error::GatherError`] - Error type for input and session failures
//! - [`config`] - Built-in commands, timing and SSH algorithm defaults

pub mod config;
pub mod device;
pub mod error;
pub mod password;
pub mod session;
