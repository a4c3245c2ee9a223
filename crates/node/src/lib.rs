//! This crate supervises the lifecycle of developer blockchain nodes.
//!
//! A node is described by an [`InstanceDefinition`]. The [`InstanceFactory`] wraps definitions
//! into [`Instance`]s which spawn the node, wait for it to become ready, stream its output to
//! listeners and stop it again.

use anyhow::Result;

pub mod error;
pub mod events;
pub mod factory;
pub mod instance;
pub mod messages;
pub mod node_implementations;
pub mod process;

#[cfg(test)]
mod testing;

pub use error::{InstanceError, StartupFailureCause};
pub use events::{EventKind, InstanceEvent, ListenerId};
pub use factory::{InstanceFactory, define_instance};
pub use instance::{Instance, InstanceStatus, StartOptions};
pub use node_implementations::{
    anvil::{AnvilNode, AnvilParameters, anvil},
    katana::{KatanaNode, KatanaParameters, katana},
};
pub use process::{ProcessAdapter, ProcessCommand, TokioProcessAdapter};

/// Describes how to launch one node and how to tell when it is ready.
pub trait InstanceDefinition: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn host(&self) -> &str;

    /// The port used when [`StartOptions::port`] is not set.
    fn port(&self) -> u16;

    /// Builds the command that launches the node on the given port.
    ///
    /// This is where the parameters of the node are validated, errors are reported as a startup
    /// failure of the instance.
    fn command(&self, port: u16) -> Result<ProcessCommand>;

    /// Whether the given sanitized stdout line signals that the node accepts requests.
    fn is_ready(&self, line: &str) -> bool;
}
