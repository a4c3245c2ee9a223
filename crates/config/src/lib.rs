//! The configuration used across the devnode crates.

use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

/// The command line arguments of the `devnode` launcher.
#[derive(Debug, Parser, Clone, Serialize, Deserialize)]
#[command(name = "devnode")]
pub struct Arguments {
    /// The developer node to launch.
    #[arg(long = "tool", short, default_value = "anvil")]
    pub tool: Tool,

    /// The path to the node executable.
    ///
    /// By default the binary named after the tool is looked up in `$PATH`.
    #[arg(long = "binary", short)]
    pub binary: Option<PathBuf>,

    /// The host the node will listen on. Defaults to the tool's own default host.
    #[arg(long = "host")]
    pub host: Option<String>,

    /// The port the node will listen on. Defaults to the tool's own default port.
    #[arg(long = "port", short)]
    pub port: Option<u16>,

    /// The chain id of the node.
    #[arg(long = "chain-id")]
    pub chain_id: Option<u64>,

    /// The number of dev accounts to generate.
    #[arg(long = "accounts")]
    pub accounts: Option<u32>,

    /// Block time in seconds for interval mining.
    #[arg(long = "block-time")]
    pub block_time: Option<u64>,

    #[command(flatten)]
    pub supervisor: SupervisorConfiguration,
}

impl Default for Arguments {
    fn default() -> Self {
        Arguments::parse_from(["devnode"])
    }
}

/// Settings shared by every supervised instance.
#[derive(Debug, Args, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupervisorConfiguration {
    /// The maximum number of output lines kept in an instance's message buffer. Once full, the
    /// oldest lines are evicted first. `0` keeps every line.
    #[arg(long = "message-capacity", default_value = "1000")]
    pub message_capacity: usize,

    /// The maximum time in milliseconds to wait for a node to exit once it has been killed.
    #[arg(long = "stop-timeout", default_value = "10000")]
    pub stop_timeout_ms: u64,
}

impl SupervisorConfiguration {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Default for SupervisorConfiguration {
    fn default() -> Self {
        Arguments::default().supervisor
    }
}

impl AsRef<SupervisorConfiguration> for Arguments {
    fn as_ref(&self) -> &SupervisorConfiguration {
        &self.supervisor
    }
}

impl AsRef<SupervisorConfiguration> for SupervisorConfiguration {
    fn as_ref(&self) -> &SupervisorConfiguration {
        self
    }
}

/// The developer nodes that the launcher knows how to start.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ValueEnum,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Tool {
    /// Foundry's local EVM node.
    Anvil,
    /// Dojo's local Starknet sequencer.
    Katana,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied() {
        // Act
        let arguments = Arguments::default();

        // Assert
        assert_eq!(arguments.tool, Tool::Anvil);
        assert_eq!(arguments.port, None);
        assert_eq!(arguments.supervisor.message_capacity, 1000);
        assert_eq!(arguments.supervisor.stop_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn flags_are_parsed() {
        // Act
        let arguments = Arguments::parse_from([
            "devnode",
            "--tool",
            "katana",
            "--port",
            "5051",
            "--message-capacity",
            "0",
        ]);

        // Assert
        assert_eq!(arguments.tool, Tool::Katana);
        assert_eq!(arguments.port, Some(5051));
        assert_eq!(arguments.supervisor.message_capacity, 0);
    }

    #[test]
    fn tools_display_as_their_binary_names() {
        assert_eq!(Tool::Anvil.to_string(), "anvil");
        assert_eq!(Tool::Katana.as_ref(), "katana");
    }
}
