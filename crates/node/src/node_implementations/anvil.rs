//! The anvil node implementation.

use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{Context as _, Result, ensure};
use devnode_common::arguments::to_args;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::{InstanceDefinition, factory::InstanceFactory, process::ProcessCommand};

/// The EVM hardforks that anvil can be launched with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
pub enum Hardfork {
    Frontier,
    Homestead,
    Dao,
    Tangerine,
    SpuriousDragon,
    Byzantium,
    Constantinople,
    Petersburg,
    Istanbul,
    Muirglacier,
    Berlin,
    London,
    ArrowGlacier,
    GrayGlacier,
    Paris,
    Shanghai,
    Cancun,
    Latest,
}

/// How much chain history anvil keeps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PruneHistory {
    /// `true` keeps no history at all.
    Enabled(bool),
    /// Keeps at most this many states in memory.
    States(u64),
}

/// The parameters of an anvil node. Unset parameters fall back to anvil's own defaults.
///
/// Every parameter is passed to anvil as the command line flag of the same name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnvilParameters {
    /// Enable autoImpersonate on startup.
    pub auto_impersonate: Option<bool>,
    /// The path to the anvil binary, `anvil` from `$PATH` by default.
    #[serde(skip)]
    pub binary: Option<PathBuf>,
    /// The number of assumed available compute units per second for the fork provider.
    pub compute_units_per_second: Option<u64>,
    /// Fetch state over a remote endpoint instead of starting from an empty state.
    pub fork_url: Option<String>,
    /// Fetch state from a specific block number. Requires `fork_url`.
    pub fork_block_number: Option<u64>,
    /// Skips fetching the chain id from the remote endpoint. Requires `fork_url`.
    pub fork_chain_id: Option<u64>,
    /// Headers sent along with every request to the remote endpoint. Requires `fork_url`.
    pub fork_header: Option<BTreeMap<String, String>>,
    /// Initial retry backoff on encountering errors.
    pub fork_retry_backoff: Option<u64>,
    pub no_rate_limit: Option<bool>,
    /// Reads all storage slots from the remote endpoint instead of the RPC cache.
    pub no_storage_caching: Option<bool>,
    /// Number of retry requests for spurious networks.
    pub retries: Option<u32>,
    /// Timeout in ms for requests sent to the remote endpoint.
    pub timeout: Option<u64>,
    pub block_base_fee_per_gas: Option<u128>,
    pub chain_id: Option<u64>,
    /// EIP-170 contract code size limit in bytes.
    pub code_size_limit: Option<u64>,
    /// Disables the `call.gas_limit <= block.gas_limit` constraint.
    pub disable_block_gas_limit: Option<bool>,
    pub gas_limit: Option<u128>,
    pub gas_price: Option<u128>,
    /// Number of dev accounts to generate and configure.
    pub accounts: Option<u32>,
    /// The balance of every dev account in Ether.
    pub balance: Option<u128>,
    pub derivation_path: Option<String>,
    pub mnemonic: Option<String>,
    /// The port to listen on, `8545` by default.
    pub port: Option<u16>,
    /// Enables steps tracing used for geth-style debug traces.
    pub steps_tracing: Option<bool>,
    /// The timestamp of the genesis block.
    pub timestamp: Option<u64>,
    pub allow_origin: Option<String>,
    /// Block time in seconds for interval mining.
    pub block_time: Option<u64>,
    pub config_out: Option<String>,
    /// Dumps the state of the chain to this file on exit.
    pub dump_state: Option<String>,
    pub hardfork: Option<Hardfork>,
    /// The host to listen on, `127.0.0.1` by default.
    pub host: Option<String>,
    /// Initializes the genesis block with the given `genesis.json` file.
    pub init: Option<String>,
    pub ipc: Option<String>,
    /// Initializes the chain from a previously saved state snapshot.
    pub load_state: Option<String>,
    pub no_cors: Option<bool>,
    /// Disables auto and interval mining.
    pub no_mining: Option<bool>,
    /// How transactions are sorted in the mempool.
    pub order: Option<String>,
    pub prune_history: Option<PruneHistory>,
    /// Interval in seconds at which the state is dumped to disk.
    pub state_interval: Option<u64>,
    pub silent: Option<bool>,
    /// Alias for both `load_state` and `dump_state`.
    pub state: Option<String>,
    /// Number of blocks with transactions to keep in memory.
    pub transaction_block_keeper: Option<u64>,
}

/// The definition of an anvil node.
#[derive(Clone, Debug)]
pub struct AnvilNode {
    binary: PathBuf,
    host: String,
    port: u16,
    parameters: AnvilParameters,
}

impl AnvilNode {
    pub const NAME: &str = "anvil";
    pub const DEFAULT_HOST: &str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 8545;

    const READY_MARKER: &str = "Listening on";

    pub fn new(parameters: AnvilParameters) -> Self {
        Self {
            binary: parameters
                .binary
                .clone()
                .unwrap_or_else(|| PathBuf::from(Self::NAME)),
            host: parameters
                .host
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_HOST.to_string()),
            port: parameters.port.unwrap_or(Self::DEFAULT_PORT),
            parameters,
        }
    }

    fn validate(&self) -> Result<()> {
        let parameters = &self.parameters;
        if parameters.fork_url.is_none() {
            ensure!(
                parameters.fork_block_number.is_none(),
                "`fork_block_number` requires `fork_url` to be set"
            );
            ensure!(
                parameters.fork_chain_id.is_none(),
                "`fork_chain_id` requires `fork_url` to be set"
            );
            ensure!(
                parameters.fork_header.is_none(),
                "`fork_header` requires `fork_url` to be set"
            );
        }
        Ok(())
    }
}

impl InstanceDefinition for AnvilNode {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn command(&self, port: u16) -> Result<ProcessCommand> {
        self.validate()?;
        let parameters = AnvilParameters {
            port: Some(port),
            ..self.parameters.clone()
        };
        let args = to_args(&parameters).context("Failed to build the anvil arguments")?;
        Ok(ProcessCommand::new(&self.binary).args(args))
    }

    fn is_ready(&self, line: &str) -> bool {
        line.contains(Self::READY_MARKER)
    }
}

/// The factory of anvil instances.
pub fn anvil() -> InstanceFactory<AnvilParameters> {
    crate::define_instance(AnvilNode::new)
}

#[cfg(test)]
mod tests {
    use crate::{
        error::{InstanceError, StartupFailureCause},
        instance::{InstanceStatus, StartOptions},
        testing::ScriptedAdapter,
    };

    use super::*;

    #[test]
    fn defaults_are_applied() {
        // Act
        let node = AnvilNode::new(AnvilParameters::default());

        // Assert
        assert_eq!(node.name(), "anvil");
        assert_eq!(node.host(), "127.0.0.1");
        assert_eq!(node.port(), 8545);
        assert_eq!(
            node.command(8545).expect("Failed to build the command"),
            ProcessCommand::new("anvil").args(["--port", "8545"])
        );
    }

    #[test]
    fn parameters_become_flags_in_declaration_order() {
        // Arrange
        let node = AnvilNode::new(AnvilParameters {
            binary: Some(PathBuf::from("/opt/foundry/bin/anvil")),
            fork_url: Some("https://rpc.example.org".to_string()),
            fork_block_number: Some(19_000_000),
            fork_header: Some(BTreeMap::from([(
                "User-Agent".to_string(),
                "test-agent".to_string(),
            )])),
            no_rate_limit: Some(false),
            chain_id: Some(31337),
            balance: Some(u128::MAX),
            port: Some(8546),
            hardfork: Some(Hardfork::Cancun),
            prune_history: Some(PruneHistory::Enabled(true)),
            silent: Some(true),
            ..Default::default()
        });

        // Act
        let command = node.command(9000).expect("Failed to build the command");

        // Assert
        assert_eq!(command.program, PathBuf::from("/opt/foundry/bin/anvil"));
        assert_eq!(
            command.args,
            [
                "--fork-url",
                "https://rpc.example.org",
                "--fork-block-number",
                "19000000",
                "--fork-header",
                "User-Agent:test-agent",
                "--chain-id",
                "31337",
                "--balance",
                "340282366920938463463374607431768211455",
                "--port",
                "9000",
                "--hardfork",
                "Cancun",
                "--prune-history",
                "--silent",
            ]
        );
    }

    #[test]
    fn prune_history_accepts_a_number_of_states() {
        // Arrange
        let node = AnvilNode::new(AnvilParameters {
            prune_history: Some(PruneHistory::States(50)),
            ..Default::default()
        });

        // Act
        let command = node.command(8545).expect("Failed to build the command");

        // Assert
        assert_eq!(command.args, ["--port", "8545", "--prune-history", "50"]);
    }

    #[test]
    fn fork_parameters_require_a_fork_url() {
        for parameters in [
            AnvilParameters {
                fork_block_number: Some(1),
                ..Default::default()
            },
            AnvilParameters {
                fork_chain_id: Some(1),
                ..Default::default()
            },
            AnvilParameters {
                fork_header: Some(Default::default()),
                ..Default::default()
            },
        ] {
            let error = AnvilNode::new(parameters)
                .command(8545)
                .expect_err("The parameters should have been rejected");
            assert!(error.to_string().contains("requires `fork_url`"));
        }
    }

    #[test]
    fn readiness_is_detected_on_the_listening_line() {
        let node = AnvilNode::new(Default::default());
        assert!(node.is_ready("Listening on 127.0.0.1:8545"));
        assert!(!node.is_ready("Available Accounts"));
    }

    #[tokio::test]
    async fn invalid_fork_parameters_fail_the_start() {
        // Arrange
        let adapter = ScriptedAdapter::default();
        let instance = anvil()
            .with_process_adapter(adapter.clone())
            .create(AnvilParameters {
                fork_block_number: Some(1),
                ..Default::default()
            });

        // Act
        let result = instance.start(StartOptions::default()).await;

        // Assert
        assert!(matches!(
            result,
            Err(InstanceError::StartupFailure {
                cause: StartupFailureCause::InvalidParameters(_),
                ..
            })
        ));
        assert_eq!(instance.status(), InstanceStatus::Stopped);
        assert_eq!(adapter.spawned(), 0);
    }

    #[tokio::test]
    #[ignore = "Requires the anvil binary to be installed"]
    async fn anvil_can_be_started_and_stopped() {
        // Arrange
        let instance = anvil().create(AnvilParameters {
            port: Some(18545),
            ..Default::default()
        });

        // Act
        instance
            .start(StartOptions::default())
            .await
            .expect("Failed to start anvil");

        // Assert
        assert_eq!(instance.status(), InstanceStatus::Started);
        assert!(!instance.messages().is_empty());
        instance.stop().await.expect("Failed to stop anvil");
        assert_eq!(instance.status(), InstanceStatus::Stopped);
    }
}
