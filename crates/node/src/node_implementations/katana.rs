//! The katana node implementation.

use std::path::PathBuf;

use anyhow::{Context as _, Result, ensure};
use devnode_common::arguments::to_args;
use serde::{Deserialize, Serialize};

use crate::{InstanceDefinition, factory::InstanceFactory, process::ProcessCommand};

/// The parameters of a katana node. Unset parameters fall back to katana's own defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KatanaParameters {
    /// Number of dev accounts to generate and configure.
    pub accounts: Option<u32>,
    /// Block time in seconds for interval mining.
    pub block_time: Option<u64>,
    /// The path to the katana binary, `katana` from `$PATH` by default.
    #[serde(skip)]
    pub binary: Option<PathBuf>,
    pub chain_id: Option<u64>,
    /// Fetch state over a remote endpoint instead of starting from an empty state.
    pub rpc_url: Option<String>,
    /// Fetch state from a specific block number. Requires `rpc_url`.
    pub fork_block_number: Option<u64>,
    /// The host to listen on, `localhost` by default.
    pub host: Option<String>,
    /// Disables auto and interval mining.
    pub no_mining: Option<bool>,
    /// The port to listen on, `5051` by default.
    pub port: Option<u16>,
    pub silent: Option<bool>,
    pub dev: Option<bool>,
}

/// The definition of a katana node.
#[derive(Clone, Debug)]
pub struct KatanaNode {
    binary: PathBuf,
    host: String,
    port: u16,
    parameters: KatanaParameters,
}

impl KatanaNode {
    pub const NAME: &str = "katana";
    pub const DEFAULT_HOST: &str = "localhost";
    pub const DEFAULT_PORT: u16 = 5051;

    const READY_MARKER: &str = "RPC server started";

    pub fn new(parameters: KatanaParameters) -> Self {
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
}

impl InstanceDefinition for KatanaNode {
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
        ensure!(
            self.parameters.fork_block_number.is_none() || self.parameters.rpc_url.is_some(),
            "`fork_block_number` requires `rpc_url` to be set"
        );
        let parameters = KatanaParameters {
            port: Some(port),
            ..self.parameters.clone()
        };
        let args = to_args(&parameters).context("Failed to build the katana arguments")?;
        Ok(ProcessCommand::new(&self.binary).args(args))
    }

    fn is_ready(&self, line: &str) -> bool {
        line.contains(Self::READY_MARKER)
    }
}

/// The factory of katana instances.
pub fn katana() -> InstanceFactory<KatanaParameters> {
    crate::define_instance(KatanaNode::new)
}
