use anyhow::Context as _;
use clap::Parser;
use devnode_config::{Arguments, Tool};
use devnode_node::{
    AnvilParameters, EventKind, Instance, KatanaParameters, StartOptions, anvil, katana,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set the tracing subscriber")?;

    let arguments = Arguments::parse();
    info!(tool = %arguments.tool, "Launching developer node");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build the tokio runtime")?
        .block_on(run(arguments))
}

async fn run(arguments: Arguments) -> anyhow::Result<()> {
    let instance = create_instance(&arguments);

    instance.on(EventKind::Message, |event| {
        if let Some(line) = event.line() {
            println!("{line}");
        }
    });
    let (exit_sender, mut exits) = mpsc::unbounded_channel();
    instance.on(EventKind::Exit, move |event| {
        let _ = exit_sender.send(event.exit_code().flatten());
    });

    instance
        .start(StartOptions::default())
        .await
        .with_context(|| format!("Failed to launch {}", arguments.tool))?;
    info!(
        name = instance.name(),
        host = instance.host(),
        port = instance.port(),
        process_id = instance.process_id(),
        "The node is ready"
    );

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Received Ctrl-C, stopping the node");
            instance.stop().await.context("Failed to stop the node")?;
        }
        code = exits.recv() => {
            warn!(code = ?code.flatten(), "The node exited on its own");
        }
    }

    Ok(())
}

fn create_instance(arguments: &Arguments) -> Instance {
    match arguments.tool {
        Tool::Anvil => anvil()
            .with_configuration(arguments)
            .create(AnvilParameters {
                binary: arguments.binary.clone(),
                host: arguments.host.clone(),
                port: arguments.port,
                chain_id: arguments.chain_id,
                accounts: arguments.accounts,
                block_time: arguments.block_time,
                ..Default::default()
            }),
        Tool::Katana => katana()
            .with_configuration(arguments)
            .create(KatanaParameters {
                binary: arguments.binary.clone(),
                host: arguments.host.clone(),
                port: arguments.port,
                chain_id: arguments.chain_id,
                accounts: arguments.accounts,
                block_time: arguments.block_time,
                ..Default::default()
            }),
    }
}
