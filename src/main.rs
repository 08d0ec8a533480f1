#![recursion_limit = "256"]

use anyhow::Context;
use stepswap::{
    command, config,
    config::Settings,
    options::{self, Options},
    trace,
};
use structopt::StructOpt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::from_args();

    let settings = read_config(&options)
        .and_then(Settings::from_config_file_and_defaults)
        .context("could not initialize configuration")?;

    trace::init_tracing(settings.logging.level)?;

    match options.cmd {
        options::Command::RelayServer => command::relay_server(&settings).await,
        options::Command::Trade { .. } => {
            // Trading needs the external wallet and payment processor
            // clients wired in; this build ships the engine and the relay
            // only.
            anyhow::bail!(
                "no wallet or payment processor client is configured; \
                 see the Wallet and PaymentProcessor contracts for the integration points"
            )
        }
    }
}

fn read_config(options: &Options) -> anyhow::Result<config::File> {
    // if the user specifies a config path, use it
    if let Some(path) = &options.config_file {
        eprintln!("Using config file {}", path.display());

        return config::File::read(&path)
            .with_context(|| format!("failed to read config file {}", path.display()));
    }

    // try to load default config
    let default_path = stepswap::default_config_path()?;

    if !default_path.exists() {
        return Ok(config::File::default());
    }

    eprintln!(
        "Using config file at default path: {}",
        default_path.display()
    );

    config::File::read(&default_path)
        .with_context(|| format!("failed to read config file {}", default_path.display()))
}
