use crate::{bitcoin, fiat::Currency, order::Side};
use rust_decimal::Decimal;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "stepswap",
    about = "Peer-to-peer exchange of bitcoin against fiat in bounded-loss steps"
)]
pub struct Options {
    /// Path to the configuration file.
    #[structopt(long = "config", short = "c")]
    pub config_file: Option<PathBuf>,

    #[structopt(subcommand)]
    pub cmd: Command,
}

#[derive(StructOpt, Debug)]
pub enum Command {
    /// Place one order and trade it until completion or cancellation.
    Trade {
        /// "buy" (bid) or "sell" (ask).
        #[structopt(long)]
        side: Side,
        /// Bitcoin amount to trade, e.g. "1.5".
        #[structopt(long)]
        amount: bitcoin::Amount,
        /// Fiat price per whole bitcoin, e.g. "920.50".
        #[structopt(long)]
        price: Decimal,
        /// Currency of the price.
        #[structopt(long, default_value = "EUR")]
        currency: Currency,
    },
    /// Run the broker-side relay server of the overlay.
    RelayServer,
}
