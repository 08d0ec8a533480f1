#![warn(
    unused_extern_crates,
    missing_debug_implementations,
    rust_2018_idioms,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::fallible_impl_from,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap,
    clippy::dbg_macro
)]
#![forbid(unsafe_code)]

use anyhow::Context;
use conquer_once::Lazy;
use std::path::PathBuf;

pub mod bitcoin;
pub mod broker;
pub mod command;
pub mod config;
pub mod controller;
pub mod exchange;
pub mod fiat;
pub mod funds;
pub mod options;
pub mod order;
pub mod payment;
pub mod rate;
pub mod relay;
pub mod submission;
pub mod trace;
pub mod wallet;

pub use controller::Controller;
pub use order::{Order, OrderId};
pub use rate::Price;
pub use relay::OverlayId;

pub static SECP: Lazy<::bitcoin::secp256k1::Secp256k1<::bitcoin::secp256k1::All>> =
    Lazy::new(::bitcoin::secp256k1::Secp256k1::new);

fn project_dirs() -> anyhow::Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "stepswap")
        .context("could not determine home directory")
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.toml"))
}

pub fn data_dir() -> anyhow::Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

#[cfg(test)]
pub mod test_support;
