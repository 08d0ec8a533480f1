pub mod file;
pub mod settings;

pub use self::{file::File, settings::Settings};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which bitcoin network the external wallet operates on.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Main,
    Test,
    Regtest,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Data {
    pub dir: PathBuf,
}
