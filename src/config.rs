use std::path::PathBuf;

use clap::Parser;

use crate::catalog::DEFAULT_CATALOG_URL;

/// Pick a Steam dedicated server from SteamDB and install it with SteamCMD.
#[derive(Debug, Clone, Parser)]
#[command(name = "steamserver", version, about)]
pub struct Options {
    /// Where SteamCMD and the servers live [default: <exe>/../../lib/steamserver]
    #[arg(long, env = "STEAMSERVER_DIR", value_name = "DIR")]
    pub install_dir: Option<PathBuf>,

    /// Chrome, Chromium or Edge executable used to load the catalog
    #[arg(long, env = "STEAMSERVER_BROWSER", value_name = "PATH")]
    pub browser: Option<PathBuf>,

    /// Catalog page listing the server apps
    #[arg(long, default_value = DEFAULT_CATALOG_URL, value_name = "URL")]
    pub catalog_url: String,
}
