pub mod archive;
pub mod browser;
pub mod catalog;
pub mod config;
pub mod error;
pub mod flow;
pub mod logger;
pub mod paths;
pub mod platform;
pub mod progress;
pub mod selector;
pub mod steamcmd;

use crate::config::Options;
use crate::error::Result;
use crate::flow::{Outcome, State};
use crate::platform::Platform;
use crate::progress::Reporter;
use crate::steamcmd::SteamCmd;

/// One interactive run: prepare SteamCMD, scrape the catalog, prompt, install.
///
/// `Err` means the run stopped before a download was attempted. Install
/// failures are reported to the user and returned as an [`Outcome`].
pub async fn run(options: &Options) -> Result<Outcome> {
    let mut reporter = Reporter::new();
    let result = run_with(options, &mut reporter).await;
    reporter.abandon();
    result
}

async fn run_with(options: &Options, reporter: &mut Reporter) -> Result<Outcome> {
    flow::enter(State::Preparing);
    reporter.spin("Preparing SteamCMD");
    let install_dir = paths::prepare_install_dir(options.install_dir.as_deref())?;
    let steamcmd = SteamCmd::init(&install_dir, &install_dir).await?;
    reporter.stop();
    log::info!("SteamCMD ready, installing into {}", steamcmd.install_dir().display());

    flow::enter(State::FetchingCatalog);
    reporter.spin("Fetching usable game servers");
    let servers = catalog::fetch_catalog(options.browser.as_deref(), &options.catalog_url).await?;
    reporter.stop();

    flow::enter(State::AwaitingSelection);
    let selection = selector::prompt(&servers)?;

    let mut stdout = std::io::stdout();
    let outcome = match steamcmd.update_app(&selection.app_id) {
        Ok(update) => {
            flow::drive_download(
                &selection,
                update.into_stream(),
                reporter,
                &mut stdout,
                Platform::current(),
            )
            .await?
        }
        Err(e) => Outcome::Failed(e),
    };
    flow::report(&outcome, &selection, reporter, &mut stdout)?;
    Ok(outcome)
}
