use clap::Parser;

use steamserver_lib::config::Options;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let options = Options::parse();

    // Logging is best-effort; the run itself never depends on it.
    if let Err(e) = steamserver_lib::logger::init() {
        eprintln!("warning: file logging disabled: {e}");
    }
    log::info!("steamserver {} starting", env!("CARGO_PKG_VERSION"));

    match steamserver_lib::run(&options).await {
        Ok(outcome) => log::info!("run finished: {:?}", outcome.state()),
        Err(e) => {
            log::error!("run aborted: {e}");
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
