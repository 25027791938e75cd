use std::io::Write;

use futures_util::{Stream, StreamExt};

use crate::catalog::CatalogEntry;
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::progress::Reporter;
use crate::steamcmd::ProgressEvent;

/// Steps of a run, in the only order they can happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Preparing,
    FetchingCatalog,
    AwaitingSelection,
    CheckingCompatibility,
    Downloading,
    Completed,
    IncompatiblePlatform,
    Failed,
}

pub(crate) fn enter(state: State) {
    log::info!("state -> {state:?}");
}

/// How the download ended.
#[derive(Debug)]
pub enum Outcome {
    Completed,
    IncompatiblePlatform(Platform),
    Failed(Error),
}

impl Outcome {
    pub fn state(&self) -> State {
        match self {
            Outcome::Completed => State::Completed,
            Outcome::IncompatiblePlatform(_) => State::IncompatiblePlatform,
            Outcome::Failed(_) => State::Failed,
        }
    }

    /// The single line shown to the user.
    pub fn message(&self, selection: &CatalogEntry) -> String {
        match self {
            Outcome::Completed => "Download complete!".to_string(),
            Outcome::IncompatiblePlatform(platform) => {
                format!("{} is not compatible with {platform}", selection.name)
            }
            Outcome::Failed(error) => error.to_string(),
        }
    }
}

/// Consumes an app update, moving the reporter from the compatibility
/// spinner to the download bar once SteamCMD reports a size.
///
/// Events before the first non-zero total are ignored. The bar is left as is
/// on failure so the last reported position stays visible.
pub async fn drive_download<S, W>(
    selection: &CatalogEntry,
    events: S,
    reporter: &mut Reporter,
    out: &mut W,
    platform: Platform,
) -> Result<Outcome>
where
    S: Stream<Item = Result<ProgressEvent>>,
    W: Write,
{
    enter(State::CheckingCompatibility);
    reporter.spin("Checking to see if OS is compatible");

    let mut events = std::pin::pin!(events);
    while let Some(item) = events.next().await {
        let event = match item {
            Ok(event) => event,
            Err(Error::UnsupportedPlatform) => {
                reporter.stop();
                log::warn!("{} has no {platform} build", selection.app_id);
                return Ok(Outcome::IncompatiblePlatform(platform));
            }
            Err(e) => {
                reporter.stop();
                log::error!("Update of {} failed: {e}", selection.app_id);
                return Ok(Outcome::Failed(e));
            }
        };

        if reporter.bar_shown() {
            if let Some(amount) = event.amount {
                reporter.update(amount, event.state.as_deref());
            }
            continue;
        }

        if let Some(total) = event.total.filter(|&t| t > 0) {
            reporter.stop();
            writeln!(
                out,
                "Downloading \"{}\" with game id {}",
                selection.name, selection.app_id
            )?;
            enter(State::Downloading);
            reporter.start_bar(total, event.amount.unwrap_or(0));
        }
    }

    reporter.finish();
    reporter.stop();
    Ok(Outcome::Completed)
}

/// Prints the outcome line below whatever the reporter left on screen.
pub fn report<W: Write>(
    outcome: &Outcome,
    selection: &CatalogEntry,
    reporter: &mut Reporter,
    out: &mut W,
) -> Result<()> {
    enter(outcome.state());
    reporter.abandon();
    writeln!(out, "{}", outcome.message(selection))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Mode;
    use futures_util::stream;
    use std::time::Duration;

    fn selection() -> CatalogEntry {
        CatalogEntry {
            name: "Counter-Strike 2".to_string(),
            app_id: "730".to_string(),
        }
    }

    fn progress(total: u64, amount: u64) -> Result<ProgressEvent> {
        Ok(ProgressEvent {
            total: Some(total),
            amount: Some(amount),
            state: Some("downloading".to_string()),
        })
    }

    #[tokio::test]
    async fn unsupported_platform_prints_one_line() {
        let mut reporter = Reporter::hidden();
        let mut out = Vec::new();
        let events = stream::iter(vec![Err(Error::UnsupportedPlatform)]);

        let outcome = drive_download(&selection(), events, &mut reporter, &mut out, Platform::MacOs)
            .await
            .unwrap();
        report(&outcome, &selection(), &mut reporter, &mut out).unwrap();

        assert_eq!(outcome.state(), State::IncompatiblePlatform);
        assert!(!reporter.bar_shown());
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Counter-Strike 2 is not compatible with MacOS\n"
        );
    }

    #[tokio::test]
    async fn generic_error_keeps_last_position() {
        let mut reporter = Reporter::hidden();
        let mut out = Vec::new();
        let events = stream::iter(vec![
            progress(100, 10),
            progress(100, 50),
            Err(Error::Install("exit code 5".to_string())),
        ]);

        let outcome = drive_download(&selection(), events, &mut reporter, &mut out, Platform::Linux)
            .await
            .unwrap();

        assert_eq!(reporter.mode(), Mode::BarActive);
        assert_eq!(reporter.position(), Some(50));
        assert_eq!(outcome.state(), State::Failed);

        report(&outcome, &selection(), &mut reporter, &mut out).unwrap();
        assert_eq!(reporter.mode(), Mode::Idle);
        let printed = String::from_utf8(out).unwrap();
        assert_eq!(
            printed,
            "Downloading \"Counter-Strike 2\" with game id 730\nSteamCMD failed: exit code 5\n"
        );
    }

    #[tokio::test]
    async fn bar_waits_for_a_known_total() {
        let mut reporter = Reporter::hidden();
        let mut out = Vec::new();
        let events = stream::iter(vec![
            Ok(ProgressEvent::default()),
            progress(0, 0),
            progress(200, 20),
            progress(200, 200),
        ]);

        let outcome = drive_download(&selection(), events, &mut reporter, &mut out, Platform::Linux)
            .await
            .unwrap();
        report(&outcome, &selection(), &mut reporter, &mut out).unwrap();

        assert_eq!(outcome.state(), State::Completed);
        assert!(reporter.bar_shown());
        assert_eq!(reporter.mode(), Mode::Idle);
        let printed = String::from_utf8(out).unwrap();
        assert_eq!(printed.matches("Downloading \"").count(), 1);
        assert!(printed.ends_with("Download complete!\n"));
    }

    #[tokio::test]
    async fn unknown_totals_never_start_the_bar() {
        let mut reporter = Reporter::hidden();
        let mut out = Vec::new();
        let events = stream::iter(vec![Ok(ProgressEvent::default()), progress(0, 0)]);

        let outcome = drive_download(&selection(), events, &mut reporter, &mut out, Platform::Linux)
            .await
            .unwrap();

        assert_eq!(outcome.state(), State::Completed);
        assert!(!reporter.bar_shown());
        assert!(!String::from_utf8(out).unwrap().contains("Downloading"));
    }

    #[tokio::test]
    async fn spinner_stays_up_while_total_is_unknown() {
        let mut reporter = Reporter::hidden();
        let mut out = Vec::new();
        let events = stream::iter(vec![Ok(ProgressEvent::default()), progress(0, 0)])
            .chain(stream::pending());

        let pending = tokio::time::timeout(
            Duration::from_millis(50),
            drive_download(&selection(), events, &mut reporter, &mut out, Platform::Linux),
        )
        .await;

        assert!(pending.is_err());
        assert_eq!(reporter.mode(), Mode::Spinning);
        assert!(!reporter.bar_shown());
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn already_installed_completes_without_bar() {
        let mut reporter = Reporter::hidden();
        let mut out = Vec::new();
        let events = stream::iter(Vec::<Result<ProgressEvent>>::new());

        let outcome = drive_download(&selection(), events, &mut reporter, &mut out, Platform::Windows)
            .await
            .unwrap();
        report(&outcome, &selection(), &mut reporter, &mut out).unwrap();

        assert_eq!(outcome.state(), State::Completed);
        assert!(!reporter.bar_shown());
        assert_eq!(reporter.mode(), Mode::Idle);
        assert_eq!(String::from_utf8(out).unwrap(), "Download complete!\n");
    }
}
