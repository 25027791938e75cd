use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, Stdio};

#[cfg(unix)]
use expectrl::WaitStatus;
use expectrl::Session;
use futures_util::{Stream, StreamExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::archive;
use crate::error::{install, Error, Result};

const STEAMCMD_CDN: &str = "https://steamcdn-a.akamaihd.net/client/installer";

#[cfg(target_os = "windows")]
const STEAMCMD_ARCHIVE: &str = "steamcmd.zip";

#[cfg(target_os = "macos")]
const STEAMCMD_ARCHIVE: &str = "steamcmd_osx.tar.gz";

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const STEAMCMD_ARCHIVE: &str = "steamcmd_linux.tar.gz";

#[cfg(target_os = "windows")]
const STEAMCMD_EXECUTABLE: &str = "steamcmd.exe";

#[cfg(not(target_os = "windows"))]
const STEAMCMD_EXECUTABLE: &str = "steamcmd.sh";

/// SteamCMD exits with this code when the app has no depot for this OS.
const EXIT_UNSUPPORTED_PLATFORM: i32 = 8;

/// Returned by the bootstrap run after SteamCMD replaced its own binaries.
const EXIT_SELF_UPDATED: i32 = 7;

/// Removes CSI (`ESC [ ... final`) and OSC (`ESC ] ... BEL`) sequences and
/// carriage returns from one line of terminal output.
fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\x1b' => match chars.next() {
                Some('[') => {
                    for c in chars.by_ref() {
                        if ('@'..='~').contains(&c) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    while let Some(c) = chars.next() {
                        if c == '\x07' {
                            break;
                        }
                        if c == '\x1b' && chars.next_if_eq(&'\\').is_some() {
                            break;
                        }
                    }
                }
                // Two-byte escape, e.g. `ESC =` from the Windows console.
                _ => {}
            },
            '\r' => {}
            c => out.push(c),
        }
    }
    out
}

/// One progress snapshot reported by SteamCMD while updating an app.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressEvent {
    pub total: Option<u64>,
    pub amount: Option<u64>,
    /// SteamCMD phase label, e.g. `downloading` or `verifying`.
    pub state: Option<String>,
}

/// Parses SteamCMD progress lines like:
/// ` Update state (0x61) downloading, progress: 12.34 (1234 / 10000)`
pub fn parse_progress(line: &str) -> Option<ProgressEvent> {
    let start = line.find("Update state (")?;
    let rest = &line[start + "Update state (".len()..];
    let (_code, rest) = rest.split_once(") ")?;
    let (state, rest) = rest.split_once(", progress: ")?;
    let (_pct, rest) = rest.split_once(" (")?;
    let (amount, rest) = rest.split_once(" / ")?;
    let total = rest.trim_end().strip_suffix(')')?;

    Some(ProgressEvent {
        total: Some(total.trim().parse().ok()?),
        amount: Some(amount.trim().parse().ok()?),
        state: Some(state.trim().to_string()),
    })
}

/// Maps a finished SteamCMD process to the crate's error set.
///
/// `None` means the update succeeded.
fn decode_exit(code: Option<i32>, last_error: Option<&str>) -> Option<Error> {
    let detail = last_error.map(|e| format!(": {e}")).unwrap_or_default();
    match code {
        Some(0) => None,
        Some(EXIT_UNSUPPORTED_PLATFORM) => Some(Error::UnsupportedPlatform),
        Some(code) => Some(install(format!("exit code {code}{detail}"))),
        None => Some(install(format!("terminated by a signal{detail}"))),
    }
}

/// A SteamCMD installation bound to one install directory.
pub struct SteamCmd {
    executable_path: PathBuf,
    install_dir: PathBuf,
}

impl SteamCmd {
    /// Makes sure SteamCMD lives in `bin_dir` and is up to date.
    ///
    /// Downloads and extracts the platform bootstrap archive when the
    /// executable is missing, then lets SteamCMD update itself once.
    pub async fn init(bin_dir: &Path, install_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(bin_dir)?;
        std::fs::create_dir_all(install_dir)?;

        let executable_path = bin_dir.join(STEAMCMD_EXECUTABLE);
        if !executable_path.exists() {
            install_steamcmd(bin_dir).await?;
            if !executable_path.exists() {
                return Err(install(format!(
                    "{STEAMCMD_ARCHIVE} did not contain {STEAMCMD_EXECUTABLE}"
                )));
            }
        } else {
            log::info!("SteamCMD already installed at {}", executable_path.display());
        }

        let steamcmd = Self::with_executable(executable_path, install_dir.to_path_buf());
        steamcmd.self_update().await?;
        Ok(steamcmd)
    }

    /// Wraps an existing SteamCMD executable without bootstrapping it.
    pub fn with_executable(executable_path: PathBuf, install_dir: PathBuf) -> Self {
        Self {
            executable_path,
            install_dir,
        }
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    async fn self_update(&self) -> Result<()> {
        log::info!("Running SteamCMD self-update");
        let out = Command::new(&self.executable_path)
            .arg("+quit")
            .stdin(Stdio::null())
            .current_dir(self.executable_dir())
            .output()
            .await
            .map_err(|e| install(format!("failed to spawn SteamCMD: {e}")))?;

        for line in String::from_utf8_lossy(&out.stdout).lines() {
            log::info!("SteamCMD: {}", strip_ansi(line));
        }

        match out.status.code() {
            Some(0) | Some(EXIT_SELF_UPDATED) => Ok(()),
            code => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                log::error!("SteamCMD self-update failed ({code:?}): {stderr}");
                Err(install(format!(
                    "self-update exited with {}",
                    code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}"))
                )))
            }
        }
    }

    fn executable_dir(&self) -> &Path {
        self.executable_path.parent().unwrap_or(&self.install_dir)
    }

    /// Starts `app_update` for `app_id` as an anonymous user.
    ///
    /// SteamCMD runs on a pseudo-terminal: with plain pipes it block-buffers
    /// its output and progress would only arrive once it exits.
    pub fn update_app(&self, app_id: &str) -> Result<AppUpdate> {
        if !self.executable_path.is_file() {
            return Err(install(format!(
                "SteamCMD not found at {}",
                self.executable_path.display()
            )));
        }

        let install_dir = self.install_dir.to_string_lossy().to_string();
        let args = [
            "+@ShutdownOnFailedCommand",
            "1",
            "+@NoPromptForPassword",
            "1",
            "+force_install_dir",
            install_dir.as_str(),
            "+login",
            "anonymous",
            "+app_update",
            app_id,
            "+quit",
        ];
        log::info!("Spawning SteamCMD {}", args.join(" "));

        let mut cmd = StdCommand::new(&self.executable_path);
        cmd.args(args).current_dir(self.executable_dir());

        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let exit = tokio::task::spawn_blocking(move || run_on_pty(cmd, tx));

        Ok(AppUpdate {
            app_id: app_id.to_string(),
            exit,
            lines: rx,
            last_error: None,
            done: false,
        })
    }
}

/// Runs `cmd` on a pseudo-terminal, forwarding each output line to `tx`.
///
/// Returns the exit code, or `None` when the process died from a signal or
/// the receiver went away first.
fn run_on_pty(cmd: StdCommand, tx: mpsc::UnboundedSender<String>) -> Result<Option<i32>> {
    let mut session =
        Session::spawn(cmd).map_err(|e| install(format!("failed to spawn SteamCMD: {e}")))?;

    {
        let mut reader = std::io::BufReader::new(&mut session);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                // Linux reports EIO on the master side once the child is gone.
                Err(e) => {
                    log::debug!("SteamCMD pty closed: {e}");
                    break;
                }
            }
            // Progress redraws are separated by bare carriage returns.
            let chunk = String::from_utf8_lossy(&buf);
            for line in chunk.split(['\r', '\n']).filter(|l| !l.trim().is_empty()) {
                if tx.send(line.to_string()).is_err() {
                    log::warn!("SteamCMD output dropped; stopping the update");
                    return Ok(None);
                }
            }
        }
    }

    wait_exit_code(&mut session)
}

#[cfg(unix)]
fn wait_exit_code(session: &mut Session) -> Result<Option<i32>> {
    match session.get_process().wait() {
        Ok(WaitStatus::Exited(_, code)) => Ok(Some(code)),
        Ok(status) => {
            log::warn!("SteamCMD did not exit normally: {status:?}");
            Ok(None)
        }
        Err(e) => Err(install(format!("failed to wait for SteamCMD: {e}"))),
    }
}

#[cfg(windows)]
fn wait_exit_code(session: &mut Session) -> Result<Option<i32>> {
    session
        .get_process_mut()
        .wait(None)
        .map(|code| Some(code as i32))
        .map_err(|_| install("failed to wait for SteamCMD"))
}

/// A running `app_update`, consumed event by event.
pub struct AppUpdate {
    app_id: String,
    exit: JoinHandle<Result<Option<i32>>>,
    lines: mpsc::UnboundedReceiver<String>,
    last_error: Option<String>,
    done: bool,
}

impl AppUpdate {
    /// Next progress event, the terminal error, or `None` once SteamCMD
    /// exited cleanly.
    pub async fn next_event(&mut self) -> Option<Result<ProgressEvent>> {
        if self.done {
            return None;
        }

        while let Some(line) = self.lines.recv().await {
            let line = strip_ansi(&line);
            log::info!("SteamCMD: {line}");
            if line.contains("ERROR!") {
                self.last_error = Some(line.trim().to_string());
            }
            if let Some(event) = parse_progress(&line) {
                return Some(Ok(event));
            }
        }

        // The pty closed: the process is exiting.
        self.done = true;
        let code = match (&mut self.exit).await {
            Ok(Ok(code)) => code,
            Ok(Err(e)) => return Some(Err(e)),
            Err(e) => return Some(Err(install(format!("SteamCMD reader task failed: {e}")))),
        };
        log::info!("SteamCMD app_update {} finished with {code:?}", self.app_id);
        decode_exit(code, self.last_error.as_deref()).map(Err)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<ProgressEvent>> {
        futures_util::stream::unfold(self, |mut update| async move {
            update.next_event().await.map(|item| (item, update))
        })
    }
}

async fn install_steamcmd(bin_dir: &Path) -> Result<()> {
    let download_url = format!("{STEAMCMD_CDN}/{STEAMCMD_ARCHIVE}");
    let archive_path = bin_dir.join(STEAMCMD_ARCHIVE);
    log::info!(
        "Downloading SteamCMD from {download_url} to {}",
        archive_path.display()
    );

    // Stream download into file (avoid holding the archive in memory).
    let client = reqwest::Client::new();
    let response = client
        .get(&download_url)
        .header("User-Agent", concat!("steamserver/", env!("CARGO_PKG_VERSION")))
        .send()
        .await
        .map_err(|e| install(format!("failed to download SteamCMD: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        return Err(install(format!(
            "SteamCMD download failed with status {status}"
        )));
    }

    let mut file = std::fs::File::create(&archive_path)?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| install(e.to_string()))?;
        file.write_all(&chunk)?;
    }
    drop(file);

    let is_zip = STEAMCMD_ARCHIVE.ends_with(".zip");
    if !is_zip && !archive::looks_like_gzip(&archive_path)? {
        let _ = std::fs::remove_file(&archive_path);
        return Err(install(
            "SteamCMD download is not a valid .tar.gz (got non-gzip response)",
        ));
    }

    log::info!("Extracting SteamCMD to {}", bin_dir.display());
    let archive_clone = archive_path.clone();
    let bin_dir_clone = bin_dir.to_path_buf();
    let extracted = tokio::task::spawn_blocking(move || {
        if is_zip {
            archive::extract_zip(&archive_clone, &bin_dir_clone)
        } else {
            archive::extract_tar_gz(&archive_clone, &bin_dir_clone)
        }
    })
    .await
    .map_err(|e| install(e.to_string()))??;

    // Cleanup archive (best-effort).
    let _ = std::fs::remove_file(&archive_path);

    log::info!("SteamCMD installed ({extracted} entries) at {}", bin_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_update_state_line() {
        let line = " Update state (0x61) downloading, progress: 0.39 (6291456 / 1616227584)";
        assert_eq!(
            parse_progress(line),
            Some(ProgressEvent {
                total: Some(1616227584),
                amount: Some(6291456),
                state: Some("downloading".to_string()),
            })
        );
    }

    #[test]
    fn parses_verifying_with_zero_total() {
        let line = "Update state (0x5) verifying install, progress: 0.00 (0 / 0)\r";
        let event = parse_progress(&strip_ansi(line)).unwrap();
        assert_eq!(event.total, Some(0));
        assert_eq!(event.state.as_deref(), Some("verifying install"));
    }

    #[test]
    fn ignores_other_output() {
        assert_eq!(parse_progress("Logging in user 'anonymous' to Steam Public...OK"), None);
        assert_eq!(parse_progress("Success! App '740' fully installed."), None);
        assert_eq!(
            parse_progress("Update state (0x61) downloading, progress: x (a / b)"),
            None
        );
    }

    #[test]
    fn exit_codes_decode_once() {
        assert!(decode_exit(Some(0), None).is_none());
        assert!(matches!(
            decode_exit(Some(8), Some("ERROR! Failed to install app '1' (Missing configuration)")),
            Some(Error::UnsupportedPlatform)
        ));
        match decode_exit(Some(5), Some("ERROR! Failed to install app '1' (No subscription)")) {
            Some(Error::Install(msg)) => {
                assert!(msg.contains("exit code 5"));
                assert!(msg.contains("No subscription"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(decode_exit(None, None), Some(Error::Install(_))));
    }

    #[test]
    fn strips_color_codes() {
        assert_eq!(strip_ansi("\x1b[0mSteam\x1b[1;32m OK\x1b[0m\r"), "Steam OK");
    }

    #[test]
    fn strips_window_title_and_cursor_sequences() {
        assert_eq!(strip_ansi("\x1b]0;steamcmd\x07Loading\x1b[?25l"), "Loading");
        assert_eq!(strip_ansi("\x1b]2;title\x1b\\ok\x1b="), "ok");
    }

    #[cfg(unix)]
    fn fake_steamcmd(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("steamcmd.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streams_events_then_install_error() {
        let tmp = tempfile::tempdir().unwrap();
        let exe = fake_steamcmd(
            tmp.path(),
            r#"echo "Logging in user 'anonymous' to Steam Public...OK"
echo " Update state (0x61) downloading, progress: 10.00 (10 / 100)"
echo " Update state (0x61) downloading, progress: 50.00 (50 / 100)"
echo "ERROR! Failed to install app '1' (Disk write failure)"
exit 5"#,
        );
        let steamcmd = SteamCmd::with_executable(exe, tmp.path().to_path_buf());
        let items: Vec<_> = steamcmd.update_app("1").unwrap().into_stream().collect().await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap().amount, Some(10));
        assert_eq!(items[1].as_ref().unwrap().amount, Some(50));
        match &items[2] {
            Err(Error::Install(msg)) => assert!(msg.contains("Disk write failure")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_eight_is_unsupported_platform() {
        let tmp = tempfile::tempdir().unwrap();
        let exe = fake_steamcmd(tmp.path(), "exit 8");
        let steamcmd = SteamCmd::with_executable(exe, tmp.path().to_path_buf());
        let items: Vec<_> = steamcmd.update_app("1").unwrap().into_stream().collect().await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(Error::UnsupportedPlatform)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clean_exit_ends_stream() {
        let tmp = tempfile::tempdir().unwrap();
        let exe = fake_steamcmd(
            tmp.path(),
            r#"echo " Update state (0x61) downloading, progress: 100.00 (100 / 100)"
echo "Success! App '1' fully installed.""#,
        );
        let steamcmd = SteamCmd::with_executable(exe, tmp.path().to_path_buf());
        let items: Vec<_> = steamcmd.update_app("1").unwrap().into_stream().collect().await;

        assert_eq!(items.len(), 1);
        assert!(items[0].is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn output_is_a_terminal() {
        let tmp = tempfile::tempdir().unwrap();
        let exe = fake_steamcmd(
            tmp.path(),
            r#"[ -t 1 ] || exit 3
printf ' Update state (0x61) downloading, progress: 1.00 (1 / 100)\r'
printf ' Update state (0x61) downloading, progress: 2.00 (2 / 100)\n'"#,
        );
        let steamcmd = SteamCmd::with_executable(exe, tmp.path().to_path_buf());
        let items: Vec<_> = steamcmd.update_app("1").unwrap().into_stream().collect().await;

        let amounts: Vec<_> = items
            .iter()
            .map(|item| item.as_ref().unwrap().amount)
            .collect();
        assert_eq!(amounts, vec![Some(1), Some(2)]);
    }

    #[test]
    fn missing_executable_is_an_install_error() {
        let tmp = tempfile::tempdir().unwrap();
        let steamcmd =
            SteamCmd::with_executable(tmp.path().join("steamcmd.sh"), tmp.path().to_path_buf());
        assert!(matches!(steamcmd.update_app("1"), Err(Error::Install(_))));
    }
}
