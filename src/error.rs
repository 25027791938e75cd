use thiserror::Error;

/// Everything that can end a run early or fail an install.
///
/// `UnsupportedPlatform` and `Install` are the only variants an app update
/// stream ever yields; SteamCMD's exit status is decoded into them once, in
/// [`crate::steamcmd`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to fetch the server catalog: {0}")]
    Catalog(String),

    #[error("the selected app has no build for this platform")]
    UnsupportedPlatform,

    #[error("SteamCMD failed: {0}")]
    Install(String),

    #[error("selection aborted: {0}")]
    Prompt(String),

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn catalog(msg: impl Into<String>) -> Error {
    Error::Catalog(msg.into())
}

pub(crate) fn install(msg: impl Into<String>) -> Error {
    Error::Install(msg.into())
}

pub(crate) fn logging(msg: impl Into<String>) -> Error {
    Error::Logging(msg.into())
}
