use std::fmt;

/// OS families SteamCMD builds servers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Windows,
    Linux,
}

impl Platform {
    /// Anything that is neither macOS nor Windows counts as Linux.
    pub fn from_os(os: &str) -> Self {
        match os {
            "macos" => Platform::MacOs,
            "windows" => Platform::Windows,
            _ => Platform::Linux,
        }
    }

    pub fn current() -> Self {
        Self::from_os(std::env::consts::OS)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::MacOs => "MacOS",
            Platform::Windows => "Windows",
            Platform::Linux => "Linux",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_os_defaults_to_linux() {
        assert_eq!(Platform::from_os("macos"), Platform::MacOs);
        assert_eq!(Platform::from_os("windows"), Platform::Windows);
        assert_eq!(Platform::from_os("linux"), Platform::Linux);
        assert_eq!(Platform::from_os("freebsd"), Platform::Linux);
    }

    #[test]
    fn display_names() {
        assert_eq!(Platform::MacOs.to_string(), "MacOS");
        assert_eq!(Platform::Windows.to_string(), "Windows");
        assert_eq!(Platform::Linux.to_string(), "Linux");
    }
}
