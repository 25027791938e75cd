use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Directory under `lib/` that holds SteamCMD and every installed server.
pub const LIB_DIR_NAME: &str = "steamserver";

/// Name the program is installed under.
pub const BIN_NAME: &str = "steamserver";

/// First `name` (or `name.exe` on Windows) in the `PATH`-style list `dirs`.
///
/// The hit is returned as found; symlinks are not resolved.
pub(crate) fn find_in_dirs(name: &str, dirs: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(dirs).find_map(|dir| {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
        #[cfg(target_os = "windows")]
        {
            let exe = dir.join(format!("{name}.exe"));
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}

pub(crate) fn find_in_path(name: &str) -> Option<PathBuf> {
    find_in_dirs(name, &std::env::var_os("PATH")?)
}

/// `<prefix>/bin/steamserver` → `<prefix>/lib/steamserver`.
///
/// Falls back to the executable's own directory when it sits too close to
/// the filesystem root to have two parents.
pub fn install_dir_for_exe(exe: &Path) -> PathBuf {
    let prefix = exe
        .parent() // .../bin
        .and_then(|p| p.parent()) // ...
        .or_else(|| exe.parent())
        .unwrap_or_else(|| Path::new("."));
    prefix.join("lib").join(LIB_DIR_NAME)
}

/// Resolves the install directory (explicit override wins) and creates it.
pub fn prepare_install_dir(override_dir: Option<&Path>) -> Result<PathBuf> {
    let dir = match override_dir {
        Some(dir) => dir.to_path_buf(),
        None => {
            let exe = match find_in_path(BIN_NAME) {
                Some(exe) => exe,
                None => {
                    log::warn!("{BIN_NAME} is not on PATH; using the running executable");
                    std::env::current_exe()?
                }
            };
            install_dir_for_exe(&exe)
        }
    };

    if !dir.exists() {
        log::info!("Creating install dir {}", dir.display());
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_levels_up_under_lib() {
        let exe = Path::new("/usr/local/bin/steamserver");
        assert_eq!(
            install_dir_for_exe(exe),
            PathBuf::from("/usr/local/lib/steamserver")
        );
    }

    #[test]
    fn shallow_exe_stays_inside_root() {
        let exe = Path::new("/steamserver");
        assert_eq!(install_dir_for_exe(exe), PathBuf::from("/lib/steamserver"));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_exe_keeps_the_link_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let cellar_bin = tmp.path().join("Cellar/steamserver/1.0.0/bin");
        let bin = tmp.path().join("bin");
        std::fs::create_dir_all(&cellar_bin).unwrap();
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(cellar_bin.join(BIN_NAME), "").unwrap();
        std::os::unix::fs::symlink(cellar_bin.join(BIN_NAME), bin.join(BIN_NAME)).unwrap();

        let dirs = std::env::join_paths([tmp.path().join("empty"), bin.clone()]).unwrap();
        let exe = find_in_dirs(BIN_NAME, &dirs).unwrap();

        assert_eq!(exe, bin.join(BIN_NAME));
        assert_eq!(install_dir_for_exe(&exe), tmp.path().join("lib").join(LIB_DIR_NAME));
    }

    #[test]
    fn missing_from_every_dir() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(find_in_dirs(BIN_NAME, tmp.path().as_os_str()), None);
    }

    #[test]
    fn override_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("a").join("b");
        let dir = prepare_install_dir(Some(&target)).unwrap();
        assert_eq!(dir, target);
        assert!(target.is_dir());

        // Second call on an existing dir is a no-op.
        prepare_install_dir(Some(&target)).unwrap();
    }
}
