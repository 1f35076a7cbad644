// Session persistence module
// One boolean token in data/savedata.txt next to the executable.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

const SAVE_DIR: &str = "data";
const SAVE_FILE: &str = "savedata.txt";

/// Directory the running executable lives in. `None` when the OS will not
/// say, in which case session state is simply not persisted.
pub fn install_dir() -> Option<PathBuf> {
    let exe = env::current_exe().ok()?;
    exe.parent().map(Path::to_path_buf)
}

fn save_path(base: &Path) -> PathBuf {
    base.join(SAVE_DIR).join(SAVE_FILE)
}

/// Read the persisted maximize flag. A missing or unreadable file, or any
/// token other than `1`, reads as "not maximized".
pub fn load_maximized(base: &Path) -> bool {
    match fs::read_to_string(save_path(base)) {
        Ok(contents) => contents.trim() == "1",
        Err(err) => {
            debug!("no session file: {}", err);
            false
        }
    }
}

/// Write the maximize flag. Failures only show up in debug logs; the next
/// run falls back to the default.
pub fn store_maximized(base: &Path, maximized: bool) {
    let path = save_path(base);
    if let Some(dir) = path.parent() {
        if let Err(err) = fs::create_dir_all(dir) {
            debug!("could not create {}: {}", dir.display(), err);
            return;
        }
    }
    match fs::write(&path, if maximized { "1" } else { "0" }) {
        Ok(()) => debug!("saved session to {}", path.display()),
        Err(err) => debug!("could not save session: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_reads_unmaximized() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!load_maximized(dir.path()));
    }

    #[test]
    fn test_flag_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        store_maximized(dir.path(), true);
        assert!(load_maximized(dir.path()));

        store_maximized(dir.path(), false);
        assert!(!load_maximized(dir.path()));
    }

    #[test]
    fn test_junk_token_reads_unmaximized() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join(SAVE_DIR);
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join(SAVE_FILE), "maximized").unwrap();
        assert!(!load_maximized(dir.path()));
    }

    #[test]
    fn test_whitespace_around_token_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join(SAVE_DIR);
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join(SAVE_FILE), "1\n").unwrap();
        assert!(load_maximized(dir.path()));
    }
}
