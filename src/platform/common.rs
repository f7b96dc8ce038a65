use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Atomically write content to a file
///
/// This function writes to a temporary file in the same directory,
/// syncs to disk, then renames to the target path. Readers never observe
/// a half-written record file.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory_exists(parent)?;
    }

    let temp_path = path.with_extension("tmp");

    {
        let mut file = File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    std::fs::rename(&temp_path, path)
}

/// Append a single line to a file, creating it (and its parents) if needed
pub fn append_line(path: &Path, line: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory_exists(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    file.sync_data()
}

/// Ensure a directory exists, creating it and all parents if needed
pub fn ensure_directory_exists(path: &Path) -> io::Result<()> {
    if path.as_os_str().is_empty() || path.exists() {
        return Ok(());
    }

    std::fs::create_dir_all(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        // Usage history is private to the user
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write() {
        let temp_dir = tempdir().unwrap();
        let test_file = temp_dir.path().join("policies.json");

        let content = b"{\"schema_version\":1}";
        atomic_write(&test_file, content).unwrap();

        let mut file = File::open(&test_file).unwrap();
        let mut read_content = Vec::new();
        file.read_to_end(&mut read_content).unwrap();

        assert_eq!(content, &read_content[..]);
        assert!(!test_file.with_extension("tmp").exists());
    }

    #[test]
    fn test_atomic_write_nested_path() {
        let temp_dir = tempdir().unwrap();
        let test_file = temp_dir.path().join("nested").join("data").join("pauses.json");

        atomic_write(&test_file, b"first").unwrap();
        atomic_write(&test_file, b"second").unwrap();

        assert_eq!(std::fs::read_to_string(&test_file).unwrap(), "second");
    }

    #[test]
    fn test_append_line() {
        let temp_dir = tempdir().unwrap();
        let log = temp_dir.path().join("logs").join("events.jsonl");

        append_line(&log, "one").unwrap();
        append_line(&log, "two").unwrap();

        assert_eq!(std::fs::read_to_string(&log).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn test_ensure_directory_exists_idempotent() {
        let temp_dir = tempdir().unwrap();
        let test_dir = temp_dir.path().join("idempotent_test");

        ensure_directory_exists(&test_dir).unwrap();
        assert!(test_dir.is_dir());

        ensure_directory_exists(&test_dir).unwrap();
        assert!(test_dir.is_dir());
    }
}
