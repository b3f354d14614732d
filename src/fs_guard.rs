use anyhow::{anyhow, Context, Result};
use std::{
    fs,
    io::{Read, Write},
    path::Path,
};

/// Reads a config or snapshot file, refusing symlinks, non-regular files, and
/// anything larger than `max_bytes`.
///
/// The size limit is enforced on the bytes actually read, so a file that
/// grows between the metadata check and the read is still rejected.
pub fn read_bounded(path: &Path, max_bytes: u64) -> Result<Vec<u8>> {
    let meta = fs::symlink_metadata(path).with_context(|| format!("stat {}", path.display()))?;
    if meta.file_type().is_symlink() {
        return Err(anyhow!("Refusing to read symlink: {}", path.display()));
    }
    if !meta.is_file() {
        return Err(anyhow!("Not a regular file: {}", path.display()));
    }
    if meta.len() > max_bytes {
        return Err(anyhow!(
            "File too large: {} ({} bytes, max {max_bytes} bytes)",
            path.display(),
            meta.len(),
        ));
    }

    let f = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut buf = Vec::new();
    f.take(max_bytes + 1)
        .read_to_end(&mut buf)
        .with_context(|| format!("read {}", path.display()))?;
    if buf.len() as u64 > max_bytes {
        return Err(anyhow!(
            "File too large: {} (grew past {max_bytes} bytes while reading)",
            path.display()
        ));
    }
    Ok(buf)
}

/// Replaces `path` with `bytes` by writing a sibling temp file and renaming
/// it over the target, so readers never observe a half-written snapshot.
pub fn write_replace(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Ok(meta) = fs::symlink_metadata(path) {
        if meta.file_type().is_symlink() {
            return Err(anyhow!("Refusing to overwrite symlink: {}", path.display()));
        }
    }
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("Not a file path: {}", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    {
        let mut f = fs::File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
        f.write_all(bytes)
            .with_context(|| format!("write {}", tmp.display()))?;
        f.sync_all()
            .with_context(|| format!("sync {}", tmp.display()))?;
    }
    fs::rename(&tmp, path).with_context(|| format!("rename onto {}", path.display()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn reads_small_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.json");
        fs::write(&p, b"{}").unwrap();
        assert_eq!(read_bounded(&p, 16).unwrap(), b"{}");
    }

    #[test]
    fn rejects_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("big.json");
        fs::write(&p, vec![b' '; 17]).unwrap();
        let err = read_bounded(&p, 16).unwrap_err().to_string();
        assert!(err.contains("too large"), "{err}");
    }

    #[test]
    fn rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_bounded(dir.path(), 16).unwrap_err().to_string();
        assert!(err.contains("Not a regular file"), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.json");
        fs::write(&real, b"{}").unwrap();
        let link = dir.path().join("link.json");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let err = read_bounded(&link, 16).unwrap_err().to_string();
        assert!(err.contains("symlink"), "{err}");
        let err = write_replace(&link, b"[]").unwrap_err().to_string();
        assert!(err.contains("symlink"), "{err}");
    }

    #[test]
    fn write_replace_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("state.json");
        write_replace(&p, b"one").unwrap();
        write_replace(&p, b"two").unwrap();
        assert_eq!(fs::read(&p).unwrap(), b"two");
        assert!(!dir.path().join("state.json.tmp").exists());
    }
}
