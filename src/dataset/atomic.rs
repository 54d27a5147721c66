use std::io::Write;
use std::path::Path;

use crate::error::{DatasetError, DatasetResult};

/// Replace `path` with `contents` in one rename: readers see the old file or
/// the new one, never a partial write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> DatasetResult<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut temp = tempfile::Builder::new()
        .prefix(".uicapture")
        .tempfile_in(dir)
        .map_err(DatasetError::io_at(dir))?;
    temp.write_all(contents).map_err(DatasetError::io_at(path))?;
    temp.as_file().sync_all().map_err(DatasetError::io_at(path))?;
    temp.persist(path).map_err(|err| DatasetError::Io {
        path: path.to_path_buf(),
        source: err.error,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "old").unwrap();
        write_atomic(&path, b"new").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
        // no temp files left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
