//! Write-temp-fsync-rename helper shared by the minute writer, long-form
//! writer and per-minute status file (spec.md §4.4: "writes the archive
//! file atomically (write to temporary name in the same directory, fsync,
//! rename)").

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

pub fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("archive");
    let tmp_path = dir.join(format!(".{file_name}.tmp"));

    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }

    fs::rename(&tmp_path, path)?;
    Ok(())
}
