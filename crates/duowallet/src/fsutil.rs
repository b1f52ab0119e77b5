use eyre::Context as _;
use rand::Rng as _;
use std::{
    fs::{self, OpenOptions},
    io::Write as _,
    path::{Path, PathBuf},
};

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt as _, PermissionsExt as _};

pub const MODE_DIR_PRIVATE: u32 = 0o700;
pub const MODE_FILE_PRIVATE: u32 = 0o600;

fn is_symlink(p: &Path) -> eyre::Result<bool> {
    let md = fs::symlink_metadata(p).with_context(|| format!("stat {}", p.display()))?;
    Ok(md.file_type().is_symlink())
}

/// Create `dir` if needed and clamp it to owner-only permissions (Unix).
pub fn ensure_private_dir(dir: &Path) -> eyre::Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
    } else if is_symlink(dir)? {
        eyre::bail!("refusing to use symlinked directory: {}", dir.display());
    } else if !dir.is_dir() {
        eyre::bail!("expected directory at {}", dir.display());
    }

    #[cfg(unix)]
    {
        let mode = fs::metadata(dir)
            .with_context(|| format!("stat {}", dir.display()))?
            .permissions()
            .mode();
        if (mode & 0o077) != 0 {
            fs::set_permissions(dir, fs::Permissions::from_mode(MODE_DIR_PRIVATE))
                .with_context(|| format!("chmod {MODE_DIR_PRIVATE:o} {}", dir.display()))?;
        }
    }

    Ok(())
}

fn sibling_tmp_path(path: &Path) -> eyre::Result<PathBuf> {
    let parent = path
        .parent()
        .ok_or_else(|| eyre::eyre!("missing parent for {}", path.display()))?;
    let base = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("entry");
    let mut nonce = [0_u8; 8];
    rand::rng().fill_bytes(&mut nonce);
    Ok(parent.join(format!(".{base}.tmp.{}", hex::encode(nonce))))
}

fn write_new_file(oo: &OpenOptions, tmp: &Path, bytes: &[u8]) -> eyre::Result<()> {
    let mut f = oo
        .open(tmp)
        .with_context(|| format!("open temp {}", tmp.display()))?;
    f.write_all(bytes)
        .with_context(|| format!("write {}", tmp.display()))?;
    f.sync_all()
        .with_context(|| format!("fsync {}", tmp.display()))?;
    Ok(())
}

/// Replace `path` with `bytes` in one step: readers see either the old or the new content.
pub fn write_atomic_restrictive(path: &Path, bytes: &[u8], mode: u32) -> eyre::Result<()> {
    if let Some(parent) = path.parent() {
        ensure_private_dir(parent)?;
    }
    if path.exists() && is_symlink(path)? {
        eyre::bail!("refusing to write to symlink: {}", path.display());
    }

    let tmp = sibling_tmp_path(path)?;
    let mut oo = OpenOptions::new();
    oo.create_new(true).write(true);
    #[cfg(unix)]
    {
        oo.mode(mode);
    }
    #[cfg(not(unix))]
    {
        let _: u32 = mode;
    }

    let written = write_new_file(&oo, &tmp, bytes);
    if let Err(e) = written {
        drop(fs::remove_file(&tmp));
        return Err(e);
    }

    // `rename` does not replace an existing file on Windows.
    #[cfg(windows)]
    {
        if path.exists() {
            fs::remove_file(path).with_context(|| format!("remove existing {}", path.display()))?;
        }
    }

    if let Err(e) = fs::rename(&tmp, path) {
        drop(fs::remove_file(&tmp));
        return Err(eyre::Report::new(e).wrap_err(format!(
            "rename {} -> {}",
            tmp.display(),
            path.display()
        )));
    }
    Ok(())
}

pub fn write_string_atomic_restrictive(path: &Path, s: &str, mode: u32) -> eyre::Result<()> {
    write_atomic_restrictive(path, s.as_bytes(), mode)
}

/// Delete `path`; a file that is already gone counts as success.
pub fn remove_file_if_exists(path: &Path) -> eyre::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(eyre::Report::new(e).wrap_err(format!("remove {}", path.display()))),
    }
}
