use std::fs::create_dir_all;
use std::fs::File;
use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;

use tracing::debug;
use tracing::error;

use crate::Result;
use crate::StorageError;

pub fn create_dir_if_not_exist(path: &Path) -> Result<()> {
    if !path.exists() {
        if let Err(e) = create_dir_all(path) {
            error!("Failed to create directory {:?}: {:?}", path, e);
            return Err(StorageError::PathError {
                path: path.to_path_buf(),
                source: e,
            }
            .into());
        }
        debug!("created directory: {:?}", path);
    }
    Ok(())
}

pub fn create_parent_dir_if_not_exist(path: &Path) -> Result<()> {
    if let Some(parent_dir) = path.parent() {
        create_dir_if_not_exist(parent_dir)?;
    }
    Ok(())
}

pub fn open_file_for_append(path: PathBuf) -> Result<File> {
    create_parent_dir_if_not_exist(&path)?;
    OpenOptions::new()
        .append(true)
        .create(true)
        .open(&path)
        .map_err(|e| StorageError::PathError { path, source: e }.into())
}

/// Write `buf` to `path` through a temp file and rename, so readers never see a torn file
pub(crate) fn write_atomically(
    path: &Path,
    buf: &[u8],
    sync: bool,
) -> Result<()> {
    use std::io::Write;

    create_parent_dir_if_not_exist(path)?;
    let tmp = path.with_extension("tmp");
    let io = |e| StorageError::PathError {
        path: tmp.clone(),
        source: e,
    };
    {
        let mut file = File::create(&tmp).map_err(io)?;
        file.write_all(buf).map_err(io)?;
        if sync {
            file.sync_all().map_err(io)?;
        }
    }
    std::fs::rename(&tmp, path).map_err(|e| StorageError::PathError {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(())
}
