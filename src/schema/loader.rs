use super::types::RawSchemaEntry;
use crate::config::ConfigError;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

/// Reads every `*.json` file in `dir`, in lexical file name order.
///
/// Each entry keeps its originating path so compile errors can name the file.
pub fn load_schema_dir<P: AsRef<Path>>(dir: P) -> Result<Vec<RawSchemaEntry>, ConfigError> {
    let dir = dir.as_ref();
    info!("Loading schemas from {}", dir.display());

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut entries = Vec::with_capacity(paths.len());
    for path in paths {
        let content = fs::read_to_string(&path)?;
        let config = serde_json::from_str(&content).map_err(|e| {
            ConfigError::Validation(format!("{}: invalid JSON: {}", path.display(), e))
        })?;
        debug!("Read schema file {}", path.display());
        entries.push(RawSchemaEntry::from_path(path, config));
    }

    info!("Loaded {} schema file(s)", entries.len());
    Ok(entries)
}
