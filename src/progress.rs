use log::warn;
use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Repositories that have been fully crawled, persisted as a JSON list.
///
/// Names are only ever added. The file is rewritten after every addition so
/// a restarted crawl never revisits a finished repository.
#[derive(Debug)]
pub struct ProcessedRepoSet {
    path: PathBuf,
    names: Vec<String>,
    index: HashSet<String>,
}

impl ProcessedRepoSet {
    /// Load the set from `path`. A missing or unreadable file is an empty set.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let names: Vec<String> = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(
                    "Ignoring unreadable progress file {}: {}",
                    path.display(),
                    e
                );
                Vec::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("Cannot read progress file {}: {}", path.display(), e);
                Vec::new()
            }
        };

        let mut set = Self {
            path,
            names: Vec::with_capacity(names.len()),
            index: HashSet::with_capacity(names.len()),
        };
        for name in names {
            if set.index.insert(name.clone()) {
                set.names.push(name);
            }
        }
        set
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, full_name: &str) -> bool {
        self.index.contains(full_name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Record `full_name` as done and persist immediately.
    pub fn mark_processed(&mut self, full_name: &str) -> Result<()> {
        if self.index.insert(full_name.to_string()) {
            self.names.push(full_name.to_string());
        }
        self.save()
    }

    /// Overwrite the progress file via a synced temp file and rename.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = File::create(&tmp)?;
        file.write_all(&serde_json::to_vec(&self.names)?)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
