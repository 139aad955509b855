//! Polls the preview inputs so edits to the converter output are picked up
//! while a session is running.

use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use oscshow_core::ScopeError;

/// Expands the inputs into signal files. Directories contribute their
/// `*.json` files in file name order.
pub fn input_files(inputs: &[PathBuf]) -> oscshow_core::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(input)?
                .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(input.clone());
        }
    }
    if files.is_empty() {
        return Err(ScopeError::msg("no signal files found in the given inputs"));
    }
    Ok(files)
}

/// Remembers the file list and modification times seen at the last poll.
#[derive(Debug)]
pub struct InputWatcher {
    inputs: Vec<PathBuf>,
    seen: Vec<(PathBuf, Option<SystemTime>)>,
}

impl InputWatcher {
    pub fn new(inputs: &[PathBuf]) -> Self {
        let inputs = inputs.to_vec();
        let seen = stamp(&inputs);
        Self { inputs, seen }
    }

    /// True when a file was added, removed or modified since the last call.
    pub fn poll(&mut self) -> bool {
        let current = stamp(&self.inputs);
        if current == self.seen {
            return false;
        }
        self.seen = current;
        true
    }
}

fn stamp(inputs: &[PathBuf]) -> Vec<(PathBuf, Option<SystemTime>)> {
    input_files(inputs)
        .unwrap_or_default()
        .into_iter()
        .map(|path| {
            let modified = modified(&path);
            (path, modified)
        })
        .collect()
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}
