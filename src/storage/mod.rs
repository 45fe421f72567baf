use crate::error::IoContext;
use crate::Result;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Scratch directory holding the temporary tables of one sorter. It is created on
/// the first spill and removed, together with every run in it, on `clear` or drop.
///
/// Run names are UUIDs V7, so listing the directory in name order gives the runs
/// in the order they were spilled.
#[derive(Debug)]
pub(crate) struct SpillDir {
    path: PathBuf,
    created: bool,
    runs: Vec<PathBuf>,
}

impl SpillDir {
    pub fn new(parent: &Path) -> Self {
        Self {
            path: parent.join(format!("tablekit-sort-{}", Uuid::now_v7())),
            created: false,
            runs: Vec::new(),
        }
    }

    fn bootstrap(&mut self) -> Result<()> {
        if !self.created {
            fs::create_dir_all(&self.path).io_context("creating spill directory")?;
            self.created = true;
            debug!(path = %self.path.display(), "spill directory created");
        }

        Ok(())
    }

    /// Reserves the path of the next run. The caller writes the table.
    pub fn next_run(&mut self) -> Result<PathBuf> {
        self.bootstrap()?;
        let path = self.path.join(Uuid::now_v7().to_string());
        self.runs.push(path.clone());
        Ok(path)
    }

    /// Runs in spill order.
    pub fn runs(&self) -> &[PathBuf] {
        &self.runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes every run and the directory itself. Failures are logged, the
    /// files are garbage either way.
    pub fn clear(&mut self) {
        for run in self.runs.drain(..) {
            if let Err(e) = fs::remove_file(&run) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %run.display(), error = %e, "failed to remove spilled run");
                }
            }
        }

        if self.created {
            if let Err(e) = fs::remove_dir(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to remove spill directory");
            }
            self.created = false;
        }
    }
}

impl Drop for SpillDir {
    fn drop(&mut self) {
        self.clear();
    }
}
