//! Training checkpoints

use crate::error::{Error, Result};
use crate::optim::{GroupWeights, OptimizerState};
use crate::train::EmaState;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Format version written into every checkpoint
pub const CHECKPOINT_VERSION: u32 = 1;

/// Everything needed to continue a run after `epoch`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    /// Last completed epoch (0-based)
    pub epoch: usize,
    pub model: Vec<GroupWeights>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ema: Option<EmaState>,
    pub optimizer: OptimizerState,
    /// Scheduler counter, the next epoch to run
    pub scheduler_epoch: usize,
    #[serde(default)]
    pub best_fitness: Option<f32>,
}

impl Checkpoint {
    /// Write as JSON through a temporary file so readers never see a
    /// partial document
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("json.tmp");

        let write = || -> Result<()> {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(&mut writer, self)?;
            writer.flush()?;
            Ok(())
        };
        write().map_err(|e| Error::Checkpoint(format!("{}: {e}", tmp.display())))?;

        fs::rename(&tmp, path)
            .map_err(|e| Error::Checkpoint(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), epoch = self.epoch, "checkpoint saved");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).map_err(|e| Error::Checkpoint(format!("{}: {e}", path.display())))?;
        let checkpoint: Checkpoint = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::Checkpoint(format!("{}: {e}", path.display())))?;

        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(Error::Checkpoint(format!(
                "{}: unsupported version {} (expected {CHECKPOINT_VERSION})",
                path.display(),
                checkpoint.version
            )));
        }
        Ok(checkpoint)
    }
}

/// Directory holding `last.json` and `best.json`
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Use `dir`, creating it if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| Error::Checkpoint(format!("{}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn last_path(&self) -> PathBuf {
        self.dir.join("last.json")
    }

    pub fn best_path(&self) -> PathBuf {
        self.dir.join("best.json")
    }

    /// Save `last.json`, and `best.json` too when `is_best`
    pub fn save(&self, checkpoint: &Checkpoint, is_best: bool) -> Result<()> {
        checkpoint.save(self.last_path())?;
        if is_best {
            checkpoint.save(self.best_path())?;
        }
        Ok(())
    }

    pub fn load_last(&self) -> Result<Checkpoint> {
        Checkpoint::load(self.last_path())
    }

    pub fn load_best(&self) -> Result<Checkpoint> {
        Checkpoint::load(self.best_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn checkpoint(epoch: usize) -> Checkpoint {
        Checkpoint {
            version: CHECKPOINT_VERSION,
            epoch,
            model: vec![GroupWeights {
                name: "head".into(),
                params: vec![array![1.0, -2.0, 3.5]],
            }],
            ema: Some(EmaState {
                updates: 12,
                shadow: vec![GroupWeights {
                    name: "head".into(),
                    params: vec![array![0.5, -1.0, 3.0]],
                }],
            }),
            optimizer: OptimizerState::Sgd {
                velocities: vec![vec![Some(array![0.1, 0.0, -0.1])]],
            },
            scheduler_epoch: epoch + 1,
            best_fitness: Some(0.75),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt.json");

        checkpoint(4).save(&path).unwrap();
        assert_eq!(Checkpoint::load(&path).unwrap(), checkpoint(4));
        assert!(!dir.path().join("ckpt.json.tmp").exists());
    }

    #[test]
    fn test_store_writes_best_only_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("run")).unwrap();

        store.save(&checkpoint(0), true).unwrap();
        store.save(&checkpoint(1), false).unwrap();

        assert_eq!(store.load_last().unwrap().epoch, 1);
        assert_eq!(store.load_best().unwrap().epoch, 0);
    }

    #[test]
    fn test_missing_file_is_checkpoint_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Checkpoint::load(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, Error::Checkpoint(_)));
    }

    #[test]
    fn test_corrupt_file_is_checkpoint_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Checkpoint::load(&path).unwrap_err(),
            Error::Checkpoint(_)
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v99.json");
        let mut ckpt = checkpoint(0);
        ckpt.version = 99;
        ckpt.save(&path).unwrap();
        assert!(Checkpoint::load(&path).is_err());
    }
}
