//! Step-indexed snapshots of the particle set and mesh fields.
//!
//! A single-rank run writes `checkpoint_{step:05}.json`; with more ranks each
//! rank writes its own particles to `checkpoint_{step:05}.rank{r}.json`. The
//! JSON float encoding round-trips exactly, so a restart continues from the
//! same bits an uninterrupted run would hold.

use crate::error::{RiftError, RiftResult};
use crate::mesh::MeshFields;
use crate::swarm::Particle;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub step: u64,
    /// s
    pub time: f64,
    /// Last step size taken, s.
    pub dt: f64,
    pub next_checkpoint: Option<f64>,
    pub ranks: usize,
    pub particles: Vec<Particle>,
    pub fields: MeshFields,
}

const PREFIX: &str = "checkpoint_";

pub fn checkpoint_path(dir: &Path, step: u64, rank: usize, ranks: usize) -> PathBuf {
    if ranks > 1 {
        dir.join(format!("{PREFIX}{step:05}.rank{rank}.json"))
    } else {
        dir.join(format!("{PREFIX}{step:05}.json"))
    }
}

/// Writes through a temporary file so a crash never leaves a truncated checkpoint.
pub fn write_checkpoint(dir: &Path, checkpoint: &Checkpoint, rank: usize) -> RiftResult<PathBuf> {
    let step = checkpoint.step;
    fs::create_dir_all(dir).map_err(|e| RiftError::persistence(step, format!("{}: {e}", dir.display())))?;
    let path = checkpoint_path(dir, step, rank, checkpoint.ranks);
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string(checkpoint).map_err(|e| RiftError::persistence(step, e))?;
    fs::write(&tmp, json).map_err(|e| RiftError::persistence(step, format!("{}: {e}", tmp.display())))?;
    fs::rename(&tmp, &path).map_err(|e| RiftError::persistence(step, format!("{}: {e}", path.display())))?;
    Ok(path)
}

pub fn read_checkpoint(dir: &Path, step: u64, rank: usize, ranks: usize) -> RiftResult<Checkpoint> {
    let path = checkpoint_path(dir, step, rank, ranks);
    let json = fs::read_to_string(&path).map_err(|e| RiftError::persistence(step, format!("{}: {e}", path.display())))?;
    let checkpoint: Checkpoint =
        serde_json::from_str(&json).map_err(|e| RiftError::persistence(step, format!("{}: {e}", path.display())))?;
    if checkpoint.step != step || checkpoint.ranks != ranks {
        return Err(RiftError::persistence(
            step,
            format!(
                "{} holds step {} written by {} ranks",
                path.display(),
                checkpoint.step,
                checkpoint.ranks
            ),
        ));
    }
    Ok(checkpoint)
}

/// Highest step with a checkpoint in `dir`, if any.
pub fn latest_checkpoint_step(dir: &Path) -> RiftResult<Option<u64>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(RiftError::persistence(0, format!("{}: {e}", dir.display()))),
    };
    let mut latest = None;
    for entry in entries {
        let entry = entry.map_err(|e| RiftError::persistence(0, e))?;
        let name = entry.file_name();
        let Some(step) = name.to_str().and_then(parse_step) else {
            continue;
        };
        latest = latest.max(Some(step));
    }
    Ok(latest)
}

fn parse_step(name: &str) -> Option<u64> {
    let rest = name.strip_prefix(PREFIX)?.strip_suffix(".json")?;
    let digits = rest.split('.').next()?;
    digits.parse().ok()
}
