use anyhow::{anyhow, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{FrameIndex, OccupancyStatus};

/// Chain head before the first persisted row.
pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// Hashes a persisted row payload with the previous chain hash.
pub fn hash_entry(prev_hash: &[u8; 32], payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash);
    hasher.update(payload);
    hasher.finalize().into()
}

/// Canonical payload of one persisted zone status row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusRow {
    pub frame_index: FrameIndex,
    pub zone: String,
    pub status: OccupancyStatus,
}

impl StatusRow {
    pub fn payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// One row as read back from storage, with its stored hashes.
#[derive(Clone, Debug)]
pub struct ChainedRow {
    pub id: i64,
    pub row: StatusRow,
    pub prev_hash: [u8; 32],
    pub entry_hash: [u8; 32],
}

/// Outcome of walking a status chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainReport {
    pub rows_checked: usize,
    pub head: [u8; 32],
}

/// Recompute the chain from `GENESIS_HASH` and fail on the first broken link.
pub fn verify_chain<'a, I>(rows: I) -> Result<ChainReport>
where
    I: IntoIterator<Item = &'a ChainedRow>,
{
    let mut expected_prev = GENESIS_HASH;
    let mut rows_checked = 0;
    for row in rows {
        if row.prev_hash != expected_prev {
            return Err(anyhow!(
                "chain broken at row {}: prev_hash {} does not match {}",
                row.id,
                hex::encode(row.prev_hash),
                hex::encode(expected_prev)
            ));
        }
        let recomputed = hash_entry(&row.prev_hash, &row.row.payload()?);
        if recomputed != row.entry_hash {
            return Err(anyhow!(
                "chain broken at row {}: entry_hash mismatch (frame {}, zone {:?})",
                row.id,
                row.row.frame_index,
                row.row.zone
            ));
        }
        expected_prev = row.entry_hash;
        rows_checked += 1;
    }
    Ok(ChainReport {
        rows_checked,
        head: expected_prev,
    })
}
