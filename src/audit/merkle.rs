//! Merkle Tree for Audit Chains
//!
//! Builds a Merkle root over entry hashes so the state of the chain can be
//! published outside the store and later proven against it.
//!
//! Leaves are `SHA-256(0x00 || entry_hash)`, internal nodes are
//! `SHA-256(0x01 || left || right)`. An odd node at the end of a level is
//! paired with itself.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use tracing::debug;

use crate::audit::entry::ChainHash;
use crate::error::{AuditError, AuditResult};

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

fn leaf(hash: &ChainHash) -> ChainHash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(hash.as_bytes());
    ChainHash::from_bytes(hasher.finalize().into())
}

fn node(left: &ChainHash, right: &ChainHash) -> ChainHash {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    ChainHash::from_bytes(hasher.finalize().into())
}

/// Compute the Merkle root over entry hashes, in chain order.
pub fn merkle_root(hashes: &[ChainHash]) -> AuditResult<ChainHash> {
    if hashes.is_empty() {
        return Err(AuditError::InvalidEvent(
            "Cannot build Merkle tree from empty entries".to_string(),
        ));
    }

    let mut nodes: VecDeque<ChainHash> = hashes.iter().map(leaf).collect();

    while nodes.len() > 1 {
        let mut next_level = VecDeque::with_capacity(nodes.len().div_ceil(2));
        while let Some(left) = nodes.pop_front() {
            let right = nodes.pop_front().unwrap_or(left);
            next_level.push_back(node(&left, &right));
        }
        nodes = next_level;
    }

    let root = nodes.pop_front().unwrap_or_else(|| leaf(&hashes[0]));
    debug!("Merkle root over {} entries: {}", hashes.len(), root);
    Ok(root)
}

/// Verify a claimed Merkle root against entry hashes
pub fn verify_merkle_root(hashes: &[ChainHash], claimed_root: &ChainHash) -> AuditResult<bool> {
    Ok(merkle_root(hashes)? == *claimed_root)
}

/// One sibling on the path from a leaf to the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofStep {
    pub sibling: ChainHash,
    /// True when the sibling sits to the left of the running hash.
    pub sibling_is_left: bool,
}

/// Inclusion proof for a single entry hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleProof {
    pub leaf_hash: ChainHash,
    pub steps: Vec<ProofStep>,
    pub root_hash: ChainHash,
}

impl MerkleProof {
    /// Verify this proof
    pub fn verify(&self) -> bool {
        let mut current = leaf(&self.leaf_hash);
        for step in &self.steps {
            current = if step.sibling_is_left {
                node(&step.sibling, &current)
            } else {
                node(&current, &step.sibling)
            };
        }
        current == self.root_hash
    }

    pub fn summary(&self) -> String {
        format!(
            "Merkle proof: {} steps, root: {}",
            self.steps.len(),
            self.root_hash
        )
    }
}

/// Generate an inclusion proof for the entry at `index`.
pub fn generate_merkle_proof(hashes: &[ChainHash], index: usize) -> AuditResult<MerkleProof> {
    if index >= hashes.len() {
        return Err(AuditError::InvalidEvent(format!(
            "Entry index {} out of range ({} entries)",
            index,
            hashes.len()
        )));
    }

    let mut level: Vec<ChainHash> = hashes.iter().map(leaf).collect();
    let mut position = index;
    let mut steps = Vec::new();

    while level.len() > 1 {
        let sibling_is_left = position % 2 == 1;
        let sibling = if sibling_is_left {
            level[position - 1]
        } else {
            // odd tail pairs with itself
            *level.get(position + 1).unwrap_or(&level[position])
        };
        steps.push(ProofStep {
            sibling,
            sibling_is_left,
        });

        level = level
            .chunks(2)
            .map(|pair| node(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
        position /= 2;
    }

    Ok(MerkleProof {
        leaf_hash: hashes[index],
        steps,
        root_hash: level[0],
    })
}

/// Anchor digest describing the chain at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainAnchor {
    pub merkle_root: Option<ChainHash>,
    pub tail_hash: ChainHash,
    pub total_entries: u64,
}

impl ChainAnchor {
    pub fn summary(&self) -> String {
        match &self.merkle_root {
            Some(root) => format!(
                "{} entries, tail: {}, root: {}",
                self.total_entries, self.tail_hash, root
            ),
            None => "empty chain".to_string(),
        }
    }
}
