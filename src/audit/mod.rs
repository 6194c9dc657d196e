//! Audit Chain
//!
//! Tamper-evident, hash-linked log of sensitive actions: canonical
//! encoding, the serialized writer, the verifier and Merkle anchoring.

pub mod canonical;
pub mod entry;
pub mod merkle;
pub mod value;
pub mod verify;
pub mod writer;

pub use entry::{ActorContext, AuditEntry, ChainHash, EntryFields, EventFields, GENESIS};
pub use merkle::{generate_merkle_proof, merkle_root, verify_merkle_root, ChainAnchor, MerkleProof};
pub use value::AuditValue;
pub use verify::{ChainVerifier, Checkpoint, VerificationReport};
pub use writer::AuditWriter;
