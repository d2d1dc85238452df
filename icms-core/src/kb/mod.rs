//! The Knowledge Base: a tri-hybrid store (structured, vector, graph) over
//! NCM codes, CEST rules, product examples, and the Golden Set.
//!
//! ## Example
//!
//! ```rust,ignore
//! use icms_core::kb::{KbHandle, load_snapshot, default_sources};
//!
//! let sources = default_sources("./kb-data");
//! let snapshot = load_snapshot(&sources, &client, "text-embedding-3-small", 1).await?;
//! let handle = KbHandle::new(snapshot);
//! ```

mod graph;
mod loader;
mod schema;
mod snapshot;
mod store;
mod vector;

pub use graph::{EdgeKind, GraphNodeRef, GraphStore};
pub use loader::{default_sources, load_snapshot, normalise_description, CestSourceRow, KbSources, NcmSourceRow};
pub use schema::{get_schema_version, initialize_schema, is_initialized, SCHEMA_VERSION};
pub use snapshot::{KbHandle, KbSnapshot};
pub use store::{SparseHit, StructuredStore};
pub use vector::{EmbeddedChunk, VectorHit, VectorIndex};
