//! SQLite Schema Definitions for Anchor Storage
//!
//! One row per persisted anchor. The row keeps a few columns for lookup and
//! the full record as a JSON document; the document is the source of truth.

/// Schema version for anchor databases
pub const ANCHOR_SCHEMA_VERSION: &str = "1.0";

/// SQL to create the anchors table
pub const SCHEMA_CREATE_ANCHORS: &str = r#"
CREATE TABLE IF NOT EXISTS anchors (
    -- Anchor id (UUID, hyphenated)
    id TEXT PRIMARY KEY NOT NULL,

    -- root, node or edge
    kind TEXT NOT NULL,

    -- Architype class name
    name TEXT NOT NULL,

    -- PRIVATE, PUBLIC or PROTECTED
    access TEXT NOT NULL,

    -- Serialized record (JSON)
    document TEXT NOT NULL
)
"#;

/// SQL to create the metadata table
pub const SCHEMA_CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS store_metadata (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
)
"#;

/// SQL to create indexes for efficient queries
pub const SCHEMA_CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_anchors_kind ON anchors(kind);
CREATE INDEX IF NOT EXISTS idx_anchors_name ON anchors(name);
"#;
