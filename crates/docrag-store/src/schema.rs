//! Database schema definitions.

/// Main schema SQL for initializing the database.
pub const SCHEMA: &str = r#"
-- Collections registry; the dimension is fixed by the first write
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    dimension INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

-- Chunks table
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
    chunk_key TEXT NOT NULL,
    source_url TEXT NOT NULL,
    page_title TEXT NOT NULL DEFAULT '',
    section TEXT NOT NULL DEFAULT '',
    hierarchy TEXT NOT NULL DEFAULT '[]',
    has_code INTEGER NOT NULL DEFAULT 0,
    chunk_index INTEGER NOT NULL,
    content TEXT NOT NULL,
    UNIQUE (collection, chunk_key)
);

CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(collection, source_url);

-- Vector index: one little-endian f32 embedding per chunk
CREATE TABLE IF NOT EXISTS vec_chunks (
    chunk_id INTEGER PRIMARY KEY REFERENCES chunks(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL
);

-- FTS5 virtual table for keyword search
CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    content,
    content=chunks,
    content_rowid=id
);

-- Triggers to keep FTS5 in sync with chunks table
CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, content) VALUES (NEW.id, NEW.content);
END;

CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES ('delete', OLD.id, OLD.content);
END;

CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE OF content ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES ('delete', OLD.id, OLD.content);
    INSERT INTO chunks_fts(rowid, content) VALUES (NEW.id, NEW.content);
END;
"#;
