//! SQLite-based storage implementation.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{
    params, Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior,
};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use docrag_core::{
    now_millis, Chunk, ChunkId, CollectionInfo, DatabaseConfig, IndexedChunk, RagError, Result,
    ScoredChunk, Stats, Store,
};

use crate::fts::build_fts_query;
use crate::schema::SCHEMA;

static VEC_EXTENSION: Once = Once::new();

/// Register sqlite-vec for every connection opened by this process.
fn register_vec_extension() {
    VEC_EXTENSION.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// Idle file connections kept for reuse.
const MAX_IDLE_CONNECTIONS: usize = 8;

const CHUNK_COLUMNS: &str =
    "c.id, c.source_url, c.page_title, c.section, c.hierarchy, c.has_code, c.chunk_index, c.content";

fn open_connection(path: &Path, config: &DatabaseConfig) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| RagError::database(format!("Failed to open database: {}", e)))?;

    SqliteStore::configure_connection(&conn, config)?;
    Ok(conn)
}

/// Connections to one database file.
///
/// The pool lock only guards taking and returning a connection; an operation
/// runs on a connection it owns outright.
struct ConnectionPool {
    path: PathBuf,
    config: DatabaseConfig,
    idle: Mutex<Vec<Connection>>,
}

impl ConnectionPool {
    fn checkout(&self) -> Result<Connection> {
        let idle = self
            .idle
            .lock()
            .map_err(|e| RagError::database(e.to_string()))?
            .pop();

        match idle {
            Some(conn) => Ok(conn),
            None => open_connection(&self.path, &self.config),
        }
    }

    fn checkin(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < MAX_IDLE_CONNECTIONS {
                idle.push(conn);
            }
        }
    }
}

#[derive(Clone)]
enum Backend {
    /// Private in-memory database. It has a single connection, so operations
    /// take turns on it.
    Memory(Arc<Mutex<Connection>>),

    /// WAL database file. Every operation checks out its own connection.
    File(Arc<ConnectionPool>),
}

/// SQLite-based hybrid store.
///
/// Every operation runs as one closure on the blocking thread pool via
/// `spawn_blocking`, holding a connection for the duration of that closure.
/// Writes are single transactions covering the chunk row, its FTS5 entry
/// (maintained by triggers) and its vector.
///
/// Writes to a collection are serialized by that collection's write lock;
/// collections never share one. On a database file, reads take no lock and
/// each query sees one committed snapshot of both indexes.
pub struct SqliteStore {
    backend: Backend,
    write_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create a database at the given path with default settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let config = DatabaseConfig {
            path: path.as_ref().to_path_buf(),
            ..DatabaseConfig::default()
        };
        Self::open_with_config(&config)
    }

    /// Open or create the database described by `config`.
    pub fn open_with_config(config: &DatabaseConfig) -> Result<Self> {
        let path = config.path.as_path();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        register_vec_extension();
        let conn = open_connection(path, config)?;
        Self::init_schema(&conn, path)?;

        let pool = ConnectionPool {
            path: path.to_path_buf(),
            config: config.clone(),
            idle: Mutex::new(vec![conn]),
        };
        Ok(Self::with_backend(Backend::File(Arc::new(pool)), path))
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        register_vec_extension();
        let conn = Connection::open_in_memory()
            .map_err(|e| RagError::database(format!("Failed to open in-memory database: {}", e)))?;

        let config = DatabaseConfig {
            path: PathBuf::from(":memory:"),
            wal_mode: false,
            ..DatabaseConfig::default()
        };
        let path = Path::new(":memory:");
        Self::configure_connection(&conn, &config)?;
        Self::init_schema(&conn, path)?;

        Ok(Self::with_backend(
            Backend::Memory(Arc::new(Mutex::new(conn))),
            path,
        ))
    }

    fn with_backend(backend: Backend, path: &Path) -> Self {
        Self {
            backend,
            write_locks: Mutex::new(HashMap::new()),
            path: path.to_path_buf(),
        }
    }

    fn init_schema(conn: &Connection, path: &Path) -> Result<()> {
        let vec_version: String = conn
            .query_row("SELECT vec_version()", [], |row| row.get(0))
            .map_err(|e| RagError::database(format!("sqlite-vec extension not available: {}", e)))?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| RagError::database(format!("Failed to initialize schema: {}", e)))?;

        info!("Database opened at {:?} (sqlite-vec {})", path, vec_version);
        Ok(())
    }

    fn configure_connection(conn: &Connection, config: &DatabaseConfig) -> Result<()> {
        let journal_mode = if config.wal_mode { "WAL" } else { "DELETE" };
        conn.execute_batch(&format!(
            r#"
            PRAGMA busy_timeout = {};
            PRAGMA journal_mode = {};
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = {};
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
            PRAGMA foreign_keys = ON;
            "#,
            config.busy_timeout_ms, journal_mode, config.cache_size
        ))
        .map_err(|e| RagError::database(format!("Failed to configure connection: {}", e)))?;

        Ok(())
    }

    /// Path of the database file (`:memory:` for in-memory stores).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Execute a blocking read on a connection.
    async fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || Self::run(&backend, f))
            .await
            .map_err(|e| RagError::internal(format!("Store task failed: {}", e)))?
    }

    /// Execute a blocking write while holding the collection's write lock.
    ///
    /// The guard moves into the blocking closure, so a caller that gives up
    /// waiting does not release the lock before the transaction finishes.
    async fn with_write<F, R>(&self, collection: String, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let guard = self.write_lock(&collection)?.lock_owned().await;
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || {
            let result = Self::run(&backend, f);
            drop(guard);
            result
        })
        .await
        .map_err(|e| RagError::internal(format!("Store task failed: {}", e)))?
    }

    fn write_lock(&self, collection: &str) -> Result<Arc<AsyncMutex<()>>> {
        let mut locks = self
            .write_locks
            .lock()
            .map_err(|e| RagError::database(e.to_string()))?;
        Ok(Arc::clone(locks.entry(collection.to_string()).or_default()))
    }

    fn run<F, R>(backend: &Backend, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R>,
    {
        match backend {
            Backend::Memory(conn) => {
                let mut conn = conn.lock().map_err(|e| RagError::database(e.to_string()))?;
                f(&mut conn)
            }
            Backend::File(pool) => {
                let mut conn = pool.checkout()?;
                let result = f(&mut conn);
                pool.checkin(conn);
                result
            }
        }
    }

    /// Begin a write transaction, taking SQLite's writer lock up front.
    fn begin_write(conn: &mut Connection) -> Result<Transaction<'_>> {
        conn.transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| RagError::database(e.to_string()))
    }

    /// Check a write batch before touching the database. Returns the embedding dimension.
    fn validate_batch(chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<Option<usize>> {
        if chunks.len() != embeddings.len() {
            return Err(RagError::invalid_argument(format!(
                "{} chunks but {} embeddings",
                chunks.len(),
                embeddings.len()
            )));
        }

        let Some(first) = embeddings.first() else {
            return Ok(None);
        };
        let dimension = first.len();
        if dimension == 0 {
            return Err(RagError::invalid_argument("embeddings must not be empty"));
        }

        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            if embedding.len() != dimension {
                return Err(RagError::invalid_argument(format!(
                    "embedding dimensions differ within one batch ({} vs {})",
                    dimension,
                    embedding.len()
                )));
            }
            if !is_searchable(embedding) {
                return Err(RagError::invalid_argument(format!(
                    "embedding for chunk {} of {} must be finite and non-zero",
                    chunk.chunk_index, chunk.source_url
                )));
            }
            if chunk.content.trim().is_empty() {
                return Err(RagError::invalid_argument("chunk content must not be empty"));
            }
            if chunk.source_url.trim().is_empty() {
                return Err(RagError::invalid_argument("chunk source_url must not be empty"));
            }
        }

        Ok(Some(dimension))
    }

    fn collection_dimension(conn: &Connection, collection: &str) -> Result<Option<usize>> {
        let dimension: Option<i64> = conn
            .query_row(
                "SELECT dimension FROM collections WHERE name = ?1",
                params![collection],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RagError::database(e.to_string()))?;

        Ok(dimension.map(|d| d as usize))
    }

    /// Create the collection on first write, or check the batch against its dimension.
    fn ensure_collection(tx: &Transaction<'_>, collection: &str, dimension: usize) -> Result<()> {
        match Self::collection_dimension(tx, collection)? {
            Some(expected) if expected != dimension => {
                Err(RagError::schema(collection, expected, dimension))
            }
            Some(_) => Ok(()),
            None => {
                tx.execute(
                    "INSERT INTO collections (name, dimension, created_at) VALUES (?1, ?2, ?3)",
                    params![collection, dimension as i64, now_millis() as i64],
                )
                .map_err(|e| RagError::database(format!("Failed to create collection: {}", e)))?;
                info!("Created collection {} (dimension {})", collection, dimension);
                Ok(())
            }
        }
    }

    /// Upsert chunk rows and vectors. Chunks with the same content key map to one id.
    fn upsert_chunks(
        tx: &Transaction<'_>,
        collection: &str,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<ChunkId>> {
        let mut chunk_stmt = tx
            .prepare_cached(
                r#"
                INSERT INTO chunks (collection, chunk_key, source_url, page_title, section,
                                    hierarchy, has_code, chunk_index, content)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT (collection, chunk_key) DO UPDATE SET
                    page_title = excluded.page_title,
                    section = excluded.section,
                    hierarchy = excluded.hierarchy,
                    has_code = excluded.has_code,
                    chunk_index = excluded.chunk_index
                RETURNING id
                "#,
            )
            .map_err(|e| RagError::database(e.to_string()))?;

        let mut vec_stmt = tx
            .prepare_cached(
                r#"
                INSERT INTO vec_chunks (chunk_id, embedding) VALUES (?1, ?2)
                ON CONFLICT (chunk_id) DO UPDATE SET embedding = excluded.embedding
                "#,
            )
            .map_err(|e| RagError::database(e.to_string()))?;

        let mut ids = Vec::with_capacity(chunks.len());
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            let hierarchy = serde_json::to_string(&chunk.hierarchy)?;
            let id: ChunkId = chunk_stmt
                .query_row(
                    params![
                        collection,
                        chunk.content_key(),
                        chunk.source_url,
                        chunk.page_title,
                        chunk.section,
                        hierarchy,
                        chunk.has_code,
                        chunk.chunk_index,
                        chunk.content,
                    ],
                    |row| row.get(0),
                )
                .map_err(|e| RagError::database(format!("Failed to insert chunk: {}", e)))?;

            vec_stmt
                .execute(params![id, vec_to_bytes(embedding)])
                .map_err(|e| RagError::database(format!("Failed to insert embedding: {}", e)))?;

            ids.push(id);
        }

        Ok(ids)
    }

    fn delete_ids(tx: &Transaction<'_>, ids: &[ChunkId]) -> Result<()> {
        let mut vec_stmt = tx
            .prepare_cached("DELETE FROM vec_chunks WHERE chunk_id = ?1")
            .map_err(|e| RagError::database(e.to_string()))?;
        let mut chunk_stmt = tx
            .prepare_cached("DELETE FROM chunks WHERE id = ?1")
            .map_err(|e| RagError::database(e.to_string()))?;

        for id in ids {
            vec_stmt
                .execute(params![id])
                .map_err(|e| RagError::database(e.to_string()))?;
            chunk_stmt
                .execute(params![id])
                .map_err(|e| RagError::database(e.to_string()))?;
        }
        Ok(())
    }

    fn source_ids(conn: &Connection, collection: &str, source_url: &str) -> Result<Vec<ChunkId>> {
        let mut stmt = conn
            .prepare_cached("SELECT id FROM chunks WHERE collection = ?1 AND source_url = ?2")
            .map_err(|e| RagError::database(e.to_string()))?;

        let ids = stmt
            .query_map(params![collection, source_url], |row| row.get(0))
            .map_err(|e| RagError::database(e.to_string()))?
            .collect::<std::result::Result<Vec<ChunkId>, _>>()
            .map_err(|e| RagError::database(e.to_string()))?;

        Ok(ids)
    }

    fn count_query(conn: &Connection, sql: &str, collection: Option<&str>) -> Result<u64> {
        let count: i64 = match collection {
            Some(coll) => conn.query_row(sql, params![coll], |row| row.get(0)),
            None => conn.query_row(sql, [], |row| row.get(0)),
        }
        .map_err(|e| RagError::database(e.to_string()))?;
        Ok(count as u64)
    }

    /// Read a chunk from columns laid out as in `CHUNK_COLUMNS`.
    fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<(ChunkId, Chunk)> {
        let hierarchy_json: String = row.get(4)?;
        let hierarchy: Vec<String> = serde_json::from_str(&hierarchy_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

        Ok((
            row.get(0)?,
            Chunk {
                source_url: row.get(1)?,
                page_title: row.get(2)?,
                section: row.get(3)?,
                hierarchy,
                has_code: row.get(5)?,
                chunk_index: row.get(6)?,
                content: row.get(7)?,
            },
        ))
    }

    fn write_batch(
        conn: &mut Connection,
        collection: &str,
        replace: Option<&str>,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<ChunkId>> {
        let dimension = Self::validate_batch(chunks, embeddings)?;

        let tx = Self::begin_write(conn)?;

        let ids = match dimension {
            Some(dimension) => {
                Self::ensure_collection(&tx, collection, dimension)?;
                Self::upsert_chunks(&tx, collection, chunks, embeddings)?
            }
            None => Vec::new(),
        };

        if let Some(source_url) = replace {
            let keep: HashSet<ChunkId> = ids.iter().copied().collect();
            let stale: Vec<ChunkId> = Self::source_ids(&tx, collection, source_url)?
                .into_iter()
                .filter(|id| !keep.contains(id))
                .collect();
            Self::delete_ids(&tx, &stale)?;
            debug!(
                "Replaced {} in {}: {} written, {} removed",
                source_url,
                collection,
                ids.len(),
                stale.len()
            );
        }

        tx.commit()
            .map_err(|e| RagError::database(format!("Failed to commit: {}", e)))?;

        Ok(ids)
    }
}

#[async_trait]
impl Store for SqliteStore {
    // Write operations

    async fn add(
        &self,
        collection: &str,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<ChunkId>> {
        let collection = collection.to_string();
        let chunks = chunks.to_vec();
        let embeddings = embeddings.to_vec();

        self.with_write(collection.clone(), move |conn| {
            let ids = Self::write_batch(conn, &collection, None, &chunks, &embeddings)?;
            debug!("Added {} chunks to {}", ids.len(), collection);
            Ok(ids)
        })
        .await
    }

    async fn replace_source(
        &self,
        collection: &str,
        source_url: &str,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<ChunkId>> {
        if let Some(other) = chunks.iter().find(|c| c.source_url != source_url) {
            return Err(RagError::invalid_argument(format!(
                "chunk from {} cannot replace {}",
                other.source_url, source_url
            )));
        }

        let collection = collection.to_string();
        let source_url = source_url.to_string();
        let chunks = chunks.to_vec();
        let embeddings = embeddings.to_vec();

        self.with_write(collection.clone(), move |conn| {
            Self::write_batch(conn, &collection, Some(&source_url), &chunks, &embeddings)
        })
        .await
    }

    async fn delete_by_source(&self, collection: &str, source_url: &str) -> Result<u64> {
        let collection = collection.to_string();
        let source_url = source_url.to_string();

        self.with_write(collection.clone(), move |conn| {
            let tx = Self::begin_write(conn)?;

            let ids = Self::source_ids(&tx, &collection, &source_url)?;
            Self::delete_ids(&tx, &ids)?;

            tx.commit()
                .map_err(|e| RagError::database(format!("Failed to commit: {}", e)))?;

            debug!("Deleted {} chunks of {} from {}", ids.len(), source_url, collection);
            Ok(ids.len() as u64)
        })
        .await
    }

    async fn clear(&self, collection: &str) -> Result<u64> {
        let collection = collection.to_string();

        self.with_write(collection.clone(), move |conn| {
            let tx = Self::begin_write(conn)?;

            tx.execute(
                "DELETE FROM vec_chunks WHERE chunk_id IN (SELECT id FROM chunks WHERE collection = ?1)",
                params![collection],
            )
            .map_err(|e| RagError::database(e.to_string()))?;

            let deleted = tx
                .execute("DELETE FROM chunks WHERE collection = ?1", params![collection])
                .map_err(|e| RagError::database(e.to_string()))?;

            tx.execute("DELETE FROM collections WHERE name = ?1", params![collection])
                .map_err(|e| RagError::database(e.to_string()))?;

            tx.commit()
                .map_err(|e| RagError::database(format!("Failed to commit: {}", e)))?;

            info!("Cleared {} chunks from {}", deleted, collection);
            Ok(deleted as u64)
        })
        .await
    }

    // Read operations

    async fn count(&self, collection: &str) -> Result<u64> {
        let collection = collection.to_string();
        self.with_conn(move |conn| {
            Self::count_query(
                conn,
                "SELECT COUNT(*) FROM chunks WHERE collection = ?1",
                Some(&collection),
            )
        })
        .await
    }

    async fn list_sources(&self, collection: &str) -> Result<Vec<String>> {
        let collection = collection.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT DISTINCT source_url FROM chunks WHERE collection = ?1 ORDER BY source_url",
                )
                .map_err(|e| RagError::database(e.to_string()))?;

            let sources = stmt
                .query_map(params![collection], |row| row.get(0))
                .map_err(|e| RagError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<String>, _>>()
                .map_err(|e| RagError::database(e.to_string()))?;

            Ok(sources)
        })
        .await
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT name FROM collections ORDER BY name")
                .map_err(|e| RagError::database(e.to_string()))?;

            let collections = stmt
                .query_map([], |row| row.get(0))
                .map_err(|e| RagError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<String>, _>>()
                .map_err(|e| RagError::database(e.to_string()))?;

            Ok(collections)
        })
        .await
    }

    async fn collection_info(&self, collection: &str) -> Result<CollectionInfo> {
        let collection = collection.to_string();
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| RagError::database(e.to_string()))?;

            let row: Option<(i64, i64)> = tx
                .query_row(
                    "SELECT dimension, created_at FROM collections WHERE name = ?1",
                    params![collection],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|e| RagError::database(e.to_string()))?;

            let Some((dimension, created_at)) = row else {
                return Err(RagError::CollectionNotFound { name: collection });
            };

            let chunks = Self::count_query(
                &tx,
                "SELECT COUNT(*) FROM chunks WHERE collection = ?1",
                Some(&collection),
            )?;
            let sources = Self::count_query(
                &tx,
                "SELECT COUNT(DISTINCT source_url) FROM chunks WHERE collection = ?1",
                Some(&collection),
            )?;

            Ok(CollectionInfo {
                name: collection,
                dimension: dimension as usize,
                chunks,
                sources,
                created_at: created_at as u64,
            })
        })
        .await
    }

    async fn get_by_source(&self, collection: &str, source_url: &str) -> Result<Vec<IndexedChunk>> {
        let collection = collection.to_string();
        let source_url = source_url.to_string();

        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    r#"
                    SELECT {CHUNK_COLUMNS}, v.embedding
                    FROM chunks c
                    JOIN vec_chunks v ON v.chunk_id = c.id
                    WHERE c.collection = ?1 AND c.source_url = ?2
                    ORDER BY c.chunk_index, c.id
                    "#
                ))
                .map_err(|e| RagError::database(e.to_string()))?;

            let chunks = stmt
                .query_map(params![collection, source_url], |row| {
                    let (id, chunk) = Self::row_to_chunk(row)?;
                    let bytes: Vec<u8> = row.get(8)?;
                    Ok(IndexedChunk {
                        id,
                        collection: collection.clone(),
                        chunk,
                        embedding: bytes_to_vec(&bytes),
                    })
                })
                .map_err(|e| RagError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RagError::database(e.to_string()))?;

            Ok(chunks)
        })
        .await
    }

    // Search operations

    async fn vector_search(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if embedding.is_empty() {
            return Err(RagError::invalid_argument("query embedding must not be empty"));
        }
        if embedding.iter().any(|x| !x.is_finite()) {
            return Err(RagError::invalid_argument("query embedding must be finite"));
        }
        if top_k == 0 || !is_searchable(embedding) {
            // A zero vector has no cosine similarity to anything.
            return Ok(Vec::new());
        }

        let collection = collection.to_string();
        let query_dimension = embedding.len();
        let embedding_bytes = vec_to_bytes(embedding);

        self.with_conn(move |conn| {
            match Self::collection_dimension(conn, &collection)? {
                None => return Ok(Vec::new()),
                Some(expected) if expected != query_dimension => {
                    return Err(RagError::schema(&collection, expected, query_dimension));
                }
                Some(_) => {}
            }

            let mut stmt = conn
                .prepare_cached(&format!(
                    r#"
                    SELECT {CHUNK_COLUMNS}, vec_distance_cosine(v.embedding, ?2) AS distance
                    FROM chunks c
                    JOIN vec_chunks v ON v.chunk_id = c.id
                    WHERE c.collection = ?1 AND distance IS NOT NULL
                    ORDER BY distance ASC, c.id ASC
                    LIMIT ?3
                    "#
                ))
                .map_err(|e| RagError::database(e.to_string()))?;

            let results = stmt
                .query_map(params![collection, embedding_bytes, top_k as i64], |row| {
                    let (id, chunk) = Self::row_to_chunk(row)?;
                    let distance: f64 = row.get(8)?;
                    Ok(ScoredChunk {
                        id,
                        chunk,
                        score: (1.0 - distance) as f32,
                    })
                })
                .map_err(|e| RagError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RagError::database(e.to_string()))?;

            debug!("Vector search in {} returned {} results", collection, results.len());
            Ok(results)
        })
        .await
    }

    async fn keyword_search(
        &self,
        collection: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let fts_query = build_fts_query(query);
        if fts_query.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let collection = collection.to_string();

        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare_cached(&format!(
                    r#"
                    SELECT {CHUNK_COLUMNS}, bm25(chunks_fts) AS score
                    FROM chunks_fts
                    JOIN chunks c ON c.id = chunks_fts.rowid
                    WHERE chunks_fts MATCH ?1
                    AND c.collection = ?2
                    ORDER BY score ASC, c.id ASC
                    LIMIT ?3
                    "#
                ))
                .map_err(|e| RagError::database(e.to_string()))?;

            let results = stmt
                .query_map(params![fts_query, collection, top_k as i64], |row| {
                    let (id, chunk) = Self::row_to_chunk(row)?;
                    let bm25: f64 = row.get(8)?;
                    Ok(ScoredChunk {
                        id,
                        chunk,
                        score: (-bm25) as f32,
                    })
                })
                .map_err(|e| RagError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RagError::database(e.to_string()))?;

            debug!(
                "Keyword search in {} for {:?} returned {} results",
                collection,
                fts_query,
                results.len()
            );
            Ok(results)
        })
        .await
    }

    // Stats

    async fn stats(&self, collection: Option<&str>) -> Result<Stats> {
        let collection = collection.map(String::from);

        self.with_conn(move |conn| {
            let coll = collection.as_deref();
            let (collections, chunks, vectors, sources) = match coll {
                Some(_) => (
                    Self::count_query(conn, "SELECT COUNT(*) FROM collections WHERE name = ?1", coll)?,
                    Self::count_query(conn, "SELECT COUNT(*) FROM chunks WHERE collection = ?1", coll)?,
                    Self::count_query(
                        conn,
                        r#"
                        SELECT COUNT(*) FROM vec_chunks v
                        JOIN chunks c ON c.id = v.chunk_id
                        WHERE c.collection = ?1
                        "#,
                        coll,
                    )?,
                    Self::count_query(
                        conn,
                        "SELECT COUNT(DISTINCT source_url) FROM chunks WHERE collection = ?1",
                        coll,
                    )?,
                ),
                None => (
                    Self::count_query(conn, "SELECT COUNT(*) FROM collections", None)?,
                    Self::count_query(conn, "SELECT COUNT(*) FROM chunks", None)?,
                    Self::count_query(conn, "SELECT COUNT(*) FROM vec_chunks", None)?,
                    Self::count_query(
                        conn,
                        "SELECT COUNT(*) FROM (SELECT DISTINCT collection, source_url FROM chunks)",
                        None,
                    )?,
                ),
            };

            let page_count = Self::count_query(conn, "PRAGMA page_count", None)?;
            let page_size = Self::count_query(conn, "PRAGMA page_size", None)?;

            Ok(Stats {
                collection,
                collections,
                chunks,
                vectors,
                sources,
                size_bytes: page_count * page_size,
            })
        })
        .await
    }
}

/// Finite with a non-zero norm, so cosine distance is defined.
fn is_searchable(v: &[f32]) -> bool {
    v.iter().all(|x| x.is_finite()) && v.iter().any(|x| *x != 0.0)
}

/// Convert f32 vector to bytes (little-endian).
fn vec_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert little-endian bytes back to an f32 vector.
fn bytes_to_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Chunk count of every collection, ordered by name.
pub async fn collection_counts<S: Store + ?Sized>(store: &S) -> Result<Vec<(String, u64)>> {
    let mut counts = Vec::new();
    for name in store.list_collections().await? {
        let count = store.count(&name).await?;
        counts.push((name, count));
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const DIM: usize = 4;

    fn one_hot(i: usize) -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        v[i % DIM] = 1.0;
        v
    }

    fn chunks_for(source: &str, n: usize) -> (Vec<Chunk>, Vec<Vec<f32>>) {
        let chunks = (0..n)
            .map(|i| Chunk::new(source, i as u32, format!("{} paragraph number {}", source, i)))
            .collect();
        let embeddings = (0..n).map(one_hot).collect();
        (chunks, embeddings)
    }

    #[tokio::test]
    async fn test_open_memory() {
        let store = SqliteStore::open_memory().unwrap();
        assert!(store.list_collections().await.unwrap().is_empty());
        assert_eq!(store.count("docs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_and_reuse_ids() {
        let store = SqliteStore::open_memory().unwrap();
        let (chunks, embeddings) = chunks_for("https://a.dev/x", 3);

        let ids = store.add("docs", &chunks, &embeddings).await.unwrap();
        assert_eq!(ids.len(), 3);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let again = store.add("docs", &chunks, &embeddings).await.unwrap();
        assert_eq!(ids, again);
        assert_eq!(store.count("docs").await.unwrap(), 3);

        let stats = store.stats(Some("docs")).await.unwrap();
        assert_eq!(stats.chunks, 3);
        assert_eq!(stats.vectors, 3);
    }

    #[tokio::test]
    async fn test_duplicates_in_batch_share_id() {
        let store = SqliteStore::open_memory().unwrap();
        let chunk = Chunk::new("u", 0, "same text");
        let ids = store
            .add("docs", &[chunk.clone(), chunk], &[one_hot(0), one_hot(1)])
            .await
            .unwrap();
        assert_eq!(ids[0], ids[1]);
        assert_eq!(store.count("docs").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_source() {
        let store = SqliteStore::open_memory().unwrap();
        let (x_chunks, x_embeddings) = chunks_for("x", 5);
        let (y_chunks, y_embeddings) = chunks_for("y", 3);
        store.add("docs", &x_chunks, &x_embeddings).await.unwrap();
        store.add("docs", &y_chunks, &y_embeddings).await.unwrap();
        assert_eq!(store.count("docs").await.unwrap(), 8);

        let deleted = store.delete_by_source("docs", "x").await.unwrap();
        assert_eq!(deleted, 5);
        assert_eq!(store.count("docs").await.unwrap(), 3);
        assert_eq!(store.list_sources("docs").await.unwrap(), vec!["y"]);

        let stats = store.stats(None).await.unwrap();
        assert_eq!(stats.vectors, 3);
        assert!(store
            .keyword_search("docs", "paragraph", 10)
            .await
            .unwrap()
            .iter()
            .all(|r| r.chunk.source_url == "y"));
    }

    #[tokio::test]
    async fn test_mismatched_lengths_leave_store_unchanged() {
        let store = SqliteStore::open_memory().unwrap();
        let (chunks, embeddings) = chunks_for("x", 2);
        store.add("docs", &chunks, &embeddings).await.unwrap();

        let (more, _) = chunks_for("y", 3);
        let err = store
            .add("docs", &more, &[one_hot(0), one_hot(1)])
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
        assert_eq!(store.count("docs").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_schema_error() {
        let store = SqliteStore::open_memory().unwrap();
        let (chunks, embeddings) = chunks_for("x", 2);
        store.add("docs", &chunks, &embeddings).await.unwrap();

        let err = store
            .add("docs", &[Chunk::new("y", 0, "other")], &[vec![1.0, 0.0]])
            .await
            .unwrap_err();
        match err {
            RagError::Schema {
                expected, actual, ..
            } => {
                assert_eq!(expected, DIM);
                assert_eq!(actual, 2);
            }
            other => panic!("expected schema error, got {:?}", other),
        }
        assert_eq!(store.count("docs").await.unwrap(), 2);

        let err = store.vector_search("docs", &[1.0, 0.0], 5).await.unwrap_err();
        assert_eq!(err.error_code(), "SCHEMA_MISMATCH");
    }

    #[tokio::test]
    async fn test_vector_search_exact_match_first() {
        let store = SqliteStore::open_memory().unwrap();
        let (chunks, _) = chunks_for("x", 3);
        let embeddings = vec![
            vec![0.1, 0.9, 0.0, 0.0],
            vec![0.5, 0.5, 0.5, 0.5],
            vec![0.9, 0.1, 0.3, 0.0],
        ];
        let ids = store.add("docs", &chunks, &embeddings).await.unwrap();

        let results = store
            .vector_search("docs", &embeddings[1], 3)
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, ids[1]);
        assert!((results[0].score - 1.0).abs() < 1e-5);
        assert!(results[0].score >= results[1].score);
        assert!(results[1].score >= results[2].score);
    }

    #[tokio::test]
    async fn test_vector_ties_by_lowest_id() {
        let store = SqliteStore::open_memory().unwrap();
        let chunks = vec![
            Chunk::new("x", 0, "first"),
            Chunk::new("x", 1, "second"),
            Chunk::new("x", 2, "third"),
        ];
        let embeddings = vec![one_hot(1), one_hot(0), one_hot(0)];
        let ids = store.add("docs", &chunks, &embeddings).await.unwrap();

        let results = store.vector_search("docs", &one_hot(0), 2).await.unwrap();
        assert_eq!(results[0].id, ids[1]);
        assert_eq!(results[1].id, ids[2]);
    }

    #[tokio::test]
    async fn test_keyword_ties_by_lowest_id() {
        let store = SqliteStore::open_memory().unwrap();
        let chunks = vec![
            Chunk::new("https://b.dev/setup", 0, "run npm install first"),
            Chunk::new("https://a.dev/setup", 0, "run npm install first"),
            Chunk::new("https://c.dev/setup", 0, "run npm install first"),
        ];
        let ids = store
            .add("docs", &chunks, &[one_hot(0), one_hot(1), one_hot(2)])
            .await
            .unwrap();
        assert_eq!(ids.len(), 3);

        let results = store.keyword_search("docs", "npm install", 3).await.unwrap();
        let got: Vec<ChunkId> = results.iter().map(|r| r.id).collect();
        assert_eq!(got, ids);
        assert_eq!(results[0].score, results[2].score);
    }

    #[tokio::test]
    async fn test_unsearchable_embeddings_rejected() {
        let store = SqliteStore::open_memory().unwrap();
        let (chunks, _) = chunks_for("x", 2);

        let err = store
            .add("docs", &chunks, &[one_hot(0), vec![0.0; DIM]])
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");

        let err = store
            .add("docs", &chunks, &[one_hot(0), vec![f32::NAN, 1.0, 0.0, 0.0]])
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
        assert_eq!(store.count("docs").await.unwrap(), 0);
        assert!(store.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_query_vector_finds_nothing() {
        let store = SqliteStore::open_memory().unwrap();
        let (chunks, embeddings) = chunks_for("x", 2);
        store.add("docs", &chunks, &embeddings).await.unwrap();

        let results = store.vector_search("docs", &[0.0; DIM], 5).await.unwrap();
        assert!(results.is_empty());

        let err = store
            .vector_search("docs", &[f32::INFINITY, 0.0, 0.0, 0.0], 5)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_zero_stored_vector_is_skipped() {
        let store = SqliteStore::open_memory().unwrap();
        let (chunks, embeddings) = chunks_for("x", 3);
        let ids = store.add("docs", &chunks, &embeddings).await.unwrap();

        // Written by an older build that did not validate vectors.
        let zeroed = ids[1];
        store
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE vec_chunks SET embedding = ?1 WHERE chunk_id = ?2",
                    params![vec_to_bytes(&[0.0; DIM]), zeroed],
                )
                .map_err(|e| RagError::database(e.to_string()))
            })
            .await
            .unwrap();

        let results = store.vector_search("docs", &one_hot(0), 5).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, ids[0]);
        assert!(results.iter().all(|r| r.id != zeroed));
    }

    #[tokio::test]
    async fn test_missing_collection_is_empty() {
        let store = SqliteStore::open_memory().unwrap();
        assert!(store
            .vector_search("nope", &one_hot(0), 5)
            .await
            .unwrap()
            .is_empty());
        assert!(store
            .keyword_search("nope", "anything", 5)
            .await
            .unwrap()
            .is_empty());
        assert!(store.list_sources("nope").await.unwrap().is_empty());

        let err = store.collection_info("nope").await.unwrap_err();
        assert_eq!(err.error_code(), "COLLECTION_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_keyword_search() {
        let store = SqliteStore::open_memory().unwrap();
        let chunks = vec![
            Chunk::new("u1", 0, "install via npm"),
            Chunk::new("u2", 0, "configure the database connection"),
            Chunk::new("u3", 0, "npm scripts and npm workspaces"),
        ];
        let embeddings = vec![one_hot(0), one_hot(1), one_hot(2)];
        store.add("docs", &chunks, &embeddings).await.unwrap();
        store
            .add("other", &[Chunk::new("u9", 0, "npm everywhere")], &[one_hot(0)])
            .await
            .unwrap();

        let results = store.keyword_search("docs", "npm", 10).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.chunk.source_url != "u2"));
        assert!(results.iter().all(|r| r.chunk.source_url != "u9"));
        assert!(results[0].score >= results[1].score);

        let results = store
            .keyword_search("docs", "How do I configure databases?", 10)
            .await
            .unwrap();
        assert_eq!(results[0].chunk.source_url, "u2");

        assert!(store
            .keyword_search("docs", "the of and", 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_replace_source_keeps_unchanged_ids() {
        let store = SqliteStore::open_memory().unwrap();
        let v1 = vec![Chunk::new("p", 0, "intro"), Chunk::new("p", 1, "old part")];
        let ids = store
            .replace_source("docs", "p", &v1, &[one_hot(0), one_hot(1)])
            .await
            .unwrap();

        let v2 = vec![Chunk::new("p", 0, "intro"), Chunk::new("p", 1, "new part")];
        let new_ids = store
            .replace_source("docs", "p", &v2, &[one_hot(0), one_hot(2)])
            .await
            .unwrap();

        assert_eq!(ids[0], new_ids[0]);
        assert_ne!(ids[1], new_ids[1]);
        assert_eq!(store.count("docs").await.unwrap(), 2);

        let stored = store.get_by_source("docs", "p").await.unwrap();
        let contents: Vec<&str> = stored.iter().map(|c| c.chunk.content.as_str()).collect();
        assert_eq!(contents, vec!["intro", "new part"]);
        assert_eq!(stored[1].embedding, one_hot(2));
        assert!(store.keyword_search("docs", "old", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_source_rejects_foreign_chunks() {
        let store = SqliteStore::open_memory().unwrap();
        let err = store
            .replace_source("docs", "p", &[Chunk::new("q", 0, "text")], &[one_hot(0)])
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_get_by_source_roundtrips_metadata() {
        let store = SqliteStore::open_memory().unwrap();
        let mut chunk = Chunk::new("p", 1, "```rust\nfn main() {}\n```")
            .with_page_title("Guide")
            .with_section("Usage", vec!["Setup".to_string(), "Usage".to_string()]);
        chunk.has_code = true;
        let first = Chunk::new("p", 0, "intro");

        store
            .add("docs", &[chunk.clone(), first.clone()], &[one_hot(0), one_hot(1)])
            .await
            .unwrap();

        let stored = store.get_by_source("docs", "p").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].chunk, first);
        assert_eq!(stored[1].chunk, chunk);
        assert_eq!(stored[1].collection, "docs");
    }

    #[tokio::test]
    async fn test_clear_resets_collection() {
        let store = SqliteStore::open_memory().unwrap();
        let (chunks, embeddings) = chunks_for("x", 4);
        store.add("docs", &chunks, &embeddings).await.unwrap();
        store
            .add("keep", &[Chunk::new("k", 0, "kept")], &[one_hot(0)])
            .await
            .unwrap();

        assert_eq!(store.clear("docs").await.unwrap(), 4);
        assert_eq!(store.count("docs").await.unwrap(), 0);
        assert_eq!(store.list_collections().await.unwrap(), vec!["keep"]);
        assert_eq!(store.stats(None).await.unwrap().vectors, 1);

        // A cleared collection can be rebuilt with another dimension.
        store
            .add("docs", &[Chunk::new("x", 0, "again")], &[vec![1.0, 0.0]])
            .await
            .unwrap();
        assert_eq!(store.collection_info("docs").await.unwrap().dimension, 2);
    }

    #[tokio::test]
    async fn test_collection_info() {
        let store = SqliteStore::open_memory().unwrap();
        let (x, xe) = chunks_for("x", 2);
        let (y, ye) = chunks_for("y", 1);
        store.add("docs", &x, &xe).await.unwrap();
        store.add("docs", &y, &ye).await.unwrap();

        let info = store.collection_info("docs").await.unwrap();
        assert_eq!(info.name, "docs");
        assert_eq!(info.dimension, DIM);
        assert_eq!(info.chunks, 3);
        assert_eq!(info.sources, 2);
        assert!(info.created_at > 0);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("docs.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            let (chunks, embeddings) = chunks_for("x", 2);
            store.add("react", &chunks, &embeddings).await.unwrap();
            store.add("nextjs", &chunks, &embeddings).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.list_collections().await.unwrap(),
            vec!["nextjs", "react"]
        );
        assert_eq!(store.count("react").await.unwrap(), 2);

        let counts = collection_counts(&store).await.unwrap();
        assert_eq!(
            counts,
            vec![("nextjs".to_string(), 2), ("react".to_string(), 2)]
        );
        assert!(store.stats(None).await.unwrap().size_bytes > 0);
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        let mut handles = Vec::new();

        for w in 0..4 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for batch in 0..5 {
                    let source = format!("w{}-b{}", w, batch);
                    let (chunks, embeddings) = chunks_for(&source, 3);
                    store.add("docs", &chunks, &embeddings).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.count("docs").await.unwrap(), 60);
        let stats = store.stats(Some("docs")).await.unwrap();
        assert_eq!(stats.vectors, 60);
        assert_eq!(
            store.keyword_search("docs", "paragraph", 200).await.unwrap().len(),
            60
        );
    }

    #[tokio::test]
    async fn test_write_lock_is_per_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("docs.db")).unwrap());
        let (chunks, embeddings) = chunks_for("x", 2);
        store.add("a", &chunks, &embeddings).await.unwrap();
        store.add("b", &chunks, &embeddings).await.unwrap();

        let held = store.write_lock("a").unwrap().lock_owned().await;
        let wait = Duration::from_secs(5);

        let hits = timeout(wait, store.vector_search("b", &one_hot(0), 5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hits.len(), 2);
        let hits = timeout(wait, store.keyword_search("b", "paragraph", 5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hits.len(), 2);

        let (more, more_embeddings) = chunks_for("y", 1);
        timeout(wait, store.add("b", &more, &more_embeddings))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.count("b").await.unwrap(), 3);

        // Readers of the locked collection see its last commit.
        assert_eq!(store.count("a").await.unwrap(), 2);

        let pending = {
            let store = Arc::clone(&store);
            let (chunks, embeddings) = chunks_for("z", 1);
            tokio::spawn(async move { store.add("a", &chunks, &embeddings).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!pending.is_finished());

        drop(held);
        pending.await.unwrap().unwrap();
        assert_eq!(store.count("a").await.unwrap(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_across_collections() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("docs.db")).unwrap());
        let mut handles = Vec::new();

        for w in 0..4 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let collection = format!("c{}", w);
                for batch in 0..5 {
                    let (chunks, embeddings) = chunks_for(&format!("b{}", batch), 3);
                    store.add(&collection, &chunks, &embeddings).await.unwrap();
                    assert!(!store
                        .vector_search(&collection, &one_hot(batch), 3)
                        .await
                        .unwrap()
                        .is_empty());
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let counts = collection_counts(store.as_ref()).await.unwrap();
        assert_eq!(counts.len(), 4);
        assert!(counts.iter().all(|(_, count)| *count == 15));
        assert_eq!(store.stats(None).await.unwrap().vectors, 60);
    }
}
