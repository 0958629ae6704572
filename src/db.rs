//! SQLite signature store with Diesel ORM
//!
//! Datasets group audio tracks; every track holds at most one signature per
//! engine. Signatures are stored as JSON bundles stamped with the schema
//! version that wrote them, so a future incompatible layout is detected on
//! load instead of being misread.

use crate::error::SimilarityError;
use crate::schema::*;
use crate::search::Candidate;
use crate::signature::Signature;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::debug;

/// Current signature bundle schema version
pub const CURRENT_SCHEMA: SignatureSchema = SignatureSchema {
    major: 1,
    minor: 0,
    patch: 0,
    name: "gaussian-signatures",
    features: &[
        "single_gaussian",
        "kmeans_mixture",
        "earth_movers_distance",
        "quadratic_chi_distance",
        "compound_rank_fusion",
    ],
};

/// Describes the layout of stored signature bundles
#[derive(Debug, Clone)]
pub struct SignatureSchema {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub name: &'static str,
    pub features: &'static [&'static str],
}

impl SignatureSchema {
    pub fn version_string(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }

    /// Bundles written under the same major version can be read back.
    pub fn accepts(&self, stored_version: &str) -> bool {
        stored_version
            .split('.')
            .next()
            .and_then(|m| m.parse::<u32>().ok())
            .map_or(false, |major| major == self.major)
    }
}

impl std::fmt::Display for SignatureSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{} ({})", self.version_string(), self.name)
    }
}

// ============================================================================
// Diesel Models
// ============================================================================

#[derive(Insertable)]
#[diesel(table_name = schema_versions)]
pub struct NewSchemaVersion<'a> {
    pub version: &'a str,
    pub name: &'a str,
    pub features: &'a str,
    pub introduced_at: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = engines)]
pub struct NewEngine<'a> {
    pub identifier: &'a str,
    pub registered_at: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = datasets)]
pub struct NewDataset<'a> {
    pub name: &'a str,
    pub root_path: Option<&'a str>,
    pub created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = datasets)]
pub struct DatasetRecord {
    pub id: i32,
    pub name: String,
    pub root_path: Option<String>,
    pub created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = audio_tracks)]
pub struct NewTrack<'a> {
    pub dataset_id: i32,
    pub name: &'a str,
    pub path: &'a str,
    pub added_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = audio_tracks)]
pub struct TrackRecord {
    pub id: i32,
    pub dataset_id: i32,
    pub name: String,
    pub path: String,
    pub added_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = track_signatures)]
pub struct NewSignature<'a> {
    pub track_id: i32,
    pub engine_id: i32,
    pub bundle: &'a str,
    pub schema_version: &'a str,
    pub created_at: &'a str,
}

/// What search results point back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackRef {
    pub track_id: i32,
    pub name: String,
    pub path: String,
}

// ============================================================================
// Store Interface
// ============================================================================

/// Persistence the similarity core needs: write a signature once, read it
/// back, and enumerate a dataset's signatures for one engine.
pub trait SignatureStore {
    /// Store `signature` for the track at `track_path`, creating the dataset,
    /// engine and track rows on first use. A track already holding a
    /// signature for `engine` is an error.
    fn store_signature(
        &self,
        dataset: &str,
        engine: &str,
        track_path: &str,
        signature: &Signature,
    ) -> crate::error::Result<TrackRef>;

    fn load_signature(&self, dataset: &str, engine: &str, track_id: i32) -> crate::error::Result<Signature>;

    /// Lazily load every signature of `engine` in `dataset`, in track order.
    /// Each item is fetched and decoded when the iterator reaches it.
    fn candidates<'a>(
        &'a self,
        dataset: &str,
        engine: &str,
    ) -> crate::error::Result<Box<dyn Iterator<Item = crate::error::Result<Candidate<TrackRef>>> + 'a>>;
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Database connection wrapper with connection pool
pub struct Database {
    pool: DbPool,
}

/// Error type for database operations
#[derive(Debug)]
pub enum DbError {
    Connection(String),
    Query(diesel::result::Error),
    Pool(diesel::r2d2::Error),
    NotFound(String),
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbError::Connection(msg) => write!(f, "Connection error: {}", msg),
            DbError::Query(e) => write!(f, "Query error: {}", e),
            DbError::Pool(e) => write!(f, "Pool error: {}", e),
            DbError::NotFound(what) => write!(f, "Not found: {}", what),
        }
    }
}

impl std::error::Error for DbError {}

impl From<diesel::result::Error> for DbError {
    fn from(e: diesel::result::Error) -> Self {
        DbError::Query(e)
    }
}

impl From<diesel::r2d2::Error> for DbError {
    fn from(e: diesel::r2d2::Error) -> Self {
        DbError::Pool(e)
    }
}

impl From<DbError> for SimilarityError {
    fn from(e: DbError) -> Self {
        SimilarityError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

fn now() -> String {
    chrono::Local::now().to_rfc3339()
}

impl Database {
    /// Open database at specified path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(5)
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    fn get_conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| DbError::Connection(e.to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS schema_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                version TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                features TEXT NOT NULL,
                introduced_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS engines (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                identifier TEXT NOT NULL UNIQUE,
                registered_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS datasets (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                name TEXT NOT NULL UNIQUE,
                root_path TEXT,
                created_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS audio_tracks (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                dataset_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                path TEXT NOT NULL,
                added_at TEXT NOT NULL,
                FOREIGN KEY (dataset_id) REFERENCES datasets(id),
                UNIQUE(dataset_id, path)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS track_signatures (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                track_id INTEGER NOT NULL,
                engine_id INTEGER NOT NULL,
                bundle TEXT NOT NULL,
                schema_version TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (track_id) REFERENCES audio_tracks(id),
                FOREIGN KEY (engine_id) REFERENCES engines(id),
                UNIQUE(track_id, engine_id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_tracks_dataset ON audio_tracks(dataset_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_signatures_engine ON track_signatures(engine_id)").execute(&mut conn)?;

        self.register_schema(&CURRENT_SCHEMA)?;
        Ok(())
    }

    fn register_schema(&self, schema: &SignatureSchema) -> Result<()> {
        let mut conn = self.get_conn()?;
        let now = now();
        let features_json = serde_json::to_string(&schema.features).unwrap_or_default();

        let new_schema = NewSchemaVersion {
            version: &schema.version_string(),
            name: schema.name,
            features: &features_json,
            introduced_at: &now,
        };

        diesel::insert_or_ignore_into(schema_versions::table)
            .values(&new_schema)
            .execute(&mut conn)?;

        Ok(())
    }

    // ========================================================================
    // Datasets, Engines, Tracks
    // ========================================================================

    /// Id of dataset `name`, creating it if needed.
    pub fn ensure_dataset(&self, name: &str, root_path: Option<&str>) -> Result<i32> {
        let mut conn = self.get_conn()?;
        Ok(upsert_dataset(&mut conn, name, root_path)?)
    }

    /// Id of engine `identifier`, creating it if needed.
    pub fn ensure_engine(&self, identifier: &str) -> Result<i32> {
        let mut conn = self.get_conn()?;
        Ok(upsert_engine(&mut conn, identifier)?)
    }

    pub fn dataset_id(&self, name: &str) -> Result<Option<i32>> {
        let mut conn = self.get_conn()?;
        let id = datasets::table
            .filter(datasets::name.eq(name))
            .select(datasets::id)
            .first::<i32>(&mut conn)
            .optional()?;
        Ok(id)
    }

    pub fn engine_id(&self, identifier: &str) -> Result<Option<i32>> {
        let mut conn = self.get_conn()?;
        let id = engines::table
            .filter(engines::identifier.eq(identifier))
            .select(engines::id)
            .first::<i32>(&mut conn)
            .optional()?;
        Ok(id)
    }

    /// The track at `path` in `dataset_id`, creating it if needed.
    pub fn ensure_track(&self, dataset_id: i32, path: &str) -> Result<TrackRef> {
        let mut conn = self.get_conn()?;
        Ok(upsert_track(&mut conn, dataset_id, path)?)
    }

    pub fn list_datasets(&self) -> Result<Vec<DatasetRecord>> {
        let mut conn = self.get_conn()?;
        let records = datasets::table
            .order(datasets::name.asc())
            .load::<DatasetRecord>(&mut conn)?;
        Ok(records)
    }

    pub fn list_tracks(&self, dataset: &str) -> Result<Vec<TrackRecord>> {
        let Some(dataset_id) = self.dataset_id(dataset)? else {
            return Err(DbError::NotFound(format!("dataset '{}'", dataset)));
        };
        let mut conn = self.get_conn()?;
        let records = audio_tracks::table
            .filter(audio_tracks::dataset_id.eq(dataset_id))
            .order(audio_tracks::id.asc())
            .load::<TrackRecord>(&mut conn)?;
        Ok(records)
    }

    /// Paths in `dataset` that already have a signature for `engine`.
    pub fn indexed_paths(&self, dataset: &str, engine: &str) -> Result<HashSet<String>> {
        let (Some(dataset_id), Some(engine_id)) = (self.dataset_id(dataset)?, self.engine_id(engine)?)
        else {
            return Ok(HashSet::new());
        };
        let mut conn = self.get_conn()?;
        let paths = track_signatures::table
            .inner_join(audio_tracks::table)
            .filter(audio_tracks::dataset_id.eq(dataset_id))
            .filter(track_signatures::engine_id.eq(engine_id))
            .select(audio_tracks::path)
            .load::<String>(&mut conn)?;
        Ok(paths.into_iter().collect())
    }

    /// Drop every signature of `engine` in `dataset`. Returns the count.
    pub fn delete_signatures(&self, dataset: &str, engine: &str) -> Result<usize> {
        let (Some(dataset_id), Some(engine_id)) = (self.dataset_id(dataset)?, self.engine_id(engine)?)
        else {
            return Ok(0);
        };
        let mut conn = self.get_conn()?;
        let tracks = audio_tracks::table
            .filter(audio_tracks::dataset_id.eq(dataset_id))
            .select(audio_tracks::id);
        let count = diesel::delete(
            track_signatures::table
                .filter(track_signatures::engine_id.eq(engine_id))
                .filter(track_signatures::track_id.eq_any(tracks)),
        )
        .execute(&mut conn)?;
        Ok(count)
    }

    /// Signature counts per engine identifier.
    pub fn signature_counts(&self) -> Result<BTreeMap<String, i64>> {
        let mut conn = self.get_conn()?;
        let rows = track_signatures::table
            .inner_join(engines::table)
            .group_by(engines::identifier)
            .select((engines::identifier, diesel::dsl::count(track_signatures::id)))
            .load::<(String, i64)>(&mut conn)?;
        Ok(rows.into_iter().collect())
    }

    pub fn get_summary(&self) -> Result<DbSummary> {
        let mut conn = self.get_conn()?;
        let datasets: i64 = datasets::table.count().get_result(&mut conn)?;
        let tracks: i64 = audio_tracks::table.count().get_result(&mut conn)?;
        drop(conn);
        Ok(DbSummary {
            datasets,
            tracks,
            signatures: self.signature_counts()?,
            schema: CURRENT_SCHEMA.to_string(),
        })
    }

    // ========================================================================
    // Signatures
    // ========================================================================

    /// Fetch and decode one stored bundle.
    fn load_bundle(&self, signature_id: i32) -> crate::error::Result<Signature> {
        let mut conn = self.get_conn()?;
        let (bundle, version) = track_signatures::table
            .filter(track_signatures::id.eq(signature_id))
            .select((track_signatures::bundle, track_signatures::schema_version))
            .first::<(String, String)>(&mut conn)
            .map_err(DbError::from)?;

        if !CURRENT_SCHEMA.accepts(&version) {
            return Err(SimilarityError::invalid(format!(
                "bundle {} written by schema {}, this build reads {}",
                signature_id,
                version,
                CURRENT_SCHEMA.version_string()
            )));
        }
        Signature::from_bundle(&bundle)
    }
}

impl SignatureStore for Database {
    fn store_signature(
        &self,
        dataset: &str,
        engine: &str,
        track_path: &str,
        signature: &Signature,
    ) -> crate::error::Result<TrackRef> {
        let bundle = signature.to_bundle()?;
        let mut conn = self.get_conn()?;

        // Dataset, engine and track rows only persist alongside the signature.
        let track = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                let dataset_id = upsert_dataset(conn, dataset, None)?;
                let engine_id = upsert_engine(conn, engine)?;
                let track = upsert_track(conn, dataset_id, track_path)?;
                diesel::insert_into(track_signatures::table)
                    .values(&NewSignature {
                        track_id: track.track_id,
                        engine_id,
                        bundle: &bundle,
                        schema_version: &CURRENT_SCHEMA.version_string(),
                        created_at: &now(),
                    })
                    .execute(conn)?;
                Ok(track)
            })
            .map_err(|e| SimilarityError::from(DbError::from(e)).context(&format!("{} [{}]", track_path, engine)))?;
        debug!(dataset, engine, track = track.track_id, "stored signature");
        Ok(track)
    }

    fn load_signature(&self, dataset: &str, engine: &str, track_id: i32) -> crate::error::Result<Signature> {
        let (Some(dataset_id), Some(engine_id)) = (self.dataset_id(dataset)?, self.engine_id(engine)?)
        else {
            return Err(DbError::NotFound(format!("{} signatures in '{}'", engine, dataset)).into());
        };
        let mut conn = self.get_conn()?;
        let signature_id = track_signatures::table
            .inner_join(audio_tracks::table)
            .filter(audio_tracks::dataset_id.eq(dataset_id))
            .filter(track_signatures::engine_id.eq(engine_id))
            .filter(track_signatures::track_id.eq(track_id))
            .select(track_signatures::id)
            .first::<i32>(&mut conn)
            .optional()
            .map_err(DbError::from)?
            .ok_or_else(|| DbError::NotFound(format!("{} signature for track {}", engine, track_id)))?;
        drop(conn);
        self.load_bundle(signature_id)
    }

    fn candidates<'a>(
        &'a self,
        dataset: &str,
        engine: &str,
    ) -> crate::error::Result<Box<dyn Iterator<Item = crate::error::Result<Candidate<TrackRef>>> + 'a>> {
        let (Some(dataset_id), Some(engine_id)) = (self.dataset_id(dataset)?, self.engine_id(engine)?)
        else {
            return Ok(Box::new(std::iter::empty()));
        };

        let mut conn = self.get_conn()?;
        let rows = track_signatures::table
            .inner_join(audio_tracks::table)
            .filter(audio_tracks::dataset_id.eq(dataset_id))
            .filter(track_signatures::engine_id.eq(engine_id))
            .select((track_signatures::id, audio_tracks::id, audio_tracks::name, audio_tracks::path))
            .order(audio_tracks::id.asc())
            .load::<(i32, i32, String, String)>(&mut conn)
            .map_err(DbError::from)?;

        debug!(dataset, engine, candidates = rows.len(), "opened candidate cursor");
        Ok(Box::new(rows.into_iter().map(move |(signature_id, track_id, name, path)| {
            let signature = self
                .load_bundle(signature_id)
                .map_err(|e| e.context(&format!("track {}", track_id)))?;
            Ok(Candidate { reference: TrackRef { track_id, name, path }, signature })
        })))
    }
}

// ============================================================================
// Row Helpers
// ============================================================================

fn upsert_dataset(conn: &mut SqliteConnection, name: &str, root_path: Option<&str>) -> QueryResult<i32> {
    diesel::insert_or_ignore_into(datasets::table)
        .values(&NewDataset { name, root_path, created_at: &now() })
        .execute(conn)?;

    datasets::table
        .filter(datasets::name.eq(name))
        .select(datasets::id)
        .first::<i32>(conn)
}

fn upsert_engine(conn: &mut SqliteConnection, identifier: &str) -> QueryResult<i32> {
    diesel::insert_or_ignore_into(engines::table)
        .values(&NewEngine { identifier, registered_at: &now() })
        .execute(conn)?;

    engines::table
        .filter(engines::identifier.eq(identifier))
        .select(engines::id)
        .first::<i32>(conn)
}

fn upsert_track(conn: &mut SqliteConnection, dataset_id: i32, path: &str) -> QueryResult<TrackRef> {
    let name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string());

    diesel::insert_or_ignore_into(audio_tracks::table)
        .values(&NewTrack { dataset_id, name: &name, path, added_at: &now() })
        .execute(conn)?;

    let (track_id, name) = audio_tracks::table
        .filter(audio_tracks::dataset_id.eq(dataset_id))
        .filter(audio_tracks::path.eq(path))
        .select((audio_tracks::id, audio_tracks::name))
        .first::<(i32, String)>(conn)?;

    Ok(TrackRef { track_id, name, path: path.to_string() })
}

// ============================================================================
// Additional Types
// ============================================================================

/// Summary statistics from the database
#[derive(Debug, Clone, Serialize)]
pub struct DbSummary {
    pub datasets: i64,
    pub tracks: i64,
    pub signatures: BTreeMap<String, i64>,
    pub schema: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::NumericArray;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn sig(v: f64) -> Signature {
        Signature::new().with("score", NumericArray::scalar(v))
    }

    // ==========================================================================
    // SCHEMA VERSION
    // ==========================================================================

    #[test]
    fn test_schema_accepts_same_major_only() {
        assert!(CURRENT_SCHEMA.accepts("1.0.0"));
        assert!(CURRENT_SCHEMA.accepts("1.7.3"));
        assert!(!CURRENT_SCHEMA.accepts("2.0.0"));
        assert!(!CURRENT_SCHEMA.accepts("garbage"));
        assert_eq!(CURRENT_SCHEMA.to_string(), "v1.0.0 (gaussian-signatures)");
    }

    // ==========================================================================
    // STORE & LOAD
    // ==========================================================================

    #[test]
    fn test_store_then_load_round_trip() {
        let (_dir, db) = open_temp();
        let track = db.store_signature("jazz", "Mandel_Ellis_v01", "/music/a.flac", &sig(0.5)).unwrap();
        assert_eq!(track.name, "a.flac");

        let loaded = db.load_signature("jazz", "Mandel_Ellis_v01", track.track_id).unwrap();
        assert_eq!(loaded, sig(0.5));
    }

    #[test]
    fn test_second_signature_for_same_engine_is_rejected() {
        let (_dir, db) = open_temp();
        db.store_signature("jazz", "E", "/music/a.flac", &sig(0.5)).unwrap();
        let err = db.store_signature("jazz", "E", "/music/a.flac", &sig(0.7)).unwrap_err();
        assert!(matches!(err, SimilarityError::Storage(_)));

        // Another engine may still sign the same track.
        let track = db.store_signature("jazz", "F", "/music/a.flac", &sig(0.7)).unwrap();
        assert_eq!(db.list_tracks("jazz").unwrap().len(), 1);
        assert_eq!(db.load_signature("jazz", "F", track.track_id).unwrap(), sig(0.7));
    }

    #[test]
    fn test_failed_signature_insert_leaves_no_rows() {
        let (_dir, db) = open_temp();
        let mut conn = db.get_conn().unwrap();
        diesel::sql_query("DROP TABLE track_signatures").execute(&mut conn).unwrap();
        drop(conn);

        let err = db.store_signature("jazz", "E", "/music/a.flac", &sig(0.5)).unwrap_err();
        assert!(matches!(err, SimilarityError::Storage(_)));

        let mut conn = db.get_conn().unwrap();
        let tracks: i64 = audio_tracks::table.count().get_result(&mut conn).unwrap();
        let datasets_left: i64 = datasets::table.count().get_result(&mut conn).unwrap();
        let engines_left: i64 = engines::table.count().get_result(&mut conn).unwrap();
        assert_eq!((tracks, datasets_left, engines_left), (0, 0, 0));
    }

    #[test]
    fn test_load_missing_signature() {
        let (_dir, db) = open_temp();
        assert!(matches!(
            db.load_signature("nope", "E", 1),
            Err(SimilarityError::Storage(_))
        ));
    }

    // ==========================================================================
    // CANDIDATES
    // ==========================================================================

    #[test]
    fn test_candidates_are_scoped_to_dataset_and_engine() {
        let (_dir, db) = open_temp();
        db.store_signature("jazz", "E", "/j/1.mp3", &sig(0.1)).unwrap();
        db.store_signature("jazz", "E", "/j/2.mp3", &sig(0.2)).unwrap();
        db.store_signature("jazz", "F", "/j/3.mp3", &sig(0.3)).unwrap();
        db.store_signature("rock", "E", "/r/1.mp3", &sig(0.4)).unwrap();

        let found: Vec<Candidate<TrackRef>> =
            db.candidates("jazz", "E").unwrap().collect::<crate::error::Result<_>>().unwrap();
        let paths: Vec<&str> = found.iter().map(|c| c.reference.path.as_str()).collect();
        assert_eq!(paths, vec!["/j/1.mp3", "/j/2.mp3"]);
        assert_eq!(found[1].signature, sig(0.2));

        assert_eq!(db.candidates("jazz", "missing").unwrap().count(), 0);
        assert_eq!(db.candidates("missing", "E").unwrap().count(), 0);
    }

    #[test]
    fn test_incompatible_or_corrupt_bundles_fail_individually() {
        let (_dir, db) = open_temp();
        let a = db.store_signature("jazz", "E", "/j/a.mp3", &sig(0.1)).unwrap();
        let b = db.store_signature("jazz", "E", "/j/b.mp3", &sig(0.2)).unwrap();
        db.store_signature("jazz", "E", "/j/c.mp3", &sig(0.3)).unwrap();

        let mut conn = db.get_conn().unwrap();
        diesel::update(track_signatures::table.filter(track_signatures::track_id.eq(a.track_id)))
            .set(track_signatures::schema_version.eq("2.0.0"))
            .execute(&mut conn)
            .unwrap();
        diesel::update(track_signatures::table.filter(track_signatures::track_id.eq(b.track_id)))
            .set(track_signatures::bundle.eq("{not json"))
            .execute(&mut conn)
            .unwrap();
        drop(conn);

        let items: Vec<_> = db.candidates("jazz", "E").unwrap().collect();
        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], Err(SimilarityError::InvalidSignature(_))));
        assert!(matches!(items[1], Err(SimilarityError::InvalidSignature(_))));
        assert!(items[2].is_ok());
    }

    // ==========================================================================
    // BOOKKEEPING
    // ==========================================================================

    #[test]
    fn test_indexed_paths_and_delete() {
        let (_dir, db) = open_temp();
        db.store_signature("jazz", "E", "/j/1.mp3", &sig(0.1)).unwrap();
        db.store_signature("jazz", "E", "/j/2.mp3", &sig(0.2)).unwrap();
        db.store_signature("jazz", "F", "/j/2.mp3", &sig(0.2)).unwrap();

        let indexed = db.indexed_paths("jazz", "E").unwrap();
        assert!(indexed.contains("/j/1.mp3") && indexed.contains("/j/2.mp3"));

        assert_eq!(db.delete_signatures("jazz", "E").unwrap(), 2);
        assert!(db.indexed_paths("jazz", "E").unwrap().is_empty());
        assert_eq!(db.indexed_paths("jazz", "F").unwrap().len(), 1);
    }

    #[test]
    fn test_summary_counts() {
        let (_dir, db) = open_temp();
        db.ensure_dataset("empty", Some("/nowhere")).unwrap();
        db.store_signature("jazz", "E", "/j/1.mp3", &sig(0.1)).unwrap();
        db.store_signature("jazz", "F", "/j/1.mp3", &sig(0.1)).unwrap();
        db.store_signature("jazz", "F", "/j/2.mp3", &sig(0.1)).unwrap();

        let summary = db.get_summary().unwrap();
        assert_eq!(summary.datasets, 2);
        assert_eq!(summary.tracks, 2);
        assert_eq!(summary.signatures["E"], 1);
        assert_eq!(summary.signatures["F"], 2);

        let names: Vec<String> = db.list_datasets().unwrap().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["empty", "jazz"]);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persist.db");
        {
            let db = Database::open_at(&path).unwrap();
            db.store_signature("jazz", "E", "/j/1.mp3", &sig(0.9)).unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.candidates("jazz", "E").unwrap().count(), 1);
    }
}
