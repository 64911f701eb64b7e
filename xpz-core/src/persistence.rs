//! SQLite persistence layer for member records and voice sessions.
//!
//! One database holds both tables:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS member_records (
//!     community_id     TEXT NOT NULL,
//!     member_id        TEXT NOT NULL,
//!     xp               INTEGER NOT NULL DEFAULT 0,
//!     level            INTEGER NOT NULL DEFAULT 0,
//!     prestige         INTEGER NOT NULL DEFAULT 0,
//!     last_text_xp_at  INTEGER NOT NULL DEFAULT 0,
//!     last_voice_xp_at INTEGER NOT NULL DEFAULT 0,
//!     last_msg_norm    TEXT NOT NULL DEFAULT '',
//!     last_msg_at      INTEGER NOT NULL DEFAULT 0,
//!     PRIMARY KEY (community_id, member_id)
//! );
//! CREATE TABLE IF NOT EXISTS voice_sessions (
//!     community_id TEXT NOT NULL,
//!     member_id    TEXT NOT NULL,
//!     channel_id   TEXT NOT NULL,
//!     joined_at    INTEGER NOT NULL,
//!     PRIMARY KEY (community_id, member_id)
//! );
//! ```
//!
//! Snowflakes are stored as TEXT. XP is stored as a signed 64-bit integer and
//! clamped into range on the way in.
//!
//! Databases written by older versions lack the `prestige`, `last_msg_norm`
//! and `last_msg_at` columns; they are added on open.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, Row};
use tracing::{debug, info};

use crate::config::PersistenceConfig;
use crate::error::Result;
use crate::store::{MemberStore, SessionStore};
use crate::types::{CommunityId, MemberKey, MemberRecord, VoiceSession};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS member_records (
    community_id     TEXT NOT NULL,
    member_id        TEXT NOT NULL,
    xp               INTEGER NOT NULL DEFAULT 0,
    level            INTEGER NOT NULL DEFAULT 0,
    prestige         INTEGER NOT NULL DEFAULT 0,
    last_text_xp_at  INTEGER NOT NULL DEFAULT 0,
    last_voice_xp_at INTEGER NOT NULL DEFAULT 0,
    last_msg_norm    TEXT NOT NULL DEFAULT '',
    last_msg_at      INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (community_id, member_id)
);
CREATE TABLE IF NOT EXISTS voice_sessions (
    community_id TEXT NOT NULL,
    member_id    TEXT NOT NULL,
    channel_id   TEXT NOT NULL,
    joined_at    INTEGER NOT NULL,
    PRIMARY KEY (community_id, member_id)
);
";

/// Columns added after the first schema, with their DDL.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "prestige",
        "ALTER TABLE member_records ADD COLUMN prestige INTEGER NOT NULL DEFAULT 0",
    ),
    (
        "last_msg_norm",
        "ALTER TABLE member_records ADD COLUMN last_msg_norm TEXT NOT NULL DEFAULT ''",
    ),
    (
        "last_msg_at",
        "ALTER TABLE member_records ADD COLUMN last_msg_at INTEGER NOT NULL DEFAULT 0",
    ),
];

const MEMBER_COLUMNS: &str = "community_id, member_id, xp, level, prestige, \
     last_text_xp_at, last_voice_xp_at, last_msg_norm, last_msg_at";

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

/// Handle to an open SQLite database implementing both store traits.
///
/// ```no_run
/// # use xpz_core::persistence::SqliteStore;
/// # use xpz_core::config::PersistenceConfig;
/// let store = SqliteStore::open("levels.sqlite", &PersistenceConfig::default())?;
/// assert!(store.integrity_check()?);
/// # Ok::<(), xpz_core::error::XpzError>(())
/// ```
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the database at `path` and bring its schema up to date.
    ///
    /// # Errors
    ///
    /// Returns [`XpzError::Database`](crate::error::XpzError::Database) on
    /// SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;

        prepare_schema(&conn)?;

        info!(
            path = %db_path.display(),
            wal = config.wal_mode,
            "XPZ store opened"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`XpzError::Database`](crate::error::XpzError::Database) on
    /// SQLite failures.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        prepare_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Path of the database file.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Number of member records stored for `community`.
    ///
    /// # Errors
    ///
    /// Returns [`XpzError::Database`](crate::error::XpzError::Database) on
    /// SQLite failures.
    pub fn member_count(&self, community: CommunityId) -> Result<usize> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM member_records WHERE community_id = ?1",
            params![community],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Copy the database to `dest_path` using SQLite's online-backup API.
    ///
    /// # Errors
    ///
    /// Returns [`XpzError::Database`](crate::error::XpzError::Database) on
    /// SQLite failures.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let start = Instant::now();
        let mut dest = Connection::open(dest_path.as_ref())?;
        let conn = self.conn.lock();
        let backup = rusqlite::backup::Backup::new(&conn, &mut dest)?;
        backup.run_to_completion(256, Duration::from_millis(50), None)?;

        info!(
            dest = %dest_path.as_ref().display(),
            elapsed_ms = start.elapsed().as_millis(),
            "Database backup completed"
        );
        Ok(())
    }

    /// Run `PRAGMA integrity_check`. `Ok(false)` means corruption was found.
    ///
    /// # Errors
    ///
    /// Returns [`XpzError::Database`](crate::error::XpzError::Database) if the
    /// check itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        let result: String = self
            .conn
            .lock()
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }
}

fn prepare_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    let existing = member_columns(conn)?;
    for (column, ddl) in MIGRATIONS {
        if !existing.iter().any(|c| c == column) {
            conn.execute_batch(ddl)?;
            info!(column = %column, "Added missing member_records column");
        }
    }
    Ok(())
}

fn member_columns(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("PRAGMA table_info(member_records)")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<MemberRecord> {
    Ok(MemberRecord {
        community: row.get(0)?,
        member: row.get(1)?,
        xp: u64::try_from(row.get::<_, i64>(2)?).unwrap_or(0),
        level: u32::try_from(row.get::<_, i64>(3)?).unwrap_or(0),
        prestige: u32::try_from(row.get::<_, i64>(4)?).unwrap_or(0),
        last_text_xp_at: row.get(5)?,
        last_voice_xp_at: row.get(6)?,
        last_message_normalized: row.get(7)?,
        last_message_at: row.get(8)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<VoiceSession> {
    Ok(VoiceSession {
        community: row.get(0)?,
        member: row.get(1)?,
        channel: row.get(2)?,
        joined_at: row.get(3)?,
    })
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// Store impls
// ---------------------------------------------------------------------------

impl MemberStore for SqliteStore {
    fn get(&self, key: MemberKey) -> Result<Option<MemberRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {MEMBER_COLUMNS} FROM member_records WHERE community_id = ?1 AND member_id = ?2"
        ))?;
        let record = stmt
            .query_row(params![key.community, key.member], member_from_row)
            .optional()?;
        Ok(record)
    }

    fn upsert(&self, record: &MemberRecord) -> Result<()> {
        let start = Instant::now();
        self.conn.lock().execute(
            &format!(
                "INSERT INTO member_records ({MEMBER_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(community_id, member_id) DO UPDATE SET
                    xp = excluded.xp,
                    level = excluded.level,
                    prestige = excluded.prestige,
                    last_text_xp_at = excluded.last_text_xp_at,
                    last_voice_xp_at = excluded.last_voice_xp_at,
                    last_msg_norm = excluded.last_msg_norm,
                    last_msg_at = excluded.last_msg_at"
            ),
            params![
                record.community,
                record.member,
                clamp_i64(record.xp),
                i64::from(record.level),
                i64::from(record.prestige),
                record.last_text_xp_at,
                record.last_voice_xp_at,
                record.last_message_normalized,
                record.last_message_at,
            ],
        )?;
        debug!(
            member = %record.key(),
            elapsed_us = start.elapsed().as_micros(),
            "Saved member record"
        );
        Ok(())
    }

    fn top_by_xp(&self, community: CommunityId, limit: usize) -> Result<Vec<MemberRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {MEMBER_COLUMNS} FROM member_records WHERE community_id = ?1"
        ))?;
        let mut records = stmt
            .query_map(params![community], member_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        // Member ids are TEXT, so ordering happens on the decoded values.
        records.sort_by(|a, b| b.xp.cmp(&a.xp).then(a.member.cmp(&b.member)));
        records.truncate(limit);
        Ok(records)
    }
}

impl SessionStore for SqliteStore {
    fn get_session(&self, key: MemberKey) -> Result<Option<VoiceSession>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT community_id, member_id, channel_id, joined_at FROM voice_sessions
             WHERE community_id = ?1 AND member_id = ?2",
        )?;
        let session = stmt
            .query_row(params![key.community, key.member], session_from_row)
            .optional()?;
        Ok(session)
    }

    fn upsert_session(&self, session: &VoiceSession) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO voice_sessions (community_id, member_id, channel_id, joined_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(community_id, member_id) DO UPDATE SET
                channel_id = excluded.channel_id,
                joined_at = excluded.joined_at",
            params![session.community, session.member, session.channel, session.joined_at],
        )?;
        Ok(())
    }

    fn delete_session(&self, key: MemberKey) -> Result<bool> {
        let rows = self.conn.lock().execute(
            "DELETE FROM voice_sessions WHERE community_id = ?1 AND member_id = ?2",
            params![key.community, key.member],
        )?;
        Ok(rows > 0)
    }

    fn list_by_community(&self, community: CommunityId) -> Result<Vec<VoiceSession>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT community_id, member_id, channel_id, joined_at FROM voice_sessions
             WHERE community_id = ?1",
        )?;
        let mut sessions = stmt
            .query_map(params![community], session_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        sessions.sort_by_key(|s| s.member);
        Ok(sessions)
    }

    fn communities(&self) -> Result<Vec<CommunityId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT DISTINCT community_id FROM voice_sessions")?;
        let mut ids = stmt
            .query_map([], |row| row.get::<_, CommunityId>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        ids.sort();
        Ok(ids)
    }
}

/// Extension trait that adds an `.optional()` combinator to `rusqlite::Result`.
trait OptionalExt<T> {
    /// Convert `QueryReturnedNoRows` into `Ok(None)`.
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelId, MemberId};

    fn key(c: u64, m: u64) -> MemberKey {
        MemberKey::new(CommunityId(c), MemberId(m))
    }

    fn sample(c: u64, m: u64, xp: u64) -> MemberRecord {
        let mut rec = MemberRecord::new(key(c, m));
        rec.xp = xp;
        rec.level = 3;
        rec.prestige = 1;
        rec.last_text_xp_at = 1_700_000_000;
        rec.last_voice_xp_at = 1_700_000_060;
        rec.last_message_normalized = "hello there".into();
        rec.last_message_at = 1_700_000_001;
        rec
    }

    #[test]
    fn member_round_trip() {
        let store = SqliteStore::open_in_memory().expect("open");
        let rec = sample(1, 2, 480);
        store.upsert(&rec).expect("upsert");
        assert_eq!(store.get(key(1, 2)).expect("get"), Some(rec));
        assert_eq!(store.get(key(1, 3)).expect("get"), None);
    }

    #[test]
    fn upsert_overwrites() {
        let store = SqliteStore::open_in_memory().expect("open");
        let mut rec = sample(1, 2, 10);
        store.upsert(&rec).expect("upsert");
        rec.xp = 9_999;
        store.upsert(&rec).expect("upsert");
        assert_eq!(store.get(key(1, 2)).expect("get").map(|r| r.xp), Some(9_999));
        assert_eq!(store.member_count(CommunityId(1)).expect("count"), 1);
    }

    #[test]
    fn full_width_snowflakes_survive() {
        let store = SqliteStore::open_in_memory().expect("open");
        let rec = sample(u64::MAX, u64::MAX - 1, 1);
        store.upsert(&rec).expect("upsert");
        let loaded = store.get(key(u64::MAX, u64::MAX - 1)).expect("get");
        assert_eq!(loaded, Some(rec));
    }

    #[test]
    fn top_by_xp_breaks_ties_by_member() {
        let store = SqliteStore::open_in_memory().expect("open");
        for (m, xp) in [(30, 100), (4, 100), (7, 5_000), (12, 1)] {
            store.upsert(&sample(1, m, xp)).expect("upsert");
        }
        store.upsert(&sample(2, 1, 1_000_000)).expect("upsert");

        let order: Vec<u64> = store
            .top_by_xp(CommunityId(1), 3)
            .expect("top")
            .iter()
            .map(|r| r.member.0)
            .collect();
        assert_eq!(order, vec![7, 4, 30]);
    }

    #[test]
    fn session_lifecycle() {
        let store = SqliteStore::open_in_memory().expect("open");
        let mut session = VoiceSession {
            community: CommunityId(1),
            member: MemberId(2),
            channel: ChannelId(3),
            joined_at: 10,
        };
        store.upsert_session(&session).expect("upsert");
        session.channel = ChannelId(4);
        session.joined_at = 20;
        store.upsert_session(&session).expect("replace");

        assert_eq!(store.get_session(key(1, 2)).expect("get"), Some(session));
        assert_eq!(store.list_by_community(CommunityId(1)).expect("list").len(), 1);
        assert_eq!(store.communities().expect("communities"), vec![CommunityId(1)]);

        assert!(store.delete_session(key(1, 2)).expect("delete"));
        assert!(!store.delete_session(key(1, 2)).expect("delete again"));
        assert!(store.communities().expect("communities").is_empty());
    }

    #[test]
    fn integrity_check_passes() {
        let store = SqliteStore::open_in_memory().expect("open");
        assert!(store.integrity_check().expect("check"));
    }
}
