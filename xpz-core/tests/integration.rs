//! Integration tests: the ledger and session tracker over a real SQLite file.

use std::sync::Arc;

use rusqlite::Connection;

use xpz_core::award;
use xpz_core::config::{PersistenceConfig, XpzConfig};
use xpz_core::filter::{self, TextRejection, TextVerdict};
use xpz_core::ledger::{Commit, Ledger};
use xpz_core::persistence::SqliteStore;
use xpz_core::store::{MemberStore, SessionStore};
use xpz_core::types::{ChannelId, CommunityId, MemberId, MemberKey, XpSource};
use xpz_core::voice::{self, SessionAction, SessionChange, SessionTracker};

const NOW: i64 = 1_700_000_000;

fn key(m: u64) -> MemberKey {
    MemberKey::new(CommunityId(77), MemberId(m))
}

fn file_store(dir: &tempfile::TempDir) -> Arc<SqliteStore> {
    let path = dir.path().join("levels.sqlite");
    Arc::new(SqliteStore::open(path, &PersistenceConfig::default()).expect("open store"))
}

// ---------------------------------------------------------------------------
// Text flow through the ledger
// ---------------------------------------------------------------------------

#[test]
fn text_award_then_duplicate_then_cooldown_persist_correctly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = file_store(&dir);
    let ledger = Ledger::new(store.clone());
    let config = XpzConfig::default();

    let verdict = |content: &'static str, now: i64| {
        ledger
            .transact(key(1), |rec| {
                let verdict = filter::evaluate(&config.text, rec, ChannelId(5), content, now);
                let changed = verdict.apply(rec, now);
                if verdict.is_award() {
                    let bonus = config.prestige.bonus_basis_points();
                    award::apply_grant(rec, 20, XpSource::Text, bonus);
                }
                if changed {
                    Commit::Persist(verdict)
                } else {
                    Commit::Discard(verdict)
                }
            })
            .expect("transact")
    };

    assert!(verdict("hello everyone here", NOW).is_award());
    assert!(matches!(
        verdict("hello everyone here", NOW + 10),
        TextVerdict::Reject(TextRejection::Cooldown { .. })
    ));
    assert!(matches!(
        verdict("hello everyone here", NOW + 70),
        TextVerdict::Reject(TextRejection::Duplicate { .. })
    ));

    let rec = store.get(key(1)).expect("get").expect("record exists");
    assert_eq!(rec.xp, 20);
    assert_eq!(rec.last_text_xp_at, NOW);
    assert_eq!(rec.last_message_at, NOW + 70);
}

// ---------------------------------------------------------------------------
// Durability
// ---------------------------------------------------------------------------

#[test]
fn records_survive_reopen_and_backup() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let ledger = Ledger::new(file_store(&dir));
        ledger
            .transact(key(2), |rec| {
                award::apply_grant(rec, 5_000, XpSource::Admin, 500);
                Commit::Persist(())
            })
            .expect("grant");
    }

    let store = file_store(&dir);
    let rec = store.get(key(2)).expect("get").expect("record survives reopen");
    assert_eq!(rec.xp, 5_000);
    assert!(rec.level > 0);

    let backup_path = dir.path().join("backup.sqlite");
    store.backup(&backup_path).expect("backup");
    let restored =
        SqliteStore::open(&backup_path, &PersistenceConfig::default()).expect("open backup");
    assert_eq!(restored.get(key(2)).expect("get"), Some(rec));
    assert!(restored.integrity_check().expect("integrity"));
}

#[test]
fn legacy_schema_gains_missing_columns() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("legacy.sqlite");
    {
        let conn = Connection::open(&path).expect("open raw");
        conn.execute_batch(
            "CREATE TABLE member_records (
                community_id     TEXT NOT NULL,
                member_id        TEXT NOT NULL,
                xp               INTEGER NOT NULL DEFAULT 0,
                level            INTEGER NOT NULL DEFAULT 0,
                last_text_xp_at  INTEGER NOT NULL DEFAULT 0,
                last_voice_xp_at INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (community_id, member_id)
            );
            INSERT INTO member_records (community_id, member_id, xp, level)
            VALUES ('77', '3', 300, 2);",
        )
        .expect("legacy schema");
    }

    let store = SqliteStore::open(&path, &PersistenceConfig::default()).expect("migrate");
    let rec = store.get(key(3)).expect("get").expect("legacy row");
    assert_eq!((rec.xp, rec.level, rec.prestige), (300, 2, 0));
    assert_eq!(rec.last_message_normalized, "");
    assert_eq!(store.member_count(CommunityId(77)).expect("count"), 1);
}

// ---------------------------------------------------------------------------
// Voice sessions
// ---------------------------------------------------------------------------

#[test]
fn voice_sessions_persist_across_tracker_instances() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = XpzConfig::default();
    {
        let tracker = SessionTracker::new(file_store(&dir));
        let action = voice::plan_transition(&config.voice, None, Some(ChannelId(9)));
        let change = tracker.apply(key(4), action, NOW).expect("open");
        assert_eq!(change, SessionChange::Started { channel: ChannelId(9) });
    }

    let store = file_store(&dir);
    let sessions = store.list_by_community(CommunityId(77)).expect("list");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].joined_at, NOW);

    let tracker = SessionTracker::new(store);
    let change = tracker.apply(key(4), SessionAction::Close, NOW + 5).expect("close");
    assert_eq!(change, SessionChange::Ended { channel: ChannelId(9) });
    assert!(tracker.all().expect("all").is_empty());
}
