//! コメント永続化ストア（SQLite）
//!
//! ワーカープロセス側が所有するストア。`INSERT OR IGNORE` により
//! コメントIDをキーとした最大1回の挿入を保証する。

use std::path::{Path, PathBuf};

use anyhow::Result;
use rusqlite::{params, Connection, Row};

use super::{Comment, CommentKind, CommentPart};

/// recent取得の上限件数
const MAX_LIMIT: usize = 500;

/// コメントストア
pub struct ChatStore {
    connection: Connection,
    db_path: PathBuf,
}

impl ChatStore {
    /// 指定ディレクトリに comments.db を開く（なければ作成）
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        let db_path = dir.as_ref().join("comments.db");
        let connection = Connection::open(&db_path)?;

        // WAL化は失敗しても続行（ネットワークFS等）
        if let Err(e) = connection.pragma_update(None, "journal_mode", "WAL") {
            tracing::warn!("⚠️ WAL設定に失敗: {}", e);
        }

        let mut store = Self {
            connection,
            db_path,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// インメモリストアを作成（テスト用）
    pub fn open_in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        let mut store = Self {
            connection,
            db_path: PathBuf::from(":memory:"),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// データベースファイルのパス
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn initialize_schema(&mut self) -> Result<()> {
        self.connection.execute_batch(
            "CREATE TABLE IF NOT EXISTS comments (
                id TEXT PRIMARY KEY,
                video_id TEXT,
                timestamp_ms INTEGER,
                timestamp TEXT,
                author TEXT,
                text TEXT,
                kind TEXT,
                amount INTEGER,
                amount_text TEXT,
                icon TEXT,
                parts_json TEXT
            )",
        )?;
        tracing::debug!("🗄️ コメントテーブルを初期化: {:?}", self.db_path);
        Ok(())
    }

    /// コメントを保存する（同一IDは無視される）
    pub fn save(&self, comment: &Comment) -> Result<()> {
        if comment.id.is_empty() {
            return Ok(());
        }

        let parts_json = serde_json::to_string(&comment.parts)?;
        let kind_json = serde_json::to_value(comment.kind)?;
        let kind = kind_json.as_str().unwrap_or("text").to_string();

        self.connection.execute(
            "INSERT OR IGNORE INTO comments
             (id, video_id, timestamp_ms, timestamp, author, text, kind, amount, amount_text, icon, parts_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                comment.id,
                comment.video_id,
                comment.timestamp_ms,
                comment.timestamp,
                comment.author,
                comment.text,
                kind,
                comment.amount,
                comment.amount_text,
                comment.icon,
                parts_json,
            ],
        )?;
        Ok(())
    }

    /// 新しい順にlimit件取得し、古い順に並べて返す
    pub fn recent(&self, limit: usize) -> Result<Vec<Comment>> {
        let lim = limit.clamp(1, MAX_LIMIT);

        let mut stmt = self.connection.prepare(
            "SELECT id, video_id, timestamp_ms, timestamp, author, text, kind, amount, amount_text, icon, parts_json
             FROM comments
             ORDER BY timestamp_ms DESC, rowid DESC
             LIMIT ?1",
        )?;

        let mut rows: Vec<Comment> = stmt
            .query_map(params![lim], row_to_comment)?
            .collect::<std::result::Result<_, _>>()?;
        rows.reverse();
        Ok(rows)
    }

    /// 保存済み件数
    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .connection
            .query_row("SELECT COUNT(*) FROM comments", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn row_to_comment(row: &Row<'_>) -> rusqlite::Result<Comment> {
    let kind: Option<String> = row.get(6)?;
    let kind = kind
        .as_deref()
        .map(parse_kind)
        .unwrap_or(CommentKind::Text);

    let parts_json: Option<String> = row.get(10)?;
    let parts: Vec<CommentPart> = parts_json
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();

    Ok(Comment {
        id: row.get(0)?,
        video_id: row.get(1)?,
        timestamp_ms: row.get::<_, Option<i64>>(2)?.unwrap_or_default(),
        timestamp: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        author: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        text: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        kind,
        amount: row.get(7)?,
        amount_text: row.get(8)?,
        icon: row.get(9)?,
        parts,
    })
}

fn parse_kind(s: &str) -> CommentKind {
    match s {
        "text" => CommentKind::Text,
        "superchat" => CommentKind::SuperChat,
        "supersticker" => CommentKind::SuperSticker,
        "membership" => CommentKind::Membership,
        "gift" => CommentKind::Gift,
        _ => CommentKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: &str, ts: i64) -> Comment {
        Comment {
            id: id.to_string(),
            timestamp_ms: ts,
            author: format!("author-{}", id),
            text: format!("text-{}", id),
            ..Default::default()
        }
    }

    #[test]
    fn test_save_and_recent_order() {
        let store = ChatStore::open_in_memory().unwrap();
        store.save(&comment("a", 100)).unwrap();
        store.save(&comment("b", 200)).unwrap();
        store.save(&comment("c", 300)).unwrap();

        let recent = store.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        // 古い順で返る
        assert_eq!(recent[0].id, "b");
        assert_eq!(recent[1].id, "c");
    }

    #[test]
    fn test_duplicate_id_is_ignored() {
        let store = ChatStore::open_in_memory().unwrap();
        store.save(&comment("a", 100)).unwrap();

        let mut dup = comment("a", 999);
        dup.text = "changed".to_string();
        store.save(&dup).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let recent = store.recent(10).unwrap();
        assert_eq!(recent[0].text, "text-a");
    }

    #[test]
    fn test_empty_id_is_skipped() {
        let store = ChatStore::open_in_memory().unwrap();
        store.save(&comment("", 100)).unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_limit_is_clamped() {
        let store = ChatStore::open_in_memory().unwrap();
        store.save(&comment("a", 100)).unwrap();
        // limit=0でも最低1件
        assert_eq!(store.recent(0).unwrap().len(), 1);
    }

    #[test]
    fn test_parts_survive_roundtrip() {
        let store = ChatStore::open_in_memory().unwrap();
        let mut c = comment("a", 100);
        c.parts = vec![
            CommentPart::Text {
                text: "hi".to_string(),
            },
            CommentPart::Emoji {
                emoji: ":_wave:".to_string(),
                url: None,
            },
        ];
        store.save(&c).unwrap();

        let recent = store.recent(1).unwrap();
        assert_eq!(recent[0].parts, c.parts);
    }

    #[test]
    fn test_kind_roundtrip() {
        let store = ChatStore::open_in_memory().unwrap();
        let mut c = comment("sc", 100);
        c.kind = CommentKind::SuperChat;
        store.save(&c).unwrap();
        assert_eq!(store.recent(1).unwrap()[0].kind, CommentKind::SuperChat);
    }
}
