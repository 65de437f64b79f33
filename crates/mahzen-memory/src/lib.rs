use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, params};
use tracing::debug;

const MS_PER_HOUR: i64 = 3_600_000;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Group,
    Private,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Private => "private",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "group" => Some(Self::Group),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Bot,
}

impl Speaker {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Bot => "bot",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "bot" => Some(Self::Bot),
            _ => None,
        }
    }
}

/// Per-conversation row caps applied after every insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimits {
    pub group_messages: usize,
    pub private_messages: usize,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            group_messages: 50,
            private_messages: 20,
        }
    }
}

/// One stored turn. For bot turns `user_id`/`username` name the user the bot
/// answered; private conversations use the user id as `chat_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub username: String,
    pub speaker: Speaker,
    pub text: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSummary {
    pub user_id: i64,
    pub username: String,
    pub message_count: usize,
    pub last_message: String,
    pub last_seen_ms: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryStats {
    pub group_chats: usize,
    pub group_messages: usize,
    pub private_users: usize,
    pub private_messages: usize,
}

/// SQLite-backed group and private conversation history.
pub struct HistoryStore {
    conn: Connection,
    db_path: PathBuf,
    limits: HistoryLimits,
}

impl HistoryStore {
    pub fn open(db_path: &Path, limits: HistoryLimits) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create db directory {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?;
        // Every worker opens its own connection; wait out short write locks.
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self {
            conn,
            db_path: db_path.to_path_buf(),
            limits,
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn limits(&self) -> HistoryLimits {
        self.limits
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
              version INTEGER PRIMARY KEY,
              name TEXT NOT NULL,
              applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        self.apply_migration(
            1,
            "conversation_messages",
            r#"
            CREATE TABLE IF NOT EXISTS messages (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              channel TEXT NOT NULL,
              chat_id INTEGER NOT NULL,
              user_id INTEGER NOT NULL,
              username TEXT NOT NULL,
              speaker TEXT NOT NULL,
              text TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation
              ON messages(channel, chat_id, id);
            "#,
        )?;

        self.apply_migration(
            2,
            "messages_by_user",
            r#"
            CREATE INDEX IF NOT EXISTS idx_messages_user
              ON messages(channel, chat_id, user_id, id);
            "#,
        )?;
        Ok(())
    }

    fn apply_migration(&self, version: i64, name: &str, sql: &str) -> Result<()> {
        let applied: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE version = ?1)",
            params![version],
            |row| row.get(0),
        )?;
        if applied {
            return Ok(());
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(sql)
            .with_context(|| format!("migration {version} ({name}) failed"))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![version, name],
        )?;
        tx.commit()?;
        debug!(version, name, "history migration applied");
        Ok(())
    }

    pub fn add_group_message(
        &self,
        chat_id: i64,
        user_id: i64,
        username: &str,
        text: &str,
    ) -> Result<i64> {
        self.insert(Channel::Group, chat_id, user_id, username, Speaker::User, text)
    }

    pub fn add_bot_response(
        &self,
        chat_id: i64,
        text: &str,
        replied_user_id: i64,
        replied_username: &str,
    ) -> Result<i64> {
        self.insert(
            Channel::Group,
            chat_id,
            replied_user_id,
            replied_username,
            Speaker::Bot,
            text,
        )
    }

    pub fn add_private_message(&self, user_id: i64, username: &str, text: &str) -> Result<i64> {
        self.insert(Channel::Private, user_id, user_id, username, Speaker::User, text)
    }

    pub fn add_private_bot_response(&self, user_id: i64, text: &str) -> Result<i64> {
        self.insert(Channel::Private, user_id, user_id, "", Speaker::Bot, text)
    }

    /// The user's own turns in a group plus the bot's replies to them, oldest first.
    pub fn conversation_history(&self, chat_id: i64, user_id: i64) -> Result<Vec<StoredMessage>> {
        self.select_messages(
            "WHERE channel = 'group' AND chat_id = ?1 AND user_id = ?2 ORDER BY id ASC",
            params![chat_id, user_id],
        )
    }

    pub fn private_history(&self, user_id: i64) -> Result<Vec<StoredMessage>> {
        self.select_messages(
            "WHERE channel = 'private' AND chat_id = ?1 ORDER BY id ASC",
            params![user_id],
        )
    }

    /// User messages in `chat_id` newer than `hours` before `now_ms`, oldest first.
    pub fn recent_group_messages(
        &self,
        chat_id: i64,
        hours: u32,
        now_ms: i64,
    ) -> Result<Vec<StoredMessage>> {
        let cutoff = window_start(hours, now_ms);
        self.select_messages(
            "WHERE channel = 'group' AND chat_id = ?1 AND speaker = 'user' AND created_at_ms > ?2
             ORDER BY id ASC",
            params![chat_id, cutoff],
        )
    }

    /// One row per active member in the window, most recently seen first.
    pub fn member_summaries(
        &self,
        chat_id: i64,
        hours: u32,
        now_ms: i64,
        limit: usize,
    ) -> Result<Vec<MemberSummary>> {
        let cutoff = window_start(hours, now_ms);
        let mut stmt = self.conn.prepare(
            "SELECT m.user_id, m.username, m.text, m.created_at_ms, latest.message_count
             FROM messages m
             JOIN (
               SELECT MAX(id) AS last_id, COUNT(*) AS message_count
               FROM messages
               WHERE channel = 'group' AND chat_id = ?1 AND speaker = 'user' AND created_at_ms > ?2
               GROUP BY user_id
             ) latest ON m.id = latest.last_id
             ORDER BY m.id DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![chat_id, cutoff, limit as i64], |row| {
            Ok(MemberSummary {
                user_id: row.get(0)?,
                username: row.get(1)?,
                last_message: row.get(2)?,
                last_seen_ms: row.get(3)?,
                message_count: row.get::<_, i64>(4)? as usize,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Removes the user's turns and the bot's replies to them in one group.
    pub fn clear_user_messages(&self, chat_id: i64, user_id: i64) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM messages WHERE channel = 'group' AND chat_id = ?1 AND user_id = ?2",
            params![chat_id, user_id],
        )?;
        Ok(removed)
    }

    pub fn clear_private_messages(&self, user_id: i64) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM messages WHERE channel = 'private' AND chat_id = ?1",
            params![user_id],
        )?;
        Ok(removed)
    }

    pub fn clear_group_messages(&self, chat_id: i64) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM messages WHERE channel = 'group' AND chat_id = ?1",
            params![chat_id],
        )?;
        Ok(removed)
    }

    pub fn stats(&self) -> Result<HistoryStats> {
        let mut stmt = self.conn.prepare(
            "SELECT channel, COUNT(DISTINCT chat_id), COUNT(*)
             FROM messages
             GROUP BY channel",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut stats = HistoryStats::default();
        for row in rows {
            let (channel, conversations, messages) = row?;
            match Channel::parse(&channel) {
                Some(Channel::Group) => {
                    stats.group_chats = conversations as usize;
                    stats.group_messages = messages as usize;
                }
                Some(Channel::Private) => {
                    stats.private_users = conversations as usize;
                    stats.private_messages = messages as usize;
                }
                None => {}
            }
        }
        Ok(stats)
    }

    pub fn backup_to(&self, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&self.db_path, destination).with_context(|| {
            format!(
                "failed to copy history from {} to {}",
                self.db_path.display(),
                destination.display()
            )
        })?;
        Ok(())
    }

    pub fn restore_from(&mut self, source: &Path) -> Result<()> {
        if !source.exists() {
            bail!("restore source does not exist: {}", source.display());
        }
        std::fs::copy(source, &self.db_path).with_context(|| {
            format!(
                "failed to restore history from {} to {}",
                source.display(),
                self.db_path.display()
            )
        })?;
        self.conn = Connection::open(&self.db_path)?;
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        self.migrate()?;
        Ok(())
    }

    fn insert(
        &self,
        channel: Channel,
        chat_id: i64,
        user_id: i64,
        username: &str,
        speaker: Speaker,
        text: &str,
    ) -> Result<i64> {
        let cap = match channel {
            Channel::Group => self.limits.group_messages,
            Channel::Private => self.limits.private_messages,
        };
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO messages (channel, chat_id, user_id, username, speaker, text, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                channel.as_str(),
                chat_id,
                user_id,
                username,
                speaker.as_str(),
                text,
                now_epoch_ms()
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "DELETE FROM messages
             WHERE channel = ?1 AND chat_id = ?2 AND id NOT IN (
               SELECT id FROM messages
               WHERE channel = ?1 AND chat_id = ?2
               ORDER BY id DESC
               LIMIT ?3
             )",
            params![channel.as_str(), chat_id, cap as i64],
        )?;
        tx.commit()?;
        Ok(id)
    }

    fn select_messages(
        &self,
        filter: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<StoredMessage>> {
        let sql = format!(
            "SELECT id, chat_id, user_id, username, speaker, text, created_at_ms
             FROM messages {filter}"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(args, |row| {
            let speaker: String = row.get(4)?;
            Ok(StoredMessage {
                id: row.get(0)?,
                chat_id: row.get(1)?,
                user_id: row.get(2)?,
                username: row.get(3)?,
                speaker: Speaker::parse(&speaker).unwrap_or(Speaker::User),
                text: row.get(5)?,
                created_at_ms: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

pub fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn window_start(hours: u32, now_ms: i64) -> i64 {
    now_ms - i64::from(hours) * MS_PER_HOUR
}
