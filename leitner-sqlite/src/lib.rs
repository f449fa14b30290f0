use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leitner_core::{
    repo::{Repository, TagStore, TagTx},
    Card, CardId, CardTag, CoreError, Deck, DeckId, Difficulty, LeitnerBox, NewCard, NewTag,
    Statistic, Tag, TagRef,
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool, Transaction,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub struct SqliteRepo {
    pool: SqlitePool,
}

impl SqliteRepo {
    pub async fn open_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(|e| CoreError::storage("sqlite connect", e))?;
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    pub async fn open_memory() -> Result<Self, CoreError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| CoreError::storage("sqlite connect", e))?
            .foreign_keys(true);
        // Every connection would get its own empty database, so keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(|e| CoreError::storage("sqlite connect", e))?;
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    async fn ensure_schema(&self) -> Result<(), CoreError> {
        const STMT: &str = r#"
        CREATE TABLE IF NOT EXISTS decks (
          id          TEXT PRIMARY KEY,
          name        TEXT NOT NULL UNIQUE COLLATE NOCASE,
          created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS boxes (
          id          INTEGER PRIMARY KEY AUTOINCREMENT,
          name        TEXT NOT NULL,
          interval_days INTEGER NOT NULL,
          created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cards (
          id                INTEGER PRIMARY KEY AUTOINCREMENT,
          deck_id           TEXT NOT NULL REFERENCES decks(id) ON DELETE CASCADE,
          box_id            INTEGER NOT NULL REFERENCES boxes(id),
          question_type     TEXT NOT NULL DEFAULT 'classic',
          question          TEXT,
          answer            TEXT NOT NULL,
          notes             TEXT,
          media             TEXT,
          last_answered_at  TEXT,
          created_at        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tags (
          id          INTEGER PRIMARY KEY AUTOINCREMENT,
          deck_id     TEXT NOT NULL REFERENCES decks(id) ON DELETE CASCADE,
          name        TEXT NOT NULL,
          created_at  TEXT NOT NULL,
          UNIQUE (deck_id, name)
        );

        CREATE TABLE IF NOT EXISTS cards_tags (
          id          INTEGER PRIMARY KEY AUTOINCREMENT,
          card_id     INTEGER NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
          tag_id      INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
          created_at  TEXT NOT NULL,
          UNIQUE (card_id, tag_id)
        );

        CREATE TABLE IF NOT EXISTS statistics (
          id          INTEGER PRIMARY KEY AUTOINCREMENT,
          card_id     INTEGER NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
          box_id      INTEGER NOT NULL REFERENCES boxes(id),
          difficulty  TEXT NOT NULL,
          created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_cards_deck ON cards (deck_id);
        CREATE INDEX IF NOT EXISTS idx_cards_tags_card ON cards_tags (card_id);
        CREATE INDEX IF NOT EXISTS idx_statistics_card ON statistics (card_id, created_at);
        "#;

        for chunk in STMT.split(';') {
            let sql = chunk.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| CoreError::storage("sqlite schema", e))?;
        }
        Ok(())
    }
}

const CARD_COLUMNS: &str = "id,deck_id,box_id,question_type,question,answer,notes,media,last_answered_at,created_at";

#[async_trait]
impl Repository for SqliteRepo {
    // ===== Decks =====
    async fn create_deck(&self, name: &str) -> Result<Deck, CoreError> {
        let exists = sqlx::query("SELECT 1 FROM decks WHERE lower(name)=lower(?) LIMIT 1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::storage("read deck", e))?
            .is_some();
        if exists {
            return Err(CoreError::Conflict("deck name already exists"));
        }

        let deck = Deck::new(name);
        sqlx::query("INSERT INTO decks (id,name,created_at) VALUES (?,?,?)")
            .bind(deck.id.to_string())
            .bind(&deck.name)
            .bind(dt_to_str(deck.created_at))
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::storage("insert deck", e))?;
        Ok(deck)
    }

    async fn get_deck(&self, id: DeckId) -> Result<Deck, CoreError> {
        let row = sqlx::query("SELECT id,name,created_at FROM decks WHERE id=?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::storage("read deck", e))?;
        let row = row.ok_or(CoreError::NotFound("deck"))?;
        Ok(Deck {
            id: uuid_from_str(row.get::<String, _>("id"))?,
            name: row.get::<String, _>("name"),
            created_at: dt_from_str(row.get::<String, _>("created_at"))?,
        })
    }

    async fn list_decks(&self) -> Result<Vec<Deck>, CoreError> {
        let rows = sqlx::query("SELECT id,name,created_at FROM decks ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CoreError::storage("list decks", e))?;
        let mut v = Vec::with_capacity(rows.len());
        for row in rows {
            v.push(Deck {
                id: uuid_from_str(row.get::<String, _>("id"))?,
                name: row.get::<String, _>("name"),
                created_at: dt_from_str(row.get::<String, _>("created_at"))?,
            });
        }
        Ok(v)
    }

    // ===== Boxes =====
    async fn create_box(&self, name: &str, interval_days: u32) -> Result<LeitnerBox, CoreError> {
        let created_at = Utc::now();
        let res = sqlx::query("INSERT INTO boxes (name,interval_days,created_at) VALUES (?,?,?)")
            .bind(name)
            .bind(interval_days as i64)
            .bind(dt_to_str(created_at))
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::storage("insert box", e))?;
        Ok(LeitnerBox {
            id: res.last_insert_rowid(),
            name: name.to_string(),
            interval_days,
            created_at,
        })
    }

    async fn list_boxes(&self) -> Result<Vec<LeitnerBox>, CoreError> {
        let rows =
            sqlx::query("SELECT id,name,interval_days,created_at FROM boxes ORDER BY interval_days ASC, id ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| CoreError::storage("list boxes", e))?;
        let mut v = Vec::with_capacity(rows.len());
        for row in rows {
            v.push(LeitnerBox {
                id: row.get::<i64, _>("id"),
                name: row.get::<String, _>("name"),
                interval_days: row.get::<i64, _>("interval_days") as u32,
                created_at: dt_from_str(row.get::<String, _>("created_at"))?,
            });
        }
        Ok(v)
    }

    // ===== Cards =====
    async fn add_card(&self, card: &NewCard) -> Result<Card, CoreError> {
        let deck_exists = sqlx::query("SELECT 1 FROM decks WHERE id=? LIMIT 1")
            .bind(card.deck_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::storage("read deck", e))?
            .is_some();
        if !deck_exists {
            return Err(CoreError::NotFound("deck"));
        }
        let box_exists = sqlx::query("SELECT 1 FROM boxes WHERE id=? LIMIT 1")
            .bind(card.box_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::storage("read box", e))?
            .is_some();
        if !box_exists {
            return Err(CoreError::NotFound("box"));
        }

        let created_at = Utc::now();
        let res = sqlx::query(
            r#"
            INSERT INTO cards (deck_id, box_id, question_type, question, answer, notes, media, created_at)
            VALUES (?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(card.deck_id.to_string())
        .bind(card.box_id)
        .bind(card.question_type.as_str())
        .bind(card.question.clone())
        .bind(&card.answer)
        .bind(card.notes.clone())
        .bind(card.media.clone())
        .bind(dt_to_str(created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::storage("insert card", e))?;

        Ok(Card {
            id: res.last_insert_rowid(),
            deck_id: card.deck_id,
            box_id: card.box_id,
            question_type: card.question_type,
            question: card.question.clone(),
            answer: card.answer.clone(),
            notes: card.notes.clone(),
            media: card.media.clone(),
            last_answered_at: None,
            created_at,
        })
    }

    async fn get_card(&self, id: CardId) -> Result<Card, CoreError> {
        let row = sqlx::query(&format!("SELECT {CARD_COLUMNS} FROM cards WHERE id=?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::storage("read card", e))?;
        let row = row.ok_or(CoreError::NotFound("card"))?;
        row_into_card(row)
    }

    async fn list_cards(&self, deck_id: Option<DeckId>) -> Result<Vec<Card>, CoreError> {
        let rows = if let Some(did) = deck_id {
            sqlx::query(&format!(
                "SELECT {CARD_COLUMNS} FROM cards WHERE deck_id=? ORDER BY created_at ASC, id ASC"
            ))
            .bind(did.to_string())
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(&format!(
                "SELECT {CARD_COLUMNS} FROM cards ORDER BY created_at ASC, id ASC"
            ))
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| CoreError::storage("list cards", e))?;
        rows.into_iter().map(row_into_card).collect()
    }

    async fn update_card(&self, card: &Card) -> Result<Card, CoreError> {
        let res = sqlx::query(
            r#"
            UPDATE cards SET
              box_id=?, question_type=?, question=?, answer=?, notes=?, media=?, last_answered_at=?
            WHERE id=?
            "#,
        )
        .bind(card.box_id)
        .bind(card.question_type.as_str())
        .bind(card.question.clone())
        .bind(&card.answer)
        .bind(card.notes.clone())
        .bind(card.media.clone())
        .bind(card.last_answered_at.map(dt_to_str))
        .bind(card.id)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::storage("update card", e))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::NotFound("card"));
        }
        Ok(card.clone())
    }

    async fn delete_card(&self, id: CardId) -> Result<(), CoreError> {
        // pivots and statistics go with it (ON DELETE CASCADE)
        let res = sqlx::query("DELETE FROM cards WHERE id=?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::storage("delete card", e))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::NotFound("card"));
        }
        Ok(())
    }

    // ===== Statistics =====
    async fn record_answer(
        &self,
        card_id: CardId,
        difficulty: Difficulty,
    ) -> Result<Statistic, CoreError> {
        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::storage("tx", e))?;

        let row = sqlx::query("UPDATE cards SET last_answered_at=? WHERE id=? RETURNING box_id")
            .bind(dt_to_str(now))
            .bind(card_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| CoreError::storage("answer card", e))?;
        let Some(row) = row else {
            tx.rollback().await.ok();
            return Err(CoreError::NotFound("card"));
        };
        let box_id: i64 = row.get("box_id");

        let res = sqlx::query(
            "INSERT INTO statistics (card_id,box_id,difficulty,created_at) VALUES (?,?,?,?)",
        )
        .bind(card_id)
        .bind(box_id)
        .bind(difficulty.as_str())
        .bind(dt_to_str(now))
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::storage("insert statistic", e))?;

        tx.commit()
            .await
            .map_err(|e| CoreError::storage("tx commit", e))?;
        Ok(Statistic {
            id: res.last_insert_rowid(),
            card_id,
            box_id,
            difficulty,
            created_at: now,
        })
    }

    // ===== Tags =====
    async fn list_tags(&self, deck_id: DeckId) -> Result<Vec<Tag>, CoreError> {
        let rows = sqlx::query(
            "SELECT id,deck_id,name,created_at FROM tags WHERE deck_id=? ORDER BY name ASC",
        )
        .bind(deck_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::storage("list tags", e))?;
        rows.into_iter().map(row_into_tag).collect()
    }

    async fn card_tags(&self, card_id: CardId) -> Result<Vec<Tag>, CoreError> {
        let rows = sqlx::query(
            r#"SELECT t.id, t.deck_id, t.name, t.created_at
               FROM cards_tags ct JOIN tags t ON t.id = ct.tag_id
               WHERE ct.card_id=? ORDER BY t.name ASC"#,
        )
        .bind(card_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::storage("card tags", e))?;
        rows.into_iter().map(row_into_tag).collect()
    }
}

#[async_trait]
impl TagStore for SqliteRepo {
    async fn begin(&self) -> Result<Box<dyn TagTx>, CoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::storage("tx", e))?;
        Ok(Box::new(SqliteTagTx { tx: Some(tx) }))
    }
}

/// Rolls back on drop unless committed.
struct SqliteTagTx {
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqliteTagTx {
    fn conn(&mut self) -> Result<&mut SqliteConnection, CoreError> {
        self.tx
            .as_deref_mut()
            .ok_or(CoreError::Invalid("transaction already committed"))
    }
}

#[async_trait]
impl TagTx for SqliteTagTx {
    async fn lock_card(&mut self, card_id: CardId) -> Result<(), CoreError> {
        // A no-op write takes the database write lock now instead of at the
        // first real write, so two reconciliations cannot deadlock on upgrade.
        let res = sqlx::query("UPDATE cards SET id=id WHERE id=?")
            .bind(card_id)
            .execute(self.conn()?)
            .await
            .map_err(|e| CoreError::storage("lock card", e))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::NotFound("card"));
        }
        Ok(())
    }

    async fn select_tags(
        &mut self,
        deck_id: DeckId,
        names: &[String],
    ) -> Result<Vec<TagRef>, CoreError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, name FROM tags WHERE deck_id = ");
        qb.push_bind(deck_id.to_string());
        qb.push(" AND name IN (");
        let mut list = qb.separated(", ");
        for name in names {
            list.push_bind(name.clone());
        }
        list.push_unseparated(")");

        let rows = qb
            .build()
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| CoreError::storage("select tags", e))?;
        Ok(rows
            .into_iter()
            .map(|row| TagRef {
                id: row.get("id"),
                name: row.get("name"),
            })
            .collect())
    }

    async fn insert_tags(&mut self, rows: &[NewTag]) -> Result<Vec<TagRef>, CoreError> {
        let conn = self.conn()?;
        let now = dt_to_str(Utc::now());
        let mut created = Vec::with_capacity(rows.len());
        for tag in rows {
            let row = sqlx::query(
                r#"INSERT INTO tags (deck_id, name, created_at) VALUES (?,?,?)
                   ON CONFLICT (deck_id, name) DO NOTHING
                   RETURNING id, name"#,
            )
            .bind(tag.deck_id.to_string())
            .bind(&tag.name)
            .bind(&now)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| CoreError::storage("insert tags", e))?;
            match row {
                Some(row) => created.push(TagRef {
                    id: row.get("id"),
                    name: row.get("name"),
                }),
                None => debug!(name = %tag.name, "tag already exists"),
            }
        }
        Ok(created)
    }

    async fn delete_pivots_by_card(&mut self, card_id: CardId) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM cards_tags WHERE card_id=?")
            .bind(card_id)
            .execute(self.conn()?)
            .await
            .map_err(|e| CoreError::storage("delete pivots", e))?;
        Ok(())
    }

    async fn insert_pivots(&mut self, rows: &[CardTag]) -> Result<(), CoreError> {
        let conn = self.conn()?;
        let now = dt_to_str(Utc::now());
        for pivot in rows {
            sqlx::query("INSERT INTO cards_tags (card_id, tag_id, created_at) VALUES (?,?,?)")
                .bind(pivot.card_id)
                .bind(pivot.tag_id)
                .bind(&now)
                .execute(&mut *conn)
                .await
                .map_err(|e| CoreError::storage("insert pivots", e))?;
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), CoreError> {
        let tx = self
            .tx
            .take()
            .ok_or(CoreError::Invalid("transaction already committed"))?;
        tx.commit()
            .await
            .map_err(|e| CoreError::storage("tx commit", e))
    }
}

// ===== Helpers =====
fn uuid_from_str(s: String) -> Result<uuid::Uuid, CoreError> {
    uuid::Uuid::parse_str(&s).map_err(|_| CoreError::Invalid("uuid"))
}

fn dt_to_str(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn dt_from_str(s: String) -> Result<DateTime<Utc>, CoreError> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map_err(|_| CoreError::Invalid("datetime"))
        .map(|dt| dt.with_timezone(&Utc))
}

fn row_into_card(row: sqlx::sqlite::SqliteRow) -> Result<Card, CoreError> {
    Ok(Card {
        id: row.get::<i64, _>("id"),
        deck_id: uuid_from_str(row.get::<String, _>("deck_id"))?,
        box_id: row.get::<i64, _>("box_id"),
        question_type: row.get::<String, _>("question_type").parse()?,
        question: row.get::<Option<String>, _>("question"),
        answer: row.get::<String, _>("answer"),
        notes: row.get::<Option<String>, _>("notes"),
        media: row.get::<Option<String>, _>("media"),
        last_answered_at: row
            .get::<Option<String>, _>("last_answered_at")
            .map(dt_from_str)
            .transpose()?,
        created_at: dt_from_str(row.get::<String, _>("created_at"))?,
    })
}

fn row_into_tag(row: sqlx::sqlite::SqliteRow) -> Result<Tag, CoreError> {
    Ok(Tag {
        id: row.get::<i64, _>("id"),
        deck_id: uuid_from_str(row.get::<String, _>("deck_id"))?,
        name: row.get::<String, _>("name"),
        created_at: dt_from_str(row.get::<String, _>("created_at"))?,
    })
}
