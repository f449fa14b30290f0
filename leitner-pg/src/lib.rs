use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leitner_core::{
    repo::{Repository, TagStore, TagTx},
    Card, CardId, CardTag, CoreError, Deck, DeckId, Difficulty, LeitnerBox, NewCard, NewTag,
    Statistic, Tag, TagRef,
};
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    PgConnection, PgPool, Postgres, Row, Transaction,
};
use std::time::Duration;
use tracing::debug;

pub struct PostgresRepo {
    pool: PgPool,
}

impl PostgresRepo {
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await
            .map_err(|e| CoreError::storage("pg connect", e))?;
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    async fn ensure_schema(&self) -> Result<(), CoreError> {
        const STMT: &str = r#"
        CREATE TABLE IF NOT EXISTS decks (
          id          uuid PRIMARY KEY,
          name        text NOT NULL,
          created_at  timestamptz NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_decks_name ON decks (lower(name));

        CREATE TABLE IF NOT EXISTS boxes (
          id          bigserial PRIMARY KEY,
          name        text NOT NULL,
          interval_days integer NOT NULL,
          created_at  timestamptz NOT NULL DEFAULT now()
        );

        CREATE TABLE IF NOT EXISTS cards (
          id                bigserial PRIMARY KEY,
          deck_id           uuid NOT NULL REFERENCES decks(id) ON DELETE CASCADE,
          box_id            bigint NOT NULL REFERENCES boxes(id),
          question_type     text NOT NULL DEFAULT 'classic'
                            CHECK (question_type IN ('classic', 'media')),
          question          text,
          answer            text NOT NULL,
          notes             text,
          media             text,
          last_answered_at  timestamptz,
          created_at        timestamptz NOT NULL DEFAULT now()
        );

        CREATE TABLE IF NOT EXISTS tags (
          id          bigserial PRIMARY KEY,
          deck_id     uuid NOT NULL REFERENCES decks(id) ON DELETE CASCADE,
          name        text NOT NULL,
          created_at  timestamptz NOT NULL DEFAULT now(),
          UNIQUE (deck_id, name)
        );

        CREATE TABLE IF NOT EXISTS cards_tags (
          id          bigserial PRIMARY KEY,
          card_id     bigint NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
          tag_id      bigint NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
          created_at  timestamptz NOT NULL DEFAULT now(),
          UNIQUE (card_id, tag_id)
        );

        CREATE TABLE IF NOT EXISTS statistics (
          id          bigserial PRIMARY KEY,
          card_id     bigint NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
          box_id      bigint NOT NULL REFERENCES boxes(id),
          difficulty  text NOT NULL,
          created_at  timestamptz NOT NULL DEFAULT now()
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
                .map_err(|e| CoreError::storage("pg schema", e))?;
        }
        Ok(())
    }
}

const CARD_COLUMNS: &str = "id,deck_id,box_id,question_type,question,answer,notes,media,last_answered_at,created_at";

#[async_trait]
impl Repository for PostgresRepo {
    // ===== Decks =====
    async fn create_deck(&self, name: &str) -> Result<Deck, CoreError> {
        let exists =
            sqlx::query_scalar::<_, i32>("SELECT 1 FROM decks WHERE lower(name)=lower($1) LIMIT 1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| CoreError::storage("pg read deck", e))?
                .is_some();
        if exists {
            return Err(CoreError::Conflict("deck name already exists"));
        }

        let deck = Deck::new(name);
        sqlx::query("INSERT INTO decks (id,name,created_at) VALUES ($1,$2,$3)")
            .bind(deck.id)
            .bind(&deck.name)
            .bind(deck.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::storage("pg insert deck", e))?;
        Ok(deck)
    }

    async fn get_deck(&self, id: DeckId) -> Result<Deck, CoreError> {
        let row = sqlx::query("SELECT id,name,created_at FROM decks WHERE id=$1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::storage("pg read deck", e))?;
        let row = row.ok_or(CoreError::NotFound("deck"))?;
        Ok(Deck {
            id: row.get("id"),
            name: row.get("name"),
            created_at: row.get("created_at"),
        })
    }

    async fn list_decks(&self) -> Result<Vec<Deck>, CoreError> {
        let rows = sqlx::query("SELECT id,name,created_at FROM decks ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CoreError::storage("pg list decks", e))?;
        Ok(rows
            .into_iter()
            .map(|row| Deck {
                id: row.get("id"),
                name: row.get("name"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    // ===== Boxes =====
    async fn create_box(&self, name: &str, interval_days: u32) -> Result<LeitnerBox, CoreError> {
        let interval = i32::try_from(interval_days).map_err(|_| CoreError::Invalid("interval"))?;
        let row = sqlx::query(
            "INSERT INTO boxes (name,interval_days) VALUES ($1,$2) RETURNING id, created_at",
        )
        .bind(name)
        .bind(interval)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CoreError::storage("pg insert box", e))?;
        Ok(LeitnerBox {
            id: row.get("id"),
            name: name.to_string(),
            interval_days,
            created_at: row.get("created_at"),
        })
    }

    async fn list_boxes(&self) -> Result<Vec<LeitnerBox>, CoreError> {
        let rows = sqlx::query(
            "SELECT id,name,interval_days,created_at FROM boxes ORDER BY interval_days ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::storage("pg list boxes", e))?;
        Ok(rows
            .into_iter()
            .map(|row| LeitnerBox {
                id: row.get("id"),
                name: row.get("name"),
                interval_days: row.get::<i32, _>("interval_days").max(0) as u32,
                created_at: row.get("created_at"),
            })
            .collect())
    }

    // ===== Cards =====
    async fn add_card(&self, card: &NewCard) -> Result<Card, CoreError> {
        let deck_exists = sqlx::query_scalar::<_, i32>("SELECT 1 FROM decks WHERE id=$1")
            .bind(card.deck_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::storage("pg read deck", e))?
            .is_some();
        if !deck_exists {
            return Err(CoreError::NotFound("deck"));
        }
        let box_exists = sqlx::query_scalar::<_, i32>("SELECT 1 FROM boxes WHERE id=$1")
            .bind(card.box_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::storage("pg read box", e))?
            .is_some();
        if !box_exists {
            return Err(CoreError::NotFound("box"));
        }

        let row = sqlx::query(&format!(
            r#"INSERT INTO cards (deck_id, box_id, question_type, question, answer, notes, media)
               VALUES ($1,$2,$3,$4,$5,$6,$7)
               RETURNING {CARD_COLUMNS}"#
        ))
        .bind(card.deck_id)
        .bind(card.box_id)
        .bind(card.question_type.as_str())
        .bind(card.question.clone())
        .bind(&card.answer)
        .bind(card.notes.clone())
        .bind(card.media.clone())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CoreError::storage("pg insert card", e))?;
        row_into_card(row)
    }

    async fn get_card(&self, id: CardId) -> Result<Card, CoreError> {
        let row = sqlx::query(&format!("SELECT {CARD_COLUMNS} FROM cards WHERE id=$1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::storage("pg read card", e))?;
        let row = row.ok_or(CoreError::NotFound("card"))?;
        row_into_card(row)
    }

    async fn list_cards(&self, deck_id: Option<DeckId>) -> Result<Vec<Card>, CoreError> {
        let rows = if let Some(did) = deck_id {
            sqlx::query(&format!(
                "SELECT {CARD_COLUMNS} FROM cards WHERE deck_id=$1 ORDER BY created_at ASC, id ASC"
            ))
            .bind(did)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(&format!(
                "SELECT {CARD_COLUMNS} FROM cards ORDER BY created_at ASC, id ASC"
            ))
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| CoreError::storage("pg list cards", e))?;
        rows.into_iter().map(row_into_card).collect()
    }

    async fn update_card(&self, card: &Card) -> Result<Card, CoreError> {
        let res = sqlx::query(
            r#"
            UPDATE cards SET
              box_id=$1, question_type=$2, question=$3, answer=$4, notes=$5, media=$6,
              last_answered_at=$7
            WHERE id=$8
            "#,
        )
        .bind(card.box_id)
        .bind(card.question_type.as_str())
        .bind(card.question.clone())
        .bind(&card.answer)
        .bind(card.notes.clone())
        .bind(card.media.clone())
        .bind(card.last_answered_at)
        .bind(card.id)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::storage("pg update card", e))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::NotFound("card"));
        }
        Ok(card.clone())
    }

    async fn delete_card(&self, id: CardId) -> Result<(), CoreError> {
        // pivots and statistics go with it (ON DELETE CASCADE)
        let res = sqlx::query("DELETE FROM cards WHERE id=$1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::storage("pg delete card", e))?;
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
            .map_err(|e| CoreError::storage("pg tx", e))?;

        let box_id = sqlx::query_scalar::<_, i64>(
            "UPDATE cards SET last_answered_at=$1 WHERE id=$2 RETURNING box_id",
        )
        .bind(now)
        .bind(card_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| CoreError::storage("pg answer card", e))?;
        let Some(box_id) = box_id else {
            tx.rollback().await.ok();
            return Err(CoreError::NotFound("card"));
        };

        let id = sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO statistics (card_id,box_id,difficulty,created_at)
               VALUES ($1,$2,$3,$4) RETURNING id"#,
        )
        .bind(card_id)
        .bind(box_id)
        .bind(difficulty.as_str())
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| CoreError::storage("pg insert statistic", e))?;

        tx.commit()
            .await
            .map_err(|e| CoreError::storage("pg tx commit", e))?;
        Ok(Statistic {
            id,
            card_id,
            box_id,
            difficulty,
            created_at: now,
        })
    }

    // ===== Tags =====
    async fn list_tags(&self, deck_id: DeckId) -> Result<Vec<Tag>, CoreError> {
        let rows = sqlx::query(
            "SELECT id,deck_id,name,created_at FROM tags WHERE deck_id=$1 ORDER BY name ASC",
        )
        .bind(deck_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::storage("pg list tags", e))?;
        Ok(rows.into_iter().map(row_into_tag).collect())
    }

    async fn card_tags(&self, card_id: CardId) -> Result<Vec<Tag>, CoreError> {
        let rows = sqlx::query(
            r#"SELECT t.id, t.deck_id, t.name, t.created_at
               FROM cards_tags ct JOIN tags t ON t.id = ct.tag_id
               WHERE ct.card_id=$1 ORDER BY t.name ASC"#,
        )
        .bind(card_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::storage("pg card tags", e))?;
        Ok(rows.into_iter().map(row_into_tag).collect())
    }
}

#[async_trait]
impl TagStore for PostgresRepo {
    async fn begin(&self) -> Result<Box<dyn TagTx>, CoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::storage("pg tx", e))?;
        Ok(Box::new(PgTagTx { tx: Some(tx) }))
    }
}

/// Rolls back on drop unless committed.
struct PgTagTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgTagTx {
    fn conn(&mut self) -> Result<&mut PgConnection, CoreError> {
        self.tx
            .as_deref_mut()
            .ok_or(CoreError::Invalid("transaction already committed"))
    }
}

#[async_trait]
impl TagTx for PgTagTx {
    async fn lock_card(&mut self, card_id: CardId) -> Result<(), CoreError> {
        // Row lock serializes reconciliations of this card across processes.
        let locked = sqlx::query_scalar::<_, i64>("SELECT id FROM cards WHERE id=$1 FOR UPDATE")
            .bind(card_id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(|e| CoreError::storage("pg lock card", e))?;
        locked.map(|_| ()).ok_or(CoreError::NotFound("card"))
    }

    async fn select_tags(
        &mut self,
        deck_id: DeckId,
        names: &[String],
    ) -> Result<Vec<TagRef>, CoreError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT id, name FROM tags WHERE deck_id=$1 AND name = ANY($2)")
            .bind(deck_id)
            .bind(names.to_vec())
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| CoreError::storage("pg select tags", e))?;
        Ok(rows.into_iter().map(row_into_ref).collect())
    }

    async fn insert_tags(&mut self, rows: &[NewTag]) -> Result<Vec<TagRef>, CoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let deck_ids: Vec<DeckId> = rows.iter().map(|r| r.deck_id).collect();
        let names: Vec<String> = rows.iter().map(|r| r.name.clone()).collect();
        let inserted = sqlx::query(
            r#"INSERT INTO tags (deck_id, name)
               SELECT * FROM UNNEST($1::uuid[], $2::text[])
               ON CONFLICT (deck_id, name) DO NOTHING
               RETURNING id, name"#,
        )
        .bind(deck_ids)
        .bind(names)
        .fetch_all(self.conn()?)
        .await
        .map_err(|e| CoreError::storage("pg insert tags", e))?;
        if inserted.len() < rows.len() {
            debug!(skipped = rows.len() - inserted.len(), "tags already existed");
        }
        Ok(inserted.into_iter().map(row_into_ref).collect())
    }

    async fn delete_pivots_by_card(&mut self, card_id: CardId) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM cards_tags WHERE card_id=$1")
            .bind(card_id)
            .execute(self.conn()?)
            .await
            .map_err(|e| CoreError::storage("pg delete pivots", e))?;
        Ok(())
    }

    async fn insert_pivots(&mut self, rows: &[CardTag]) -> Result<(), CoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let card_ids: Vec<CardId> = rows.iter().map(|r| r.card_id).collect();
        let tag_ids: Vec<i64> = rows.iter().map(|r| r.tag_id).collect();
        sqlx::query(
            r#"INSERT INTO cards_tags (card_id, tag_id)
               SELECT * FROM UNNEST($1::bigint[], $2::bigint[])"#,
        )
        .bind(card_ids)
        .bind(tag_ids)
        .execute(self.conn()?)
        .await
        .map_err(|e| CoreError::storage("pg insert pivots", e))?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), CoreError> {
        let tx = self
            .tx
            .take()
            .ok_or(CoreError::Invalid("transaction already committed"))?;
        tx.commit()
            .await
            .map_err(|e| CoreError::storage("pg tx commit", e))
    }
}

// ===== Helpers =====
fn row_into_card(row: PgRow) -> Result<Card, CoreError> {
    Ok(Card {
        id: row.get("id"),
        deck_id: row.get("deck_id"),
        box_id: row.get("box_id"),
        question_type: row.get::<String, _>("question_type").parse()?,
        question: row.get("question"),
        answer: row.get("answer"),
        notes: row.get("notes"),
        media: row.get("media"),
        last_answered_at: row.get::<Option<DateTime<Utc>>, _>("last_answered_at"),
        created_at: row.get("created_at"),
    })
}

fn row_into_tag(row: PgRow) -> Tag {
    Tag {
        id: row.get("id"),
        deck_id: row.get("deck_id"),
        name: row.get("name"),
        created_at: row.get("created_at"),
    }
}

fn row_into_ref(row: PgRow) -> TagRef {
    TagRef {
        id: row.get("id"),
        name: row.get("name"),
    }
}
