use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;

use crate::parser::words::WordToken;

const DB_PATH: &str = "data/recipes.sqlite";

pub fn connect() -> Result<Connection> {
    std::fs::create_dir_all("data")?;
    let conn = Connection::open(DB_PATH)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS recipe_document (
            id           INTEGER PRIMARY KEY,
            title        TEXT,
            url          TEXT UNIQUE NOT NULL,
            html         TEXT NOT NULL,
            retrieved_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS recipe_document_word (
            id                INTEGER PRIMARY KEY,
            document_id       INTEGER NOT NULL REFERENCES recipe_document(id),
            word              TEXT NOT NULL,
            original_format   TEXT,
            document_position INTEGER NOT NULL,
            element_position  INTEGER NOT NULL,
            element_tag       TEXT NOT NULL,
            UNIQUE(document_id, document_position)
        );
        CREATE INDEX IF NOT EXISTS idx_word_document ON recipe_document_word(document_id);

        CREATE TABLE IF NOT EXISTS recipe_document_tag_set (
            id          INTEGER PRIMARY KEY,
            document_id INTEGER NOT NULL UNIQUE REFERENCES recipe_document(id)
        );

        -- No uniqueness on (word_id, tag): duplicate assignments are stored
        -- as sent and unioned away at read time.
        CREATE TABLE IF NOT EXISTS recipe_document_word_tag (
            id          INTEGER PRIMARY KEY,
            tag_set_id  INTEGER NOT NULL REFERENCES recipe_document_tag_set(id),
            word_id     INTEGER NOT NULL REFERENCES recipe_document_word(id),
            tag         TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tag_set ON recipe_document_word_tag(tag_set_id);

        CREATE TABLE IF NOT EXISTS ingredient (
            id   INTEGER PRIMARY KEY,
            name TEXT UNIQUE NOT NULL
        );

        -- Saved reconstructions
        CREATE TABLE IF NOT EXISTS recipe (
            id          INTEGER PRIMARY KEY,
            document_id INTEGER NOT NULL REFERENCES recipe_document(id),
            title       TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS recipe_ingredient (
            id            INTEGER PRIMARY KEY,
            recipe_id     INTEGER NOT NULL REFERENCES recipe(id),
            component     TEXT,
            name_query    TEXT,
            ingredient_id INTEGER REFERENCES ingredient(id),
            quantity      REAL,
            units         TEXT,
            preparation   TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_recipe_ingredient ON recipe_ingredient(recipe_id);

        CREATE TABLE IF NOT EXISTS recipe_step (
            id          INTEGER PRIMARY KEY,
            recipe_id   INTEGER NOT NULL REFERENCES recipe(id),
            step_number INTEGER NOT NULL,
            text        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_recipe_step ON recipe_step(recipe_id);
        ",
    )?;
    Ok(())
}

// ── Documents ──

pub struct DocumentRow {
    pub id: i64,
    pub title: Option<String>,
    pub url: String,
    pub retrieved_at: String,
    pub word_count: i64,
}

pub fn document_exists(conn: &Connection, url: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM recipe_document WHERE url = ?1",
        [url],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

/// Store a document and its full token sequence in one transaction.
pub fn insert_document(
    conn: &Connection,
    url: &str,
    title: Option<&str>,
    html: &str,
    words: &[WordToken],
) -> Result<i64> {
    let retrieved_at = chrono::Utc::now().to_rfc3339();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO recipe_document (title, url, html, retrieved_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![title, url, html, retrieved_at],
    )?;
    let document_id = tx.last_insert_rowid();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO recipe_document_word
             (document_id, word, original_format, document_position, element_position, element_tag)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for word in words {
            stmt.execute(rusqlite::params![
                document_id,
                word.word,
                word.original_format,
                word.document_position,
                word.element_position,
                word.element_tag,
            ])?;
        }
    }
    tx.commit()?;
    Ok(document_id)
}

pub fn fetch_documents(conn: &Connection) -> Result<Vec<DocumentRow>> {
    let mut stmt = conn.prepare(
        "SELECT d.id, d.title, d.url, d.retrieved_at,
                (SELECT COUNT(*) FROM recipe_document_word w WHERE w.document_id = d.id)
         FROM recipe_document d
         ORDER BY d.id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(DocumentRow {
                id: row.get(0)?,
                title: row.get(1)?,
                url: row.get(2)?,
                retrieved_at: row.get(3)?,
                word_count: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn fetch_document_title(conn: &Connection, document_id: i64) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT title FROM recipe_document WHERE id = ?1")?;
    let mut rows = stmt.query([document_id])?;
    match rows.next()? {
        Some(row) => Ok(row.get(0)?),
        None => Ok(None),
    }
}

// ── Words ──

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WordRow {
    pub id: i64,
    pub document_id: i64,
    pub word: String,
    pub original_format: Option<String>,
    pub document_position: i64,
    pub element_position: i64,
    pub element_tag: String,
}

pub fn fetch_words(conn: &Connection, document_id: i64) -> Result<Vec<WordRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, document_id, word, original_format, document_position, element_position, element_tag
         FROM recipe_document_word
         WHERE document_id = ?1
         ORDER BY document_position",
    )?;
    let rows = stmt
        .query_map([document_id], word_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn word_from_row(row: &rusqlite::Row) -> rusqlite::Result<WordRow> {
    Ok(WordRow {
        id: row.get(0)?,
        document_id: row.get(1)?,
        word: row.get(2)?,
        original_format: row.get(3)?,
        document_position: row.get(4)?,
        element_position: row.get(5)?,
        element_tag: row.get(6)?,
    })
}

// ── Tag store ──

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagRow {
    pub id: i64,
    pub word_id: i64,
    pub tag: String,
}

/// Attach labels to words. The document's tag set is created on first use.
/// Returns the number of assignments written; duplicates are written as-is.
pub fn assign_tags(
    conn: &Connection,
    document_id: i64,
    assignments: &[(i64, String)],
) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT OR IGNORE INTO recipe_document_tag_set (document_id) VALUES (?1)",
        [document_id],
    )?;
    let tag_set_id: i64 = tx.query_row(
        "SELECT id FROM recipe_document_tag_set WHERE document_id = ?1",
        [document_id],
        |r| r.get(0),
    )?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO recipe_document_word_tag (tag_set_id, word_id, tag) VALUES (?1, ?2, ?3)",
        )?;
        for (word_id, tag) in assignments {
            count += stmt.execute(rusqlite::params![tag_set_id, word_id, tag])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub fn fetch_tags(conn: &Connection, document_id: i64) -> Result<Vec<TagRow>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.word_id, t.tag
         FROM recipe_document_word_tag t
         JOIN recipe_document_tag_set s ON s.id = t.tag_set_id
         WHERE s.document_id = ?1
         ORDER BY t.id",
    )?;
    let rows = stmt
        .query_map([document_id], |row| {
            Ok(TagRow {
                id: row.get(0)?,
                word_id: row.get(1)?,
                tag: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Delete assignments by id. A zero count is the routine "nothing deleted"
/// signal, not an error.
pub fn remove_tags(conn: &Connection, ids: &[i64]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare("DELETE FROM recipe_document_word_tag WHERE id = ?1")?;
        for id in ids {
            count += stmt.execute([id])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

/// Delete every assignment of one label within a document's tag set.
pub fn remove_tags_by_label(conn: &Connection, document_id: i64, label: &str) -> Result<usize> {
    let count = conn.execute(
        "DELETE FROM recipe_document_word_tag
         WHERE tag = ?1
           AND tag_set_id IN (SELECT id FROM recipe_document_tag_set WHERE document_id = ?2)",
        rusqlite::params![label, document_id],
    )?;
    Ok(count)
}

/// Snapshot read for grouping: words and tags come out of one transaction so
/// a concurrent assignment can never tear the view.
pub fn fetch_tagged_words(
    conn: &Connection,
    document_id: i64,
) -> Result<(Vec<WordRow>, Vec<TagRow>)> {
    let tx = conn.unchecked_transaction()?;
    let words = {
        let mut stmt = tx.prepare(
            "SELECT id, document_id, word, original_format, document_position, element_position, element_tag
             FROM recipe_document_word
             WHERE document_id = ?1
             ORDER BY document_position",
        )?;
        let rows = stmt
            .query_map([document_id], word_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    let tags = {
        let mut stmt = tx.prepare(
            "SELECT t.id, t.word_id, t.tag
             FROM recipe_document_word_tag t
             JOIN recipe_document_tag_set s ON s.id = t.tag_set_id
             WHERE s.document_id = ?1
             ORDER BY t.id",
        )?;
        let rows = stmt
            .query_map([document_id], |row| {
                Ok(TagRow {
                    id: row.get(0)?,
                    word_id: row.get(1)?,
                    tag: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    tx.commit()?;
    Ok((words, tags))
}

// ── Ingredient catalog ──

pub fn insert_ingredients(conn: &Connection, names: &[String]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare("INSERT OR IGNORE INTO ingredient (name) VALUES (?1)")?;
        for name in names {
            count += stmt.execute([name])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub fn fetch_ingredients(conn: &Connection) -> Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare("SELECT id, name FROM ingredient ORDER BY id")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Saved recipes ──

pub fn save_recipe(
    conn: &Connection,
    document_id: i64,
    draft: &crate::parser::assemble::RecipeDraft,
) -> Result<i64> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO recipe (document_id, title) VALUES (?1, ?2)",
        rusqlite::params![document_id, draft.title],
    )?;
    let recipe_id = tx.last_insert_rowid();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO recipe_ingredient
             (recipe_id, component, name_query, ingredient_id, quantity, units, preparation)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for ingredient in &draft.ingredients {
            let best_match = ingredient.matches.first().map(|m| m.ingredient_id);
            stmt.execute(rusqlite::params![
                recipe_id,
                ingredient.component,
                ingredient.name_query,
                best_match,
                ingredient.quantity,
                ingredient.units,
                ingredient.preparation,
            ])?;
        }
    }
    {
        let mut stmt = tx.prepare(
            "INSERT INTO recipe_step (recipe_id, step_number, text) VALUES (?1, ?2, ?3)",
        )?;
        for (i, step) in draft.directions.iter().enumerate() {
            stmt.execute(rusqlite::params![recipe_id, (i + 1) as i64, step])?;
        }
    }
    tx.commit()?;
    Ok(recipe_id)
}

// ── Stats ──

pub struct Stats {
    pub documents: usize,
    pub words: usize,
    pub tag_sets: usize,
    pub tags: usize,
    pub ingredients: usize,
    pub recipes: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count = |table: &str| -> Result<usize> {
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?)
    };
    Ok(Stats {
        documents: count("recipe_document")?,
        words: count("recipe_document_word")?,
        tag_sets: count("recipe_document_tag_set")?,
        tags: count("recipe_document_word_tag")?,
        ingredients: count("ingredient")?,
        recipes: count("recipe")?,
    })
}

// ── Tests ──
