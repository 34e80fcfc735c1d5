//! A small host application wiring its migrations into the tidemark runner.
//!
//!     cargo run -p tidemark-cli --example notes -- --database notes.db migrate
//!     cargo run -p tidemark-cli --example notes -- --database notes.db status

use anyhow::Context;
use tidemark_db::{Migration, Registry};

fn registry() -> anyhow::Result<Registry> {
    let mut registry = Registry::new();

    registry.register(Migration::sql(
        "20240101T000000Z",
        "create_notes",
        "CREATE TABLE notes (
            id INTEGER PRIMARY KEY,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
        "DROP TABLE notes;",
    ))?;

    registry.register(Migration::sql(
        "20240115T000000Z",
        "index_notes_created_at",
        "CREATE INDEX idx_notes_created_at ON notes(created_at);",
        "DROP INDEX idx_notes_created_at;",
    ))?;

    // Data migration: split a legacy "#tag" prefix out of note bodies.
    registry.register(
        Migration::new("20240201T000000Z", "extract_note_tags")
            .up(|tx| {
                tx.execute_batch(
                    "CREATE TABLE note_tags (
                        note_id INTEGER NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
                        tag TEXT NOT NULL
                    );",
                )?;

                let mut stmt = tx.prepare("SELECT id, body FROM notes WHERE body LIKE '#%'")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;

                for (id, body) in rows {
                    let (tag, rest) = body.split_once(' ').unwrap_or((body.as_str(), ""));
                    tx.execute(
                        "INSERT INTO note_tags (note_id, tag) VALUES (?1, ?2)",
                        rusqlite::params![id, tag.trim_start_matches('#')],
                    )?;
                    tx.execute(
                        "UPDATE notes SET body = ?1 WHERE id = ?2",
                        rusqlite::params![rest, id],
                    )?;
                }
                Ok(())
            })
            .down(|tx| {
                tx.execute_batch(
                    "UPDATE notes SET body = (
                        SELECT '#' || t.tag || ' ' || notes.body
                        FROM note_tags t WHERE t.note_id = notes.id LIMIT 1
                    ) WHERE id IN (SELECT note_id FROM note_tags);
                    DROP TABLE note_tags;",
                )?;
                Ok(())
            }),
    )?;

    Ok(registry)
}

fn main() -> anyhow::Result<()> {
    let registry = registry().context("invalid migration registry")?;
    tidemark_cli::run(registry)
}
