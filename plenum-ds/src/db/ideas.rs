//! Idea queries.
//!
//! Ideas are append-only; `seq` is assigned by SQLite and gives the stable
//! total order used when a frozen snapshot needs reloading.

use plenum_common::db::models::Idea;
use plenum_common::Result;
use sqlx::SqlitePool;

pub async fn insert(pool: &SqlitePool, idea: &Idea) -> Result<()> {
    sqlx::query(
        "INSERT INTO ideas (guid, topic_id, participant_id, content, question_section, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&idea.guid)
    .bind(&idea.topic_id)
    .bind(&idea.participant_id)
    .bind(&idea.content)
    .bind(&idea.question_section)
    .bind(&idea.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_for_topic(pool: &SqlitePool, topic_id: &str) -> Result<Vec<Idea>> {
    let ideas =
        sqlx::query_as::<_, Idea>("SELECT * FROM ideas WHERE topic_id = ? ORDER BY seq")
            .bind(topic_id)
            .fetch_all(pool)
            .await?;
    Ok(ideas)
}
