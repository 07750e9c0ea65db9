//! Participant queries.

use plenum_common::db::models::Participant;
use plenum_common::Result;
use sqlx::SqlitePool;

pub async fn insert(pool: &SqlitePool, participant: &Participant) -> Result<()> {
    sqlx::query(
        "INSERT INTO participants (guid, topic_id, name, role, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&participant.guid)
    .bind(&participant.topic_id)
    .bind(&participant.name)
    .bind(&participant.role)
    .bind(&participant.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get(pool: &SqlitePool, guid: &str) -> Result<Option<Participant>> {
    let participant =
        sqlx::query_as::<_, Participant>("SELECT * FROM participants WHERE guid = ?")
            .bind(guid)
            .fetch_optional(pool)
            .await?;
    Ok(participant)
}

pub async fn list_for_topic(pool: &SqlitePool, topic_id: &str) -> Result<Vec<Participant>> {
    let participants = sqlx::query_as::<_, Participant>(
        "SELECT * FROM participants WHERE topic_id = ? ORDER BY created_at",
    )
    .bind(topic_id)
    .fetch_all(pool)
    .await?;
    Ok(participants)
}
