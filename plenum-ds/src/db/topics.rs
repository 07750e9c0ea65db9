//! Topic queries.

use plenum_common::db::models::Topic;
use plenum_common::Result;
use sqlx::SqlitePool;

pub async fn list_by_status(pool: &SqlitePool, status: &str) -> Result<Vec<Topic>> {
    let topics = sqlx::query_as::<_, Topic>(
        "SELECT * FROM topics WHERE status = ? ORDER BY start_date, created_at",
    )
    .bind(status)
    .fetch_all(pool)
    .await?;
    Ok(topics)
}

pub async fn get(pool: &SqlitePool, guid: &str) -> Result<Option<Topic>> {
    let topic = sqlx::query_as::<_, Topic>("SELECT * FROM topics WHERE guid = ?")
        .bind(guid)
        .fetch_optional(pool)
        .await?;
    Ok(topic)
}

pub async fn insert(pool: &SqlitePool, topic: &Topic) -> Result<()> {
    sqlx::query(
        "INSERT INTO topics (guid, title, description, goal, question1, question2, \
         host_name, start_date, end_date, reference_doc_name, reference_doc_url, \
         meeting_url, status, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&topic.guid)
    .bind(&topic.title)
    .bind(&topic.description)
    .bind(&topic.goal)
    .bind(&topic.question1)
    .bind(&topic.question2)
    .bind(&topic.host_name)
    .bind(&topic.start_date)
    .bind(&topic.end_date)
    .bind(&topic.reference_doc_name)
    .bind(&topic.reference_doc_url)
    .bind(&topic.meeting_url)
    .bind(&topic.status)
    .bind(&topic.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update(pool: &SqlitePool, topic: &Topic) -> Result<()> {
    sqlx::query(
        "UPDATE topics SET title = ?, description = ?, goal = ?, question1 = ?, \
         question2 = ?, host_name = ?, start_date = ?, end_date = ?, \
         reference_doc_name = ?, reference_doc_url = ?, meeting_url = ?, status = ? \
         WHERE guid = ?",
    )
    .bind(&topic.title)
    .bind(&topic.description)
    .bind(&topic.goal)
    .bind(&topic.question1)
    .bind(&topic.question2)
    .bind(&topic.host_name)
    .bind(&topic.start_date)
    .bind(&topic.end_date)
    .bind(&topic.reference_doc_name)
    .bind(&topic.reference_doc_url)
    .bind(&topic.meeting_url)
    .bind(&topic.status)
    .bind(&topic.guid)
    .execute(pool)
    .await?;
    Ok(())
}

/// Directory shown when the topic listing cannot be read. Keeps the guest
/// flow demonstrable even with a broken database.
pub fn placeholder_topics() -> Vec<Topic> {
    let window = |start: &str, end: &str| (Some(start.to_string()), Some(end.to_string()));
    let mk = |guid: &str,
              title: &str,
              description: &str,
              goal: &str,
              q1: &str,
              q2: &str,
              (start_date, end_date): (Option<String>, Option<String>)| Topic {
        guid: guid.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        goal: goal.to_string(),
        question1: q1.to_string(),
        question2: q2.to_string(),
        host_name: "Sample Host".to_string(),
        start_date,
        end_date,
        reference_doc_name: None,
        reference_doc_url: None,
        meeting_url: None,
        status: "upcoming".to_string(),
        created_at: "2026-01-01T00:00:00Z".to_string(),
    };
    vec![
        mk(
            "sample-workplace",
            "A better workplace",
            "What would make day-to-day work here genuinely better?",
            "Collect concrete improvement ideas",
            "What slows you down most?",
            "What should we protect as we change things?",
            window("2026-01-01", "2030-12-31"),
        ),
        mk(
            "sample-product",
            "Next product direction",
            "Where should the product go over the next year?",
            "Surface candidate directions",
            "What do users ask for that we ignore?",
            "What would we build with no constraints?",
            window("2026-01-01", "2030-12-31"),
        ),
        mk(
            "sample-community",
            "Community event ideas",
            "What events would bring people together?",
            "A shortlist of events worth organizing",
            "What worked before?",
            "What have we never tried?",
            window("2026-01-01", "2030-12-31"),
        ),
    ]
}
