use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::{Error, Transaction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub time: i64,
    pub remote_addr: String,
    pub hijacked: bool,
    pub qtype: u16,
    pub question: String,
    pub answers: Vec<String>,
}

async fn upsert_rr_type<'t>(tx: &mut Transaction<'t>, value: u16) -> Result<i64, Error> {
    if let Some(id) = sqlx::query_scalar("SELECT id FROM rr_type WHERE value = $1")
        .bind(value)
        .fetch_optional(&mut *tx)
        .await?
    {
        return Ok(id);
    }
    sqlx::query_scalar("INSERT INTO rr_type (value) VALUES ($1) RETURNING id")
        .bind(value)
        .fetch_one(&mut *tx)
        .await
}

async fn upsert_rr_question<'t>(tx: &mut Transaction<'t>, name: &str) -> Result<i64, Error> {
    if let Some(id) = sqlx::query_scalar("SELECT id FROM rr_question WHERE name = $1")
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?
    {
        return Ok(id);
    }
    sqlx::query_scalar("INSERT INTO rr_question (name) VALUES ($1) RETURNING id")
        .bind(name)
        .fetch_one(&mut *tx)
        .await
}

async fn upsert_rr_answer<'t>(tx: &mut Transaction<'t>, value: &str) -> Result<i64, Error> {
    if let Some(id) = sqlx::query_scalar("SELECT id FROM rr_answer WHERE value = $1")
        .bind(value)
        .fetch_optional(&mut *tx)
        .await?
    {
        return Ok(id);
    }
    sqlx::query_scalar("INSERT INTO rr_answer (value) VALUES ($1) RETURNING id")
        .bind(value)
        .fetch_one(&mut *tx)
        .await
}

/// Writes one logical log entry: upserts the dimension rows, inserts the
/// fact row, then one bridge row per answer, preserving answer order.
pub async fn write<'t>(tx: &mut Transaction<'t>, entry: &LogEntry) -> Result<i64, Error> {
    let rr_type_id = upsert_rr_type(tx, entry.qtype).await?;
    let rr_question_id = upsert_rr_question(tx, &entry.question).await?;

    let log_id: i64 = sqlx::query_scalar(
        r#"INSERT INTO log (time, hijacked, remote_addr, rr_type_id, rr_question_id)
VALUES ($1, $2, $3, $4, $5)
RETURNING id"#,
    )
    .bind(entry.time)
    .bind(entry.hijacked)
    .bind(&entry.remote_addr)
    .bind(rr_type_id)
    .bind(rr_question_id)
    .fetch_one(&mut *tx)
    .await?;

    for (position, answer) in entry.answers.iter().enumerate() {
        let rr_answer_id = upsert_rr_answer(tx, answer).await?;
        sqlx::query(
            "INSERT INTO log_rr_answer (log_id, rr_answer_id, position) VALUES ($1, $2, $3)",
        )
        .bind(log_id)
        .bind(rr_answer_id)
        .bind(position as i64)
        .execute(&mut *tx)
        .await?;
    }

    Ok(log_id)
}

struct LogRow {
    log_id: i64,
    time: i64,
    remote_addr: String,
    hijacked: bool,
    qtype: u16,
    question: String,
    answer: Option<String>,
}

impl sqlx::FromRow<'_, SqliteRow> for LogRow {
    fn from_row(row: &SqliteRow) -> Result<Self, Error> {
        Ok(Self {
            log_id: row.try_get(0)?,
            time: row.try_get(1)?,
            remote_addr: row.try_get(2)?,
            hijacked: row.try_get(3)?,
            qtype: row.try_get(4)?,
            question: row.try_get(5)?,
            answer: row.try_get(6)?,
        })
    }
}

/// Reads up to `n` logical entries in time-descending order, folding the
/// physical answer rows that share a log id into a single entry.
pub async fn get<'t>(tx: &mut Transaction<'t>, n: u32) -> Result<Vec<LogEntry>, Error> {
    let rows: Vec<LogRow> = sqlx::query_as(
        r#"SELECT
    log.id,
    log.time,
    log.remote_addr,
    log.hijacked,
    rr_type.value,
    rr_question.name,
    rr_answer.value
FROM log
JOIN rr_type ON rr_type.id = log.rr_type_id
JOIN rr_question ON rr_question.id = log.rr_question_id
LEFT JOIN log_rr_answer ON log_rr_answer.log_id = log.id
LEFT JOIN rr_answer ON rr_answer.id = log_rr_answer.rr_answer_id
WHERE log.id IN (SELECT id FROM log ORDER BY time DESC LIMIT $1)
ORDER BY log.time DESC, log.id DESC, log_rr_answer.position ASC"#,
    )
    .bind(n)
    .fetch_all(&mut *tx)
    .await?;

    // Rows are ordered so that every row belonging to the same log id is
    // contiguous; track the last id seen to fold without an extra lookup.
    let mut entries: Vec<LogEntry> = Vec::new();
    let mut last_log_id: Option<i64> = None;
    for row in rows {
        if last_log_id == Some(row.log_id) {
            if let Some(answer) = row.answer {
                entries.last_mut().unwrap().answers.push(answer);
            }
            continue;
        }

        last_log_id = Some(row.log_id);
        let mut answers = Vec::new();
        if let Some(answer) = row.answer {
            answers.push(answer);
        }
        entries.push(LogEntry {
            time: row.time,
            remote_addr: row.remote_addr,
            hijacked: row.hijacked,
            qtype: row.qtype,
            question: row.question,
            answers,
        });
    }
    Ok(entries)
}

/// Deletes bridge rows older than `cutoff`, then unreferenced log rows,
/// then orphaned dimension rows, in that order, within one transaction.
pub async fn delete_before<'t>(tx: &mut Transaction<'t>, cutoff: i64) -> Result<(), Error> {
    sqlx::query(
        "DELETE FROM log_rr_answer WHERE log_id IN (SELECT id FROM log WHERE time < $1)",
    )
    .bind(cutoff)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM log WHERE time < $1")
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "DELETE FROM rr_question WHERE id NOT IN (SELECT DISTINCT rr_question_id FROM log)",
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM rr_type WHERE id NOT IN (SELECT DISTINCT rr_type_id FROM log)")
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "DELETE FROM rr_answer WHERE id NOT IN (SELECT DISTINCT rr_answer_id FROM log_rr_answer)",
    )
    .execute(&mut *tx)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool() -> crate::Pool {
        let pool = crate::Config::test_env().build().await.unwrap();
        crate::migrate(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn should_round_trip_multi_answer_entry() {
        let pool = pool().await;
        let mut tx = pool.begin().await.unwrap();

        write(
            &mut tx,
            &LogEntry {
                time: 100,
                remote_addr: "127.0.0.1".into(),
                hijacked: false,
                qtype: 1,
                question: "example.com.".into(),
                answers: vec!["192.0.2.1".into(), "192.0.2.2".into()],
            },
        )
        .await
        .unwrap();
        write(
            &mut tx,
            &LogEntry {
                time: 200,
                remote_addr: "127.0.0.1".into(),
                hijacked: false,
                qtype: 1,
                question: "2.example.com.".into(),
                answers: vec![],
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let mut tx = pool.begin().await.unwrap();
        let entries = get(&mut tx, 2).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].question, "2.example.com.");
        assert!(entries[0].answers.is_empty());
        assert_eq!(entries[1].answers.len(), 2);
    }

    #[tokio::test]
    async fn should_prune_before_cutoff() {
        let pool = pool().await;
        let mut tx = pool.begin().await.unwrap();
        write(
            &mut tx,
            &LogEntry {
                time: 1,
                remote_addr: "127.0.0.1".into(),
                hijacked: false,
                qtype: 1,
                question: "old.example.com.".into(),
                answers: vec!["192.0.2.1".into()],
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let mut tx = pool.begin().await.unwrap();
        delete_before(&mut tx, 100).await.unwrap();
        let entries = get(&mut tx, 10).await.unwrap();
        assert!(entries.is_empty());
    }
}
