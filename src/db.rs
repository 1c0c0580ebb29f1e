use anyhow::Context;
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat::{self, Teacher};
use crate::error::PortalError;
use crate::models::{
    Conversation, EventItem, Message, Metric, NewsItem, SenderType, StudentRecord, StudentStats,
    UserType,
};
use crate::roster::{self, IdentityRow, ValidatedStudent};
use crate::scoring;

const STUDENT_COLUMNS: &str = "id, uid, name, email, \
     prova_parana, saeb, provas_internas, provas_externas, frequencia, plataformas_digitais, \
     prova_parana_trend, saeb_trend, provas_internas_trend, provas_externas_trend, \
     frequencia_trend, plataformas_digitais_trend, ranking, created_at, updated_at";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn student_from_row(row: &PgRow) -> Result<StudentRecord, sqlx::Error> {
    let mut stats = StudentStats::default();
    for metric in Metric::ALL {
        stats.set(metric, row.try_get(metric.column())?);
        let trend: String = row.try_get(metric.trend_column())?;
        stats.set_trend(metric, trend.parse().unwrap_or_default());
    }
    stats.ranking = row.try_get("ranking")?;

    Ok(StudentRecord {
        id: row.try_get("id")?,
        uid: row.try_get("uid")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        stats,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn fetch_roster(pool: &PgPool) -> anyhow::Result<Vec<StudentRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {STUDENT_COLUMNS} FROM school_portal.users WHERE user_type = $1"
    ))
    .bind(UserType::Student.as_str())
    .fetch_all(pool)
    .await
    .context("failed to load roster")?;

    let students = rows
        .iter()
        .map(student_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    debug!(count = students.len(), "roster snapshot loaded");
    Ok(students)
}

pub async fn fetch_student(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<StudentRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {STUDENT_COLUMNS} FROM school_portal.users WHERE id = $1 AND user_type = $2"
    ))
    .bind(id)
    .bind(UserType::Student.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(student_from_row).transpose()?)
}

pub async fn fetch_student_by_email(
    pool: &PgPool,
    email: &str,
) -> anyhow::Result<Option<StudentRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {STUDENT_COLUMNS} FROM school_portal.users WHERE email = $1 AND user_type = $2"
    ))
    .bind(roster::normalize_email(email))
    .bind(UserType::Student.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(student_from_row).transpose()?)
}

async fn write_student(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    student: &ValidatedStudent,
    on_conflict_update: bool,
) -> anyhow::Result<Option<Uuid>> {
    let stats = &student.stats;
    let conflict = if on_conflict_update {
        "ON CONFLICT (email) DO UPDATE SET \
         name = EXCLUDED.name, \
         prova_parana = EXCLUDED.prova_parana, saeb = EXCLUDED.saeb, \
         provas_internas = EXCLUDED.provas_internas, provas_externas = EXCLUDED.provas_externas, \
         frequencia = EXCLUDED.frequencia, plataformas_digitais = EXCLUDED.plataformas_digitais, \
         updated_at = now() \
         WHERE school_portal.users.user_type = 'student'"
    } else {
        "ON CONFLICT (email) DO NOTHING"
    };

    let query = format!(
        "INSERT INTO school_portal.users \
         (id, name, email, user_type, avatar, \
          prova_parana, saeb, provas_internas, provas_externas, frequencia, plataformas_digitais) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         {conflict} \
         RETURNING id"
    );

    let row = sqlx::query(&query)
        .bind(id)
        .bind(&student.name)
        .bind(&student.email)
        .bind(UserType::Student.as_str())
        .bind(avatar_url(&student.name))
        .bind(stats.get(Metric::ProvaParana))
        .bind(stats.get(Metric::Saeb))
        .bind(stats.get(Metric::ProvasInternas))
        .bind(stats.get(Metric::ProvasExternas))
        .bind(stats.get(Metric::Frequencia))
        .bind(stats.get(Metric::PlataformasDigitais))
        .fetch_optional(&mut **tx)
        .await?;

    Ok(row.map(|row| row.get("id")))
}

/// Turn a unique-email violation into the domain error for that address.
fn email_conflict(err: sqlx::Error, email: &str) -> anyhow::Error {
    if err
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation())
    {
        PortalError::EmailTaken(email.to_string()).into()
    } else {
        err.into()
    }
}

fn avatar_url(name: &str) -> String {
    let seed: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    format!("https://api.dicebear.com/7.x/initials/svg?seed={seed}")
}

pub async fn insert_student(pool: &PgPool, student: &ValidatedStudent) -> anyhow::Result<Uuid> {
    let mut tx = pool.begin().await?;
    let id = write_student(&mut tx, Uuid::new_v4(), student, false)
        .await
        .with_context(|| format!("failed to add student {}", student.email))?
        .ok_or_else(|| PortalError::EmailTaken(student.email.clone()))?;
    tx.commit().await?;
    info!(%id, email = %student.email, "student added");
    Ok(id)
}

/// Apply an administrator edit. The row is locked for the duration so a
/// concurrent delete turns this into a not-found instead of a resurrect.
pub async fn update_student(
    pool: &PgPool,
    id: Uuid,
    student: ValidatedStudent,
) -> anyhow::Result<StudentRecord> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(&format!(
        "SELECT {STUDENT_COLUMNS} FROM school_portal.users \
         WHERE id = $1 AND user_type = $2 FOR UPDATE"
    ))
    .bind(id)
    .bind(UserType::Student.as_str())
    .fetch_optional(&mut *tx)
    .await?;

    let existing = match row {
        Some(row) => student_from_row(&row)?,
        None => return Err(PortalError::StudentNotFound(id.to_string()).into()),
    };

    let merged = student.merge_into(&existing);
    let stats = &merged.stats;

    let updated = sqlx::query(
        r#"
        UPDATE school_portal.users
        SET name = $2, email = $3,
            prova_parana = $4, saeb = $5, provas_internas = $6,
            provas_externas = $7, frequencia = $8, plataformas_digitais = $9,
            updated_at = now()
        WHERE id = $1
        RETURNING updated_at
        "#,
    )
    .bind(merged.id)
    .bind(&merged.name)
    .bind(&merged.email)
    .bind(stats.get(Metric::ProvaParana))
    .bind(stats.get(Metric::Saeb))
    .bind(stats.get(Metric::ProvasInternas))
    .bind(stats.get(Metric::ProvasExternas))
    .bind(stats.get(Metric::Frequencia))
    .bind(stats.get(Metric::PlataformasDigitais))
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| email_conflict(err, &merged.email))?;

    tx.commit().await?;
    info!(%id, email = %merged.email, "student updated");

    Ok(StudentRecord {
        updated_at: updated.get("updated_at"),
        ..merged
    })
}

/// Remove a student. Conversations and their messages go with it.
pub async fn delete_student(pool: &PgPool, id: Uuid) -> anyhow::Result<String> {
    let row = sqlx::query(
        "DELETE FROM school_portal.users WHERE id = $1 AND user_type = $2 RETURNING name",
    )
    .bind(id)
    .bind(UserType::Student.as_str())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let name: String = row.get("name");
            info!(%id, %name, "student removed");
            Ok(name)
        }
        None => Err(PortalError::StudentNotFound(id.to_string()).into()),
    }
}

pub struct ImportOutcome {
    pub written: usize,
    pub rejected: Vec<(usize, String)>,
}

pub async fn import_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
    email_domain: &str,
) -> anyhow::Result<ImportOutcome> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let import = roster::parse_roster_csv(file, email_domain)?;

    for (row, reason) in &import.rejected {
        warn!(row, %reason, "skipping roster row");
    }

    let mut tx = pool.begin().await?;
    let mut written = 0usize;
    for student in &import.students {
        match write_student(&mut tx, Uuid::new_v4(), student, true).await? {
            Some(_) => written += 1,
            None => warn!(email = %student.email, "email belongs to a non-student account"),
        }
    }
    tx.commit().await?;

    info!(written, rejected = import.rejected.len(), "roster import finished");
    Ok(ImportOutcome {
        written,
        rejected: import.rejected,
    })
}

/// Recompute positions and store them in the `ranking` cache column.
pub async fn refresh_rankings(pool: &PgPool) -> anyhow::Result<usize> {
    let students = fetch_roster(pool).await?;
    let ranking = scoring::rank_students(&students);

    let mut tx = pool.begin().await?;
    for entry in ranking.iter() {
        sqlx::query("UPDATE school_portal.users SET ranking = $2 WHERE id = $1")
            .bind(entry.student.id)
            .bind(entry.position as i32)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    info!(count = ranking.len(), "ranking cache refreshed");
    Ok(ranking.len())
}

pub async fn fetch_identity_rows(pool: &PgPool) -> anyhow::Result<Vec<IdentityRow>> {
    let rows = sqlx::query(
        "SELECT id, email, uid FROM school_portal.users WHERE user_type = $1 ORDER BY email, id",
    )
    .bind(UserType::Student.as_str())
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| IdentityRow {
            id: row.get("id"),
            email: row.get("email"),
            uid: row.get("uid"),
        })
        .collect())
}

/// Bind login identities to student rows. Every planned row gives up its
/// current uid first, so swaps and stale bindings inside the plan resolve in
/// any order. Fails without writing anything if a uid is held by an account
/// outside the plan.
pub async fn apply_uid_updates(
    pool: &PgPool,
    updates: &[(Uuid, String, String)],
) -> anyhow::Result<usize> {
    let ids = roster::released_ids(updates);
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE school_portal.users SET uid = NULL WHERE id = ANY($1)")
        .bind(&ids)
        .execute(&mut *tx)
        .await?;

    for (id, email, uid) in updates {
        let holder = sqlx::query(
            "SELECT email FROM school_portal.users WHERE uid = $1 AND NOT (id = ANY($2))",
        )
        .bind(uid)
        .bind(&ids)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(holder) = holder {
            return Err(PortalError::UidConflict {
                uid: uid.clone(),
                email: holder.get("email"),
            }
            .into());
        }

        sqlx::query("UPDATE school_portal.users SET uid = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(uid)
            .execute(&mut *tx)
            .await?;
        debug!(%email, %uid, "uid bound");
    }

    tx.commit().await?;
    info!(count = updates.len(), "uid bindings applied");
    Ok(updates.len())
}

pub async fn record_activity(pool: &PgPool, actor_email: &str, action: &str) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO school_portal.activities (actor_email, action) VALUES ($1, $2)")
        .bind(actor_email)
        .bind(action)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn count_news(pool: &PgPool) -> anyhow::Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS total FROM school_portal.news")
        .fetch_one(pool)
        .await?;
    Ok(row.get("total"))
}

pub async fn count_events(pool: &PgPool) -> anyhow::Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS total FROM school_portal.events")
        .fetch_one(pool)
        .await?;
    Ok(row.get("total"))
}

pub async fn insert_news(pool: &PgPool, news: &NewsItem) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO school_portal.news (id, title, summary, author, published_on)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(news.id)
    .bind(&news.title)
    .bind(&news.summary)
    .bind(&news.author)
    .bind(news.published_on)
    .execute(pool)
    .await?;
    info!(id = %news.id, title = %news.title, "news published");
    Ok(())
}

pub async fn insert_event(pool: &PgPool, event: &EventItem) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO school_portal.events (id, title, description, location, event_date)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(event.id)
    .bind(&event.title)
    .bind(&event.description)
    .bind(&event.location)
    .bind(event.event_date)
    .execute(pool)
    .await?;
    info!(id = %event.id, title = %event.title, "event scheduled");
    Ok(())
}

fn conversation_from_row(row: &PgRow) -> Conversation {
    Conversation {
        id: row.get("id"),
        student_id: row.get("student_id"),
        teacher_name: row.get("teacher_name"),
        teacher_subject: row.get("teacher_subject"),
        title: row.get("title"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn message_from_row(row: &PgRow) -> anyhow::Result<Message> {
    let sender: String = row.get("sender_type");
    Ok(Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        sender_type: sender.parse().map_err(anyhow::Error::msg)?,
        message: row.get("message"),
        created_at: row.get("created_at"),
    })
}

async fn insert_message(
    tx: &mut Transaction<'_, Postgres>,
    conversation_id: Uuid,
    sender: SenderType,
    text: &str,
) -> anyhow::Result<Message> {
    let row = sqlx::query(
        r#"
        INSERT INTO school_portal.chat_messages (conversation_id, sender_type, message)
        VALUES ($1, $2, $3)
        RETURNING id, conversation_id, sender_type, message, created_at
        "#,
    )
    .bind(conversation_id)
    .bind(sender.as_str())
    .bind(text)
    .fetch_one(&mut **tx)
    .await?;
    debug!(%conversation_id, sender = %sender, "chat message stored");
    message_from_row(&row)
}

/// Open a conversation with a teacher. The greeting is stored as the first
/// message.
pub async fn create_conversation(
    pool: &PgPool,
    student_id: Uuid,
    teacher: &Teacher,
) -> anyhow::Result<Conversation> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        r#"
        INSERT INTO school_portal.chat_conversations
        (id, student_id, teacher_name, teacher_subject, title)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, student_id, teacher_name, teacher_subject, title, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(teacher.name)
    .bind(teacher.subject)
    .bind(chat::conversation_title(teacher))
    .fetch_one(&mut *tx)
    .await?;
    let conversation = conversation_from_row(&row);

    insert_message(&mut tx, conversation.id, SenderType::Teacher, teacher.greeting).await?;
    tx.commit().await?;

    info!(id = %conversation.id, teacher = teacher.name, "conversation started");
    Ok(conversation)
}

pub async fn fetch_conversations(
    pool: &PgPool,
    student_id: Uuid,
) -> anyhow::Result<Vec<Conversation>> {
    let rows = sqlx::query(
        r#"
        SELECT id, student_id, teacher_name, teacher_subject, title, created_at, updated_at
        FROM school_portal.chat_conversations
        WHERE student_id = $1
        ORDER BY updated_at DESC
        "#,
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(conversation_from_row).collect())
}

/// Store a student message and the teacher's reply right behind it.
///
/// The conversation row is locked first, so two sends on the same
/// conversation cannot interleave their message pairs.
pub async fn send_message(
    pool: &PgPool,
    conversation_id: Uuid,
    text: &str,
) -> anyhow::Result<(Message, Message)> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        "SELECT teacher_name FROM school_portal.chat_conversations WHERE id = $1 FOR UPDATE",
    )
    .bind(conversation_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(PortalError::ConversationNotFound(conversation_id))?;
    let teacher_name: String = row.get("teacher_name");
    let teacher = chat::find_teacher(&teacher_name)
        .ok_or_else(|| PortalError::UnknownTeacher(teacher_name.clone()))?;

    let turn: i64 = sqlx::query(
        "SELECT COUNT(*) AS turns FROM school_portal.chat_messages \
         WHERE conversation_id = $1 AND sender_type = $2",
    )
    .bind(conversation_id)
    .bind(SenderType::Student.as_str())
    .fetch_one(&mut *tx)
    .await?
    .get("turns");

    let question = insert_message(&mut tx, conversation_id, SenderType::Student, text).await?;
    let reply_text = chat::teacher_reply(teacher, text, turn as usize);
    let reply = insert_message(&mut tx, conversation_id, SenderType::Teacher, &reply_text).await?;

    sqlx::query("UPDATE school_portal.chat_conversations SET updated_at = now() WHERE id = $1")
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    debug!(%conversation_id, turn, "message exchanged");
    Ok((question, reply))
}

pub async fn fetch_messages(pool: &PgPool, conversation_id: Uuid) -> anyhow::Result<Vec<Message>> {
    let rows = sqlx::query(
        r#"
        SELECT id, conversation_id, sender_type, message, created_at
        FROM school_portal.chat_messages
        WHERE conversation_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(conversation_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(message_from_row).collect()
}

/// Delete a conversation and, through the foreign key, all of its messages.
pub async fn delete_conversation(pool: &PgPool, conversation_id: Uuid) -> anyhow::Result<u64> {
    let mut tx = pool.begin().await?;

    let messages = sqlx::query(
        "SELECT COUNT(*) AS total FROM school_portal.chat_messages WHERE conversation_id = $1",
    )
    .bind(conversation_id)
    .fetch_one(&mut *tx)
    .await?
    .get::<i64, _>("total");

    let result = sqlx::query("DELETE FROM school_portal.chat_conversations WHERE id = $1")
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(PortalError::ConversationNotFound(conversation_id).into());
    }

    tx.commit().await?;
    info!(%conversation_id, messages, "conversation deleted");
    Ok(messages as u64)
}

pub async fn seed(pool: &PgPool, email_domain: &str) -> anyhow::Result<()> {
    let students = [
        ("Ana Mirandola", "ana.mirandola", [92.0, 88.0, 95.0, 90.0, 97.0, 85.0]),
        ("Lucas Pigentini Ventura", "lucas.pigentini.ventura", [78.0, 82.0, 74.0, 80.0, 94.0, 69.0]),
        ("Nicole Cassiolato", "nicole.cassiolato", [65.0, 60.0, 71.0, 58.0, 90.0, 62.0]),
        ("Murilo Bispo Rosa", "murilo.bispo.rosa", [50.0, 55.0, 48.0, 52.0, 76.0, 40.0]),
    ];

    let mut tx = pool.begin().await?;
    for (name, local, scores) in students {
        let mut stats = StudentStats::default();
        for (metric, value) in Metric::ALL.into_iter().zip(scores) {
            stats.set(metric, Some(value));
        }
        let student = ValidatedStudent {
            name: name.to_string(),
            email: format!("{local}@{email_domain}"),
            stats,
        };
        write_student(&mut tx, Uuid::new_v4(), &student, true).await?;
    }

    sqlx::query(
        r#"
        INSERT INTO school_portal.news (id, title, summary, author, published_on)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(Uuid::parse_str("5b0c4f3e-8a51-4b8e-9c1e-2f6f7f0f1a01")?)
    .bind("Resultado da Prova Paraná")
    .bind("Os resultados da última edição já estão disponíveis no portal.")
    .bind("Pedagogo José")
    .bind(NaiveDate::from_ymd_opt(2026, 3, 2).context("invalid date")?)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO school_portal.events (id, title, description, location, event_date)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(Uuid::parse_str("9e7d2a10-3c4b-4f5e-8d6a-7b8c9d0e1f02")?)
    .bind("Feira de Ciências")
    .bind("Apresentação dos projetos do 9º ano.")
    .bind("Quadra da escola")
    .bind(NaiveDate::from_ymd_opt(2026, 4, 18).context("invalid date")?)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    use sqlx::error::{DatabaseError, ErrorKind};

    use super::*;

    #[derive(Debug)]
    struct FakeDbError(ErrorKind);

    impl fmt::Display for FakeDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("duplicate key value violates unique constraint \"users_email_key\"")
        }
    }

    impl StdError for FakeDbError {}

    impl DatabaseError for FakeDbError {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint \"users_email_key\""
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed("23505"))
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            match self.0 {
                ErrorKind::UniqueViolation => ErrorKind::UniqueViolation,
                _ => ErrorKind::Other,
            }
        }
    }

    #[test]
    fn duplicate_email_becomes_email_taken() {
        let err = sqlx::Error::Database(Box::new(FakeDbError(ErrorKind::UniqueViolation)));
        let mapped = email_conflict(err, "ana@escola.pr.gov.br");
        assert!(matches!(
            mapped.downcast_ref::<PortalError>(),
            Some(PortalError::EmailTaken(email)) if email == "ana@escola.pr.gov.br"
        ));
    }

    #[test]
    fn other_database_errors_pass_through() {
        let err = sqlx::Error::Database(Box::new(FakeDbError(ErrorKind::Other)));
        let mapped = email_conflict(err, "ana@escola.pr.gov.br");
        assert!(mapped.downcast_ref::<PortalError>().is_none());

        let mapped = email_conflict(sqlx::Error::RowNotFound, "ana@escola.pr.gov.br");
        assert!(mapped.downcast_ref::<sqlx::Error>().is_some());
    }
}
