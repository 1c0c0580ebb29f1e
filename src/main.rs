use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{ArgGroup, Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod chat;
mod collation;
mod config;
mod db;
mod error;
mod models;
mod report;
mod roster;
mod scoring;

use config::Config;
use error::PortalError;
use models::{EventItem, Metric, NewsItem, SenderType, StudentRecord};
use roster::{SortKey, StudentInput};

#[derive(Parser)]
#[command(name = "school-portal")]
#[command(about = "Roster, ranking and report tool for the 9th grade school portal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ScoreArgs {
    #[arg(long)]
    prova_parana: Option<String>,
    #[arg(long)]
    saeb: Option<String>,
    #[arg(long)]
    provas_internas: Option<String>,
    #[arg(long)]
    provas_externas: Option<String>,
    #[arg(long)]
    frequencia: Option<String>,
    #[arg(long)]
    plataformas_digitais: Option<String>,
}

impl ScoreArgs {
    /// Overwrite only the fields given on the command line.
    fn apply(self, input: &mut StudentInput) {
        let given = [
            (Metric::ProvaParana, self.prova_parana),
            (Metric::Saeb, self.saeb),
            (Metric::ProvasInternas, self.provas_internas),
            (Metric::ProvasExternas, self.provas_externas),
            (Metric::Frequencia, self.frequencia),
            (Metric::PlataformasDigitais, self.plataformas_digitais),
        ];
        for (metric, value) in given {
            if value.is_some() {
                input.set_raw(metric, value);
            }
        }
    }
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("who")
        .args(["id", "email"])
        .required(true)
        .multiple(false)
))]
struct StudentSelector {
    #[arg(long)]
    id: Option<Uuid>,
    #[arg(long)]
    email: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample students, news and events
    Seed,
    /// Import or update students from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Add a new student
    AddStudent {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[command(flatten)]
        scores: ScoreArgs,
    },
    /// Edit a student; fields not given keep their stored value
    UpdateStudent {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[command(flatten)]
        scores: ScoreArgs,
    },
    /// Remove a student and their conversations
    DeleteStudent {
        #[arg(long)]
        id: Uuid,
    },
    /// List the roster, optionally filtered and sorted by any column
    ListStudents {
        /// Case-insensitive match on name or email
        #[arg(long)]
        search: Option<String>,
        /// name, email or a score column such as saeb
        #[arg(long, default_value = "name")]
        sort: SortKey,
        #[arg(long)]
        desc: bool,
    },
    /// Print the class ranking
    Rank {
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Print cohort statistics
    Summary {
        #[arg(long)]
        json: bool,
    },
    /// Write the cohort report as markdown
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Show one student's report
    Student {
        #[command(flatten)]
        selector: StudentSelector,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Store current positions in the ranking cache
    RefreshRankings,
    /// Bind login uids to student records from an email,uid CSV
    ReconcileUids {
        #[arg(long)]
        map: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
    /// Publish a news item
    PostNews {
        #[arg(long)]
        title: String,
        #[arg(long)]
        summary: String,
        #[arg(long)]
        author: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Schedule an event
    AddEvent {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        location: String,
        #[arg(long)]
        date: NaiveDate,
    },
    /// List the teachers available in the chat
    Teachers,
    /// Start a conversation between a student and a teacher
    ChatStart {
        #[arg(long)]
        student_email: String,
        #[arg(long)]
        teacher: String,
    },
    /// List a student's conversations
    ChatList {
        #[arg(long)]
        student_email: String,
    },
    /// Send a message and store the teacher's reply
    ChatSend {
        #[arg(long)]
        conversation: Uuid,
        #[arg(long)]
        message: String,
    },
    /// Print a conversation
    ChatShow {
        #[arg(long)]
        conversation: Uuid,
    },
    /// Delete a conversation and all of its messages
    ChatDelete {
        #[arg(long)]
        conversation: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Teachers = cli.command {
        for teacher in chat::TEACHERS {
            println!("- {} ({})", teacher.name, teacher.subject);
        }
        return Ok(());
    }

    let config = Config::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    run(cli.command, &config, &pool).await
}

async fn run(command: Commands, config: &Config, pool: &PgPool) -> anyhow::Result<()> {
    match command {
        Commands::InitDb => {
            db::init_db(pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(pool, &config.email_domain).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let outcome = db::import_csv(pool, &csv, &config.email_domain).await?;
            println!(
                "Wrote {} students from {} ({} rows rejected).",
                outcome.written,
                csv.display(),
                outcome.rejected.len()
            );
            for (row, reason) in &outcome.rejected {
                println!("- row {row}: {reason}");
            }
            log_activity(pool, config, &format!("importou {} alunos", outcome.written)).await;
        }
        Commands::AddStudent {
            name,
            email,
            scores,
        } => {
            let mut input = StudentInput {
                name,
                email,
                ..StudentInput::default()
            };
            scores.apply(&mut input);
            let student = roster::validate_student(&input, &config.email_domain)
                .map_err(PortalError::from)?;
            let id = db::insert_student(pool, &student).await?;
            println!("Added {} ({id}).", student.name);
            log_activity(pool, config, &format!("adicionou o novo aluno {}", student.name)).await;
        }
        Commands::UpdateStudent {
            id,
            name,
            email,
            scores,
        } => {
            let existing = db::fetch_student(pool, id)
                .await?
                .ok_or_else(|| PortalError::StudentNotFound(id.to_string()))?;
            let mut input = StudentInput::from_record(&existing);
            if let Some(name) = name {
                input.name = name;
            }
            if let Some(email) = email {
                input.email = email;
            }
            scores.apply(&mut input);

            let student = roster::validate_student(&input, &config.email_domain)
                .map_err(PortalError::from)?;
            let updated = db::update_student(pool, id, student).await?;
            println!("Updated {}.", updated.name);
            log_activity(
                pool,
                config,
                &format!("atualizou os dados do aluno {}", updated.name),
            )
            .await;
        }
        Commands::DeleteStudent { id } => {
            let name = db::delete_student(pool, id).await?;
            println!("Removed {name}.");
            log_activity(pool, config, &format!("removeu o aluno {name}")).await;
        }
        Commands::ListStudents { search, sort, desc } => {
            let students = db::fetch_roster(pool).await?;
            let listing = roster::list_students(&students, search.as_deref(), sort, desc);
            if listing.is_empty() {
                println!("No students match.");
                return Ok(());
            }

            for student in listing {
                let scores: Vec<String> = Metric::ALL
                    .into_iter()
                    .map(|metric| match student.stats.get(metric) {
                        Some(value) => format!("{}={value}", metric.column()),
                        None => format!("{}=-", metric.column()),
                    })
                    .collect();
                println!(
                    "- {} <{}> average {}% [{}]",
                    student.name,
                    student.email,
                    scoring::compute_average(&student.stats).rounded,
                    scores.join(" ")
                );
            }
        }
        Commands::Rank { limit, json } => {
            let students = db::fetch_roster(pool).await?;
            let ranking = scoring::rank_students(&students);
            let rows = report::ranking_rows(&ranking);
            let shown = limit.unwrap_or(rows.len());

            if json {
                let rows: Vec<_> = rows.into_iter().take(shown).collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }

            if ranking.is_empty() {
                println!("No students on the roster.");
                return Ok(());
            }

            println!("Class ranking:");
            for row in rows.iter().take(shown) {
                println!(
                    "{:>3}. {} {}% ({})",
                    row.position,
                    row.name,
                    row.average_score,
                    row.band.label()
                );
            }
        }
        Commands::Summary { json } => {
            let students = db::fetch_roster(pool).await?;
            let summary = scoring::cohort_summary(&students);

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }

            println!("Students: {}", summary.count);
            println!("Class average: {}%", summary.class_average);
            println!("Attendance average: {}%", summary.attendance_average);
            match &summary.top_performer {
                Some(top) => println!("Top performer: {} ({}%)", top.name, top.average_score),
                None => println!("Top performer: N/A"),
            }
            println!("Bands:");
            for (band, count) in &summary.band_counts {
                println!("- {}: {count}", band.label());
            }
            println!("Subject averages:");
            for (metric, average) in &summary.subject_averages {
                println!("- {}: {average}%", metric.label());
            }
        }
        Commands::Report { out } => {
            let students = db::fetch_roster(pool).await?;
            let news_count = db::count_news(pool).await?;
            let event_count = db::count_events(pool).await?;
            let ranking = scoring::rank_students(&students);
            let summary = scoring::cohort_summary(&students);

            let output = report::build_report(&report::CohortReport {
                summary: &summary,
                ranking: &ranking,
                news_count,
                event_count,
                generated_on: Utc::now().date_naive(),
            });
            std::fs::write(&out, output)
                .with_context(|| format!("failed to write {}", out.display()))?;
            info!(path = %out.display(), students = summary.count, "cohort report written");
            println!("Report written to {}.", out.display());
        }
        Commands::Student {
            selector,
            out,
            json,
        } => {
            let student = find_student(pool, &selector).await?;
            let students = db::fetch_roster(pool).await?;
            let ranking = scoring::rank_students(&students);

            if json {
                let average = scoring::compute_average(&student.stats);
                let position = ranking
                    .position_of(student.id)
                    .map(|entry| entry.position)
                    .unwrap_or(0);
                let payload = serde_json::json!({
                    "student": &student,
                    "averageScore": average,
                    "band": scoring::classify_band(average.rounded),
                    "position": position,
                    "standing": scoring::standing_for(position, ranking.len()),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
                return Ok(());
            }

            let output =
                report::build_student_report(&student, &ranking, Utc::now().date_naive());
            match out {
                Some(path) => {
                    std::fs::write(&path, output)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Report written to {}.", path.display());
                }
                None => print!("{output}"),
            }
        }
        Commands::RefreshRankings => {
            let count = db::refresh_rankings(pool).await?;
            println!("Ranking cache updated for {count} students.");
        }
        Commands::ReconcileUids { map, dry_run } => {
            let file = std::fs::File::open(&map)
                .with_context(|| format!("failed to open {}", map.display()))?;
            let mapping = roster::parse_uid_map(file)?;
            let rows = db::fetch_identity_rows(pool).await?;
            let plan = roster::plan_uid_updates(&rows, &mapping);

            for (_, email, uid) in &plan.updates {
                println!("- {email}: bind uid {uid}");
            }
            for email in &plan.not_in_map {
                warn!(%email, "email not present in uid map");
            }
            for id in &plan.missing_email {
                warn!(%id, "student record has no email");
            }
            for (uid, emails) in &plan.conflicts {
                warn!(%uid, emails = %emails.join(", "), "uid mapped to several emails, skipped");
            }
            for (email, uids) in &plan.email_conflicts {
                warn!(%email, uids = %uids.join(", "), "email mapped to several uids, skipped");
            }

            let applied = if dry_run {
                0
            } else {
                db::apply_uid_updates(pool, &plan.updates).await?
            };

            println!("Updated: {applied}");
            println!("Already correct: {}", plan.already_correct.len());
            println!("Not in map: {}", plan.not_in_map.len());
            println!("Missing email: {}", plan.missing_email.len());
            println!("Conflicting uids: {}", plan.conflicts.len());
            println!("Conflicting emails: {}", plan.email_conflicts.len());
            println!("Total students: {}", rows.len());
        }
        Commands::PostNews {
            title,
            summary,
            author,
            date,
        } => {
            let news = NewsItem {
                id: Uuid::new_v4(),
                title,
                summary,
                author,
                published_on: date.unwrap_or_else(|| Utc::now().date_naive()),
            };
            db::insert_news(pool, &news).await?;
            println!("Published \"{}\".", news.title);
            log_activity(pool, config, &format!("publicou a notícia {}", news.title)).await;
        }
        Commands::AddEvent {
            title,
            description,
            location,
            date,
        } => {
            let event = EventItem {
                id: Uuid::new_v4(),
                title,
                description,
                location,
                event_date: date,
            };
            db::insert_event(pool, &event).await?;
            println!("Scheduled \"{}\" on {}.", event.title, event.event_date);
            log_activity(pool, config, &format!("criou o evento {}", event.title)).await;
        }
        Commands::Teachers => {}
        Commands::ChatStart {
            student_email,
            teacher,
        } => {
            let student = db::fetch_student_by_email(pool, &student_email)
                .await?
                .ok_or_else(|| PortalError::StudentNotFound(student_email.clone()))?;
            let teacher = chat::find_teacher(&teacher)
                .ok_or_else(|| PortalError::UnknownTeacher(teacher.clone()))?;
            let conversation = db::create_conversation(pool, student.id, teacher).await?;
            println!("{} ({})", conversation.title, conversation.id);
            println!("{}: {}", teacher.name, teacher.greeting);
        }
        Commands::ChatList { student_email } => {
            let student = db::fetch_student_by_email(pool, &student_email)
                .await?
                .ok_or_else(|| PortalError::StudentNotFound(student_email.clone()))?;
            let conversations = db::fetch_conversations(pool, student.id).await?;
            if conversations.is_empty() {
                println!("No conversations yet.");
            }
            for conversation in conversations {
                println!(
                    "- {} [{}] updated {}",
                    conversation.title,
                    conversation.id,
                    conversation.updated_at.format("%d/%m/%Y %H:%M")
                );
            }
        }
        Commands::ChatSend {
            conversation,
            message,
        } => {
            let text = message.trim();
            if text.is_empty() {
                return Err(PortalError::from(error::ValidationError::Empty("message")).into());
            }
            let (_, reply) = db::send_message(pool, conversation, text).await?;
            println!("{}", reply.message);
        }
        Commands::ChatShow { conversation } => {
            let messages = db::fetch_messages(pool, conversation).await?;
            if messages.is_empty() {
                return Err(PortalError::ConversationNotFound(conversation).into());
            }
            for message in messages {
                let who = match message.sender_type {
                    SenderType::Student => "aluno",
                    SenderType::Teacher => "professor",
                };
                println!(
                    "[{}] {}: {}",
                    message.created_at.format("%H:%M"),
                    who,
                    message.message
                );
            }
        }
        Commands::ChatDelete { conversation } => {
            let removed = db::delete_conversation(pool, conversation).await?;
            println!("Conversation deleted with {removed} messages.");
        }
    }

    Ok(())
}

async fn find_student(pool: &PgPool, selector: &StudentSelector) -> anyhow::Result<StudentRecord> {
    let found = match (&selector.id, &selector.email) {
        (Some(id), _) => db::fetch_student(pool, *id).await?,
        (None, Some(email)) => db::fetch_student_by_email(pool, email).await?,
        (None, None) => None,
    };

    let key = selector
        .id
        .map(|id| id.to_string())
        .or_else(|| selector.email.clone())
        .unwrap_or_default();
    found.ok_or_else(|| PortalError::StudentNotFound(key).into())
}

/// Record an administrator action when an actor is configured. A failed log
/// write never undoes the action it describes.
async fn log_activity(pool: &PgPool, config: &Config, action: &str) {
    let Some(actor) = config.actor_email.as_deref() else {
        return;
    };
    if let Err(err) = db::record_activity(pool, actor, action).await {
        warn!(error = %err, %action, "failed to record activity");
    }
}
