use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::str::FromStr;

use serde::Deserialize;
use uuid::Uuid;

use crate::collation::compare_names;
use crate::error::ValidationError;
use crate::models::{Metric, StudentRecord, StudentStats};

/// Student data as typed by an administrator or read from a CSV row,
/// before boundary checks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StudentInput {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub prova_parana: Option<String>,
    #[serde(default)]
    pub saeb: Option<String>,
    #[serde(default)]
    pub provas_internas: Option<String>,
    #[serde(default)]
    pub provas_externas: Option<String>,
    #[serde(default)]
    pub frequencia: Option<String>,
    #[serde(default)]
    pub plataformas_digitais: Option<String>,
}

impl StudentInput {
    /// Pre-fill an edit with what is currently stored.
    pub fn from_record(record: &StudentRecord) -> Self {
        let mut input = Self {
            name: record.name.clone(),
            email: record.email.clone(),
            ..Self::default()
        };
        for metric in Metric::ALL {
            input.set_raw(metric, record.stats.get(metric).map(|value| value.to_string()));
        }
        input
    }

    pub fn set_raw(&mut self, metric: Metric, value: Option<String>) {
        let slot = match metric {
            Metric::ProvaParana => &mut self.prova_parana,
            Metric::Saeb => &mut self.saeb,
            Metric::ProvasInternas => &mut self.provas_internas,
            Metric::ProvasExternas => &mut self.provas_externas,
            Metric::Frequencia => &mut self.frequencia,
            Metric::PlataformasDigitais => &mut self.plataformas_digitais,
        };
        *slot = value;
    }

    fn raw(&self, metric: Metric) -> Option<&str> {
        let value = match metric {
            Metric::ProvaParana => &self.prova_parana,
            Metric::Saeb => &self.saeb,
            Metric::ProvasInternas => &self.provas_internas,
            Metric::ProvasExternas => &self.provas_externas,
            Metric::Frequencia => &self.frequencia,
            Metric::PlataformasDigitais => &self.plataformas_digitais,
        };
        value.as_deref()
    }
}

/// A student that passed boundary validation and may be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedStudent {
    pub name: String,
    pub email: String,
    pub stats: StudentStats,
}

impl ValidatedStudent {
    /// Apply this edit on top of the persisted record. Identity, trend tags,
    /// the ranking cache and creation time stay with the stored row.
    pub fn merge_into(self, existing: &StudentRecord) -> StudentRecord {
        let mut stats = self.stats;
        stats.trends = existing.stats.trends;
        stats.ranking = existing.stats.ranking;

        StudentRecord {
            id: existing.id,
            uid: existing.uid.clone(),
            name: self.name,
            email: self.email,
            stats,
            created_at: existing.created_at,
            updated_at: existing.updated_at,
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_email(email: &str, domain: &str) -> Result<String, ValidationError> {
    let email = normalize_email(email);
    if email.is_empty() {
        return Err(ValidationError::Empty("email"));
    }

    let suffix = format!("@{}", domain.trim_start_matches('@').to_lowercase());
    let local = email.strip_suffix(&suffix).unwrap_or_default();
    if local.is_empty() || local.contains('@') {
        return Err(ValidationError::EmailDomain {
            email,
            domain: suffix[1..].to_string(),
        });
    }

    Ok(email)
}

/// Parse one score field. Blank means "no data"; anything numeric is
/// clamped to [0, 100].
pub fn parse_score(field: &'static str, raw: &str) -> Result<Option<f64>, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let value: f64 = raw
        .replace(',', ".")
        .parse()
        .map_err(|_| ValidationError::InvalidScore {
            field,
            value: raw.to_string(),
        })?;

    if !value.is_finite() {
        return Err(ValidationError::InvalidScore {
            field,
            value: raw.to_string(),
        });
    }

    Ok(Some(value.clamp(0.0, 100.0)))
}

pub fn validate_student(
    input: &StudentInput,
    domain: &str,
) -> Result<ValidatedStudent, ValidationError> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(ValidationError::Empty("name"));
    }

    let email = validate_email(&input.email, domain)?;

    let mut stats = StudentStats::default();
    for metric in Metric::ALL {
        if let Some(raw) = input.raw(metric) {
            stats.set(metric, parse_score(metric.column(), raw)?);
        }
    }

    Ok(ValidatedStudent {
        name: name.to_string(),
        email,
        stats,
    })
}

/// Column the administrator roster listing is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Name,
    Email,
    Metric(Metric),
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "name" => Ok(SortKey::Name),
            "email" => Ok(SortKey::Email),
            other => Metric::ALL
                .into_iter()
                .find(|metric| metric.column() == other)
                .map(SortKey::Metric)
                .ok_or_else(|| {
                    format!("unknown sort key '{value}', expected name, email or a score column")
                }),
        }
    }
}

/// Case-insensitive match on name or email. A blank term matches everyone.
pub fn matches_search(student: &StudentRecord, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    term.is_empty()
        || student.name.to_lowercase().contains(&term)
        || student.email.to_lowercase().contains(&term)
}

fn compare_scores(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Roster as the administrator sees it: filtered by `search`, ordered by
/// `key`. Ties fall back to name, then id, always ascending.
pub fn list_students<'a>(
    students: &'a [StudentRecord],
    search: Option<&str>,
    key: SortKey,
    descending: bool,
) -> Vec<&'a StudentRecord> {
    let mut listed: Vec<&StudentRecord> = students
        .iter()
        .filter(|student| search.map_or(true, |term| matches_search(student, term)))
        .collect();

    listed.sort_by(|a, b| {
        let primary = match key {
            SortKey::Name => compare_names(&a.name, &b.name),
            SortKey::Email => a.email.cmp(&b.email),
            SortKey::Metric(metric) => compare_scores(a.stats.get(metric), b.stats.get(metric)),
        };
        let primary = if descending { primary.reverse() } else { primary };
        primary
            .then_with(|| compare_names(&a.name, &b.name))
            .then_with(|| a.id.cmp(&b.id))
    });

    listed
}

#[derive(Debug, Default)]
pub struct RosterImport {
    pub students: Vec<ValidatedStudent>,
    /// 1-based data row number and the reason it was skipped.
    pub rejected: Vec<(usize, String)>,
}

/// Parse a roster CSV with a header row. Rows that fail validation are
/// collected in `rejected` instead of aborting the import.
pub fn parse_roster_csv<R: Read>(reader: R, domain: &str) -> anyhow::Result<RosterImport> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut import = RosterImport::default();

    for (index, result) in csv_reader.deserialize::<StudentInput>().enumerate() {
        let row_number = index + 1;
        let row = match result {
            Ok(row) => row,
            Err(err) => {
                import.rejected.push((row_number, err.to_string()));
                continue;
            }
        };

        match validate_student(&row, domain) {
            Ok(student) => import.students.push(student),
            Err(err) => import.rejected.push((row_number, err.to_string())),
        }
    }

    Ok(import)
}

/// Read an `email,uid` mapping file.
pub fn parse_uid_map<R: Read>(reader: R) -> anyhow::Result<Vec<(String, String)>> {
    #[derive(Deserialize)]
    struct Row {
        email: String,
        uid: String,
    }

    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut pairs = Vec::new();
    for result in csv_reader.deserialize::<Row>() {
        let row = result?;
        if row.uid.is_empty() {
            continue;
        }
        pairs.push((normalize_email(&row.email), row.uid));
    }
    Ok(pairs)
}

/// Stored identity columns of one student row.
#[derive(Debug, Clone)]
pub struct IdentityRow {
    pub id: Uuid,
    pub email: Option<String>,
    pub uid: Option<String>,
}

#[derive(Debug, Default, PartialEq)]
pub struct UidPlan {
    /// Record id, email, new uid.
    pub updates: Vec<(Uuid, String, String)>,
    pub already_correct: Vec<String>,
    pub not_in_map: Vec<String>,
    pub missing_email: Vec<Uuid>,
    /// Uids the map assigns to more than one email; never applied.
    pub conflicts: BTreeMap<String, Vec<String>>,
    /// Emails the map binds to more than one uid; never applied.
    pub email_conflicts: BTreeMap<String, Vec<String>>,
}

/// Rows whose uid is cleared before a plan is applied, so uids can move
/// between planned rows in any order.
pub fn released_ids(updates: &[(Uuid, String, String)]) -> Vec<Uuid> {
    updates.iter().map(|(id, _, _)| *id).collect()
}

/// Work out which student rows need their login identity rebound.
pub fn plan_uid_updates(rows: &[IdentityRow], mapping: &[(String, String)]) -> UidPlan {
    let mut plan = UidPlan::default();

    let mut emails_by_uid: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (email, uid) in mapping {
        let emails = emails_by_uid.entry(uid.as_str()).or_default();
        if !emails.contains(&email.as_str()) {
            emails.push(email.as_str());
        }
    }
    for (uid, emails) in &emails_by_uid {
        if emails.len() > 1 {
            plan.conflicts.insert(
                uid.to_string(),
                emails.iter().map(|email| email.to_string()).collect(),
            );
        }
    }

    let mut uids_by_email: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (email, uid) in mapping {
        let uids = uids_by_email.entry(email.as_str()).or_default();
        if !uids.contains(&uid.as_str()) {
            uids.push(uid.as_str());
        }
    }
    for (email, uids) in &uids_by_email {
        if uids.len() > 1 {
            plan.email_conflicts.insert(
                email.to_string(),
                uids.iter().map(|uid| uid.to_string()).collect(),
            );
        }
    }

    let uid_by_email: HashMap<&str, &str> = uids_by_email
        .iter()
        .filter(|(_, uids)| uids.len() == 1)
        .map(|(email, uids)| (*email, uids[0]))
        .collect();

    for row in rows {
        let Some(email) = row.email.as_deref().map(normalize_email).filter(|e| !e.is_empty())
        else {
            plan.missing_email.push(row.id);
            continue;
        };

        if plan.email_conflicts.contains_key(&email) {
            continue;
        }

        let Some(uid) = uid_by_email.get(email.as_str()) else {
            plan.not_in_map.push(email);
            continue;
        };

        if plan.conflicts.contains_key(*uid) {
            continue;
        }

        if row.uid.as_deref() == Some(*uid) {
            plan.already_correct.push(email);
        } else {
            plan.updates.push((row.id, email, uid.to_string()));
        }
    }

    plan
}
