use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One of the six scored fields carried on every student record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    ProvaParana,
    Saeb,
    ProvasInternas,
    ProvasExternas,
    Frequencia,
    PlataformasDigitais,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::ProvaParana,
        Metric::Saeb,
        Metric::ProvasInternas,
        Metric::ProvasExternas,
        Metric::Frequencia,
        Metric::PlataformasDigitais,
    ];

    /// Fields that make up the academic average. Attendance is reported on its own.
    pub const ACADEMIC: [Metric; 5] = [
        Metric::ProvaParana,
        Metric::Saeb,
        Metric::ProvasInternas,
        Metric::ProvasExternas,
        Metric::PlataformasDigitais,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Metric::ProvaParana => "Prova Paraná",
            Metric::Saeb => "Prova Acerta Brasil",
            Metric::ProvasInternas => "Rec.Ap.Português",
            Metric::ProvasExternas => "Rec.Ap.Matemática",
            Metric::Frequencia => "Frequência",
            Metric::PlataformasDigitais => "Plataformas Digitais",
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Metric::ProvaParana => "prova_parana",
            Metric::Saeb => "saeb",
            Metric::ProvasInternas => "provas_internas",
            Metric::ProvasExternas => "provas_externas",
            Metric::Frequencia => "frequencia",
            Metric::PlataformasDigitais => "plataformas_digitais",
        }
    }

    pub fn trend_column(self) -> &'static str {
        match self {
            Metric::ProvaParana => "prova_parana_trend",
            Metric::Saeb => "saeb_trend",
            Metric::ProvasInternas => "provas_internas_trend",
            Metric::ProvasExternas => "provas_externas_trend",
            Metric::Frequencia => "frequencia_trend",
            Metric::PlataformasDigitais => "plataformas_digitais_trend",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    #[default]
    Stable,
}

impl Trend {
    pub fn arrow(self) -> &'static str {
        match self {
            Trend::Up => "↑",
            Trend::Down => "↓",
            Trend::Stable => "→",
        }
    }
}

impl FromStr for Trend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Trend::Up),
            "down" => Ok(Trend::Down),
            "stable" | "" => Ok(Trend::Stable),
            other => Err(format!("unknown trend '{other}'")),
        }
    }
}

/// Raw metric values as stored. Absent values stay `None`; the scoring
/// engine decides how to treat them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStats {
    pub prova_parana: Option<f64>,
    pub saeb: Option<f64>,
    pub provas_internas: Option<f64>,
    pub provas_externas: Option<f64>,
    pub frequencia: Option<f64>,
    pub plataformas_digitais: Option<f64>,
    pub trends: MetricTrends,
    pub ranking: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricTrends {
    pub prova_parana: Trend,
    pub saeb: Trend,
    pub provas_internas: Trend,
    pub provas_externas: Trend,
    pub frequencia: Trend,
    pub plataformas_digitais: Trend,
}

impl StudentStats {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::ProvaParana => self.prova_parana,
            Metric::Saeb => self.saeb,
            Metric::ProvasInternas => self.provas_internas,
            Metric::ProvasExternas => self.provas_externas,
            Metric::Frequencia => self.frequencia,
            Metric::PlataformasDigitais => self.plataformas_digitais,
        }
    }

    pub fn set(&mut self, metric: Metric, value: Option<f64>) {
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

    #[cfg(test)]
    pub fn with(mut self, metric: Metric, value: f64) -> Self {
        self.set(metric, Some(value));
        self
    }

    pub fn trend(&self, metric: Metric) -> Trend {
        self.trends.get(metric)
    }

    pub fn set_trend(&mut self, metric: Metric, trend: Trend) {
        self.trends.set(metric, trend);
    }
}

impl MetricTrends {
    pub fn get(&self, metric: Metric) -> Trend {
        match metric {
            Metric::ProvaParana => self.prova_parana,
            Metric::Saeb => self.saeb,
            Metric::ProvasInternas => self.provas_internas,
            Metric::ProvasExternas => self.provas_externas,
            Metric::Frequencia => self.frequencia,
            Metric::PlataformasDigitais => self.plataformas_digitais,
        }
    }

    pub fn set(&mut self, metric: Metric, trend: Trend) {
        let slot = match metric {
            Metric::ProvaParana => &mut self.prova_parana,
            Metric::Saeb => &mut self.saeb,
            Metric::ProvasInternas => &mut self.provas_internas,
            Metric::ProvasExternas => &mut self.provas_externas,
            Metric::Frequencia => &mut self.frequencia,
            Metric::PlataformasDigitais => &mut self.plataformas_digitais,
        };
        *slot = trend;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Student,
    Admin,
}

impl UserType {
    pub fn as_str(self) -> &'static str {
        match self {
            UserType::Student => "student",
            UserType::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentRecord {
    pub id: Uuid,
    pub uid: Option<String>,
    pub name: String,
    pub email: String,
    pub stats: StudentStats,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StudentRecord {
    #[cfg(test)]
    pub fn new(name: &str, stats: StudentStats) -> Self {
        Self {
            id: Uuid::new_v4(),
            uid: None,
            name: name.to_string(),
            email: String::new(),
            stats,
            created_at: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewsItem {
    pub id: Uuid,
    pub title: String,
    pub summary: String,
    pub author: String,
    pub published_on: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventItem {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub location: String,
    pub event_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    Student,
    Teacher,
}

impl SenderType {
    pub fn as_str(self) -> &'static str {
        match self {
            SenderType::Student => "student",
            SenderType::Teacher => "teacher",
        }
    }
}

impl FromStr for SenderType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "student" => Ok(SenderType::Student),
            "teacher" => Ok(SenderType::Teacher),
            other => Err(format!("unknown sender type '{other}'")),
        }
    }
}

impl fmt::Display for SenderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: Uuid,
    pub student_id: Uuid,
    pub teacher_name: String,
    pub teacher_subject: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: Uuid,
    pub sender_type: SenderType,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_trend_reads_as_stable() {
        assert_eq!("".parse::<Trend>(), Ok(Trend::Stable));
        assert_eq!(" UP ".parse::<Trend>(), Ok(Trend::Up));
        assert!("sideways".parse::<Trend>().is_err());
    }

    #[test]
    fn sender_type_matches_stored_text() {
        for sender in [SenderType::Student, SenderType::Teacher] {
            assert_eq!(sender.to_string().parse::<SenderType>(), Ok(sender));
        }
    }

    #[test]
    fn academic_metrics_leave_out_attendance() {
        assert_eq!(Metric::ACADEMIC.len(), 5);
        assert!(!Metric::ACADEMIC.contains(&Metric::Frequencia));
        assert!(Metric::ALL.contains(&Metric::Frequencia));
    }
}
