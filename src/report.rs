use std::fmt::Write;

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Metric, StudentRecord};
use crate::scoring::{self, CohortSummary, PerformanceBand, Ranking};

const SCHOOL_NAME: &str = "Escola Estadual do Campo Vinícius de Moraes";

/// Cohort-wide figures plus the news/event counts supplied by the caller.
pub struct CohortReport<'a> {
    pub summary: &'a CohortSummary,
    pub ranking: &'a Ranking<'a>,
    pub news_count: i64,
    pub event_count: i64,
    pub generated_on: NaiveDate,
}

/// Flat ranking line for JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct RankingRow {
    pub position: usize,
    pub id: Uuid,
    pub name: String,
    pub average_score: i64,
    pub band: PerformanceBand,
}

pub fn ranking_rows(ranking: &Ranking<'_>) -> Vec<RankingRow> {
    ranking
        .iter()
        .map(|entry| RankingRow {
            position: entry.position,
            id: entry.student.id,
            name: entry.student.name.clone(),
            average_score: entry.average.rounded,
            band: scoring::classify_band(entry.average.rounded),
        })
        .collect()
}

fn percent(value: Option<f64>) -> String {
    match value {
        Some(value) if value.is_finite() => format!("{}%", scoring::round_half_up(value)),
        _ => "sem dados".to_string(),
    }
}

pub fn build_report(report: &CohortReport<'_>) -> String {
    let summary = report.summary;
    let mut output = String::new();

    let _ = writeln!(output, "# Relatório Acadêmico - 9º Ano");
    let _ = writeln!(output, "{SCHOOL_NAME}");
    let _ = writeln!(output, "Gerado em {}", report.generated_on.format("%d/%m/%Y"));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Visão Geral");
    let _ = writeln!(output, "- Total de alunos: {}", summary.count);
    let _ = writeln!(output, "- Média geral: {}%", summary.class_average);

    match &summary.top_performer {
        Some(top) => {
            let _ = writeln!(
                output,
                "- Melhor aluno: {} ({}%)",
                top.name, top.average_score
            );
        }
        None => {
            let _ = writeln!(output, "- Melhor aluno: N/A");
        }
    }

    let _ = writeln!(output, "- Frequência média: {}%", summary.attendance_average);
    let _ = writeln!(output, "- Notícias publicadas: {}", report.news_count);
    let _ = writeln!(output, "- Eventos realizados: {}", report.event_count);

    if summary.count == 0 {
        let _ = writeln!(output);
        let _ = writeln!(output, "Nenhum aluno cadastrado.");
        return output;
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Distribuição de Desempenho");
    for band in PerformanceBand::ALL {
        let count = summary.band_counts.get(&band).copied().unwrap_or(0);
        let _ = writeln!(output, "- {}: {} alunos", band.label(), count);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Médias por Avaliação");
    for (metric, average) in &summary.subject_averages {
        let _ = writeln!(output, "- {}: {}%", metric.label(), average);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Ranking Geral");
    let _ = writeln!(output, "| Posição | Aluno | Média | Faixa |");
    let _ = writeln!(output, "|---|---|---|---|");
    for entry in report.ranking.iter() {
        let _ = writeln!(
            output,
            "| {} | {} | {}% | {} |",
            entry.position,
            entry.student.name,
            entry.average.rounded,
            scoring::classify_band(entry.average.rounded).label()
        );
    }

    output
}

pub fn build_student_report(
    student: &StudentRecord,
    ranking: &Ranking<'_>,
    generated_on: NaiveDate,
) -> String {
    let average = scoring::compute_average(&student.stats);
    let position = ranking
        .position_of(student.id)
        .map(|entry| entry.position)
        .unwrap_or(0);
    let standing = scoring::standing_for(position, ranking.len());

    let mut output = String::new();
    let _ = writeln!(output, "# Boletim de {}", student.name);
    let _ = writeln!(output, "{SCHOOL_NAME} - Portal do 9º Ano");
    let _ = writeln!(output, "Gerado em {}", generated_on.format("%d/%m/%Y"));
    let _ = writeln!(output, "Email: {}", student.email);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Desempenho");

    for metric in Metric::ALL {
        let _ = writeln!(
            output,
            "- {}: {} {}",
            metric.label(),
            percent(student.stats.get(metric)),
            student.stats.trend(metric).arrow()
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Resumo");
    let _ = writeln!(output, "- Média acadêmica: {}%", average.rounded);
    let _ = writeln!(
        output,
        "- Faixa: {}",
        scoring::classify_band(average.rounded).label()
    );
    if average.recorded_fields < Metric::ACADEMIC.len() {
        let _ = writeln!(
            output,
            "- Avaliações registradas: {} de {}",
            average.recorded_fields,
            Metric::ACADEMIC.len()
        );
    }

    if position == 0 {
        let _ = writeln!(output, "- Posição: sem posição");
    } else {
        let _ = writeln!(output, "- Posição: #{} de {}", position, ranking.len());
    }
    let _ = writeln!(output, "- {}", standing.message(position));

    output
}
