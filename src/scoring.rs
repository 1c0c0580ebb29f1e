use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::collation::compare_names;
use crate::models::{Metric, StudentRecord, StudentStats};

/// Academic average of one student.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AverageScore {
    /// Unrounded mean, used for ordering.
    pub exact: f64,
    /// Round-half-up of `exact`, used for display and banding.
    pub rounded: i64,
    /// Academic fields that were present and finite.
    pub recorded_fields: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PerformanceBand {
    Excellent,
    VeryGood,
    Good,
    Regular,
    NeedsImprovement,
}

impl PerformanceBand {
    pub const ALL: [PerformanceBand; 5] = [
        PerformanceBand::Excellent,
        PerformanceBand::VeryGood,
        PerformanceBand::Good,
        PerformanceBand::Regular,
        PerformanceBand::NeedsImprovement,
    ];

    pub fn label(self) -> &'static str {
        match self {
            PerformanceBand::Excellent => "Excelente (90-100%)",
            PerformanceBand::VeryGood => "Muito Bom (80-89%)",
            PerformanceBand::Good => "Bom (70-79%)",
            PerformanceBand::Regular => "Regular (60-69%)",
            PerformanceBand::NeedsImprovement => "Precisa Melhorar (<60%)",
        }
    }
}

impl fmt::Display for PerformanceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where a student sits relative to the rest of the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Standing {
    Unranked,
    First,
    Podium,
    TopThird,
    Climbing,
}

impl Standing {
    pub fn message(self, position: usize) -> String {
        match self {
            Standing::Unranked => "Continue estudando para entrar no ranking!".to_string(),
            Standing::First => "Você está em 1º lugar! Parabéns!".to_string(),
            Standing::Podium => format!("Você está no pódio! Posição {position}"),
            Standing::TopThird => "Você está entre os melhores da turma!".to_string(),
            Standing::Climbing => "Continue se esforçando para subir no ranking!".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RankedStudent<'a> {
    pub student: &'a StudentRecord,
    pub position: usize,
    pub average: AverageScore,
}

/// Ordered view over a roster. Holds borrowed records only; iterate it as
/// many times as needed.
#[derive(Debug, Clone)]
pub struct Ranking<'a> {
    entries: Vec<(&'a StudentRecord, AverageScore)>,
}

impl<'a> Ranking<'a> {
    pub fn iter(&self) -> impl Iterator<Item = RankedStudent<'a>> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, (student, average))| RankedStudent {
                student: *student,
                position: index + 1,
                average: *average,
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<RankedStudent<'a>> {
        self.iter().next()
    }

    pub fn position_of(&self, id: Uuid) -> Option<RankedStudent<'a>> {
        self.iter().find(|entry| entry.student.id == id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TopPerformer {
    pub id: Uuid,
    pub name: String,
    pub average_score: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CohortSummary {
    pub count: usize,
    pub class_average: i64,
    pub top_performer: Option<TopPerformer>,
    pub band_counts: BTreeMap<PerformanceBand, usize>,
    pub subject_averages: BTreeMap<Metric, i64>,
    pub attendance_average: i64,
}

fn metric_value(stats: &StudentStats, metric: Metric) -> f64 {
    match stats.get(metric) {
        Some(value) if value.is_finite() => value,
        _ => 0.0,
    }
}

pub fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

pub fn compute_average(stats: &StudentStats) -> AverageScore {
    let total: f64 = Metric::ACADEMIC
        .iter()
        .map(|metric| metric_value(stats, *metric))
        .sum();
    let recorded_fields = Metric::ACADEMIC
        .iter()
        .filter(|metric| matches!(stats.get(**metric), Some(value) if value.is_finite()))
        .count();
    let exact = total / Metric::ACADEMIC.len() as f64;

    AverageScore {
        exact,
        rounded: round_half_up(exact),
        recorded_fields,
    }
}

pub fn attendance_rate(stats: &StudentStats) -> f64 {
    metric_value(stats, Metric::Frequencia)
}

pub fn classify_band(average_score: i64) -> PerformanceBand {
    match average_score.clamp(0, 100) {
        90..=100 => PerformanceBand::Excellent,
        80..=89 => PerformanceBand::VeryGood,
        70..=79 => PerformanceBand::Good,
        60..=69 => PerformanceBand::Regular,
        _ => PerformanceBand::NeedsImprovement,
    }
}

pub fn rank_students(students: &[StudentRecord]) -> Ranking<'_> {
    let mut entries: Vec<(&StudentRecord, AverageScore)> = students
        .iter()
        .map(|student| (student, compute_average(&student.stats)))
        .collect();

    entries.sort_by(|(a, avg_a), (b, avg_b)| {
        avg_b
            .exact
            .partial_cmp(&avg_a.exact)
            .unwrap_or(Ordering::Equal)
            .then_with(|| compare_names(&a.name, &b.name))
            .then_with(|| a.id.cmp(&b.id))
    });

    Ranking { entries }
}

pub fn standing_for(position: usize, roster_size: usize) -> Standing {
    let top_third = (roster_size as f64 * 0.3).ceil() as usize;
    match position {
        0 => Standing::Unranked,
        1 => Standing::First,
        2 | 3 => Standing::Podium,
        p if p <= top_third => Standing::TopThird,
        _ => Standing::Climbing,
    }
}

pub fn cohort_summary(students: &[StudentRecord]) -> CohortSummary {
    let ranking = rank_students(students);
    let count = ranking.len();

    let mut band_counts: BTreeMap<PerformanceBand, usize> =
        PerformanceBand::ALL.iter().map(|band| (*band, 0)).collect();
    let mut total_average = 0.0;

    for entry in ranking.iter() {
        total_average += entry.average.exact;
        *band_counts
            .entry(classify_band(entry.average.rounded))
            .or_insert(0) += 1;
    }

    let mean = |total: f64| {
        if count == 0 {
            0
        } else {
            round_half_up(total / count as f64)
        }
    };

    let subject_averages = Metric::ACADEMIC
        .iter()
        .map(|metric| {
            let total: f64 = students
                .iter()
                .map(|student| metric_value(&student.stats, *metric))
                .sum();
            (*metric, mean(total))
        })
        .collect();

    let attendance_total: f64 = students
        .iter()
        .map(|student| attendance_rate(&student.stats))
        .sum();

    CohortSummary {
        count,
        class_average: mean(total_average),
        top_performer: ranking.first().map(|entry| TopPerformer {
            id: entry.student.id,
            name: entry.student.name.clone(),
            average_score: entry.average.rounded,
        }),
        band_counts,
        subject_averages,
        attendance_average: mean(attendance_total),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(name: &str, scores: [f64; 5]) -> StudentRecord {
        let stats = Metric::ACADEMIC
            .iter()
            .zip(scores)
            .fold(StudentStats::default(), |stats, (metric, value)| {
                stats.with(*metric, value)
            });
        StudentRecord::new(name, stats)
    }

    fn names(ranking: &Ranking<'_>) -> Vec<String> {
        ranking.iter().map(|entry| entry.student.name.clone()).collect()
    }

    #[test]
    fn bands_partition_the_score_range() {
        for score in 0..=100 {
            let expected = if score >= 90 {
                PerformanceBand::Excellent
            } else if score >= 80 {
                PerformanceBand::VeryGood
            } else if score >= 70 {
                PerformanceBand::Good
            } else if score >= 60 {
                PerformanceBand::Regular
            } else {
                PerformanceBand::NeedsImprovement
            };
            assert_eq!(classify_band(score), expected, "score {score}");
        }
    }

    #[test]
    fn band_boundaries_are_inclusive_below() {
        assert_eq!(classify_band(59), PerformanceBand::NeedsImprovement);
        assert_eq!(classify_band(60), PerformanceBand::Regular);
        assert_eq!(classify_band(70), PerformanceBand::Good);
        assert_eq!(classify_band(80), PerformanceBand::VeryGood);
        assert_eq!(classify_band(89), PerformanceBand::VeryGood);
        assert_eq!(classify_band(90), PerformanceBand::Excellent);
    }

    #[test]
    fn out_of_range_scores_are_clamped() {
        assert_eq!(classify_band(-15), PerformanceBand::NeedsImprovement);
        assert_eq!(classify_band(140), PerformanceBand::Excellent);
    }

    #[test]
    fn attendance_does_not_depress_the_average() {
        let stats = StudentStats::default()
            .with(Metric::ProvaParana, 100.0)
            .with(Metric::Saeb, 100.0)
            .with(Metric::ProvasInternas, 100.0)
            .with(Metric::ProvasExternas, 100.0)
            .with(Metric::PlataformasDigitais, 100.0)
            .with(Metric::Frequencia, 0.0);
        let average = compute_average(&stats);
        assert_eq!(average.rounded, 100);
        assert_eq!(average.recorded_fields, 5);
    }

    #[test]
    fn absent_and_non_finite_fields_count_as_zero() {
        let stats = StudentStats::default()
            .with(Metric::ProvaParana, 100.0)
            .with(Metric::Saeb, f64::NAN)
            .with(Metric::ProvasInternas, f64::INFINITY);
        let average = compute_average(&stats);
        assert!((average.exact - 20.0).abs() < 1e-9);
        assert_eq!(average.rounded, 20);
        assert_eq!(average.recorded_fields, 1);
    }

    #[test]
    fn zero_scores_are_recorded_but_absent_fields_are_not() {
        let scored_zero = StudentStats::default().with(Metric::Saeb, 0.0);
        assert_eq!(compute_average(&scored_zero).recorded_fields, 1);
        assert_eq!(compute_average(&StudentStats::default()).recorded_fields, 0);
        assert_eq!(compute_average(&StudentStats::default()).rounded, 0);
    }

    #[test]
    fn rounding_is_half_up() {
        let stats = StudentStats::default()
            .with(Metric::ProvaParana, 90.0)
            .with(Metric::Saeb, 90.0)
            .with(Metric::ProvasInternas, 90.0)
            .with(Metric::ProvasExternas, 90.0)
            .with(Metric::PlataformasDigitais, 92.5);
        assert_eq!(compute_average(&stats).rounded, 91);
        assert_eq!(round_half_up(72.5), 73);
        assert_eq!(round_half_up(72.49), 72);
    }

    #[test]
    fn ranking_ignores_input_order() {
        let roster = vec![
            student("Carla", [70.0, 70.0, 70.0, 70.0, 70.0]),
            student("Bruno", [90.0, 90.0, 90.0, 90.0, 90.0]),
            student("Ana", [70.0, 70.0, 70.0, 70.0, 70.0]),
            student("Davi", [40.0, 40.0, 40.0, 40.0, 40.0]),
        ];
        let mut reversed = roster.clone();
        reversed.reverse();

        let forward = names(&rank_students(&roster));
        let backward = names(&rank_students(&reversed));
        assert_eq!(forward, vec!["Bruno", "Ana", "Carla", "Davi"]);
        assert_eq!(forward, backward);
    }

    fn permutations(roster: &[StudentRecord]) -> Vec<Vec<StudentRecord>> {
        if roster.len() <= 1 {
            return vec![roster.to_vec()];
        }
        let mut all = Vec::new();
        for i in 0..roster.len() {
            let mut rest = roster.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head.clone());
                all.push(tail);
            }
        }
        all
    }

    #[test]
    fn every_input_order_gives_the_same_ranking() {
        let roster = vec![
            student("Carla", [70.0, 70.0, 70.0, 70.0, 70.0]),
            student("Bruno", [90.0, 90.0, 90.0, 90.0, 90.0]),
            student("ana", [70.0, 70.0, 70.0, 70.0, 70.0]),
            student("Álvaro", [70.0, 70.0, 70.0, 70.0, 70.0]),
            student("Davi", [40.0, 40.0, 40.0, 40.0, 40.0]),
        ];
        let expected: Vec<(String, usize)> = vec![
            ("Bruno".to_string(), 1),
            ("Álvaro".to_string(), 2),
            ("ana".to_string(), 3),
            ("Carla".to_string(), 4),
            ("Davi".to_string(), 5),
        ];

        let orders = permutations(&roster);
        assert_eq!(orders.len(), 120);
        for order in &orders {
            let ranked: Vec<(String, usize)> = rank_students(order)
                .iter()
                .map(|entry| (entry.student.name.clone(), entry.position))
                .collect();
            assert_eq!(ranked, expected);
        }
    }

    #[test]
    fn identical_name_and_average_fall_back_to_id() {
        let mut first = student("Ana Souza", [75.0, 75.0, 75.0, 75.0, 75.0]);
        let mut second = student("Ana Souza", [75.0, 75.0, 75.0, 75.0, 75.0]);
        first.id = Uuid::from_u128(1);
        second.id = Uuid::from_u128(2);

        for roster in [
            vec![first.clone(), second.clone()],
            vec![second.clone(), first.clone()],
        ] {
            let ranking = rank_students(&roster);
            let ids: Vec<(Uuid, usize)> = ranking
                .iter()
                .map(|entry| (entry.student.id, entry.position))
                .collect();
            assert_eq!(ids, vec![(first.id, 1), (second.id, 2)]);
        }
    }

    #[test]
    fn ties_get_consecutive_positions_by_name() {
        let roster = vec![
            student("Érico", [80.0, 80.0, 80.0, 80.0, 80.0]),
            student("eduarda", [80.0, 80.0, 80.0, 80.0, 80.0]),
        ];
        let ranking = rank_students(&roster);
        let positions: Vec<(String, usize)> = ranking
            .iter()
            .map(|entry| (entry.student.name.clone(), entry.position))
            .collect();
        assert_eq!(
            positions,
            vec![("eduarda".to_string(), 1), ("Érico".to_string(), 2)]
        );
    }

    #[test]
    fn exact_average_separates_students_that_round_alike() {
        let roster = vec![
            student("Ana", [80.0, 80.0, 80.0, 80.0, 80.0]),
            student("Zeca", [80.0, 80.0, 80.0, 80.0, 82.0]),
        ];
        let ranking = rank_students(&roster);
        let first = ranking.first().map(|entry| entry.student.name.clone());
        assert_eq!(first.as_deref(), Some("Zeca"));
        assert!(ranking.iter().all(|entry| entry.average.rounded == 80));
    }

    #[test]
    fn ranking_can_be_iterated_repeatedly() {
        let roster = vec![
            student("Ana", [50.0, 50.0, 50.0, 50.0, 50.0]),
            student("Bia", [60.0, 60.0, 60.0, 60.0, 60.0]),
        ];
        let ranking = rank_students(&roster);
        let first_pass: Vec<usize> = ranking.iter().map(|entry| entry.position).collect();
        let second_pass: Vec<usize> = ranking.iter().map(|entry| entry.position).collect();
        assert_eq!(first_pass, vec![1, 2]);
        assert_eq!(first_pass, second_pass);
        assert_eq!(roster[0].name, "Ana");
    }

    #[test]
    fn empty_roster_summary_is_zeroed() {
        let summary = cohort_summary(&[]);
        assert_eq!(summary.count, 0);
        assert_eq!(summary.class_average, 0);
        assert!(summary.top_performer.is_none());
        assert_eq!(summary.band_counts.len(), 5);
        assert!(summary.band_counts.values().all(|count| *count == 0));
        assert_eq!(summary.subject_averages.len(), 5);
        assert!(summary.subject_averages.values().all(|avg| *avg == 0));
        assert_eq!(summary.attendance_average, 0);
    }

    #[test]
    fn two_student_roster_end_to_end() {
        let roster = vec![
            student("Ana", [90.0, 80.0, 70.0, 100.0, 60.0]),
            student("Bruno", [50.0, 50.0, 50.0, 50.0, 50.0]),
        ];

        let ana = compute_average(&roster[0].stats);
        let bruno = compute_average(&roster[1].stats);
        assert_eq!(ana.rounded, 80);
        assert_eq!(bruno.rounded, 50);
        assert_eq!(classify_band(ana.rounded), PerformanceBand::VeryGood);
        assert_eq!(classify_band(bruno.rounded), PerformanceBand::NeedsImprovement);

        let ranked: Vec<(String, usize, i64)> = rank_students(&roster)
            .iter()
            .map(|entry| {
                (
                    entry.student.name.clone(),
                    entry.position,
                    entry.average.rounded,
                )
            })
            .collect();
        assert_eq!(
            ranked,
            vec![("Ana".to_string(), 1, 80), ("Bruno".to_string(), 2, 50)]
        );

        let summary = cohort_summary(&roster);
        assert_eq!(summary.count, 2);
        assert_eq!(summary.class_average, 65);
        assert_eq!(
            summary.top_performer.as_ref().map(|top| top.name.as_str()),
            Some("Ana")
        );
        assert_eq!(summary.band_counts[&PerformanceBand::VeryGood], 1);
        assert_eq!(summary.band_counts[&PerformanceBand::NeedsImprovement], 1);
        assert_eq!(summary.band_counts[&PerformanceBand::Excellent], 0);
        assert_eq!(summary.band_counts[&PerformanceBand::Good], 0);
        assert_eq!(summary.band_counts[&PerformanceBand::Regular], 0);
        assert_eq!(summary.subject_averages[&Metric::ProvaParana], 70);
        assert_eq!(summary.subject_averages[&Metric::ProvasExternas], 75);
        assert!(!summary.subject_averages.contains_key(&Metric::Frequencia));
    }

    #[test]
    fn attendance_is_averaged_separately() {
        let roster = vec![
            StudentRecord::new("Ana", StudentStats::default().with(Metric::Frequencia, 95.0)),
            StudentRecord::new("Bia", StudentStats::default().with(Metric::Frequencia, 80.0)),
        ];
        let summary = cohort_summary(&roster);
        assert_eq!(summary.attendance_average, 88);
        assert_eq!(summary.class_average, 0);
    }

    #[test]
    fn standing_follows_position() {
        assert_eq!(standing_for(0, 20), Standing::Unranked);
        assert_eq!(standing_for(1, 20), Standing::First);
        assert_eq!(standing_for(3, 20), Standing::Podium);
        assert_eq!(standing_for(6, 20), Standing::TopThird);
        assert_eq!(standing_for(7, 20), Standing::Climbing);
        assert_eq!(Standing::Podium.message(2), "Você está no pódio! Posição 2");
    }
}
