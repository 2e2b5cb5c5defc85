use serde::Serialize;
use thiserror::Error;

/// One graded assignment for one student inside one subject-offering.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeRecord {
    pub grade: Option<f64>,
    pub category_id: Option<String>,
    pub period: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingCategory {
    pub id: String,
    pub name: String,
    pub weight: i64,
    pub course_subject_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryAverage {
    pub name: String,
    pub average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBreakdown {
    pub final_score: f64,
    pub category_averages: Vec<CategoryAverage>,
}

impl GradeBreakdown {
    fn empty() -> Self {
        Self {
            final_score: 0.0,
            category_averages: Vec::new(),
        }
    }

    /// `None` when the name is not in the mapping, `Some(None)` when the
    /// category exists but has no grades yet.
    pub fn category_average(&self, name: &str) -> Option<Option<f64>> {
        self.category_averages
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.average)
    }

    // Map semantics: a repeated name keeps its slot and takes the newer value.
    fn record(&mut self, name: &str, average: Option<f64>) {
        if let Some(slot) = self.category_averages.iter_mut().find(|c| c.name == name) {
            slot.average = average;
        } else {
            self.category_averages.push(CategoryAverage {
                name: name.to_string(),
                average,
            });
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalcError {
    #[error("unknown evaluation system: {0}")]
    UnknownSystem(String),
    #[error("view must be 'year' or a positive period number")]
    BadView,
    #[error("period {period} is outside the {system} system (1..={count})")]
    PeriodOutOfRange {
        period: i64,
        system: &'static str,
        count: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationSystem {
    Annual,
    Semesters,
    Trimesters,
}

impl EvaluationSystem {
    pub fn parse(raw: &str) -> Result<Self, CalcError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "annual" => Ok(Self::Annual),
            "semesters" => Ok(Self::Semesters),
            "trimesters" => Ok(Self::Trimesters),
            other => Err(CalcError::UnknownSystem(other.to_string())),
        }
    }

    /// Lenient variant for values already stored in the database.
    pub fn from_stored(raw: Option<&str>) -> Self {
        raw.and_then(|s| Self::parse(s).ok()).unwrap_or(Self::Annual)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Annual => "annual",
            Self::Semesters => "semesters",
            Self::Trimesters => "trimesters",
        }
    }

    pub fn period_count(self) -> i64 {
        match self {
            Self::Annual => 1,
            Self::Semesters => 2,
            Self::Trimesters => 3,
        }
    }

    pub fn is_multi_period(self) -> bool {
        self.period_count() > 1
    }

    pub fn period_label(self, period: i64) -> String {
        let ordinal = match period {
            1 => "1st".to_string(),
            2 => "2nd".to_string(),
            3 => "3rd".to_string(),
            n => format!("{}th", n),
        };
        match self {
            Self::Annual => "Annual Progress".to_string(),
            Self::Semesters => format!("{} Semester", ordinal),
            Self::Trimesters => format!("{} Quarter", ordinal),
        }
    }

    pub fn check_period(self, period: i64) -> Result<i64, CalcError> {
        if period < 1 || period > self.period_count() {
            return Err(CalcError::PeriodOutOfRange {
                period,
                system: self.as_str(),
                count: self.period_count(),
            });
        }
        Ok(period)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodView {
    YearFinal,
    Period(i64),
}

impl PeriodView {
    /// Annual classes have a single period, so the year view is period 1.
    pub fn resolve(self, system: EvaluationSystem) -> Result<PeriodView, CalcError> {
        match self {
            PeriodView::YearFinal if !system.is_multi_period() => Ok(PeriodView::Period(1)),
            PeriodView::YearFinal => Ok(PeriodView::YearFinal),
            PeriodView::Period(p) => system.check_period(p).map(PeriodView::Period),
        }
    }

    pub fn label(self, system: EvaluationSystem) -> String {
        match self {
            PeriodView::YearFinal => "Year Final".to_string(),
            PeriodView::Period(p) => system.period_label(p),
        }
    }
}

pub fn parse_period_view(raw: Option<&serde_json::Value>) -> Result<PeriodView, CalcError> {
    let Some(raw) = raw else {
        return Ok(PeriodView::YearFinal);
    };
    if raw.is_null() {
        return Ok(PeriodView::YearFinal);
    }
    if let Some(s) = raw.as_str() {
        let t = s.trim();
        if t.eq_ignore_ascii_case("year") || t.eq_ignore_ascii_case("ALL") {
            return Ok(PeriodView::YearFinal);
        }
        return t
            .parse::<i64>()
            .ok()
            .filter(|n| *n >= 1)
            .map(PeriodView::Period)
            .ok_or(CalcError::BadView);
    }
    match raw.as_i64() {
        Some(0) => Ok(PeriodView::YearFinal),
        Some(n) if n >= 1 => Ok(PeriodView::Period(n)),
        _ => Err(CalcError::BadView),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightCheck {
    pub total: i64,
    pub balanced: bool,
}

pub fn weight_check(categories: &[GradingCategory]) -> WeightCheck {
    let total: i64 = categories.iter().map(|c| c.weight).sum();
    WeightCheck {
        total,
        balanced: total == 100,
    }
}

fn mean<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let mut sum = 0.0_f64;
    let mut count = 0_usize;
    for v in values {
        sum += v;
        count += 1;
    }
    if count > 0 {
        Some(sum / (count as f64))
    } else {
        None
    }
}

/// Weighted average of category means.
///
/// With no categories this is the plain mean of every non-null grade. With
/// categories, each category contributes `avg * weight` only when it has at
/// least one non-null grade; grades pointing at unknown categories are ignored.
/// No data at all yields `0.0`, which callers must read as "nothing yet".
pub fn compute(grades: &[GradeRecord], categories: &[GradingCategory]) -> GradeBreakdown {
    if categories.is_empty() {
        let mut out = GradeBreakdown::empty();
        out.final_score = mean(grades.iter().filter_map(|g| g.grade)).unwrap_or(0.0);
        return out;
    }

    let mut out = GradeBreakdown::empty();
    let mut score = 0.0_f64;
    let mut weight_used = 0_i64;

    for c in categories {
        let avg = mean(
            grades
                .iter()
                .filter(|g| g.category_id.as_deref() == Some(c.id.as_str()))
                .filter_map(|g| g.grade),
        );
        match avg {
            Some(avg) => {
                out.record(&c.name, Some(avg));
                score += avg * (c.weight as f64);
                weight_used += c.weight;
            }
            None => out.record(&c.name, None),
        }
    }

    out.final_score = if weight_used > 0 {
        score / (weight_used as f64)
    } else {
        0.0
    };
    out
}

fn grades_in_period(grades: &[GradeRecord], period: i64) -> Vec<GradeRecord> {
    grades
        .iter()
        .filter(|g| g.period == period)
        .cloned()
        .collect()
}

pub fn period_breakdown(
    grades: &[GradeRecord],
    categories: &[GradingCategory],
    period: i64,
) -> GradeBreakdown {
    compute(&grades_in_period(grades, period), categories)
}

pub fn period_score(grades: &[GradeRecord], categories: &[GradingCategory], period: i64) -> f64 {
    period_breakdown(grades, categories, period).final_score
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodSummary {
    pub period: i64,
    pub label: String,
    pub record_count: usize,
    /// `None` when the period has no grade records at all.
    pub score: Option<f64>,
}

pub fn period_summaries(
    grades: &[GradeRecord],
    categories: &[GradingCategory],
    system: EvaluationSystem,
) -> Vec<PeriodSummary> {
    (1..=system.period_count())
        .map(|p| {
            let in_period = grades_in_period(grades, p);
            let score = if in_period.is_empty() {
                None
            } else {
                Some(compute(&in_period, categories).final_score)
            };
            PeriodSummary {
                period: p,
                label: system.period_label(p),
                record_count: in_period.len(),
                score,
            }
        })
        .collect()
}

/// Unweighted mean of the per-period finals. Periods without any grade record
/// are skipped rather than counted as zero.
pub fn year_final(
    grades: &[GradeRecord],
    categories: &[GradingCategory],
    system: EvaluationSystem,
) -> f64 {
    mean(
        period_summaries(grades, categories, system)
            .into_iter()
            .filter_map(|p| p.score),
    )
    .unwrap_or(0.0)
}

pub fn evaluate(
    grades: &[GradeRecord],
    categories: &[GradingCategory],
    system: EvaluationSystem,
    view: PeriodView,
) -> Result<f64, CalcError> {
    Ok(match view.resolve(system)? {
        PeriodView::YearFinal => year_final(grades, categories, system),
        PeriodView::Period(p) => period_score(grades, categories, p),
    })
}

/// Compares the displayed (2-decimal) score, so a report never shows
/// 6.00 next to a failing mark.
pub fn passes(score: f64, passing_grade: f64) -> bool {
    round_off_2_decimals(score) >= passing_grade
}

/// Display rounding used by every gradebook response (2 decimals).
pub fn round_off_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat(id: &str, name: &str, weight: i64) -> GradingCategory {
        GradingCategory {
            id: id.to_string(),
            name: name.to_string(),
            weight,
            course_subject_id: "cs".to_string(),
        }
    }

    fn rec(grade: Option<f64>, category_id: Option<&str>, period: i64) -> GradeRecord {
        GradeRecord {
            grade,
            category_id: category_id.map(|s| s.to_string()),
            period,
        }
    }

    fn homework_exams() -> Vec<GradingCategory> {
        vec![cat("1", "Homework", 40), cat("2", "Exams", 60)]
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn weighted_mean_of_category_averages() {
        let grades = vec![
            rec(Some(8.0), Some("1"), 1),
            rec(Some(6.0), Some("1"), 1),
            rec(Some(9.0), Some("2"), 1),
        ];
        let out = compute(&grades, &homework_exams());
        assert_eq!(out.category_average("Homework"), Some(Some(7.0)));
        assert_eq!(out.category_average("Exams"), Some(Some(9.0)));
        assert!(close(out.final_score, 8.2));
    }

    #[test]
    fn empty_category_is_reported_but_does_not_dilute() {
        let grades = vec![rec(Some(8.0), Some("1"), 1)];
        let out = compute(&grades, &homework_exams());
        assert_eq!(out.category_average("Homework"), Some(Some(8.0)));
        assert_eq!(out.category_average("Exams"), Some(None));
        assert!(close(out.final_score, 8.0));
    }

    #[test]
    fn mapping_follows_category_order() {
        let cats = vec![cat("2", "Exams", 60), cat("1", "Homework", 40)];
        let out = compute(&[rec(Some(5.0), Some("1"), 1)], &cats);
        let names: Vec<&str> = out
            .category_averages
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["Exams", "Homework"]);
    }

    #[test]
    fn no_categories_falls_back_to_plain_mean() {
        let grades = vec![
            rec(Some(4.0), None, 1),
            rec(None, None, 1),
            rec(Some(7.0), Some("x"), 2),
        ];
        let out = compute(&grades, &[]);
        assert!(close(out.final_score, 5.5));
        assert!(out.category_averages.is_empty());
    }

    #[test]
    fn no_categories_and_no_grades_is_zero() {
        let out = compute(&[rec(None, None, 1)], &[]);
        assert_eq!(out.final_score, 0.0);
        assert!(out.category_averages.is_empty());

        let out = compute(&[], &[]);
        assert_eq!(out.final_score, 0.0);
        assert!(out.category_averages.is_empty());
    }

    #[test]
    fn all_categories_empty_is_zero_with_none_entries() {
        let grades = vec![rec(None, Some("1"), 1), rec(Some(9.0), Some("zzz"), 1)];
        let out = compute(&grades, &homework_exams());
        assert_eq!(out.final_score, 0.0);
        assert_eq!(out.category_averages.len(), 2);
        assert!(out.category_averages.iter().all(|c| c.average.is_none()));
    }

    #[test]
    fn orphan_grades_never_change_the_result() {
        let base = vec![rec(Some(8.0), Some("1"), 1), rec(Some(6.5), Some("2"), 1)];
        let mut with_orphans = base.clone();
        with_orphans.push(rec(Some(1.0), Some("999"), 1));
        with_orphans.push(rec(Some(10.0), None, 1));

        let cats = homework_exams();
        assert_eq!(compute(&base, &cats), compute(&with_orphans, &cats));
    }

    #[test]
    fn unbalanced_weights_still_produce_a_score() {
        let cats = vec![cat("1", "Homework", 30), cat("2", "Exams", 30)];
        let grades = vec![rec(Some(6.0), Some("1"), 1), rec(Some(8.0), Some("2"), 1)];
        let out = compute(&grades, &cats);
        assert!(close(out.final_score, 7.0));
        assert_eq!(
            weight_check(&cats),
            WeightCheck {
                total: 60,
                balanced: false
            }
        );
        assert!(weight_check(&homework_exams()).balanced);
    }

    #[test]
    fn non_positive_weight_sum_yields_zero() {
        let cats = vec![cat("1", "Bonus", 0)];
        let out = compute(&[rec(Some(9.0), Some("1"), 1)], &cats);
        assert_eq!(out.final_score, 0.0);
        assert_eq!(out.category_average("Bonus"), Some(Some(9.0)));
    }

    #[test]
    fn duplicate_category_names_behave_like_a_map() {
        let cats = vec![cat("1", "Tests", 50), cat("2", "Tests", 50)];
        let grades = vec![rec(Some(4.0), Some("1"), 1), rec(Some(8.0), Some("2"), 1)];
        let out = compute(&grades, &cats);
        assert_eq!(out.category_averages.len(), 1);
        assert_eq!(out.category_average("Tests"), Some(Some(8.0)));
        assert!(close(out.final_score, 6.0));
    }

    #[test]
    fn year_final_skips_periods_without_records() {
        let grades = vec![rec(Some(7.0), Some("1"), 1), rec(Some(7.0), Some("2"), 1)];
        let cats = homework_exams();
        assert!(close(
            year_final(&grades, &cats, EvaluationSystem::Semesters),
            7.0
        ));
    }

    #[test]
    fn year_final_counts_periods_whose_records_are_ungraded() {
        // Period 2 has a record, so it is not skipped; its score is 0.0.
        let grades = vec![rec(Some(8.0), Some("1"), 1), rec(None, Some("1"), 2)];
        let cats = homework_exams();
        assert!(close(
            year_final(&grades, &cats, EvaluationSystem::Semesters),
            4.0
        ));
    }

    #[test]
    fn year_final_ignores_periods_beyond_the_system() {
        let grades = vec![
            rec(Some(6.0), None, 1),
            rec(Some(9.0), None, 2),
            rec(Some(3.0), None, 3),
        ];
        assert!(close(
            year_final(&grades, &[], EvaluationSystem::Semesters),
            7.5
        ));
        assert!(close(
            year_final(&grades, &[], EvaluationSystem::Trimesters),
            6.0
        ));
    }

    #[test]
    fn year_final_without_any_records_is_zero() {
        assert_eq!(
            year_final(&[], &homework_exams(), EvaluationSystem::Trimesters),
            0.0
        );
    }

    #[test]
    fn evaluate_resolves_annual_year_view_to_first_period() {
        let grades = vec![rec(Some(5.0), None, 1), rec(Some(9.0), None, 2)];
        let v = evaluate(
            &grades,
            &[],
            EvaluationSystem::Annual,
            PeriodView::YearFinal,
        )
        .expect("annual view");
        assert!(close(v, 5.0));

        let err = evaluate(&grades, &[], EvaluationSystem::Annual, PeriodView::Period(2));
        assert!(matches!(err, Err(CalcError::PeriodOutOfRange { .. })));
    }

    #[test]
    fn period_summaries_mark_empty_periods() {
        let grades = vec![rec(Some(6.0), None, 2)];
        let s = period_summaries(&grades, &[], EvaluationSystem::Trimesters);
        assert_eq!(s.len(), 3);
        assert_eq!(s[0].score, None);
        assert_eq!(s[1].score, Some(6.0));
        assert_eq!(s[1].label, "2nd Quarter");
        assert_eq!(s[2].record_count, 0);
    }

    #[test]
    fn parse_view_accepts_year_aliases_and_numbers() {
        assert_eq!(parse_period_view(None), Ok(PeriodView::YearFinal));
        let year = serde_json::json!("YEAR");
        assert_eq!(parse_period_view(Some(&year)), Ok(PeriodView::YearFinal));
        let two = serde_json::json!(2);
        assert_eq!(parse_period_view(Some(&two)), Ok(PeriodView::Period(2)));
        let three = serde_json::json!("3");
        assert_eq!(parse_period_view(Some(&three)), Ok(PeriodView::Period(3)));
        let bad = serde_json::json!(-1);
        assert_eq!(parse_period_view(Some(&bad)), Err(CalcError::BadView));
    }

    #[test]
    fn round_off_and_pass_threshold() {
        assert_eq!(round_off_2_decimals(8.199999999), 8.2);
        assert_eq!(round_off_2_decimals(6.666), 6.67);
        assert!(passes(6.0, 6.0));
        assert!(!passes(5.99, 6.0));
        assert!(passes(5.996, 6.0));
        assert!(!passes(5.994, 6.0));
    }
}
