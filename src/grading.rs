use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

pub const CA_MAX: f64 = 20.0;
pub const EXAM_MAX: f64 = 60.0;

/// 2-decimal rounding used for every reported average:
/// half-away-from-zero on the 2nd decimal.
pub fn round_off_2_decimals(x: f64) -> f64 {
    if x < 0.0 {
        -(((100.0 * -x) + 0.5).floor() / 100.0)
    } else {
        ((100.0 * x) + 0.5).floor() / 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreComponents {
    pub ca1: f64,
    pub ca2: f64,
    pub exam: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentError {
    pub field: &'static str,
    pub value: f64,
    pub max: f64,
}

impl std::fmt::Display for ComponentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} must be between 0 and {}, got {}",
            self.field, self.max, self.value
        )
    }
}

impl ScoreComponents {
    /// total is always the arithmetic sum of the three components.
    pub fn total(&self) -> f64 {
        self.ca1 + self.ca2 + self.exam
    }

    pub fn validate(&self) -> Result<(), ComponentError> {
        for (field, value, max) in [
            ("ca1", self.ca1, CA_MAX),
            ("ca2", self.ca2, CA_MAX),
            ("exam", self.exam, EXAM_MAX),
        ] {
            if !value.is_finite() || value < 0.0 || value > max {
                return Err(ComponentError { field, value, max });
            }
        }
        Ok(())
    }
}

/// Letter grade for a raw subject total out of 100.
pub fn subject_grade(total: f64) -> &'static str {
    if total >= 70.0 {
        "A"
    } else if total >= 60.0 {
        "B"
    } else if total >= 50.0 {
        "C"
    } else if total >= 40.0 {
        "D"
    } else if total >= 30.0 {
        "E"
    } else {
        "F"
    }
}

/// Letter grade for a compiled term average. Distinct scale from
/// [`subject_grade`]; the two must not be merged.
pub fn average_grade(average: f64) -> &'static str {
    if average >= 80.0 {
        "A"
    } else if average >= 70.0 {
        "B"
    } else if average >= 60.0 {
        "C"
    } else if average >= 50.0 {
        "D"
    } else if average >= 40.0 {
        "E"
    } else {
        "F"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentTotal {
    pub student_id: String,
    pub total_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub position: usize,
    pub total_students: usize,
}

/// Competition ranking over one class/term/year: sorted descending by
/// total, ties share a position, and the next distinct total's position
/// is its 1-based index + 1.
pub fn rank_students(totals: &[StudentTotal]) -> HashMap<String, Placement> {
    let mut sorted: Vec<&StudentTotal> = totals.iter().collect();
    sorted.sort_by(|a, b| {
        b.total_score
            .partial_cmp(&a.total_score)
            .unwrap_or(Ordering::Equal)
    });

    let total_students = sorted.len();
    let mut out = HashMap::with_capacity(total_students);
    let mut prev_total = f64::INFINITY;
    let mut prev_position = 1usize;
    for (i, st) in sorted.iter().enumerate() {
        let position = if st.total_score < prev_total {
            i + 1
        } else {
            prev_position
        };
        prev_total = st.total_score;
        prev_position = position;
        out.insert(
            st.student_id.clone(),
            Placement {
                position,
                total_students,
            },
        );
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStatistics {
    pub class_average: f64,
    pub class_max: f64,
    pub class_min: f64,
    pub graded_count: usize,
}

/// Class-wide statistics over students with a positive total. Students
/// with total 0 keep a position but never feed the average/min/max.
pub fn class_statistics(totals: &[StudentTotal]) -> ClassStatistics {
    let graded: Vec<f64> = totals
        .iter()
        .map(|t| t.total_score)
        .filter(|t| *t > 0.0)
        .collect();
    if graded.is_empty() {
        return ClassStatistics {
            class_average: 0.0,
            class_max: 0.0,
            class_min: 0.0,
            graded_count: 0,
        };
    }
    let sum: f64 = graded.iter().sum();
    let mut max = f64::NEG_INFINITY;
    let mut min = f64::INFINITY;
    for t in &graded {
        max = max.max(*t);
        min = min.min(*t);
    }
    ClassStatistics {
        class_average: round_off_2_decimals(sum / graded.len() as f64),
        class_max: max,
        class_min: min,
        graded_count: graded.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn totals(pairs: &[(&str, f64)]) -> Vec<StudentTotal> {
        pairs
            .iter()
            .map(|(id, t)| StudentTotal {
                student_id: id.to_string(),
                total_score: *t,
            })
            .collect()
    }

    #[test]
    fn round_off_is_half_away_from_zero() {
        assert_eq!(round_off_2_decimals(0.0), 0.0);
        assert_eq!(round_off_2_decimals(83.333), 83.33);
        assert_eq!(round_off_2_decimals(83.336), 83.34);
        // 0.125 is exact in binary, so the half is a true half.
        assert_eq!(round_off_2_decimals(0.125), 0.13);
        assert_eq!(round_off_2_decimals(-0.125), -0.13);
    }

    #[test]
    fn component_sum_and_grades() {
        let c = ScoreComponents {
            ca1: 18.0,
            ca2: 17.0,
            exam: 50.0,
        };
        c.validate().expect("in range");
        assert_eq!(c.total(), 85.0);
        assert_eq!(subject_grade(c.total()), "A");
        assert_eq!(average_grade(85.0), "A");
    }

    #[test]
    fn grade_scales_are_distinct() {
        // 72 is an A as a raw subject total but a B as a compiled average.
        assert_eq!(subject_grade(72.0), "A");
        assert_eq!(average_grade(72.0), "B");
        assert_eq!(subject_grade(29.9), "F");
        assert_eq!(average_grade(39.9), "F");
    }

    #[test]
    fn out_of_range_components_name_the_field() {
        let c = ScoreComponents {
            ca1: 5.0,
            ca2: 5.0,
            exam: 65.0,
        };
        let err = c.validate().expect_err("exam over bound");
        assert_eq!(err.field, "exam");
        assert_eq!(err.max, 60.0);
    }

    #[test]
    fn competition_ranking_shares_tied_positions() {
        let ranked = rank_students(&totals(&[("a", 90.0), ("b", 90.0), ("c", 70.0)]));
        assert_eq!(ranked["a"].position, 1);
        assert_eq!(ranked["b"].position, 1);
        assert_eq!(ranked["c"].position, 3);
        assert_eq!(ranked["c"].total_students, 3);
    }

    #[test]
    fn positions_never_decrease_down_the_sorted_order() {
        let input = totals(&[
            ("a", 55.0),
            ("b", 80.0),
            ("c", 80.0),
            ("d", 80.0),
            ("e", 12.0),
            ("f", 0.0),
        ]);
        let ranked = rank_students(&input);
        let mut pairs: Vec<(f64, usize)> = input
            .iter()
            .map(|t| (t.total_score, ranked[&t.student_id].position))
            .collect();
        pairs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
        for w in pairs.windows(2) {
            assert!(w[0].1 <= w[1].1);
            if w[0].0 == w[1].0 {
                assert_eq!(w[0].1, w[1].1);
            }
        }
        // Zero totals are ranked, just last.
        assert_eq!(ranked["f"].position, 6);
    }

    #[test]
    fn statistics_exclude_zero_totals() {
        let stats = class_statistics(&totals(&[("a", 90.0), ("b", 70.0), ("c", 0.0)]));
        assert_eq!(stats.class_average, 80.0);
        assert_eq!(stats.class_max, 90.0);
        assert_eq!(stats.class_min, 70.0);
        assert_eq!(stats.graded_count, 2);
    }

    #[test]
    fn statistics_with_no_eligible_students_are_zero() {
        let stats = class_statistics(&totals(&[("a", 0.0)]));
        assert_eq!(stats.class_average, 0.0);
        assert_eq!(stats.class_max, 0.0);
        assert_eq!(stats.class_min, 0.0);
        assert_eq!(stats.graded_count, 0);
    }
}
