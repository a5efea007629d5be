use serde::Serialize;
use std::collections::HashSet;

/// An active subject assignment the class expects a submitted score for.
#[derive(Debug, Clone, PartialEq)]
pub struct RequiredSubject {
    pub assignment_id: String,
    pub subject_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Completeness {
    pub required_count: usize,
    pub submitted_count: usize,
    pub missing_subjects: Vec<String>,
    pub has_affective: bool,
    pub has_psychomotor: bool,
}

impl Completeness {
    pub fn is_complete(&self) -> bool {
        self.missing_subjects.is_empty() && self.has_affective && self.has_psychomotor
    }

    /// Short message naming every unmet piece, for the submission error.
    pub fn describe_missing(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if !self.missing_subjects.is_empty() {
            parts.push(format!(
                "missing submitted scores for: {}",
                self.missing_subjects.join(", ")
            ));
        }
        if !self.has_affective {
            parts.push("affective rating not recorded".to_string());
        }
        if !self.has_psychomotor {
            parts.push("psychomotor rating not recorded".to_string());
        }
        parts.join("; ")
    }
}

/// Gate for compiling one student's result. A submitted score counts only
/// when its assignment id is in the class's active set for that term/year,
/// so records from another class or term never leak in.
pub fn evaluate(
    required: &[RequiredSubject],
    submitted_assignment_ids: &HashSet<String>,
    has_affective: bool,
    has_psychomotor: bool,
) -> Completeness {
    let missing_subjects: Vec<String> = required
        .iter()
        .filter(|r| !submitted_assignment_ids.contains(&r.assignment_id))
        .map(|r| r.subject_name.clone())
        .collect();
    Completeness {
        required_count: required.len(),
        submitted_count: required.len() - missing_subjects.len(),
        missing_subjects,
        has_affective,
        has_psychomotor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> Vec<RequiredSubject> {
        vec![
            RequiredSubject {
                assignment_id: "asg-math".to_string(),
                subject_name: "Mathematics".to_string(),
            },
            RequiredSubject {
                assignment_id: "asg-eng".to_string(),
                subject_name: "English".to_string(),
            },
        ]
    }

    fn ids(v: &[&str]) -> HashSet<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn complete_when_every_piece_is_present() {
        let c = evaluate(&required(), &ids(&["asg-math", "asg-eng"]), true, true);
        assert!(c.is_complete());
        assert_eq!(c.submitted_count, 2);
        assert_eq!(c.describe_missing(), "");
    }

    #[test]
    fn any_single_missing_piece_blocks() {
        let missing_score = evaluate(&required(), &ids(&["asg-math"]), true, true);
        assert!(!missing_score.is_complete());
        assert!(missing_score.describe_missing().contains("English"));

        let missing_affective = evaluate(&required(), &ids(&["asg-math", "asg-eng"]), false, true);
        assert!(!missing_affective.is_complete());
        assert!(missing_affective
            .describe_missing()
            .contains("affective rating"));

        let missing_psychomotor =
            evaluate(&required(), &ids(&["asg-math", "asg-eng"]), true, false);
        assert!(!missing_psychomotor.is_complete());
        assert!(missing_psychomotor
            .describe_missing()
            .contains("psychomotor rating"));
    }

    #[test]
    fn foreign_assignments_never_count() {
        // A submitted score from another class/term with a matching student
        // must not satisfy a required subject here.
        let c = evaluate(
            &required(),
            &ids(&["asg-math", "asg-other-class"]),
            true,
            true,
        );
        assert!(!c.is_complete());
        assert_eq!(c.submitted_count, 1);
        assert_eq!(c.missing_subjects, vec!["English".to_string()]);
    }
}
