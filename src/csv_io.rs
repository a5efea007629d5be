//! Score sheet CSV contract. The header and column order are fixed; the
//! import side matches `Reg ID` against admission numbers and skips bad
//! rows, reporting only an aggregate error count.

use crate::grading::ScoreComponents;
use anyhow::Context;
use std::collections::HashMap;

pub const SHEET_HEADER: [&str; 7] = [
    "S/No",
    "Reg ID",
    "Student Name",
    "1st CA[20]",
    "2nd CA[20]",
    "Exams[60]",
    "Total [100]",
];

#[derive(Debug, Clone)]
pub struct SheetRow {
    pub admission_no: String,
    pub student_name: String,
    pub components: Option<ScoreComponents>,
}

fn format_mark(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

pub fn export_score_sheet(rows: &[SheetRow]) -> anyhow::Result<String> {
    let mut w = csv::Writer::from_writer(Vec::new());
    w.write_record(SHEET_HEADER).context("write header")?;
    for (i, row) in rows.iter().enumerate() {
        let (ca1, ca2, exam, total) = match &row.components {
            Some(c) => (
                format_mark(c.ca1),
                format_mark(c.ca2),
                format_mark(c.exam),
                format_mark(c.total()),
            ),
            None => (String::new(), String::new(), String::new(), String::new()),
        };
        w.write_record([
            (i + 1).to_string(),
            row.admission_no.clone(),
            row.student_name.clone(),
            ca1,
            ca2,
            exam,
            total,
        ])
        .context("write row")?;
    }
    let bytes = w
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flush csv writer: {e}"))?;
    String::from_utf8(bytes).context("csv output is not utf-8")
}

#[derive(Debug, Clone)]
pub struct ParsedScore {
    pub student_id: String,
    pub components: ScoreComponents,
}

#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub rows: Vec<ParsedScore>,
    pub error_count: usize,
}

/// Parses an uploaded sheet. `admission_index` maps admission number to
/// student id for the target class. Rows with an unmatched Reg ID, an
/// unparsable mark, or an out-of-range component are skipped and counted;
/// rows whose three mark cells are all blank are skipped silently (that is
/// how an untouched exported row looks).
pub fn parse_score_sheet(
    data: &str,
    admission_index: &HashMap<String, String>,
) -> ImportReport {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(data.as_bytes());

    let mut report = ImportReport::default();
    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(_) => {
                report.error_count += 1;
                continue;
            }
        };
        let reg_id = record.get(1).unwrap_or("").trim();
        let cells = [
            record.get(3).unwrap_or("").trim(),
            record.get(4).unwrap_or("").trim(),
            record.get(5).unwrap_or("").trim(),
        ];
        if cells.iter().all(|c| c.is_empty()) {
            continue;
        }
        let Some(student_id) = admission_index.get(reg_id) else {
            report.error_count += 1;
            continue;
        };
        let parsed: Option<Vec<f64>> = cells
            .iter()
            .map(|c| c.parse::<f64>().ok())
            .collect();
        let Some(values) = parsed else {
            report.error_count += 1;
            continue;
        };
        let components = ScoreComponents {
            ca1: values[0],
            ca2: values[1],
            exam: values[2],
        };
        if components.validate().is_err() {
            report.error_count += 1;
            continue;
        }
        report.rows.push(ParsedScore {
            student_id: student_id.clone(),
            components,
        });
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(adm, id)| (adm.to_string(), id.to_string()))
            .collect()
    }

    #[test]
    fn export_writes_the_exact_header() {
        let sheet = export_score_sheet(&[SheetRow {
            admission_no: "ADM/001".to_string(),
            student_name: "Ada Obi".to_string(),
            components: Some(ScoreComponents {
                ca1: 18.0,
                ca2: 17.0,
                exam: 50.0,
            }),
        }])
        .expect("export");
        let mut lines = sheet.lines();
        assert_eq!(
            lines.next(),
            Some("S/No,Reg ID,Student Name,1st CA[20],2nd CA[20],Exams[60],Total [100]")
        );
        assert_eq!(lines.next(), Some("1,ADM/001,Ada Obi,18,17,50,85"));
    }

    #[test]
    fn out_of_range_exam_is_skipped_and_counted() {
        let data = "S/No,Reg ID,Student Name,1st CA[20],2nd CA[20],Exams[60],Total [100]\n\
                    1,ADM/001,Ada Obi,10,10,65,85\n\
                    2,ADM/002,Bode Ade,10,10,55,75\n";
        let report = parse_score_sheet(data, &index(&[("ADM/001", "s1"), ("ADM/002", "s2")]));
        assert_eq!(report.error_count, 1);
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].student_id, "s2");
        assert_eq!(report.rows[0].components.exam, 55.0);
    }

    #[test]
    fn unmatched_admission_number_is_skipped_and_counted() {
        let data = "S/No,Reg ID,Student Name,1st CA[20],2nd CA[20],Exams[60],Total [100]\n\
                    1,ADM/999,Ghost Kid,10,10,40,60\n";
        let report = parse_score_sheet(data, &index(&[("ADM/001", "s1")]));
        assert_eq!(report.error_count, 1);
        assert!(report.rows.is_empty());
    }

    #[test]
    fn blank_mark_rows_are_skipped_without_an_error() {
        let data = "S/No,Reg ID,Student Name,1st CA[20],2nd CA[20],Exams[60],Total [100]\n\
                    1,ADM/001,Ada Obi,,,,\n";
        let report = parse_score_sheet(data, &index(&[("ADM/001", "s1")]));
        assert_eq!(report.error_count, 0);
        assert!(report.rows.is_empty());
    }

    #[test]
    fn exported_sheet_reimports_cleanly() {
        let rows = vec![
            SheetRow {
                admission_no: "ADM/001".to_string(),
                student_name: "Ada Obi".to_string(),
                components: Some(ScoreComponents {
                    ca1: 15.5,
                    ca2: 12.0,
                    exam: 48.0,
                }),
            },
            SheetRow {
                admission_no: "ADM/002".to_string(),
                student_name: "Bode Ade".to_string(),
                components: None,
            },
        ];
        let sheet = export_score_sheet(&rows).expect("export");
        let report = parse_score_sheet(&sheet, &index(&[("ADM/001", "s1"), ("ADM/002", "s2")]));
        assert_eq!(report.error_count, 0);
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].components.ca1, 15.5);
    }
}
