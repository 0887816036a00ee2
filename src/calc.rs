use crate::grades::{Bimester, GradeKey, GradeRecord, Metric, Subject, View};
use serde::Serialize;

/// Round-half-up to one decimal place: `Int(10*x + 0.5) / 10`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

/// Length of the leading `[+-]digits` run, or 0 when there are no digits.
fn integer_prefix_len(s: &str) -> usize {
    let b = s.as_bytes();
    let sign = usize::from(matches!(b.first(), Some(b'+' | b'-')));
    let digits = b[sign..].iter().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        0
    } else {
        sign + digits
    }
}

/// Leading decimal number of `s` with `,` accepted as the decimal mark,
/// e.g. `"7,5 pts"` gives `"7.5"`. Empty when `s` does not start with one.
fn decimal_prefix(s: &str) -> String {
    let b = s.as_bytes();
    let digits_from = |i: usize| {
        b[i.min(b.len())..]
            .iter()
            .take_while(|c| c.is_ascii_digit())
            .count()
    };

    let mut end = usize::from(matches!(b.first(), Some(b'+' | b'-')));
    let int_digits = digits_from(end);
    end += int_digits;
    let mut frac_digits = 0;
    if matches!(b.get(end), Some(b'.' | b',')) {
        frac_digits = digits_from(end + 1);
        if frac_digits > 0 {
            end += 1 + frac_digits;
        }
    }
    if int_digits + frac_digits == 0 {
        return String::new();
    }
    if matches!(b.get(end), Some(b'e' | b'E')) {
        let exp = end + 1 + integer_prefix_len(&s[end + 1..]);
        if exp > end + 1 {
            end = exp;
        }
    }
    s[..end].replace(',', ".")
}

/// Grade cell text as a number. Only the leading number counts, so
/// `"7 pts"` is 7.0; blank or non-numeric text counts as 0.0.
pub fn parse_grade(raw: &str) -> f64 {
    match decimal_prefix(raw.trim()).parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

/// Absence cell text as a count, read from the leading integer: `"3 faltas"`
/// is 3 and `"2.9"` is 2. Blank, non-numeric and negative text count as 0.
pub fn parse_absences(raw: &str) -> u32 {
    let s = raw.trim();
    let prefix = &s[..integer_prefix_len(s)];
    let digits = prefix.trim_start_matches(['+', '-']);
    if digits.is_empty() || prefix.starts_with('-') {
        return 0;
    }
    digits
        .parse::<u64>()
        .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
        .unwrap_or(u32::MAX)
}

pub fn final_grade(record: &GradeRecord, subject: Subject) -> f64 {
    let sum: f64 = Bimester::ALL
        .iter()
        .map(|b| parse_grade(record.get(&GradeKey::new(subject, *b, Metric::Grade))))
        .sum();
    round_off_1_decimal(sum / Bimester::ALL.len() as f64)
}

pub fn total_absences(record: &GradeRecord, subject: Subject) -> u32 {
    Bimester::ALL
        .iter()
        .map(|b| parse_absences(record.get(&GradeKey::new(subject, *b, Metric::Absence))))
        .fold(0u32, |acc, n| acc.saturating_add(n))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSummary {
    pub final_grade: f64,
    pub total_absences: u32,
}

impl SubjectSummary {
    /// One-decimal text shared by every output format.
    pub fn final_grade_text(&self) -> String {
        format!("{:.1}", self.final_grade)
    }

    pub fn total_absences_text(&self) -> String {
        self.total_absences.to_string()
    }
}

pub fn summarize(record: &GradeRecord, subject: Subject) -> SubjectSummary {
    SubjectSummary {
        final_grade: final_grade(record, subject),
        total_absences: total_absences(record, subject),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRow {
    #[serde(skip)]
    pub subject: Subject,
    #[serde(rename = "subject")]
    pub label: String,
    /// Raw cells, `[nota, faltas]` per bimester in order.
    pub cells: Vec<String>,
    pub summary: SubjectSummary,
}

impl GradeRow {
    /// Row as display text, in header order.
    pub fn texts(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.cells.len() + 3);
        out.push(self.label.clone());
        out.extend(self.cells.iter().cloned());
        out.push(self.summary.final_grade_text());
        out.push(self.summary.total_absences_text());
        out
    }
}

/// Header + one row per subject; the layout both tabular exporters share.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeTable {
    #[serde(skip)]
    pub view: View,
    pub header: Vec<String>,
    pub rows: Vec<GradeRow>,
}

pub fn grade_table_header() -> Vec<String> {
    let mut header = vec!["Disciplina".to_string()];
    for b in Bimester::ALL {
        header.push(format!("{} Nota", b.token()));
        header.push(format!("{} Faltas (h)", b.token()));
    }
    header.push("Média Final".to_string());
    header.push("Total Faltas (h)".to_string());
    header
}

pub fn grade_table(record: &GradeRecord, view: View) -> GradeTable {
    let rows = view
        .subjects()
        .iter()
        .map(|subject| {
            let mut cells = Vec::with_capacity(Bimester::ALL.len() * 2);
            for b in Bimester::ALL {
                cells.push(
                    record
                        .get(&GradeKey::new(*subject, b, Metric::Grade))
                        .to_string(),
                );
                cells.push(
                    record
                        .get(&GradeKey::new(*subject, b, Metric::Absence))
                        .to_string(),
                );
            }
            GradeRow {
                subject: *subject,
                label: view.subject_label(*subject).to_string(),
                cells,
                summary: summarize(record, *subject),
            }
        })
        .collect();

    GradeTable {
        view,
        header: grade_table_header(),
        rows,
    }
}
