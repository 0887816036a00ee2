use super::ExportError;
use crate::calc::GradeTable;
use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, Workbook};

const SUBJECT_COL_WIDTH: f64 = 24.0;
const GRADE_COL_WIDTH: f64 = 10.0;
const ABSENCE_COL_WIDTH: f64 = 12.0;
const FINAL_GRADE_COL_WIDTH: f64 = 12.0;
const TOTAL_ABSENCE_COL_WIDTH: f64 = 14.0;

fn column_width(idx: usize, n_cols: usize) -> f64 {
    if idx == 0 {
        SUBJECT_COL_WIDTH
    } else if idx == n_cols - 2 {
        FINAL_GRADE_COL_WIDTH
    } else if idx == n_cols - 1 {
        TOTAL_ABSENCE_COL_WIDTH
    } else if idx % 2 == 1 {
        GRADE_COL_WIDTH
    } else {
        ABSENCE_COL_WIDTH
    }
}

fn cast_col_num(value: usize) -> Result<u16, ExportError> {
    u16::try_from(value).map_err(|_| {
        ExportError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("column index overflow: {value}"),
        ))
    })
}

/// Renders the table as a single named sheet and returns the workbook bytes.
pub fn render_xlsx(table: &GradeTable) -> Result<Vec<u8>, ExportError> {
    let mut workbook = Workbook::new();
    let fmt_header = Format::new()
        .set_bold()
        .set_align(FormatAlign::Center)
        .set_border(FormatBorder::Thin);
    let fmt_text = Format::new().set_border(FormatBorder::Thin);
    let fmt_cell = Format::new()
        .set_align(FormatAlign::Center)
        .set_border(FormatBorder::Thin);
    let fmt_final = Format::new()
        .set_bold()
        .set_num_format("0.0")
        .set_align(FormatAlign::Center)
        .set_border(FormatBorder::Thin);
    let fmt_total = Format::new()
        .set_bold()
        .set_num_format("0")
        .set_align(FormatAlign::Center)
        .set_border(FormatBorder::Thin);

    let sheet = workbook.add_worksheet();
    sheet.set_name(table.view.sheet_name())?;

    let n_cols = table.header.len();
    for (idx, title) in table.header.iter().enumerate() {
        let col = cast_col_num(idx)?;
        sheet.write_string_with_format(0, col, title, &fmt_header)?;
        sheet.set_column_width(col, column_width(idx, n_cols))?;
    }

    for (row_idx, row) in table.rows.iter().enumerate() {
        let r = (row_idx + 1) as u32;
        sheet.write_string_with_format(r, 0, &row.label, &fmt_text)?;
        for (cell_idx, raw) in row.cells.iter().enumerate() {
            let col = cast_col_num(cell_idx + 1)?;
            if raw.is_empty() {
                sheet.write_blank(r, col, &fmt_cell)?;
            } else {
                sheet.write_string_with_format(r, col, raw, &fmt_cell)?;
            }
        }
        let summary_col = cast_col_num(row.cells.len() + 1)?;
        sheet.write_number_with_format(r, summary_col, row.summary.final_grade, &fmt_final)?;
        sheet.write_number_with_format(
            r,
            summary_col + 1,
            f64::from(row.summary.total_absences),
            &fmt_total,
        )?;
    }
    sheet.set_freeze_panes(1, 0)?;

    Ok(workbook.save_to_buffer()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::grade_table;
    use crate::grades::{Bimester, GradeKey, GradeRecord, Metric, Subject, View};
    use std::io::{Cursor, Read};

    fn sheet_xml(bytes: Vec<u8>) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("xlsx is a zip");
        let mut xml = String::new();
        archive
            .by_name("xl/worksheets/sheet1.xml")
            .expect("sheet entry")
            .read_to_string(&mut xml)
            .expect("read sheet");
        xml
    }

    #[test]
    fn widths_follow_column_roles() {
        assert_eq!(column_width(0, 11), 24.0);
        assert_eq!(column_width(1, 11), 10.0);
        assert_eq!(column_width(2, 11), 12.0);
        assert_eq!(column_width(9, 11), 12.0);
        assert_eq!(column_width(10, 11), 14.0);
    }

    #[test]
    fn summary_columns_are_numbers() {
        let mut record = GradeRecord::new();
        for (b, g) in Bimester::ALL.iter().zip(["7", "8", "6", "9"]) {
            record.set(GradeKey::new(Subject::Matematica, *b, Metric::Grade), g);
        }
        record.set(
            GradeKey::new(Subject::Matematica, Bimester::Third, Metric::Absence),
            "3",
        );
        let bytes = render_xlsx(&grade_table(&record, View::Report)).expect("render");
        let xml = sheet_xml(bytes);
        assert!(xml.contains("<v>7.5</v>"));
        assert!(xml.contains("<v>3</v>"));
        assert!(xml.contains("<pane"));
    }
}
