use super::ExportError;
use crate::calc::GradeTable;
use crate::roster::StudentProfile;
use std::io::{Cursor, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const CONTENT_TYPES_ENTRY: &str = "[Content_Types].xml";
const ROOT_RELS_ENTRY: &str = "_rels/.rels";
const DOCUMENT_ENTRY: &str = "word/document.xml";
const DOCUMENT_RELS_ENTRY: &str = "word/_rels/document.xml.rels";
const STYLES_ENTRY: &str = "word/styles.xml";
const CORE_PROPS_ENTRY: &str = "docProps/core.xml";

const GRADES_HEADING: &str = "Notas e Faltas (por bimestre)";

// A4 portrait in twentieths of a point, 2 cm margins.
const PAGE_W_TWIPS: u32 = 11906;
const PAGE_H_TWIPS: u32 = 16838;
const MARGIN_TWIPS: u32 = 1134;

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/><Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/><Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/></Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/></Relationships>"#;

const DOCUMENT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

const STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:docDefaults><w:rPrDefault><w:rPr><w:rFonts w:ascii="Calibri" w:hAnsi="Calibri" w:cs="Calibri"/><w:sz w:val="22"/><w:lang w:val="pt-BR"/></w:rPr></w:rPrDefault></w:docDefaults><w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/></w:style><w:style w:type="paragraph" w:styleId="Heading1"><w:name w:val="heading 1"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:pPr><w:keepNext/><w:spacing w:before="240" w:after="120"/><w:outlineLvl w:val="0"/></w:pPr><w:rPr><w:b/><w:sz w:val="32"/></w:rPr></w:style><w:style w:type="paragraph" w:styleId="Heading2"><w:name w:val="heading 2"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:pPr><w:keepNext/><w:spacing w:before="200" w:after="100"/><w:outlineLvl w:val="1"/></w:pPr><w:rPr><w:b/><w:sz w:val="26"/></w:rPr></w:style></w:styles>"#;

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if (c as u32) < 0x20 && c != '\t' && c != '\n' && c != '\r' => {}
            c => out.push(c),
        }
    }
    out
}

fn run(text: &str, bold: bool) -> String {
    let rpr = if bold { "<w:rPr><w:b/></w:rPr>" } else { "" };
    format!(
        "<w:r>{}<w:t xml:space=\"preserve\">{}</w:t></w:r>",
        rpr,
        xml_escape(text)
    )
}

fn paragraph(text: &str, style: Option<&str>) -> String {
    let ppr = style
        .map(|s| format!("<w:pPr><w:pStyle w:val=\"{}\"/></w:pPr>", s))
        .unwrap_or_default();
    format!("<w:p>{}{}</w:p>", ppr, run(text, false))
}

fn cell(text: &str, bold: bool, width: u32, font_half_points: Option<u32>) -> String {
    let rpr_size = font_half_points
        .map(|sz| format!("<w:sz w:val=\"{sz}\"/><w:szCs w:val=\"{sz}\"/>"))
        .unwrap_or_default();
    let rpr = match (bold, rpr_size.is_empty()) {
        (false, true) => String::new(),
        (b, _) => format!("<w:rPr>{}{}</w:rPr>", if b { "<w:b/>" } else { "" }, rpr_size),
    };
    format!(
        "<w:tc><w:tcPr><w:tcW w:w=\"{}\" w:type=\"dxa\"/></w:tcPr><w:p><w:r>{}<w:t xml:space=\"preserve\">{}</w:t></w:r></w:p></w:tc>",
        width,
        rpr,
        xml_escape(text)
    )
}

fn table(rows: &[String], widths: &[u32]) -> String {
    let border = |side: &str| format!("<w:{side} w:val=\"single\" w:sz=\"4\" w:space=\"0\" w:color=\"000000\"/>");
    let borders: String = ["top", "left", "bottom", "right", "insideH", "insideV"]
        .into_iter()
        .map(border)
        .collect();
    let grid: String = widths
        .iter()
        .map(|w| format!("<w:gridCol w:w=\"{}\"/>", w))
        .collect();
    format!(
        "<w:tbl><w:tblPr><w:tblW w:w=\"5000\" w:type=\"pct\"/><w:tblBorders>{}</w:tblBorders><w:tblLayout w:type=\"fixed\"/></w:tblPr><w:tblGrid>{}</w:tblGrid>{}</w:tbl>",
        borders,
        grid,
        rows.concat()
    )
}

fn info_table(profile: &StudentProfile) -> String {
    let usable = PAGE_W_TWIPS - 2 * MARGIN_TWIPS;
    let label_w = usable * 2 / 5;
    let value_w = usable - label_w;
    let pairs = [
        ("Nome do Aluno", profile.full_name.clone()),
        ("Data de Nascimento", profile.birth_date_display()),
        ("Sexo", profile.sex.clone()),
        ("Filiação (Pai e Mãe)", profile.filiation_line()),
        (
            "Naturalidade / Estado / Nacionalidade",
            profile.origin_line(),
        ),
        ("Ano / Série", profile.grade_level.clone()),
    ];
    let rows: Vec<String> = pairs
        .iter()
        .map(|(label, value)| {
            format!(
                "<w:tr>{}{}</w:tr>",
                cell(label, true, label_w, None),
                cell(value, false, value_w, None)
            )
        })
        .collect();
    table(&rows, &[label_w, value_w])
}

fn grades_widths(n_cols: usize) -> Vec<u32> {
    let usable = PAGE_W_TWIPS - 2 * MARGIN_TWIPS;
    if n_cols < 2 {
        return vec![usable];
    }
    let subject_w = usable * 22 / 100;
    let rest = (usable - subject_w) / (n_cols as u32 - 1);
    let mut widths = vec![subject_w];
    widths.extend(std::iter::repeat(rest).take(n_cols - 1));
    widths
}

fn grades_table(grades: &GradeTable) -> String {
    let widths = grades_widths(grades.header.len());
    let mut rows = Vec::with_capacity(grades.rows.len() + 1);
    let header: String = grades
        .header
        .iter()
        .zip(&widths)
        .map(|(h, w)| cell(h, true, *w, Some(16)))
        .collect();
    rows.push(format!(
        "<w:tr><w:trPr><w:tblHeader/></w:trPr>{}</w:tr>",
        header
    ));
    for row in &grades.rows {
        let cells: String = row
            .texts()
            .iter()
            .zip(&widths)
            .map(|(t, w)| cell(t, false, *w, Some(18)))
            .collect();
        rows.push(format!("<w:tr>{}</w:tr>", cells));
    }
    table(&rows, &widths)
}

fn document_xml(profile: &StudentProfile, grades: &GradeTable) -> String {
    let body = [
        paragraph(grades.view.title(), Some("Heading1")),
        paragraph(" ", None),
        info_table(profile),
        paragraph(" ", None),
        paragraph(GRADES_HEADING, Some("Heading2")),
        grades_table(grades),
    ]
    .concat();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}<w:sectPr><w:pgSz w:w=\"{}\" w:h=\"{}\"/><w:pgMar w:top=\"{m}\" w:right=\"{m}\" w:bottom=\"{m}\" w:left=\"{m}\" w:header=\"708\" w:footer=\"708\" w:gutter=\"0\"/></w:sectPr></w:body></w:document>",
        body,
        PAGE_W_TWIPS,
        PAGE_H_TWIPS,
        m = MARGIN_TWIPS
    )
}

fn core_props_xml(title: &str) -> String {
    let created = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<cp:coreProperties xmlns:cp=\"http://schemas.openxmlformats.org/package/2006/metadata/core-properties\" xmlns:dc=\"http://purl.org/dc/elements/1.1/\" xmlns:dcterms=\"http://purl.org/dc/terms/\" xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\"><dc:title>{}</dc:title><dcterms:created xsi:type=\"dcterms:W3CDTF\">{}</dcterms:created></cp:coreProperties>",
        xml_escape(title),
        created
    )
}

/// Builds the word-processor package for one student and returns its bytes.
pub fn render_docx(profile: &StudentProfile, grades: &GradeTable) -> Result<Vec<u8>, ExportError> {
    let title = format!("{} - {}", grades.view.title(), profile.full_name);
    let entries: [(&str, String); 6] = [
        (CONTENT_TYPES_ENTRY, CONTENT_TYPES_XML.to_string()),
        (ROOT_RELS_ENTRY, ROOT_RELS_XML.to_string()),
        (DOCUMENT_RELS_ENTRY, DOCUMENT_RELS_XML.to_string()),
        (STYLES_ENTRY, STYLES_XML.to_string()),
        (CORE_PROPS_ENTRY, core_props_xml(&title)),
        (DOCUMENT_ENTRY, document_xml(profile, grades)),
    ];

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, content) in &entries {
        zip.start_file(*name, opts)?;
        zip.write_all(content.as_bytes())?;
    }
    Ok(zip.finish()?.into_inner())
}
