use serde_json::json;
use std::io::{BufRead, BufReader, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_boletimd");
    let mut child = Command::new(exe)
        .env_remove("BOLETIMD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn boletimd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn read_zip_entry(path: &Path, entry: &str) -> String {
    let bytes = std::fs::read(path).expect("read export");
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("zip archive");
    let mut xml = String::new();
    archive
        .by_name(entry)
        .expect("zip entry")
        .read_to_string(&mut xml)
        .expect("read entry");
    xml
}

/// Workspace with one selected student whose Matemática row is
/// grades 7/8/6/9 and absences 1/0/2/1.
fn open_graded_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &Path,
    name: &str,
) {
    let _ = request(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request(
        stdin,
        reader,
        "create",
        "students.create",
        json!({ "nome": name, "dataNascimento": "2014-08-30", "anoSerie": "5º ano" }),
    );
    assert_eq!(created["ok"], json!(true), "{}", created);
    for (i, (grade, absences)) in [("7", "1"), ("8", "0"), ("6", "2"), ("9", "1")]
        .iter()
        .enumerate()
    {
        for (metric, value) in [("nota", grade), ("faltas", absences)] {
            let resp = request(
                stdin,
                reader,
                &format!("set-{i}-{metric}"),
                "record.setGrade",
                json!({ "subject": "Matemática", "bimester": i + 1, "metric": metric, "value": value }),
            );
            assert_eq!(resp["ok"], json!(true), "{}", resp);
        }
    }
}

#[test]
fn spreadsheet_and_document_agree_on_aggregates() {
    let workspace = temp_dir("boletim-exports-tabular");
    let out_dir = workspace.join("saida");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_graded_student(&mut stdin, &mut reader, &workspace, "Maria da Silva Santos");

    let xlsx = request(
        &mut stdin,
        &mut reader,
        "x",
        "exports.xlsx",
        json!({ "view": "report", "outDir": out_dir.to_string_lossy() }),
    );
    assert_eq!(
        xlsx["result"]["filename"],
        json!("boletim_Maria_da_Silva_Santos.xlsx")
    );
    let docx = request(
        &mut stdin,
        &mut reader,
        "d",
        "exports.docx",
        json!({ "view": "report", "outDir": out_dir.to_string_lossy() }),
    );
    assert_eq!(
        docx["result"]["filename"],
        json!("boletim_Maria_da_Silva_Santos.docx")
    );

    let sheet = read_zip_entry(
        &out_dir.join("boletim_Maria_da_Silva_Santos.xlsx"),
        "xl/worksheets/sheet1.xml",
    );
    assert!(sheet.contains("<v>7.5</v>"), "{}", sheet);
    assert!(sheet.contains("<v>4</v>"), "{}", sheet);

    let document = read_zip_entry(
        &out_dir.join("boletim_Maria_da_Silva_Santos.docx"),
        "word/document.xml",
    );
    assert!(document.contains(">7.5<"));
    assert!(document.contains(">4<"));
    assert!(document.contains("Boletim Escolar"));
    assert!(document.contains("30/08/2014"));
    assert!(document.contains("Média Final"));

    // No temporary siblings are left behind.
    let leftovers: Vec<_> = std::fs::read_dir(&out_dir)
        .expect("read out dir")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
        .collect();
    assert!(leftovers.is_empty());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn export_without_selection_redirects_to_list() {
    let workspace = temp_dir("boletim-exports-noselect");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    for (i, method) in ["exports.xlsx", "exports.docx", "exports.pdf", "reports.gradeTable"]
        .iter()
        .enumerate()
    {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("{i}"),
            method,
            json!({ "view": "record" }),
        );
        assert_eq!(resp["error"]["code"], json!("no_student_selected"));
        assert_eq!(resp["error"]["details"], json!({ "redirect": "list" }));
    }
    assert!(!workspace.join("exports").exists());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn pdf_export_embeds_the_captured_page() {
    let workspace = temp_dir("boletim-exports-pdf");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_graded_student(&mut stdin, &mut reader, &workspace, "Ana Clara");

    let capture = workspace.join("ficha.png");
    image::RgbaImage::from_pixel(40, 60, image::Rgba([30, 60, 90, 255]))
        .save(&capture)
        .expect("write capture png");

    let too_small = request(
        &mut stdin,
        &mut reader,
        "s",
        "exports.pdf",
        json!({ "view": "record", "imagePath": capture.to_string_lossy(), "scale": 1 }),
    );
    assert_eq!(too_small["error"]["code"], json!("bad_params"));

    // An oversized factor is refused and the daemon keeps serving.
    for (i, scale) in [7u64, 100_000].iter().enumerate() {
        let too_big = request(
            &mut stdin,
            &mut reader,
            &format!("b{i}"),
            "exports.pdf",
            json!({ "view": "report", "imagePath": capture.to_string_lossy(), "scale": scale }),
        );
        assert_eq!(too_big["error"]["code"], json!("bad_params"), "{}", too_big);
    }
    let health = request(&mut stdin, &mut reader, "h", "health", json!({}));
    assert_eq!(health["ok"], json!(true));

    let resp = request(
        &mut stdin,
        &mut reader,
        "p",
        "exports.pdf",
        json!({ "view": "record", "imagePath": capture.to_string_lossy() }),
    );
    assert_eq!(resp["ok"], json!(true), "{}", resp);
    assert_eq!(resp["result"]["filename"], json!("ficha_Ana_Clara.pdf"));
    assert_eq!(resp["result"]["scale"], json!(3));
    // 40x60 is taller than A4 once scaled to width, so the record view fits it.
    assert_eq!(resp["result"]["placement"]["heightMm"], json!(297.0));
    assert_eq!(resp["result"]["placement"]["yMm"], json!(0.0));

    let path = workspace.join("exports").join("ficha_Ana_Clara.pdf");
    let bytes = std::fs::read(&path).expect("read pdf");
    assert!(bytes.starts_with(b"%PDF-1.4"));
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("/Width 120 /Height 180"));
    assert!(text.trim_end().ends_with("%%EOF"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
