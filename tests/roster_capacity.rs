use serde_json::json;
use std::io::{BufRead, BufReader, Write};
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

/// Opens the workspace once so the schema exists, then bulk-inserts students.
fn seed_students(workspace: &Path, n: usize) {
    let conn = rusqlite::Connection::open(workspace.join("boletim.sqlite3")).expect("open db");
    conn.execute_batch("BEGIN").expect("begin");
    for i in 0..n {
        let id = format!("seed-{i}");
        let profile = json!({
            "id": id,
            "nome": format!("Aluno {i:03}"),
            "dataNascimento": "2014-01-01",
            "anoSerie": "4º ano"
        });
        conn.execute(
            "INSERT INTO students(id, sort_order, profile_json, created_at) VALUES(?, ?, ?, ?)",
            (&id, i as i64, profile.to_string(), "2025-01-01T00:00:00Z"),
        )
        .expect("insert student");
    }
    conn.execute_batch("COMMIT").expect("commit");
}

fn valid_profile(name: &str) -> serde_json::Value {
    json!({ "nome": name, "dataNascimento": "2013-06-15", "anoSerie": "6º ano" })
}

#[test]
fn roster_at_capacity_rejects_the_next_student() {
    let workspace = temp_dir("boletim-capacity");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_students(&workspace, 499);

    let last_fit = request(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        valid_profile("Quingentésimo Aluno"),
    );
    assert_eq!(last_fit["ok"], json!(true), "{}", last_fit);

    let listed = request(&mut stdin, &mut reader, "3", "students.list", json!({}));
    assert_eq!(listed["result"]["count"], json!(500));

    let rejected = request(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        valid_profile("Aluno Excedente"),
    );
    assert_eq!(rejected["ok"], json!(false));
    assert_eq!(rejected["error"]["code"], json!("roster_full"));
    assert_eq!(rejected["error"]["details"]["capacity"], json!(500));

    let after = request(
        &mut stdin,
        &mut reader,
        "5",
        "students.list",
        json!({ "search": "excedente" }),
    );
    assert_eq!(after["result"]["count"], json!(500));
    assert_eq!(after["result"]["students"], json!([]));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn create_requires_name_birth_date_and_grade_level() {
    let workspace = temp_dir("boletim-required");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let missing = request(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "nome": "Sem Data", "anoSerie": "" }),
    );
    assert_eq!(missing["error"]["code"], json!("missing_required_fields"));
    assert_eq!(
        missing["error"]["details"]["missing"],
        json!(["dataNascimento", "anoSerie"])
    );

    let listed = request(&mut stdin, &mut reader, "3", "students.list", json!({}));
    assert_eq!(listed["result"]["count"], json!(0));

    let created = request(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        valid_profile("Beatriz Nunes"),
    );
    let student = &created["result"]["student"];
    assert_eq!(student["nacionalidade"], json!("Brasileira"));
    assert_eq!(student["escola"], json!("ESCOLA MUNICIPAL JOAQUIM DIAS ALMEIDA"));

    // The new student is selected right away.
    let record = request(&mut stdin, &mut reader, "5", "record.get", json!({}));
    assert_eq!(record["result"]["student"]["nome"], json!("Beatriz Nunes"));
    assert_eq!(record["result"]["mode"], json!("viewing"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn deleting_the_selected_student_clears_the_selection() {
    let workspace = temp_dir("boletim-delete");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        valid_profile("Caio Prado"),
    );
    let id = created["result"]["student"]["id"]
        .as_str()
        .expect("id")
        .to_string();

    let deleted = request(
        &mut stdin,
        &mut reader,
        "3",
        "students.delete",
        json!({ "studentId": id }),
    );
    assert_eq!(deleted["ok"], json!(true));

    let record = request(&mut stdin, &mut reader, "4", "record.get", json!({}));
    assert_eq!(record["error"]["code"], json!("no_student_selected"));
    assert_eq!(record["error"]["details"]["redirect"], json!("list"));
    assert_eq!(
        record["error"]["message"],
        json!("Por favor, selecione um aluno da lista primeiro.")
    );

    let again = request(
        &mut stdin,
        &mut reader,
        "5",
        "students.delete",
        json!({ "studentId": id }),
    );
    assert_eq!(again["error"]["code"], json!("not_found"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
