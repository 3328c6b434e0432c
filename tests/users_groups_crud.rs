use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
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
    let exe = env!("CARGO_BIN_EXE_notasd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn notasd");
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
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert!(
        !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

#[test]
fn crud_validation_and_blocked_deletion() {
    let workspace = temp_dir("notasd-crud");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({
            "userName": "ana.ruiz@school.test",
            "firstName": "Ana",
            "lastName": "Ruiz",
            "phone": "5551234567",
            "address": "Calle 10 # 20-30",
            "isStudent": false,
            "isTeacher": true,
        }),
    )["user"]["id"]
        .as_i64()
        .expect("teacher id");
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "users.register",
        json!({
            "userName": "luis.mora@school.test",
            "firstName": "Luis",
            "lastName": "Mora",
            "phone": "5551234567",
            "address": "Calle 10 # 20-30",
            "password": "hunter22",
        }),
    )["user"]["id"]
        .as_i64()
        .expect("student id");

    // Duplicate user name.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "4",
        "users.create",
        json!({
            "userName": "ana.ruiz@school.test",
            "firstName": "Otra",
            "lastName": "Ruiz",
            "phone": "5551234567",
            "address": "Calle 10 # 20-30",
            "isStudent": true,
            "isTeacher": false,
        }),
    );
    assert_eq!(code, "validation");

    // Field validation: short address.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "5",
        "users.create",
        json!({
            "userName": "sara.gil@school.test",
            "firstName": "Sara",
            "lastName": "Gil",
            "phone": "5551234567",
            "address": "short",
            "isStudent": true,
            "isTeacher": false,
        }),
    );
    assert_eq!(code, "validation");

    // A student cannot own a group.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "6",
        "groups.create",
        json!({ "description": "Mathematics 8A", "userId": student }),
    );
    assert_eq!(code, "validation");

    let group_id = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "groups.create",
        json!({ "description": "Mathematics 8A", "userId": teacher }),
    )["group"]["id"]
        .as_i64()
        .expect("group id");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "8",
        "groups.create",
        json!({ "description": "Mathematics 8A", "userId": teacher }),
    );
    assert_eq!(code, "validation");

    let detail_id = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "enrollment.add",
        json!({ "groupId": group_id, "userId": student }),
    )["groupDetailId"]
        .as_i64()
        .expect("detail id");

    // Deletion is blocked while dependents exist.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "10",
        "users.delete",
        json!({ "userId": teacher }),
    );
    assert_eq!(code, "validation");
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "11",
        "users.delete",
        json!({ "userId": student }),
    );
    assert_eq!(code, "validation");
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "12",
        "groups.delete",
        json!({ "groupId": group_id }),
    );
    assert_eq!(code, "validation");

    // Dashboard views before teardown.
    let for_teacher = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "groups.forUser",
        json!({ "userId": teacher }),
    );
    assert_eq!(for_teacher["myGroups"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(
        for_teacher["mySubjects"].as_array().map(|a| a.len()),
        Some(0)
    );
    let for_student = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "groups.forUser",
        json!({ "userId": student }),
    );
    assert_eq!(for_student["myGroups"].as_array().map(|a| a.len()), Some(0));
    assert_eq!(
        for_student["mySubjects"].as_array().map(|a| a.len()),
        Some(1)
    );
    assert_eq!(
        for_student["mySubjects"][0]["description"].as_str(),
        Some("Mathematics 8A")
    );

    let details = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "groups.details",
        json!({ "groupId": group_id }),
    );
    assert_eq!(details["details"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(
        details["details"][0]["fullName"].as_str(),
        Some("Luis Mora")
    );

    // Rename propagates to the identity store: the student can still
    // sign in with the same password under the new address.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "users.update",
        json!({
            "userId": student,
            "userName": "luis.mora@newschool.test",
            "firstName": "Luis",
            "lastName": "Mora",
            "phone": "5551234567",
            "address": "Calle 10 # 20-30",
            "isStudent": true,
            "isTeacher": false,
        }),
    );
    assert_eq!(
        updated["user"]["userName"].as_str(),
        Some("luis.mora@newschool.test")
    );
    let login = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "auth.login",
        json!({ "email": "luis.mora@newschool.test", "password": "hunter22" }),
    );
    assert_eq!(login["user"]["id"].as_i64(), Some(student));

    // Teardown in dependency order now succeeds.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "enrollment.remove",
        json!({ "groupDetailId": detail_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "19",
        "groups.delete",
        json!({ "groupId": group_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "20",
        "users.delete",
        json!({ "userId": teacher }),
    );

    let users = request_ok(&mut stdin, &mut reader, "21", "users.list", json!({}));
    assert_eq!(users["users"].as_array().map(|a| a.len()), Some(1));
    let groups = request_ok(&mut stdin, &mut reader, "22", "groups.list", json!({}));
    assert_eq!(groups["groups"].as_array().map(|a| a.len()), Some(0));

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "23",
        "users.get",
        json!({ "userId": teacher }),
    );
    assert_eq!(code, "not_found");
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "24",
        "groups.get",
        json!({ "groupId": group_id }),
    );
    assert_eq!(code, "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn requests_before_workspace_selection_are_refused() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "1",
        "users.list",
        json!({}),
    );
    assert_eq!(code, "no_workspace");
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "2",
        "grades.compute",
        json!({ "groupId": 1, "userId": 1 }),
    );
    assert_eq!(code, "no_workspace");

    // Unknown methods answer not_implemented.
    let value = request(
        &mut stdin,
        &mut reader,
        "3",
        "grades.recalculateEverything",
        json!({}),
    );
    assert_eq!(value["error"]["code"].as_str(), Some("not_implemented"));

    drop(stdin);
    let _ = child.wait();
}
