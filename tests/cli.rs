use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, Output, Stdio};

fn spawn(args: &[&Path], commands: &[String]) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_sql_clone"))
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn child process");

    {
        let mut stdin = child.stdin.take().expect("Failed to open stdin");
        let script: String = commands.iter().map(|cmd| format!("{}\n", cmd)).collect();
        // the process may exit before reading everything, e.g. after `.exit`
        let _ = stdin.write_all(script.as_bytes());
    }

    child.wait_with_output().expect("Failed to read stdout")
}

fn run_script<S: AsRef<str>>(db: &Path, commands: &[S]) -> Vec<String> {
    let commands: Vec<String> = commands.iter().map(|c| c.as_ref().to_owned()).collect();
    let output = spawn(&[db], &commands[..]);
    assert!(output.status.success());
    String::from_utf8(output.stdout)
        .expect("stdout is not utf-8")
        .split('\n')
        .map(str::to_owned)
        .collect()
}

#[test]
fn database_inserts_and_retrieves_a_row() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_script(
        &dir.path().join("test.db"),
        &["insert 1 user1 person1@example.com", "select", ".exit"],
    );
    assert_eq!(
        output,
        vec![
            "db > Executed.",
            "db > (1, user1, person1@example.com)",
            "Executed.",
            "db > ",
        ]
    );
}

#[test]
fn keeps_data_after_closing_connection() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("test.db");

    let output = run_script(&db, &["insert 1 user1 person1@example.com", ".exit"]);
    assert_eq!(output, vec!["db > Executed.", "db > "]);

    let output = run_script(&db, &["select", ".exit"]);
    assert_eq!(
        output,
        vec!["db > (1, user1, person1@example.com)", "Executed.", "db > "]
    );
}

#[test]
fn prints_error_message_when_table_is_full() {
    let dir = tempfile::tempdir().unwrap();
    let mut commands: Vec<String> = (1..=1401)
        .map(|i| format!("insert {} user{} person{}@example.com", i, i, i))
        .collect();
    commands.push(".exit".into());

    let output = run_script(&dir.path().join("test.db"), &commands[..]);
    let first_full = output
        .iter()
        .position(|line| line == "db > Error: Table full.")
        .expect("table never filled up");
    assert!(first_full > 0);
    assert_eq!(output[first_full - 1], "db > Executed.");
    assert_eq!(output[output.len() - 2], "db > Error: Table full.");
    assert_eq!(output[output.len() - 1], "db > ");
}

#[test]
fn allows_inserting_strings_that_are_the_maximum_length() {
    let dir = tempfile::tempdir().unwrap();
    let username = "a".repeat(32);
    let email = "a".repeat(255);
    let output = run_script(
        &dir.path().join("test.db"),
        &[
            format!("insert 1 {} {}", username, email),
            "select".to_owned(),
            ".exit".to_owned(),
        ],
    );
    assert_eq!(
        output,
        vec![
            "db > Executed.".to_owned(),
            format!("db > (1, {}, {})", username, email),
            "Executed.".to_owned(),
            "db > ".to_owned(),
        ]
    );
}

#[test]
fn prints_error_message_if_strings_are_too_long() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_script(
        &dir.path().join("test.db"),
        &[
            format!("insert 1 {} {}", "a".repeat(33), "a".repeat(256)),
            "select".to_owned(),
            ".exit".to_owned(),
        ],
    );
    assert_eq!(
        output,
        vec!["db > String is too long.", "db > Executed.", "db > "]
    );
}

#[test]
fn prints_an_error_message_if_id_is_negative() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_script(
        &dir.path().join("test.db"),
        &["insert -1 cstack foo@bar.com", "select", ".exit"],
    );
    assert_eq!(
        output,
        vec!["db > ID must be positive.", "db > Executed.", "db > "]
    );
}

#[test]
fn prints_error_message_for_duplicate_id() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_script(
        &dir.path().join("test.db"),
        &[
            "insert 1 user1 person1@example.com",
            "insert 1 user1 person1@example.com",
            "select",
            ".exit",
        ],
    );
    assert_eq!(
        output,
        vec![
            "db > Executed.",
            "db > Error: Duplicate key.",
            "db > (1, user1, person1@example.com)",
            "Executed.",
            "db > ",
        ]
    );
}

#[test]
fn prints_constants() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_script(&dir.path().join("test.db"), &[".constants", ".exit"]);
    assert_eq!(
        output,
        vec![
            "db > Constants:",
            "ROW_SIZE: 293",
            "COMMON_NODE_HEADER_SIZE: 6",
            "LEAF_NODE_HEADER_SIZE: 10",
            "LEAF_NODE_CELL_SIZE: 297",
            "LEAF_NODE_SPACE_FOR_CELLS: 4086",
            "LEAF_NODE_MAX_CELLS: 13",
            "db > ",
        ]
    );
}

#[test]
fn prints_structure_of_a_one_node_btree() {
    let dir = tempfile::tempdir().unwrap();
    let mut commands: Vec<String> = [3, 1, 2]
        .iter()
        .map(|i| format!("insert {} user{} person{}@example.com", i, i, i))
        .collect();
    commands.push(".btree".into());
    commands.push(".exit".into());

    let output = run_script(&dir.path().join("test.db"), &commands[..]);
    assert_eq!(
        output,
        vec![
            "db > Executed.",
            "db > Executed.",
            "db > Executed.",
            "db > Tree:",
            "- leaf (size 3)",
            " - 1",
            " - 2",
            " - 3",
            "db > ",
        ]
    );
}

#[test]
fn prints_structure_of_a_3_leaf_node_btree() {
    let dir = tempfile::tempdir().unwrap();
    let mut commands: Vec<String> = (1..=14)
        .map(|i| format!("insert {} user{} person{}@example.com", i, i, i))
        .collect();
    commands.push(".btree".into());
    commands.push("insert 15 user15 person15@example.com".into());
    commands.push(".exit".into());

    let output = run_script(&dir.path().join("test.db"), &commands[..]);
    let mut expected: Vec<String> = vec!["db > Tree:".into(), "- internal (size 1)".into()];
    expected.push(" - leaf (size 7)".into());
    expected.extend((1..=7).map(|i| format!("  - {}", i)));
    expected.push(" - key 7".into());
    expected.push(" - leaf (size 7)".into());
    expected.extend((8..=14).map(|i| format!("  - {}", i)));
    expected.push("db > Executed.".into());
    expected.push("db > ".into());

    assert_eq!(output[14..], expected[..]);
}

#[test]
fn prints_all_rows_in_a_multi_level_tree() {
    let dir = tempfile::tempdir().unwrap();
    let mut commands: Vec<String> = (1..=15)
        .map(|i| format!("insert {} user{} person{}@example.com", i, i, i))
        .collect();
    commands.push("select".into());
    commands.push(".exit".into());

    let output = run_script(&dir.path().join("test.db"), &commands[..]);
    let mut expected = vec!["db > (1, user1, person1@example.com)".to_owned()];
    expected.extend((2..=15).map(|i| format!("({}, user{}, person{}@example.com)", i, i, i)));
    expected.push("Executed.".into());
    expected.push("db > ".into());

    assert_eq!(output[15..], expected[..]);
}

#[test]
fn unrecognized_input_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_script(
        &dir.path().join("test.db"),
        &[".tables", "delete 1", "insert 1 onlyname", ".exit"],
    );
    assert_eq!(
        output,
        vec![
            "db > Unrecognized command '.tables'",
            "db > Unrecognized keyword at start of 'delete 1'.",
            "db > Syntax error. Could not parse statement.",
            "db > ",
        ]
    );
}

#[test]
fn requires_a_database_filename() {
    let output = spawn(&[], &[".exit".to_owned()]);
    assert!(!output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "Must supply a database filename.\n"
    );
}

#[test]
fn rejects_a_corrupt_file() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("test.db");
    std::fs::write(&db, vec![0u8; 100]).unwrap();

    let output = spawn(&[db.as_path()], &[".exit".to_owned()]);
    assert!(!output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "Db file is not a whole number of pages. Corrupt file.\n"
    );
}

#[test]
fn file_is_a_whole_number_of_pages() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("test.db");
    let commands: Vec<String> = (1..=20)
        .map(|i| format!("insert {} u{} e{}", i, i, i))
        .chain(std::iter::once(".exit".to_owned()))
        .collect();
    run_script(&db, &commands[..]);

    let mut bytes = Vec::new();
    std::fs::File::open(&db)
        .unwrap()
        .read_to_end(&mut bytes)
        .unwrap();
    assert_eq!(bytes.len(), 3 * 4096);
    // page 0 is the root, now an internal node with one key
    assert_eq!(&bytes[..2], &[0, 1]);
    assert_eq!(&bytes[6..10], &[1, 0, 0, 0]);
}
