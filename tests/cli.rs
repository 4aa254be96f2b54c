use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::tempdir;

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dirs");
    }
    fs::write(path, content).expect("write test file");
}

fn run_sorter(args: &[&str]) -> (bool, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_trajectory_sorter"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("run trajectory_sorter");
    (
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).into_owned(),
    )
}

fn tree(root: &Path) -> Vec<(PathBuf, Option<String>)> {
    fn walk(dir: &Path, root: &Path, out: &mut Vec<(PathBuf, Option<String>)>) {
        for entry in fs::read_dir(dir).expect("read dir") {
            let path = entry.expect("entry").path();
            let rel = path.strip_prefix(root).expect("relative").to_path_buf();
            if path.is_dir() {
                out.push((rel, None));
                walk(&path, root, out);
            } else {
                out.push((rel, Some(fs::read_to_string(&path).expect("read file"))));
            }
        }
    }
    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}

fn sample_dataset(root: &Path) {
    let inputs = root.join("T1").join("image_inputs");
    for name in ["2.png", "10.png", "1.jpg", "banner.png"] {
        write_file(&inputs.join(name), name);
    }
    write_file(&root.join("T1").join("T1.log"), "log");
    write_file(&root.join("T1").join("result.json"), "{}");
    write_file(&root.join("T2").join("T2.log"), "no inputs here");
}

#[test]
fn copy_run_produces_trajectory() {
    let dir = tempdir().unwrap();
    sample_dataset(dir.path());

    let (ok, stdout) = run_sorter(&[dir.path().to_str().unwrap()]);
    assert!(ok);

    let trajectory = dir.path().join("T1").join("trajectory");
    assert_eq!(
        fs::read_to_string(trajectory.join("step_0_screenshot.jpg")).unwrap(),
        "1.jpg"
    );
    assert_eq!(
        fs::read_to_string(trajectory.join("step_1_screenshot.png")).unwrap(),
        "2.png"
    );
    assert_eq!(
        fs::read_to_string(trajectory.join("step_2_screenshot.png")).unwrap(),
        "10.png"
    );
    assert_eq!(
        fs::read_to_string(trajectory.join("step_3_screenshot.png")).unwrap(),
        "banner.png"
    );
    assert!(dir.path().join("T1/image_inputs/banner.png").exists());
    assert!(stdout.contains("Found 2 task folder(s)"));
    assert!(stdout.contains("[skip] no image_inputs in T2"));
    assert!(stdout.trim_end().ends_with("Done."));
}

#[test]
fn move_run_removes_emptied_inputs() {
    let dir = tempdir().unwrap();
    sample_dataset(dir.path());

    let (ok, stdout) = run_sorter(&[dir.path().to_str().unwrap(), "--move"]);
    assert!(ok);

    assert!(!dir.path().join("T1/image_inputs").exists());
    assert!(dir.path().join("T1/trajectory/step_3_screenshot.png").exists());
    assert!(dir.path().join("T1/result.json").exists());
    assert!(stdout.contains("removed empty folder"));
}

#[test]
fn dry_run_leaves_tree_untouched() {
    let dir = tempdir().unwrap();
    sample_dataset(dir.path());
    let before = tree(dir.path());

    let (ok, stdout) = run_sorter(&[dir.path().to_str().unwrap(), "--dry-run", "--move"]);
    assert!(ok);

    assert_eq!(tree(dir.path()), before);
    assert!(stdout.contains("[dry-run] move 1.jpg -> trajectory/step_0_screenshot.jpg"));
    assert!(stdout.contains("[dry-run] move banner.png -> trajectory/step_3_screenshot.png"));
}

#[test]
fn missing_root_reports_and_exits_cleanly() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("does-not-exist");

    let (ok, stdout) = run_sorter(&[missing.to_str().unwrap()]);

    assert!(ok);
    assert!(stdout.contains("dataset_root not found or not a directory"));
    assert!(!stdout.contains("Done."));
}

#[test]
fn empty_root_reports_no_tasks() {
    let dir = tempdir().unwrap();

    let (ok, stdout) = run_sorter(&[dir.path().to_str().unwrap()]);

    assert!(ok);
    assert!(stdout.contains("No task folders found under"));
}

#[test]
fn failed_copy_is_reported_and_counted() {
    let dir = tempdir().unwrap();
    sample_dataset(dir.path());
    fs::create_dir_all(dir.path().join("T1/trajectory/step_1_screenshot.png")).unwrap();

    let (ok, stdout) = run_sorter(&[dir.path().to_str().unwrap()]);

    assert!(ok);
    assert!(stdout.contains("[error] copying "), "stdout: {stdout}");
    assert!(stdout.contains("2.png -> "));
    assert!(stdout.contains("1 file(s) failed to copy"));
    let done = stdout.find("Done.").expect("Done. line");
    let failed = stdout.find("failed to copy").expect("failure count line");
    assert!(failed > done);
    assert!(dir.path().join("T1/trajectory/step_3_screenshot.png").is_file());
}

#[test]
fn verbose_echoes_each_transfer() {
    let dir = tempdir().unwrap();
    sample_dataset(dir.path());

    let (ok, stdout) = run_sorter(&[dir.path().to_str().unwrap(), "--verbose"]);

    assert!(ok);
    assert!(stdout.contains("    copy 1.jpg -> trajectory/step_0_screenshot.jpg"));
    assert!(stdout.contains("    copy banner.png -> trajectory/step_3_screenshot.png"));
}
