// crates/slb-exec/tests/rollback.rs
// ============================================================================
// Module: Rollback Tests
// Description: Plan selection, capture budget, and symlink-safe restore.
// Purpose: Verify destructive commands can be snapshotted and undone.
// ============================================================================

//! Rollback capture and restore coverage.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::path::Path;

use slb_core::CommandSpec;
use slb_core::Timestamp;
use slb_exec::RollbackError;
use slb_exec::RollbackPlan;
use slb_exec::capture_rollback;
use slb_exec::plan_rollback;
use slb_exec::restore_rollback;
use tempfile::TempDir;

const NOW: Timestamp = Timestamp::from_unix_millis(10_000_000);
const BUDGET: u64 = 10 * 1024 * 1024;

fn spec(raw: &str, cwd: &Path) -> CommandSpec {
    CommandSpec::new(raw, cwd.to_string_lossy().into_owned(), true)
}

#[test]
fn plan_selection_matches_command_families() {
    let cwd = Path::new("/work");
    assert_eq!(
        plan_rollback(&spec("rm -rf build/ dist", cwd)),
        Some(RollbackPlan::Filesystem {
            paths: vec!["build/".to_string(), "dist".to_string()],
        })
    );
    assert_eq!(plan_rollback(&spec("git reset --hard HEAD~1", cwd)), Some(RollbackPlan::Git));
    assert_eq!(plan_rollback(&spec("git clean -fd", cwd)), Some(RollbackPlan::Git));
    assert_eq!(
        plan_rollback(&spec("kubectl delete deployment web api -n prod", cwd)),
        Some(RollbackPlan::Kubernetes {
            objects: vec![
                ("deployment".to_string(), "web".to_string()),
                ("deployment".to_string(), "api".to_string()),
            ],
            namespace: Some("prod".to_string()),
        })
    );
    assert_eq!(plan_rollback(&spec("git status", cwd)), None);
    assert_eq!(plan_rollback(&spec("rm -rf &&", cwd)), None);
}

#[test]
fn filesystem_capture_and_restore_round_trips_symlinks() {
    let project = TempDir::new().expect("project dir");
    let build = project.path().join("build");
    std::fs::create_dir_all(build.join("nested")).expect("build dirs");
    std::fs::write(build.join("real.txt"), b"payload").expect("real file");
    std::fs::write(build.join("nested/deep.txt"), b"deep").expect("deep file");
    #[cfg(unix)]
    std::os::unix::fs::symlink("real.txt", build.join("link")).expect("symlink");

    let command = spec("rm -rf build/", project.path());
    let plan = plan_rollback(&command).expect("plan selected");
    let rollback_dir = TempDir::new().expect("rollback dir");
    let descriptor = capture_rollback(&plan, &command, rollback_dir.path(), BUDGET, NOW)
        .expect("capture succeeds");
    assert_eq!(descriptor.captured_at, NOW);

    // Simulate the destructive command, then restore.
    std::fs::remove_dir_all(&build).expect("delete build");
    assert!(!build.exists());
    restore_rollback(&descriptor, project.path()).expect("restore succeeds");

    assert_eq!(std::fs::read(build.join("real.txt")).expect("real file"), b"payload");
    assert_eq!(std::fs::read(build.join("nested/deep.txt")).expect("deep file"), b"deep");
    #[cfg(unix)]
    {
        let link = build.join("link");
        let metadata = std::fs::symlink_metadata(&link).expect("link metadata");
        assert!(metadata.file_type().is_symlink());
        let target = std::fs::read_link(&link).expect("link target");
        assert_eq!(target, Path::new("real.txt"));
    }
}

#[cfg(unix)]
#[test]
fn restore_refuses_symlinked_parents() {
    let project = TempDir::new().expect("project dir");
    let build = project.path().join("build");
    std::fs::create_dir_all(&build).expect("build dir");
    std::fs::write(build.join("file.txt"), b"data").expect("file");

    let command = spec("rm -rf build", project.path());
    let plan = plan_rollback(&command).expect("plan selected");
    let rollback_dir = TempDir::new().expect("rollback dir");
    let descriptor = capture_rollback(&plan, &command, rollback_dir.path(), BUDGET, NOW)
        .expect("capture succeeds");

    // An attacker swaps the capture root for a symlink before restore.
    std::fs::remove_dir_all(&build).expect("delete build");
    let outside = TempDir::new().expect("outside dir");
    std::os::unix::fs::symlink(outside.path(), &build).expect("swap to symlink");

    let err = restore_rollback(&descriptor, project.path()).expect_err("restore refused");
    assert!(matches!(err, RollbackError::SymlinkComponent(_)));
    assert_eq!(
        std::fs::read_dir(outside.path()).expect("outside listing").count(),
        0,
        "nothing may be written through the symlink"
    );
}

#[test]
fn capture_refuses_oversized_targets() {
    let project = TempDir::new().expect("project dir");
    let build = project.path().join("build");
    std::fs::create_dir_all(&build).expect("build dir");
    std::fs::write(build.join("big.bin"), vec![0u8; 4 * 1024]).expect("big file");

    let command = spec("rm -rf build", project.path());
    let plan = plan_rollback(&command).expect("plan selected");
    let rollback_dir = TempDir::new().expect("rollback dir");
    let err = capture_rollback(&plan, &command, rollback_dir.path(), 1024, NOW)
        .expect_err("budget enforced");
    assert!(matches!(err, RollbackError::TooLarge { .. }));
}

#[test]
fn capture_with_no_existing_targets_is_refused() {
    let project = TempDir::new().expect("project dir");
    let command = spec("rm -rf missing-dir", project.path());
    let plan = plan_rollback(&command).expect("plan selected");
    let rollback_dir = TempDir::new().expect("rollback dir");
    let err = capture_rollback(&plan, &command, rollback_dir.path(), BUDGET, NOW)
        .expect_err("nothing to capture");
    assert!(matches!(err, RollbackError::NothingToCapture));
}

#[test]
fn git_capture_records_head_branch_and_diff() {
    let repo = TempDir::new().expect("repo dir");
    let run = |arguments: &[&str]| {
        let status = std::process::Command::new("git")
            .args(arguments)
            .current_dir(repo.path())
            .env("GIT_AUTHOR_NAME", "test")
            .env("GIT_AUTHOR_EMAIL", "test@example.invalid")
            .env("GIT_COMMITTER_NAME", "test")
            .env("GIT_COMMITTER_EMAIL", "test@example.invalid")
            .status()
            .expect("git runs");
        assert!(status.success(), "git {arguments:?}");
    };
    run(&["init", "--initial-branch=main", "--quiet"]);
    std::fs::write(repo.path().join("tracked.txt"), b"one\n").expect("tracked file");
    run(&["add", "tracked.txt"]);
    run(&["commit", "--quiet", "-m", "initial"]);
    std::fs::write(repo.path().join("tracked.txt"), b"two\n").expect("edit file");

    let command = spec("git reset --hard", repo.path());
    let plan = plan_rollback(&command).expect("plan selected");
    let rollback_dir = TempDir::new().expect("rollback dir");
    let descriptor = capture_rollback(&plan, &command, rollback_dir.path(), BUDGET, NOW)
        .expect("capture succeeds");
    let capture = descriptor.captures.first().expect("one capture");
    match capture {
        slb_core::RollbackCapture::Git {
            head,
            branch,
            diff_file,
        } => {
            assert_eq!(head.len(), 40);
            assert_eq!(branch, "main");
            let diff = std::fs::read_to_string(rollback_dir.path().join(diff_file))
                .expect("diff file");
            assert!(diff.contains("tracked.txt"));
        }
        other => panic!("unexpected capture {other:?}"),
    }
}
