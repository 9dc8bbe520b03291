//! End-to-end tests of the `sparo-launch` binary.

use std::{fs, path::Path, process::Command};

use tempfile::tempdir;

const BIN: &str = env!("CARGO_BIN_EXE_sparo-launch");

fn write_launch_file(dir: &Path) -> String {
    let text = format!(
        r#"
[[jobs]]
name = "e2e"
nproc_per_node = 1
train_data = "data/{{00000..00001}}.tar"
train_num_samples = 100
logs = '{logs}'
dataset_type = "webdataset"
imagenet_val = "val"
warmup = 10
batch_size = 4
wd = 0.1
epochs = 1
workers = 1
accum_freq = 1
model = "ViT-B-16"
precision = "amp"
seed = 0
override_model_config = '{{"use_codebook":true}}'
"#,
        logs = dir.join("logs").display()
    );
    let path = dir.join("launch.toml");
    fs::write(&path, text).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn test_dry_run_prints_command() {
    let dir = tempdir().unwrap();
    let config = write_launch_file(dir.path());

    let output = Command::new(BIN)
        .args(["run", "-c", config.as_str(), "--dry-run"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("torchrun --nproc_per_node 1 -m training.main "));
    assert!(stdout.contains("--train-data 'data/{00000..00001}.tar'"));
    assert!(stdout.contains("--train-num-samples 100"));
    assert!(stdout.contains("--batch-size 4"));
    assert!(stdout.contains("--epochs 1"));
    assert!(stdout.contains(r#"--override-model-config '{"use_codebook":true}'"#));
    // Nothing ran, so nothing was created
    assert!(!dir.path().join("logs").exists());
}

#[test]
fn test_shortcut_flags_override() {
    let dir = tempdir().unwrap();
    let config = write_launch_file(dir.path());

    let output = Command::new(BIN)
        .args([
            "run", "-c", config.as_str(), "--dry-run", "--epochs", "3", "--precision", "amp_bf16",
            "--set", "wd=0.2",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--epochs 3"));
    assert!(stdout.contains("--precision amp_bf16"));
    assert!(stdout.contains("--wd 0.2"));
}

#[test]
fn test_invalid_config_fails() {
    let dir = tempdir().unwrap();
    let config = write_launch_file(dir.path());

    let output = Command::new(BIN)
        .args(["run", "-c", config.as_str(), "--set", "override_model_config='{not json'"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not valid JSON"));
    assert!(!dir.path().join("logs").exists());
}

#[test]
fn test_show_lists_argv() {
    let dir = tempdir().unwrap();
    let config = write_launch_file(dir.path());

    let output = Command::new(BIN)
        .args(["show", "-c", config.as_str()])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert!(lines.contains(&r#"{"use_codebook":true}"#));
    assert!(lines.contains(&"data/{00000..00001}.tar"));
    assert!(stdout.contains("Global batch: 4"));
    assert!(stdout.contains("Precision: amp (weights cast to -, inputs cast to -)"));

    let output = Command::new(BIN)
        .args(["show", "-c", config.as_str(), "--precision", "pure_bf16"])
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Precision: pure_bf16 (weights cast to -, inputs cast to bfloat16)"));
}

#[test]
fn test_list() {
    let dir = tempdir().unwrap();
    let config = write_launch_file(dir.path());

    let output = Command::new(BIN)
        .args(["list", "-c", config.as_str()])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "e2e: ViT-B-16, 1 epoch(s), batch 4 [codebook]"
    );
}

#[cfg(unix)]
#[test]
fn test_exit_code_matches_child() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let config = write_launch_file(dir.path());

    // Stand-in for torchrun that records its arguments and fails
    let fake = dir.path().join("fake-torchrun");
    let argv = dir.path().join("argv.txt");
    fs::write(
        &fake,
        format!("#!/bin/sh\nprintf '%s\\n' \"$@\" > '{}'\nexit 7\n", argv.display()),
    )
    .unwrap();
    fs::set_permissions(&fake, fs::Permissions::from_mode(0o755)).unwrap();

    let status = Command::new(BIN)
        .args(["run", "-c", config.as_str(), "--program"])
        .arg(&fake)
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(7));

    let received = fs::read_to_string(&argv).unwrap();
    let received: Vec<&str> = received.lines().collect();
    assert_eq!(&received[..4], ["--nproc_per_node", "1", "-m", "training.main"]);
    assert!(received.contains(&r#"{"use_codebook":true}"#));
    assert!(dir.path().join("logs").is_dir());
}

#[test]
fn test_shipped_config_usage_lines() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
    let text = fs::read_to_string(root.join("configs/codebook.toml")).unwrap();
    let usages: Vec<Vec<&str>> = text
        .lines()
        .filter_map(|l| l.trim_start_matches('#').trim().strip_prefix("sparo-launch "))
        .map(|l| l.split_whitespace().collect())
        .collect();
    assert_eq!(usages.len(), 2);

    for mut args in usages {
        // Never start a real training run
        if !args.contains(&"--dry-run") {
            args.push("--dry-run");
        }
        let output = Command::new(BIN)
            .current_dir(&root)
            .args(&args)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "{args:?}: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains(r#"--override-model-config '{"use_codebook":true}'"#));
    }
}

#[test]
fn test_errors_use_readable_messages() {
    let dir = tempdir().unwrap();
    let config = write_launch_file(dir.path());

    let output = Command::new(BIN)
        .args(["show", "-c", config.as_str(), "--set", "batch_size=0"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("job 'e2e': `batch_size` must be a positive integer"));
    assert!(!stderr.contains("NotPositive"));

    let output = Command::new(BIN)
        .args(["show", "-c", config.as_str(), "-j", "nope"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(
        String::from_utf8_lossy(&output.stderr).contains("no job named 'nope' (available: e2e)")
    );
}

#[test]
fn test_show_rejects_overflowing_batch() {
    let dir = tempdir().unwrap();
    let config = write_launch_file(dir.path());

    let output = Command::new(BIN)
        .args([
            "show", "-c", config.as_str(), "--set", "batch_size=4611686018427387904",
            "--set", "nproc_per_node=8",
        ])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("overflows"));
}

#[test]
fn test_string_fields_accept_bare_values() {
    let dir = tempdir().unwrap();
    let config = write_launch_file(dir.path());

    let output = Command::new(BIN)
        .args([
            "run", "-c", config.as_str(), "--dry-run", "--set", "model=2024", "--set",
            "imagenet_val=inf",
        ])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--model 2024"));
    assert!(stdout.contains("--imagenet-val inf"));
}
