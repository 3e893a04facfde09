//! End-to-end runs of the multiplanet binary against sweeps of shell "simulators".

use assert_cmd::Command;
use predicates::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tempfile::{tempdir, TempDir};

fn multiplanet(root: &Path) -> Command {
    #[allow(deprecated)]
    let mut command = Command::cargo_bin("multiplanet").unwrap();
    command.current_dir(root).env_remove("RUST_LOG");
    command
}

/// sweep with the given simulation folders below `root/sims`
fn create_sweep(simulations: &[&str]) -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    // the binary resolves paths from its working directory, which has no symlinks
    let root = dir.path().canonicalize().unwrap();

    fs::write(
        root.join("vspace.in"),
        "srcfolder .\ndestfolder sims\nsPrimaryFile vpl.in\nsBodyFile earth.in\n",
    )
    .unwrap();

    for name in simulations {
        let simulation = root.join("sims").join(name);
        fs::create_dir_all(&simulation).unwrap();
        fs::write(simulation.join("vpl.in"), "sSystemName solar\n").unwrap();
        fs::write(simulation.join("earth.in"), "sName earth\n").unwrap();
    }

    (dir, root)
}

fn write_config(root: &Path, script: &str) {
    let config = format!(
        "exec: /bin/sh\nparams: [\"-c\", \"{script}\"]\nhelp_params: [\"-c\", \"echo simulator help\"]\n"
    );
    fs::write(root.join("simulator.yaml"), config).unwrap();
}

fn ledger_codes(root: &Path) -> Vec<String> {
    fs::read_to_string(root.join(".sims"))
        .unwrap()
        .lines()
        .skip(2)
        .take_while(|line| *line != "THE END")
        .map(|line| line.rsplit(' ').next().unwrap().to_string())
        .collect()
}

#[test]
fn runs_every_simulation_once() {
    let (_dir, root) = create_sweep(&["a", "b", "c"]);
    write_config(&root, "echo ran >> marker");

    multiplanet(&root)
        .args(["run", "vspace.in", "-c", "2", "--config", "simulator.yaml"])
        .assert()
        .success();

    assert_eq!(ledger_codes(&root), vec!["1", "1", "1"]);

    for name in ["a", "b", "c"] {
        let simulation = root.join("sims").join(name);
        assert_eq!(
            fs::read_to_string(simulation.join("marker")).unwrap(),
            "ran\n"
        );
        assert!(simulation.join("vplanet_log").is_file());
    }
}

#[test]
fn finished_sweep_is_not_run_again() {
    let (_dir, root) = create_sweep(&["a"]);
    write_config(&root, "echo ran >> marker");

    for _ in 0..2 {
        multiplanet(&root)
            .args(["run", "vspace.in", "--config", "simulator.yaml"])
            .assert()
            .success();
    }

    let marker = root.join("sims/a/marker");
    assert_eq!(fs::read_to_string(marker).unwrap(), "ran\n");
}

#[test]
fn forced_restart_runs_everything_again() {
    let (_dir, root) = create_sweep(&["a"]);
    write_config(&root, "echo ran >> marker");

    multiplanet(&root)
        .args(["run", "vspace.in", "--config", "simulator.yaml"])
        .assert()
        .success();
    multiplanet(&root)
        .args(["run", "vspace.in", "--force", "--config", "simulator.yaml"])
        .assert()
        .success();

    // outputs were cleaned before the second run
    let marker = root.join("sims/a/marker");
    assert_eq!(fs::read_to_string(marker).unwrap(), "ran\n");
    assert_eq!(ledger_codes(&root), vec!["1"]);
}

#[test]
fn interrupted_sweep_resumes() {
    let (_dir, root) = create_sweep(&["a", "b", "c"]);
    write_config(&root, "echo ran >> marker");

    let sims = root.join("sims");
    let ledger = format!(
        "Vspace File: {}\nTotal Number of Simulations: 3\n{} 1\n{} 0\n",
        root.join("vspace.in").display(),
        sims.join("a").display(),
        sims.join("b").display(),
    );
    fs::write(root.join(".sims"), ledger).unwrap();

    multiplanet(&root)
        .args(["run", "vspace.in", "--config", "simulator.yaml"])
        .assert()
        .success();

    assert_eq!(ledger_codes(&root), vec!["1", "1", "1"]);
    assert!(!sims.join("a/marker").exists());
    assert!(sims.join("b/marker").is_file());
    assert!(sims.join("c/marker").is_file());
}

#[test]
fn missing_destination_writes_nothing() {
    let dir = tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    fs::write(root.join("vspace.in"), "destfolder nowhere\n").unwrap();
    write_config(&root, "true");

    multiplanet(&root)
        .args(["run", "vspace.in", "--config", "simulator.yaml"])
        .assert()
        .failure();

    assert!(!root.join(".nowhere").exists());
}

#[test]
fn status_reports_progress() {
    let (_dir, root) = create_sweep(&["a", "b"]);
    write_config(&root, "true");

    multiplanet(&root)
        .args(["status", "vspace.in"])
        .assert()
        .failure();

    multiplanet(&root)
        .args(["run", "vspace.in", "--config", "simulator.yaml"])
        .assert()
        .success();

    multiplanet(&root)
        .args(["status", "vspace.in"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Number of Simulations completed: 2",
        ))
        .stdout(predicate::str::contains(
            "Number of Simulations remaining: 0",
        ));
}

#[cfg(feature = "archive")]
#[test]
fn archives_finished_simulations() {
    let (_dir, root) = create_sweep(&["a", "b"]);
    write_config(&root, "echo output > solar.log");

    multiplanet(&root)
        .args(["run", "vspace.in", "-c", "2", "-b", "--config", "simulator.yaml"])
        .assert()
        .success();

    assert!(root.join("sims.bpa").is_file());
    assert_eq!(ledger_codes(&root), vec!["1", "1"]);
}

#[test]
fn archive_is_removed_without_archiving() {
    let (_dir, root) = create_sweep(&["a"]);
    write_config(&root, "true");
    fs::write(root.join("sims.bpa"), "stale").unwrap();

    multiplanet(&root)
        .args(["run", "vspace.in", "--config", "simulator.yaml"])
        .assert()
        .success();

    assert!(!root.join("sims.bpa").exists());
}
