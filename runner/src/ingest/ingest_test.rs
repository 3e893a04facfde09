use super::{archive_key, IngestorError, RunContext};
use std::{fs, path::Path};
use tempfile::TempDir;

fn context() -> RunContext {
    RunContext {
        system_name: "solarsys".to_owned(),
        bodies: vec!["sun".to_owned(), "earth".to_owned()],
        log_file: "solarsys.log".to_owned(),
        in_files: vec!["vpl.in".to_owned(), "earth.in".to_owned()],
    }
}

#[test]
pub fn key_is_folder_name() {
    assert_eq!(archive_key(Path::new("/data/sims/sim_007")), "sim_007");
}

#[test]
pub fn gather_collects_outputs_and_inputs() {
    let dir = TempDir::new().unwrap();
    let simulation = dir.path().join("sim_001");
    fs::create_dir(&simulation).unwrap();
    fs::write(simulation.join("solarsys.log"), "log").unwrap();
    fs::write(simulation.join("solarsys.earth.forward"), "0 1\n").unwrap();
    fs::write(simulation.join("vpl.in"), "sSystemName solarsys").unwrap();
    fs::write(simulation.join("earth.in"), "sName earth").unwrap();

    let entry = context().gather(&simulation).unwrap();

    assert_eq!(entry.key, "sim_001");
    assert_eq!(
        entry
            .files
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>(),
        vec!["solarsys.log", "solarsys.earth.forward", "vpl.in", "earth.in"]
    );
    assert_eq!(entry.files[1].1, b"0 1\n");
}

#[test]
pub fn gather_without_log_fails() {
    let dir = TempDir::new().unwrap();

    assert!(matches!(
        context().gather(dir.path()),
        Err(IngestorError::MissingOutput(_))
    ));
}

#[test]
pub fn file_names_are_gathered_once() {
    let dir = TempDir::new().unwrap();
    let simulation = dir.path().join("sim_001");
    fs::create_dir(&simulation).unwrap();
    fs::write(simulation.join("solarsys.log"), "log").unwrap();
    fs::write(simulation.join("vpl.in"), "sSystemName solarsys").unwrap();

    let context = RunContext {
        in_files: vec![
            "vpl.in".to_owned(),
            "solarsys.log".to_owned(),
            "vpl.in".to_owned(),
        ],
        ..context()
    };
    let entry = context.gather(&simulation).unwrap();

    assert_eq!(
        entry
            .files
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>(),
        vec!["solarsys.log", "vpl.in"]
    );
}
