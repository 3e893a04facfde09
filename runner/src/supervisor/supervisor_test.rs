use super::reap;
use std::process::{Command, Stdio};

#[test]
pub fn reaped_worker_is_stopped() {
    let mut child = Command::new("/bin/sleep")
        .arg("30")
        .stdin(Stdio::piped())
        .spawn()
        .unwrap();
    drop(child.stdin.take());

    reap(0, &mut child);

    let status = child.try_wait().unwrap();
    assert!(matches!(status, Some(status) if !status.success()));
}

#[test]
pub fn reaping_an_exited_worker_is_harmless() {
    let mut child = Command::new("/bin/sh").args(["-c", "exit 0"]).spawn().unwrap();
    child.wait().unwrap();

    reap(0, &mut child);

    assert!(child.try_wait().unwrap().is_some());
}
