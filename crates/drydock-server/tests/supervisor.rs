#![cfg(unix)]

use drydock_server::restart::{Supervisor, RESTART_EXIT_CODE};

#[tokio::test]
async fn relaunches_until_the_child_stops_asking() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("launches.log");
    let marker = dir.path().join("restarted");

    // First launch asks for a restart, the second exits cleanly.
    let script = format!(
        "echo launch >> '{log}'; if [ -f '{marker}' ]; then exit 0; fi; touch '{marker}'; exit {code}",
        log = log.display(),
        marker = marker.display(),
        code = RESTART_EXIT_CODE,
    );

    let code = Supervisor::new("sh", ["-c", script.as_str()])
        .run()
        .await
        .expect("supervise");

    assert_eq!(code, 0);
    assert_eq!(std::fs::read_to_string(&log).unwrap().lines().count(), 2);
}

#[tokio::test]
async fn other_exit_codes_end_supervision() {
    let code = Supervisor::new("sh", ["-c", "exit 3"])
        .run()
        .await
        .expect("supervise");
    assert_eq!(code, 3);
}

#[tokio::test]
async fn environment_is_passed_to_every_launch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("password.txt");
    let script = format!(
        "printf %s \"$DRYDOCK_SESSION_PASSWORD\" > '{}'",
        out.display()
    );

    let code = Supervisor::new("sh", ["-c", script.as_str()])
        .env("DRYDOCK_SESSION_PASSWORD", "0123456789abcdef")
        .run()
        .await
        .expect("supervise");

    assert_eq!(code, 0);
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "0123456789abcdef");
}

#[tokio::test]
async fn missing_program_is_an_error() {
    let err = Supervisor::new("drydock-no-such-binary", Vec::<String>::new())
        .run()
        .await
        .expect_err("should fail to spawn");
    assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
}
