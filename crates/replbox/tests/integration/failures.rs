use super::*;

#[tokio::test]
#[ignore = "requires python3"]
async fn syntax_error_reports_and_completes() {
    let mut bed = TestBed::start("syntax", "def (\n");

    let (before, exit_code) = bed.recv_until_complete().await;

    assert_ne!(exit_code, 0);
    assert!(!contains_repl_ready(&before));
    assert!(
        stderr_text(&before).contains("SyntaxError"),
        "expected a SyntaxError, got: {:?}",
        stderr_text(&before)
    );
}

#[tokio::test]
#[ignore = "requires python3"]
async fn runtime_error_shows_only_user_frames() {
    let mut bed = TestBed::start("raise", "x = 1\nprint(x / 0)\n");

    let (before, exit_code) = bed.recv_until_complete().await;
    let stderr = stderr_text(&before);

    assert_ne!(exit_code, 0);
    assert!(!contains_repl_ready(&before));
    assert!(stderr.contains("ZeroDivisionError"), "got: {stderr:?}");
    assert!(stderr.contains("main.py"), "got: {stderr:?}");
    // Frames from the staged driver file are elided
    assert!(!stderr.contains("replbox-driver"), "got: {stderr:?}");
}

#[tokio::test]
#[ignore = "requires python3"]
async fn nonzero_sys_exit_suppresses_handover() {
    let mut bed = TestBed::start("exit2", "import sys\nprint(\"bye\")\nsys.exit(2)\n");

    let (before, exit_code) = bed.recv_until_complete().await;

    assert_eq!(exit_code, 2);
    assert!(!contains_repl_ready(&before));
    assert_eq!(stdout_text(&before), "bye\n");
}

#[tokio::test]
#[ignore = "requires python3"]
async fn clean_sys_exit_still_hands_over() {
    let mut bed = TestBed::start("exit0", "import sys\nprint(\"ok\")\nsys.exit(0)\n");

    let (before, _) = bed
        .recv_until(|payload| matches!(payload, Payload::ReplReady { .. }))
        .await;
    assert_eq!(stdout_text(&before), "ok\n");

    bed.stop();
    let (_, exit_code) = bed.recv_until_complete().await;
    assert_eq!(exit_code, 0);
}

#[tokio::test]
#[ignore = "requires python3"]
async fn script_errors_are_not_engine_errors() {
    let mut bed = TestBed::start("usererr", "raise ValueError(\"student mistake\")\n");

    let (before, exit_code) = bed.recv_until_complete().await;

    assert_ne!(exit_code, 0);
    // The failure arrives as ordinary stderr output, never on the
    // engine's error channel.
    assert!(stderr_text(&before).contains("ValueError"));
    assert!(
        !before
            .iter()
            .any(|message| matches!(message.payload, Payload::Error { .. })),
        "user failures must not surface as engine errors"
    );
}
