use super::*;

#[tokio::test]
#[ignore = "requires python3"]
async fn silent_infinite_loop_times_out() {
    let started = std::time::Instant::now();
    let mut bed = TestBed::start("spin", "while True:\n    pass\n");

    let (before, exit_code) = bed.recv_until_complete().await;
    let elapsed = started.elapsed();

    assert_ne!(exit_code, 0);
    assert!(
        elapsed <= Duration::from_millis(4500),
        "termination took {elapsed:?}"
    );
    assert!(
        stderr_text(&before).contains("timed out"),
        "expected a timeout notice, got: {:?}",
        stderr_text(&before)
    );
    assert!(!contains_repl_ready(&before));
}

#[tokio::test]
#[ignore = "requires python3"]
async fn custom_wall_clock_limit_applies() {
    let started = std::time::Instant::now();
    let limits = ResourceLimits::default().with_wall_clock_limit(1.0);
    let mut bed = TestBed::start_with_limits("fast", "while True:\n    pass\n", limits);

    let (before, exit_code) = bed.recv_until_complete().await;

    assert_ne!(exit_code, 0);
    assert!(started.elapsed() <= Duration::from_millis(2500));
    assert!(stderr_text(&before).contains("timed out"));
}

#[tokio::test]
#[ignore = "requires python3"]
async fn runaway_identical_output_is_stopped() {
    let mut bed = TestBed::start("flood", "while True:\n    print(\"x\")\n");

    let (before, exit_code) = bed.recv_until_complete().await;

    assert_ne!(exit_code, 0);
    assert!(!contains_repl_ready(&before));

    // Some output made it through before a cap notice stopped the flood
    let stdout = stdout_text(&before);
    assert!(stdout.contains("x\n"));

    let notices = stderr_text(&before);
    assert!(
        notices.contains("identical") || notices.contains("output"),
        "expected a cap notice, got: {notices:?}"
    );
}

#[tokio::test]
#[ignore = "requires python3"]
async fn fast_script_is_unaffected_by_caps() {
    let mut bed = TestBed::start(
        "burst",
        "for i in range(50):\n    print(i)\n",
    );

    let (before, _) = bed
        .recv_until(|payload| matches!(payload, Payload::ReplReady { .. }))
        .await;

    let expected: String = (0..50).map(|i| format!("{i}\n")).collect();
    assert_eq!(stdout_text(&before), expected);
    assert_eq!(stderr_text(&before), "");

    bed.stop();
    let (_, exit_code) = bed.recv_until_complete().await;
    assert_eq!(exit_code, 0);
}

#[tokio::test]
#[ignore = "requires python3"]
async fn memory_hog_is_contained() {
    // Allocating far past the address-space cap must fail inside the
    // child, not take the host down.
    let mut bed = TestBed::start(
        "hog",
        "data = bytearray(512 * 1024 * 1024)\nprint(\"allocated\")\n",
    );

    let (before, exit_code) = bed.recv_until_complete().await;

    assert_ne!(exit_code, 0);
    assert!(!stdout_text(&before).contains("allocated"));
    assert!(
        stderr_text(&before).contains("MemoryError"),
        "expected a MemoryError traceback, got: {:?}",
        stderr_text(&before)
    );
}
