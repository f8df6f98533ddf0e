use super::*;

#[tokio::test]
#[ignore = "requires python3"]
async fn repl_inherits_script_bindings() {
    let mut bed = TestBed::start("inherit", "x = 7\n");

    bed.recv_until(|payload| matches!(payload, Payload::ReplReady { .. }))
        .await;

    bed.send_input("print(x * 6)");
    let (_, message) = bed
        .recv_until(|payload| matches!(payload, Payload::Stdout { .. }))
        .await;
    match message.payload {
        Payload::Stdout { text } => assert_eq!(text, "42\n"),
        _ => unreachable!(),
    }

    bed.stop();
    let (_, exit_code) = bed.recv_until_complete().await;
    assert_eq!(exit_code, 0);
}

#[tokio::test]
#[ignore = "requires python3"]
async fn repl_expression_results_are_printed() {
    let mut bed = TestBed::start("expr", "word = \"ada\"\n");

    bed.recv_until(|payload| matches!(payload, Payload::ReplReady { .. }))
        .await;

    // A bare expression echoes its repr, like any interactive session
    bed.send_input("word * 2");
    let (_, message) = bed
        .recv_until(|payload| matches!(payload, Payload::Stdout { .. }))
        .await;
    match message.payload {
        Payload::Stdout { text } => assert_eq!(text, "'adaada'\n"),
        _ => unreachable!(),
    }

    bed.stop();
    bed.recv_until_complete().await;
}

#[tokio::test]
#[ignore = "requires python3"]
async fn repl_state_persists_across_submissions() {
    let mut bed = TestBed::start("persist", "total = 0\n");

    bed.recv_until(|payload| matches!(payload, Payload::ReplReady { .. }))
        .await;

    bed.send_input("total = total + 5");
    bed.send_input("print(total)");

    let (_, message) = bed
        .recv_until(|payload| matches!(payload, Payload::Stdout { .. }))
        .await;
    match message.payload {
        Payload::Stdout { text } => assert_eq!(text, "5\n"),
        _ => unreachable!(),
    }

    bed.stop();
    bed.recv_until_complete().await;
}

#[tokio::test]
#[ignore = "requires python3"]
async fn repl_can_read_input() {
    let mut bed = TestBed::start("replinput", "pass\n");

    bed.recv_until(|payload| matches!(payload, Payload::ReplReady { .. }))
        .await;

    // input() inside the interactive phase consumes the next line
    bed.send_input("y = input()");
    bed.send_input("carrots");
    bed.send_input("print(y)");

    let (_, message) = bed
        .recv_until(
            |payload| matches!(payload, Payload::Stdout { text } if text.contains("carrots")),
        )
        .await;
    match message.payload {
        Payload::Stdout { text } => assert_eq!(text, "carrots\n"),
        _ => unreachable!(),
    }

    bed.stop();
    let (_, exit_code) = bed.recv_until_complete().await;
    assert_eq!(exit_code, 0);
}

#[tokio::test]
#[ignore = "requires python3"]
async fn handover_marker_is_never_forwarded() {
    let mut bed = TestBed::start("marker", "x = 1\n");

    bed.recv_until(|payload| matches!(payload, Payload::ReplReady { .. }))
        .await;
    bed.send_input("print(x)");
    bed.recv_until(|payload| matches!(payload, Payload::Stdout { .. }))
        .await;
    bed.stop();
    let (rest, _) = bed.recv_until_complete().await;

    for message in &rest {
        if let Payload::Stdout { text } | Payload::Stderr { text } = &message.payload {
            assert!(
                !text.contains("__REPL_READY__"),
                "handover marker leaked to the client: {text:?}"
            );
        }
    }
}

#[tokio::test]
#[ignore = "requires python3"]
async fn stop_during_script_suppresses_handover() {
    let mut bed = TestBed::start(
        "stopscript",
        "import time\nfor i in range(100):\n    time.sleep(0.05)\n",
    );

    // Stop while the script is still sleeping
    tokio::time::sleep(Duration::from_millis(300)).await;
    bed.stop();

    let (before, exit_code) = bed.recv_until_complete().await;
    assert!(!contains_repl_ready(&before));
    assert_ne!(exit_code, 0);
}

#[tokio::test]
#[ignore = "requires python3"]
async fn repeated_stop_is_idempotent() {
    let mut bed = TestBed::start("stoptwice", "x = 1\n");

    bed.recv_until(|payload| matches!(payload, Payload::ReplReady { .. }))
        .await;

    bed.stop();
    bed.stop();
    let (_, exit_code) = bed.recv_until_complete().await;
    assert_eq!(exit_code, 0);

    // A stop after completion is silently absorbed once the router has
    // retired the entry.
    while bed.router.live_executions() > 0 {
        tokio::task::yield_now().await;
    }
    bed.stop();
    assert!(bed.messages.try_recv().is_err(), "no frame may follow complete");
}
