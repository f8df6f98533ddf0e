use super::*;

#[tokio::test]
#[ignore = "requires python3"]
async fn hello_world_streams_then_hands_over() {
    let mut bed = TestBed::start("hello", "print(\"hi\")\n");

    let (before, ready) = bed
        .recv_until(|payload| matches!(payload, Payload::ReplReady { .. }))
        .await;

    assert_eq!(stdout_text(&before), "hi\n");
    match ready.payload {
        Payload::ReplReady { prompt } => assert_eq!(prompt, ">>> "),
        _ => unreachable!(),
    }

    // Silence until the client asks for termination
    bed.stop();
    let (_, exit_code) = bed.recv_until_complete().await;
    assert_eq!(exit_code, 0);
}

#[tokio::test]
#[ignore = "requires python3"]
async fn prompt_is_flushed_and_reply_delivered() {
    let mut bed = TestBed::start(
        "prompt",
        "n = input(\"name? \")\nprint(\"hello\", n)\n",
    );

    let (before, request) = bed
        .recv_until(|payload| matches!(payload, Payload::InputRequest { .. }))
        .await;

    // The unterminated prompt fragment reaches the client as stdout
    assert_eq!(stdout_text(&before), "name? ");
    match request.payload {
        Payload::InputRequest { prompt } => assert_eq!(prompt, "name? "),
        _ => unreachable!(),
    }

    bed.send_input("ada");

    let (before_ready, _) = bed
        .recv_until(|payload| matches!(payload, Payload::ReplReady { .. }))
        .await;
    assert_eq!(stdout_text(&before_ready), "hello ada\n");

    bed.stop();
    let (_, exit_code) = bed.recv_until_complete().await;
    assert_eq!(exit_code, 0);
}

#[tokio::test]
#[ignore = "requires python3"]
async fn echo_loop_preserves_input_order() {
    let mut bed = TestBed::start(
        "echo",
        "for _ in range(3):\n    print(input())\n",
    );

    // Pre-queued lines are delivered one per read, never in a burst
    bed.send_input("one");
    bed.send_input("two");
    bed.send_input("three");

    let (before_ready, _) = bed
        .recv_until(|payload| matches!(payload, Payload::ReplReady { .. }))
        .await;
    assert_eq!(stdout_text(&before_ready), "one\ntwo\nthree\n");

    bed.stop();
    let (_, exit_code) = bed.recv_until_complete().await;
    assert_eq!(exit_code, 0);
}

#[tokio::test]
#[ignore = "requires python3"]
async fn unterminated_output_is_flushed_before_handover() {
    let mut bed = TestBed::start("partial", "print(\"loading\", end=\"\")\n");

    let (before, _) = bed
        .recv_until(|payload| matches!(payload, Payload::ReplReady { .. }))
        .await;
    assert_eq!(stdout_text(&before), "loading");

    bed.stop();
    let (_, exit_code) = bed.recv_until_complete().await;
    assert_eq!(exit_code, 0);
}

#[tokio::test]
#[ignore = "requires python3"]
async fn stderr_output_is_forwarded_on_its_own_channel() {
    let mut bed = TestBed::start(
        "stderr",
        "import sys\nsys.stderr.write(\"warning\\n\")\nprint(\"ok\")\n",
    );

    let (before, _) = bed
        .recv_until(|payload| matches!(payload, Payload::ReplReady { .. }))
        .await;
    assert_eq!(stdout_text(&before), "ok\n");
    assert_eq!(stderr_text(&before), "warning\n");

    bed.stop();
    let (_, exit_code) = bed.recv_until_complete().await;
    assert_eq!(exit_code, 0);
}

#[tokio::test]
#[ignore = "requires python3"]
async fn prompts_mid_script_pause_the_wall_clock() {
    // The script itself is fast, but the client takes its time answering;
    // the wall clock must not bill that wait.
    let mut bed = TestBed::start("think", "n = input(\"go? \")\nprint(\"done\", n)\n");

    let (_, _request) = bed
        .recv_until(|payload| matches!(payload, Payload::InputRequest { .. }))
        .await;

    // Longer than the 3 s script budget
    tokio::time::sleep(Duration::from_secs(4)).await;
    bed.send_input("yes");

    let (before_ready, _) = bed
        .recv_until(|payload| matches!(payload, Payload::ReplReady { .. }))
        .await;
    assert_eq!(stdout_text(&before_ready), "done yes\n");

    bed.stop();
    let (_, exit_code) = bed.recv_until_complete().await;
    assert_eq!(exit_code, 0);
}
