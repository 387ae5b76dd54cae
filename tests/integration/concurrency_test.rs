// tests/integration/concurrency_test.rs

//! Many clients, one instrument.

use super::test_helpers::{TestContext, test_config};
use scpi_bridge::core::instrument::SimulatedInstrument;
use std::time::Duration;

#[tokio::test]
async fn test_commands_are_serialized_across_clients() {
    let sim = SimulatedInstrument::new("sim:serial").with_latency(Duration::from_millis(5));
    let ctx = TestContext::with_instrument(test_config(), sim).await;

    let mut tasks = Vec::new();
    for client_no in 0..2 {
        let mut client = ctx.connect().await;
        tasks.push(tokio::spawn(async move {
            for i in 0..10 {
                let cmd = if i % 2 == 0 { "*IDN?" } else { ":MEAS:VOLT?" };
                let env = client.request(cmd).await;
                assert!(env.success, "client {client_no} command {i} failed: {:?}", env.error);
                assert_eq!(env.command.as_deref(), Some(cmd));
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(ctx.sim.commands_received(), 20);
    assert_eq!(ctx.sim.max_in_flight(), 1);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_replies_are_not_interleaved_between_clients() {
    let ctx = TestContext::new().await;
    let mut tasks = Vec::new();

    for n in 0..4 {
        let mut client = ctx.connect().await;
        tasks.push(tokio::spawn(async move {
            // Every envelope a client reads must echo its own command.
            let set = format!(":SOUR:CURR {n}.5");
            let env = client.request(&set).await;
            assert_eq!(env.command.as_deref(), Some(set.as_str()));
            let env = client.request("*IDN?").await;
            assert_eq!(env.command.as_deref(), Some("*IDN?"));
            assert!(env.text().unwrap().contains("DL3021"));
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_status_does_not_wait_for_a_busy_instrument() {
    let sim = SimulatedInstrument::new("sim:busy").with_latency(Duration::from_millis(800));
    let mut config = test_config();
    config.instrument.command_timeout = Duration::from_secs(2);
    let ctx = TestContext::with_instrument(config, sim).await;

    let mut busy = ctx.connect().await;
    let mut observer = ctx.connect().await;

    busy.send_line("*IDN?").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    let env = observer.request("STATUS").await;
    assert!(env.success);
    assert!(started.elapsed() < Duration::from_millis(500));

    assert!(busy.read_envelope().await.unwrap().success);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_connection_limit_rejects_extra_clients() {
    let mut config = test_config();
    config.max_clients = 2;
    let ctx = TestContext::with_config(config).await;

    let mut first = ctx.connect_registered().await;
    let _second = ctx.connect_registered().await;

    let mut extra = ctx.connect().await;
    let env = extra.read_envelope().await.expect("rejection envelope");
    assert!(!env.success);
    assert_eq!(env.command, None);
    assert!(env.error.unwrap().contains("2"));
    assert!(extra.is_closed().await);
    assert_eq!(ctx.state.clients.count(), 2);

    // Leaving frees a slot.
    assert!(first.request("QUIT").await.success);
    ctx.wait_for_clients(1).await;
    let mut late = ctx.connect_registered().await;
    assert!(late.request("*IDN?").await.success);

    ctx.shutdown().await;
}
