// tests/integration/session_test.rs

//! Request/response behaviour of a single client session.

use super::test_helpers::{SIM_ADDRESS, TestContext, test_config};

#[tokio::test]
async fn test_idn_query_round_trip() {
    let ctx = TestContext::new().await;
    let mut client = ctx.connect().await;

    let env = client.request("*IDN?").await;
    assert!(env.success);
    assert_eq!(env.command.as_deref(), Some("*IDN?"));
    assert!(env.text().unwrap().starts_with("RIGOL TECHNOLOGIES,DL3021"));
    assert_eq!(env.error, None);
    assert!(chrono::DateTime::parse_from_rfc3339(&env.timestamp).is_ok());

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_set_commands_reply_with_empty_response() {
    let ctx = TestContext::new().await;
    let mut client = ctx.connect().await;

    for cmd in [":SOUR:FUNC CC", ":SOUR:CURR 2.5", ":SOUR:INP:STAT ON"] {
        let env = client.request(cmd).await;
        assert!(env.success, "{cmd} failed: {:?}", env.error);
        assert_eq!(env.text(), Some(""));
    }

    let env = client.request(":SOUR:CURR?").await;
    assert_eq!(env.text(), Some("2.500000"));
    let env = client.request(":MEAS:CURR?").await;
    assert_eq!(env.text(), Some("2.500000"));
    let env = client.request(":SOUR:INP:STAT?").await;
    assert_eq!(env.text(), Some("1"));

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_command_is_trimmed_and_case_preserved() {
    let ctx = TestContext::new().await;
    let mut client = ctx.connect().await;

    let env = client.request("   :meas:volt?  \t").await;
    assert!(env.success);
    assert_eq!(env.command.as_deref(), Some(":meas:volt?"));
    assert_eq!(ctx.sim.commands(), vec![":meas:volt?"]);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_crlf_terminated_lines() {
    let ctx = TestContext::new().await;
    let mut client = ctx.connect().await;

    client.send_raw(b"*IDN?\r\n").await;
    let env = client.read_envelope().await.unwrap();
    assert_eq!(env.command.as_deref(), Some("*IDN?"));
    assert!(env.success);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_blank_lines_produce_no_response() {
    let ctx = TestContext::new().await;
    let mut client = ctx.connect().await;

    client.send_raw(b"\n   \n\t\n").await;
    let env = client.request("*OPC?").await;
    assert_eq!(env.command.as_deref(), Some("*OPC?"));
    assert_eq!(env.text(), Some("1"));
    assert_eq!(ctx.sim.commands_received(), 1);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_status_reports_bridge_state() {
    let ctx = TestContext::new().await;
    let mut first = ctx.connect_registered().await;
    let _second = ctx.connect_registered().await;

    let env = first.request("STATUS").await;
    assert!(env.success);
    assert_eq!(env.command.as_deref(), Some("STATUS"));
    let status = env.status().expect("STATUS should carry a status object");
    assert!(status.server_running);
    assert!(status.instrument_connected);
    assert_eq!(status.instrument_address, SIM_ADDRESS);
    assert_eq!(status.active_connections, 2);
    assert_eq!(ctx.sim.commands_received(), 0);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_status_json_shape() {
    let ctx = TestContext::new().await;
    let mut client = ctx.connect().await;

    client.send_line("status").await;
    let env = client.read_envelope().await.unwrap();
    let json = serde_json::to_value(&env).unwrap();
    assert_eq!(json["error"], serde_json::Value::Null);
    assert_eq!(json["response"]["server_running"], true);
    assert_eq!(json["response"]["instrument_address"], SIM_ADDRESS);
    assert_eq!(json["response"]["active_connections"], 1);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_quit_closes_only_that_session() {
    let ctx = TestContext::new().await;
    let mut leaving = ctx.connect_registered().await;
    let mut staying = ctx.connect_registered().await;

    let env = leaving.request("QUIT").await;
    assert!(env.success);
    assert_eq!(env.command.as_deref(), Some("QUIT"));
    assert!(leaving.is_closed().await);
    ctx.wait_for_clients(1).await;

    let env = staying.request("STATUS").await;
    assert_eq!(env.status().unwrap().active_connections, 1);
    assert!(ctx.sim.commands().iter().all(|c| c != "QUIT"));

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_exit_is_an_alias_for_quit() {
    let ctx = TestContext::new().await;
    let mut client = ctx.connect_registered().await;

    let env = client.request("Exit").await;
    assert!(env.success);
    assert!(client.is_closed().await);
    ctx.wait_for_clients(0).await;

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_client_disconnect_deregisters() {
    let ctx = TestContext::new().await;
    let client = ctx.connect_registered().await;
    drop(client);
    ctx.wait_for_clients(0).await;

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_oversized_line_closes_session() {
    let mut config = test_config();
    config.session.max_line_length = 64;
    let ctx = TestContext::with_config(config).await;
    let mut client = ctx.connect_registered().await;

    let long = "A".repeat(200);
    client.send_line(&long).await;
    let env = client.read_envelope().await.unwrap();
    assert!(!env.success);
    assert_eq!(env.command, None);
    assert!(env.error.is_some());
    assert!(client.is_closed().await);
    ctx.wait_for_clients(0).await;
    assert_eq!(ctx.sim.commands_received(), 0);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_unterminated_final_line_is_processed() {
    let ctx = TestContext::new().await;
    let mut client = ctx.connect().await;

    client.send_raw(b"*IDN?").await;
    client.finish_writing().await;
    let env = client.read_envelope().await.unwrap();
    assert_eq!(env.command.as_deref(), Some("*IDN?"));
    assert!(client.is_closed().await);

    ctx.shutdown().await;
}
