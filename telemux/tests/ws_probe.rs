use telemux::types::ServerEvent;
use telemux::ws::{agent_url, connect, next_event, request_metrics, request_stream_status};

// Integration probe: only runs when TELEMUX_WS is set to an agent WebSocket URL.
// Example: TELEMUX_WS=ws://127.0.0.1:3000/ws cargo test -p telemux --test ws_probe -- --nocapture
#[tokio::test]
async fn probe_ws_endpoints() {
    let url = match std::env::var("TELEMUX_WS") {
        Ok(v) if !v.is_empty() => v,
        _ => {
            eprintln!(
                "skipping ws_probe: set TELEMUX_WS=ws://host:port/ws to run this integration test"
            );
            return;
        }
    };
    let token = std::env::var("TELEMUX_TOKEN").ok();
    let url = agent_url(&url, token.as_deref()).expect("agent url");
    let mut ws = connect(&url).await.expect("connect ws");

    request_metrics(&mut ws).await.unwrap();
    let ev = next_event(&mut ws).await.unwrap();
    assert!(matches!(ev, Some(ServerEvent::Metrics(_))), "expected metrics, got {ev:?}");

    request_stream_status(&mut ws).await.unwrap();
    let ev = next_event(&mut ws).await.unwrap();
    assert!(matches!(ev, Some(ServerEvent::StreamStatus(_))), "expected status, got {ev:?}");
}
