#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

//! Two bus instances bridged by channel connections: a request forwarded
//! globally is answered by the remote bus's receiver and the response finds
//! its way back to the originating operation.

use std::sync::Arc;
use std::time::Duration;

use crossbus_core::payload::Payload;
use crossbus_runtime::config::BusConfig;
use crossbus_runtime::connection::{ChannelConnection, ChannelConnectionManager, ConnectionId};
use crossbus_runtime::{MessageBus, SendOptions};

fn fast_config() -> BusConfig {
    let mut cfg = BusConfig::default();
    cfg.bus.poll_interval_ms = 5;
    cfg
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

fn bus_with_connection(conn: Arc<ChannelConnection>) -> Arc<MessageBus> {
    let manager = Arc::new(ChannelConnectionManager::new());
    manager.add(conn);
    Arc::new(
        MessageBus::builder()
            .config(fast_config())
            .connections(manager)
            .build()
            .unwrap(),
    )
}

fn spawn_scheduler(bus: &Arc<MessageBus>) {
    let b = Arc::clone(bus);
    tokio::spawn(async move { b.run().await });
}

/// Shovel outbound envelopes of one side into the inbound queue of the
/// other. Stands in for a real transport.
fn spawn_pump(a: Arc<ChannelConnection>, b: Arc<ChannelConnection>) {
    tokio::spawn(async move {
        loop {
            for env in a.take_outbound() {
                b.push_inbound(env);
            }
            for env in b.take_outbound() {
                a.push_inbound(env);
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    });
}

#[tokio::test]
async fn request_crosses_the_bridge_and_the_response_comes_back() {
    init_tracing();

    let conn_a = Arc::new(ChannelConnection::new(ConnectionId(1)));
    let conn_b = Arc::new(ChannelConnection::new(ConnectionId(1)));

    let bus_a = bus_with_connection(Arc::clone(&conn_a));
    let bus_b = bus_with_connection(Arc::clone(&conn_b));
    spawn_scheduler(&bus_a);
    spawn_scheduler(&bus_b);
    spawn_pump(Arc::clone(&conn_a), Arc::clone(&conn_b));

    bus_b.register_fn(Some("remote-ping".into()), |_addr, payload| async move {
        let question = payload.as_text().unwrap_or("?").to_string();
        Ok(Payload::text(format!("echo:{question}")))
    });

    let handle = bus_a.send(
        "remote-ping",
        Payload::text("hello"),
        SendOptions::default()
            .timeout(Duration::from_millis(5000))
            .to_global(true),
    );

    let payload = tokio::time::timeout(Duration::from_secs(3), handle.wait())
        .await
        .expect("must resolve across the bridge")
        .expect("remote receiver answers");
    assert_eq!(payload.as_text(), Some("echo:hello"));

    bus_a.shutdown();
    bus_b.shutdown();
}
