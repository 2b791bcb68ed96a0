use std::time::Duration;

use anyhow::{Result, anyhow};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use sync_dict::{Replicator, Snapshot, StoreConfig, transport::ws};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::{sleep, timeout},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

const READ_TIMEOUT: Duration = Duration::from_secs(2);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn next_json(client: &mut Client) -> Result<serde_json::Value> {
    loop {
        let frame = timeout(READ_TIMEOUT, client.next())
            .await?
            .ok_or_else(|| anyhow!("websocket closed"))??;
        match frame {
            Message::Text(text) => return Ok(serde_json::from_str(&text)?),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return Err(anyhow!("unexpected frame: {other:?}")),
        }
    }
}

fn local_identity(client: &Client) -> Result<String> {
    match client.get_ref() {
        MaybeTlsStream::Plain(stream) => Ok(stream.local_addr()?.to_string()),
        _ => Err(anyhow!("expected a plain tcp stream")),
    }
}

#[tokio::test]
async fn websocket_subscriber_syncs_and_follows_broadcasts() -> Result<()> {
    let initial: Snapshot = serde_json::from_value(json!({"b": 999, "c": 1}))?;
    let replicator = Replicator::new(initial, StoreConfig::default());
    let registry = replicator.registry();
    let store = replicator.store();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(ws::serve_until(listener, replicator.connections(), async move {
        let _ = stopped.await;
    }));

    let (mut client, _) = connect_async(format!("ws://{addr}{}", ws::PATH)).await?;
    let identity = local_identity(&client)?;

    client.send(Message::Text("sync".into())).await?;
    assert_eq!(
        next_json(&mut client).await?,
        json!({"action": 2, "next": 0, "flag": identity, "data": {"b": 999, "c": 1}})
    );

    store.set("a", 5)?;
    assert_eq!(
        next_json(&mut client).await?,
        json!({"action": 0, "current": 0, "next": 1, "key": "a", "value": 5})
    );

    // Binary frames are a protocol violation and end the session.
    client.send(Message::Binary(vec![1, 2, 3])).await?;
    timeout(READ_TIMEOUT, async {
        while !registry.is_empty().await {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    drop(client);
    let _ = stop.send(());
    let _ = timeout(READ_TIMEOUT, server).await;
    replicator.shutdown().await?;
    Ok(())
}
