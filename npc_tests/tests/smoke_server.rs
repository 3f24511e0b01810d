use npc_server::BackendServer;
use npc_shared::{
    config::ServerConfig,
    net::{FramedConn, RouteReply, RouteRequest},
};
use serde_json::{json, Value};

async fn exchange(conn: &mut FramedConn, route: &str, payload: Value) -> anyhow::Result<RouteReply> {
    conn.send(&RouteRequest {
        route: route.to_string(),
        payload,
    })
    .await?;
    conn.recv().await
}

/// Smoke test: the backend answers every route over one connection.
#[tokio::test]
async fn backend_answers_each_route() -> anyhow::Result<()> {
    let server = BackendServer::bind_ephemeral(ServerConfig {
        npcs: vec!["a".into(), "b".into()],
        ..Default::default()
    })
    .await?;
    let addr = server.local_addr()?;
    tokio::spawn(server.serve());

    let mut conn = FramedConn::connect(addr).await?;

    let world = exchange(&mut conn, "world", Value::Null).await?;
    assert_eq!(world.body, json!({"npcs": ["a", "b"]}));

    let npc = exchange(&mut conn, "npc/b", Value::Null).await?;
    assert_eq!(npc.status, 200);
    assert_eq!(npc.body["position"], json!({"x": 4.0, "y": 0.0, "z": 0.0}));

    let missing = exchange(&mut conn, "npc/zz", Value::Null).await?;
    assert_eq!(missing.status, 404);

    let update = exchange(
        &mut conn,
        "unity/update",
        json!({"npc_positions": {"a": {"x": 0.0, "y": 0.0, "z": 0.0}}, "npc_animations": {}, "delta_time": 0.1}),
    )
    .await?;
    assert!(update.is_success());
    assert_eq!(update.body["npc_updates"].as_object().map(|m| m.len()), Some(2));

    let talk = exchange(
        &mut conn,
        "interact",
        json!({"npc_id": "a", "action": "talk"}),
    )
    .await?;
    assert_eq!(talk.body["success"], true);
    Ok(())
}

/// Two clients share one world.
#[tokio::test]
async fn connections_share_world() -> anyhow::Result<()> {
    let server = BackendServer::bind_ephemeral(ServerConfig::default()).await?;
    let addr = server.local_addr()?;
    let world = server.world();
    tokio::spawn(server.serve());

    let mut first = FramedConn::connect(addr).await?;
    let mut second = FramedConn::connect(addr).await?;
    for conn in [&mut first, &mut second] {
        let reply = exchange(conn, "unity/update", json!({"delta_time": 0.05})).await?;
        assert!(reply.is_success());
    }
    assert_eq!(world.lock().await.updates_served(), 2);
    Ok(())
}
