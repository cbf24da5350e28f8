#[allow(dead_code)]
mod common;

use std::time::Duration;

use mechmaze_session::config::SessionConfig;
use mechmaze_session::session::SessionPhase;
use mechmaze_session::transport::local::LocalMesh;
use mechmaze_session::transport::relay::RelayTransport;
use mechmaze_session::{GameSession, SessionCommand, spawn_session};

use common::{ScriptedWorld, spawn_for, start_relay, wait_for};

fn named(name: &str) -> SessionConfig {
    SessionConfig {
        display_name: name.to_string(),
        ..SessionConfig::default()
    }
}

#[tokio::test]
async fn loop_ticks_until_quit() {
    let mesh = LocalMesh::new();
    let (transport, events) = mesh.join("solo", 7);
    let session = GameSession::new(
        named("solo"),
        Box::new(transport),
        events,
        Box::new(ScriptedWorld::default()),
    );
    let (handle, task) = spawn_session(session);
    let mut snapshots = handle.subscribe();

    assert!(handle.send(SessionCommand::StartGame));
    let snap = wait_for(&mut snapshots, |s| s.phase == SessionPhase::Playing && s.tick > 3).await;
    assert_eq!(snap.camera_center, spawn_for(1));

    assert!(handle.send(SessionCommand::QuitToHome));
    let session = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(session.is_ended());
}

#[tokio::test]
async fn dropping_every_handle_ends_the_loop() {
    let mesh = LocalMesh::new();
    let (transport, events) = mesh.join("solo", 7);
    let session = GameSession::new(
        named("solo"),
        Box::new(transport),
        events,
        Box::new(ScriptedWorld::default()),
    );
    let (handle, task) = spawn_session(session);
    drop(handle);
    let session = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.phase(), SessionPhase::Ended);
}

#[tokio::test]
async fn two_sessions_play_through_the_relay() {
    let url = start_relay().await;

    let (host_transport, host_events) = RelayTransport::new(&url);
    let mut host_status = host_transport.status();
    let host = GameSession::new(
        named("host"),
        Box::new(host_transport),
        host_events,
        Box::new(ScriptedWorld::default()),
    );
    let (host, host_task) = spawn_session(host);
    assert!(host.send(SessionCommand::StartHosting));

    let code = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let code = host_status.borrow_and_update().join_code.clone();
            if let Some(code) = code {
                return code;
            }
            host_status.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    let mut guest_config = named("guest");
    guest_config.transport.relay_url = Some(url);
    let (mut guest_transport, guest_events) =
        RelayTransport::from_config(&guest_config.transport).unwrap();
    guest_transport.set_join_code(&code).unwrap();
    let guest = GameSession::new(
        guest_config,
        Box::new(guest_transport),
        guest_events,
        Box::new(ScriptedWorld::default()),
    );
    let (guest, guest_task) = spawn_session(guest);
    assert!(guest.send(SessionCommand::StartBrowsing));

    let mut host_snaps = host.subscribe();
    let mut guest_snaps = guest.subscribe();
    wait_for(&mut host_snaps, |s| s.players.len() == 2).await;
    wait_for(&mut guest_snaps, |s| s.players.len() == 2).await;

    assert!(host.send(SessionCommand::StartGame));
    let snap = wait_for(&mut guest_snaps, |s| s.phase == SessionPhase::Playing).await;
    let edges: Vec<_> = snap.players.iter().map(|p| p.assigned_edge).collect();
    assert!(edges.iter().all(Option::is_some));
    assert_ne!(edges[0], edges[1]);

    assert!(host.send(SessionCommand::QuitToHome));
    wait_for(&mut guest_snaps, |s| s.players.len() == 1).await;
    assert!(guest.send(SessionCommand::QuitToHome));

    tokio::time::timeout(Duration::from_secs(5), host_task)
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), guest_task)
        .await
        .unwrap()
        .unwrap();
}
