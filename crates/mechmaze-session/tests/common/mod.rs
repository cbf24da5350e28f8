use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use glam::Vec2;
use tokio::sync::{mpsc, watch};

use mechmaze_core::player::{PeerId, PlayerId};
use mechmaze_game::contact::{Category, ContactBody, ContactEvent};
use mechmaze_game::scoring::ScoreRecord;
use mechmaze_session::config::SessionConfig;
use mechmaze_session::transport::local::LocalMesh;
use mechmaze_session::world::{BodyState, PhysicsWorld};
use mechmaze_session::{GameSession, SessionCommand, SessionSnapshot};

/// Spawn point `ScriptedWorld` reports for `level`.
pub fn spawn_for(level: u32) -> Vec2 {
    Vec2::new(level as f32 * 10.0, 1.0)
}

#[derive(Default)]
pub struct WorldState {
    pub bodies: HashMap<PlayerId, BodyState>,
    pub forces: Vec<(PlayerId, Vec2)>,
    pub pending_contacts: Vec<ContactEvent>,
    pub loaded_levels: Vec<u32>,
}

/// Physics stand-in: bodies integrate applied forces, contacts are whatever
/// the test queued. Clones share state so a test can inspect the world it
/// handed to a session.
#[derive(Clone, Default)]
pub struct ScriptedWorld {
    state: Arc<Mutex<WorldState>>,
}

impl ScriptedWorld {
    pub fn lock(&self) -> MutexGuard<'_, WorldState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_contact(&self, event: ContactEvent) {
        self.lock().pending_contacts.push(event);
    }

    pub fn body_of(&self, player: PlayerId) -> Option<BodyState> {
        self.lock().bodies.get(&player).copied()
    }

    pub fn loaded_levels(&self) -> Vec<u32> {
        self.lock().loaded_levels.clone()
    }
}

impl PhysicsWorld for ScriptedWorld {
    fn load_level(&mut self, level: u32) -> Vec2 {
        self.lock().loaded_levels.push(level);
        spawn_for(level)
    }

    fn spawn_player(&mut self, player: PlayerId, at: Vec2) {
        self.lock().bodies.insert(
            player,
            BodyState {
                position: at,
                velocity: Vec2::ZERO,
            },
        );
    }

    fn remove_player(&mut self, player: PlayerId) {
        self.lock().bodies.remove(&player);
    }

    fn apply_force(&mut self, player: PlayerId, force: Vec2) {
        self.lock().forces.push((player, force));
    }

    fn step(&mut self, dt: f32) {
        let mut state = self.lock();
        let forces = std::mem::take(&mut state.forces);
        for (player, force) in forces {
            if let Some(body) = state.bodies.get_mut(&player) {
                body.velocity += force * dt;
            }
        }
        for body in state.bodies.values_mut() {
            body.position += body.velocity * dt;
        }
    }

    fn body(&self, player: PlayerId) -> Option<BodyState> {
        self.body_of(player)
    }

    fn set_body(&mut self, player: PlayerId, state: BodyState) {
        self.lock().bodies.insert(player, state);
    }

    fn drain_contacts(&mut self) -> Vec<ContactEvent> {
        std::mem::take(&mut self.lock().pending_contacts)
    }
}

/// One device in a test table.
pub struct Device {
    pub session: GameSession,
    pub world: ScriptedWorld,
    pub peer: PeerId,
}

impl Device {
    pub fn join(mesh: &LocalMesh, name: &str, config: &SessionConfig) -> Self {
        let (transport, events) = mesh.join(name, config.transport.max_peers);
        let peer = transport.peer_id();
        let world = ScriptedWorld::default();
        let config = SessionConfig {
            display_name: name.to_string(),
            ..config.clone()
        };
        let session = GameSession::new(
            config,
            Box::new(transport),
            events,
            Box::new(world.clone()),
        );
        Self {
            session,
            world,
            peer,
        }
    }

    pub fn with_scores(mut self) -> (Self, mpsc::UnboundedReceiver<ScoreRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.session = self.session.with_scores(Box::new(tx));
        (self, rx)
    }

    pub fn id(&self) -> PlayerId {
        self.session.local_id()
    }

    pub fn command(&mut self, cmd: SessionCommand) {
        self.session.command(cmd).unwrap();
    }

    /// Queue a contact between this device's mech and a maze node.
    pub fn touch(&self, category: Category, node: u64, at: Vec2) {
        let me = ContactBody::player(self.id(), at);
        let other = ContactBody::node(category, node, at);
        self.world
            .push_contact(ContactEvent::begin(me, other, self.session.sim_time()));
    }

    pub fn leave(&self, category: Category, node: u64, at: Vec2) {
        let me = ContactBody::player(self.id(), at);
        let other = ContactBody::node(category, node, at);
        self.world
            .push_contact(ContactEvent::end(me, other, self.session.sim_time()));
    }

    pub fn local_body(&self) -> Option<BodyState> {
        self.world.body_of(self.id())
    }
}

pub fn tick_all(devices: &mut [Device], ticks: usize) {
    for _ in 0..ticks {
        for d in devices.iter_mut() {
            d.session.tick();
        }
    }
}

/// `n` devices on one mesh: device 0 hosts, the rest browse, invite it and
/// are accepted, and every Hello has been exchanged.
pub fn table(n: usize, config: &SessionConfig) -> (LocalMesh, Vec<Device>) {
    let mesh = LocalMesh::new();
    let mut devices: Vec<Device> = (0..n)
        .map(|i| Device::join(&mesh, &format!("pilot-{i}"), config))
        .collect();

    devices[0].command(SessionCommand::StartHosting);
    for d in devices.iter_mut().skip(1) {
        d.command(SessionCommand::StartBrowsing);
    }
    tick_all(&mut devices, 1);

    let host = devices[0].peer;
    for d in devices.iter_mut().skip(1) {
        d.command(SessionCommand::Invite(host));
    }
    tick_all(&mut devices, 1);

    let invitations: Vec<PeerId> = devices[0]
        .session
        .snapshot()
        .invitations
        .iter()
        .map(|i| i.from)
        .collect();
    for from in invitations {
        devices[0].command(SessionCommand::Accept(from));
    }
    tick_all(&mut devices, 3);
    (mesh, devices)
}

/// [`table`] followed by the host starting the game.
pub fn started_table(n: usize, config: &SessionConfig) -> (LocalMesh, Vec<Device>) {
    let (mesh, mut devices) = table(n, config);
    devices[0].command(SessionCommand::StartGame);
    tick_all(&mut devices, 2);
    (mesh, devices)
}

/// Wait (up to five seconds) until a published snapshot satisfies `pred`.
pub async fn wait_for(
    rx: &mut watch::Receiver<SessionSnapshot>,
    pred: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let snap = rx.borrow_and_update();
                if pred(&snap) {
                    return snap.clone();
                }
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("snapshot condition not reached in time")
}

/// Start a relay on an ephemeral port and return its WebSocket URL.
pub async fn start_relay() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        mechmaze_relay::serve(listener, 16).await.unwrap();
    });

    // Give the relay a moment to start accepting
    tokio::time::sleep(Duration::from_millis(20)).await;
    format!("ws://{addr}/relay")
}
