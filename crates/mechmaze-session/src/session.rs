use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use glam::Vec2;
use tokio::sync::{mpsc, watch};

use mechmaze_core::net::messages::{
    GameStartMsg, GoodbyeMsg, HelloMsg, OutcomeMsg, PeerMessage, ReadyMsg,
};
use mechmaze_core::net::protocol::{PROTOCOL_VERSION, decode_peer_message, encode_peer_message};
use mechmaze_core::player::{Edge, MechColor, NetworkPlayer, PeerId, PlayerId};
use mechmaze_core::time::unix_millis;
use mechmaze_game::effects::SurfaceEffect;
use mechmaze_game::input::tilt_force;
use mechmaze_game::{Alert, EngineEvent, GameState, MazeEngine};

use crate::camera::{CameraCoordinator, CameraMode, CameraMove};
use crate::config::SessionConfig;
use crate::roster::Roster;
use crate::sync::{StateSync, SyncOutcome};
use crate::transport::{Invitation, SendTarget, Transport, TransportError, TransportEvent};
use crate::world::{BodyState, MotionSource, NoMotion, NoScores, PhysicsWorld, ScoreSink};

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Lobby,
    Playing,
    /// Quit to home; the session is torn down.
    Ended,
}

/// Requests from the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    StartHosting,
    StartBrowsing,
    Invite(PeerId),
    Accept(PeerId),
    SetReady(bool),
    StartGame,
    Respawn,
    NewGame,
    QuitToHome,
    Suspend,
    Resume,
}

#[derive(Debug)]
pub enum SessionError {
    Transport(TransportError),
    /// Only the host (or a device playing alone) may start the game.
    NotHost,
    WrongPhase(SessionPhase),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::NotHost => write!(f, "only the host can start the game"),
            Self::WrongPhase(p) => write!(f, "not allowed while {p:?}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

/// What the presentation layer needs to draw one player.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerView {
    pub id: PlayerId,
    pub display_name: String,
    pub color: MechColor,
    pub position: Vec2,
    pub is_local: bool,
    pub is_ready: bool,
    pub is_map_mover: bool,
    pub assigned_edge: Option<Edge>,
    pub effect: Option<SurfaceEffect>,
}

/// Observable session state, republished after every tick and command.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub is_host: bool,
    pub suspended: bool,
    pub game: GameState,
    pub players: Vec<PlayerView>,
    pub camera_center: Vec2,
    pub camera_mode: CameraMode,
    pub discovered: Vec<(PeerId, String)>,
    pub invitations: Vec<Invitation>,
    pub tick: u64,
}

/// Handle for driving a session running in [`crate::runner::run_session`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub fn new(
        commands: mpsc::UnboundedSender<SessionCommand>,
        snapshot: watch::Receiver<SessionSnapshot>,
    ) -> Self {
        Self { commands, snapshot }
    }

    /// Queue a command. Returns false once the session loop has exited.
    pub fn send(&self, cmd: SessionCommand) -> bool {
        self.commands.send(cmd).is_ok()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }
}

/// One device's view of the game: owns the transport, roster, sync,
/// engine and camera, and is the single writer of all of them.
///
/// Transport callbacks only enqueue; everything they report is applied at
/// the start of the next [`GameSession::tick`].
pub struct GameSession {
    config: SessionConfig,
    transport: Box<dyn Transport>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    roster: Roster,
    sync: StateSync,
    engine: MazeEngine,
    camera: CameraCoordinator,
    world: Box<dyn PhysicsWorld>,
    motion: Box<dyn MotionSource>,
    scores: Box<dyn ScoreSink>,
    phase: SessionPhase,
    is_host: bool,
    host_peer: Option<PeerId>,
    suspended: bool,
    discovered: BTreeMap<PeerId, String>,
    invitations: Vec<Invitation>,
    sim_time: f64,
    tick: u64,
    last_state_ts: u64,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl GameSession {
    pub fn new(
        config: SessionConfig,
        transport: Box<dyn Transport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        world: Box<dyn PhysicsWorld>,
    ) -> Self {
        let local = NetworkPlayer::new(
            PlayerId::new_random(),
            0,
            config.display_name.clone(),
            true,
        );
        let roster = Roster::new(local);
        let sync = StateSync::new(config.interpolation_factor);
        let engine = MazeEngine::new(config.game.clone());
        let camera = CameraCoordinator::new(config.camera.clone());
        let snapshot = SessionSnapshot {
            phase: SessionPhase::Lobby,
            is_host: false,
            suspended: false,
            game: engine.state().clone(),
            players: Vec::new(),
            camera_center: camera.center(),
            camera_mode: camera.mode(),
            discovered: Vec::new(),
            invitations: Vec::new(),
            tick: 0,
        };
        let (snapshot_tx, _) = watch::channel(snapshot);
        let mut session = Self {
            config,
            transport,
            events,
            roster,
            sync,
            engine,
            camera,
            world,
            motion: Box::new(NoMotion),
            scores: Box::new(NoScores),
            phase: SessionPhase::Lobby,
            is_host: false,
            host_peer: None,
            suspended: false,
            discovered: BTreeMap::new(),
            invitations: Vec::new(),
            sim_time: 0.0,
            tick: 0,
            last_state_ts: 0,
            snapshot_tx,
        };
        session.publish();
        session
    }

    pub fn with_motion(mut self, motion: Box<dyn MotionSource>) -> Self {
        self.motion = motion;
        self
    }

    pub fn with_scores(mut self, scores: Box<dyn ScoreSink>) -> Self {
        self.scores = scores;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn local_id(&self) -> PlayerId {
        self.roster.local_id()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn engine(&self) -> &MazeEngine {
        &self.engine
    }

    pub fn camera(&self) -> &CameraCoordinator {
        &self.camera
    }

    pub fn sync(&self) -> &StateSync {
        &self.sync
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn is_ended(&self) -> bool {
        self.phase == SessionPhase::Ended
    }

    /// Simulation clock in seconds since the session was created.
    pub fn sim_time(&self) -> f64 {
        self.sim_time
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let players = self
            .roster
            .players()
            .iter()
            .map(|p| PlayerView {
                id: p.id,
                display_name: p.display_name.clone(),
                color: p.color,
                position: p.position,
                is_local: p.is_local,
                is_ready: p.is_ready,
                is_map_mover: p.is_map_mover,
                assigned_edge: p.assigned_edge,
                effect: self
                    .engine
                    .effect(p.id)
                    .filter(|e| e.is_active(self.sim_time))
                    .map(|e| e.kind),
            })
            .collect();
        SessionSnapshot {
            phase: self.phase,
            is_host: self.is_host,
            suspended: self.suspended,
            game: self.engine.state().clone(),
            players,
            camera_center: self.camera.center(),
            camera_mode: self.camera.mode(),
            discovered: self
                .discovered
                .iter()
                .map(|(peer, name)| (*peer, name.clone()))
                .collect(),
            invitations: self.invitations.clone(),
            tick: self.tick,
        }
    }

    fn publish(&mut self) {
        let snapshot = self.snapshot();
        self.snapshot_tx.send_replace(snapshot);
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    /// Apply a presentation command immediately.
    pub fn command(&mut self, cmd: SessionCommand) -> Result<(), SessionError> {
        if self.phase == SessionPhase::Ended {
            return Err(SessionError::WrongPhase(self.phase));
        }
        let result = match cmd {
            SessionCommand::StartHosting => {
                self.is_host = true;
                self.transport.start_hosting().map_err(SessionError::from)
            },
            SessionCommand::StartBrowsing => {
                self.transport.start_browsing().map_err(SessionError::from)
            },
            SessionCommand::Invite(peer) => {
                self.require_lobby()?;
                self.transport.invite(peer).map_err(SessionError::from)
            },
            SessionCommand::Accept(peer) => self.accept(peer),
            SessionCommand::SetReady(ready) => {
                let id = self.local_id();
                self.roster.set_ready(id, ready);
                self.broadcast(&PeerMessage::Ready(ReadyMsg {
                    player_id: id,
                    ready,
                }));
                Ok(())
            },
            SessionCommand::StartGame => self.start_game(),
            SessionCommand::Respawn => {
                self.require_playing()?;
                let events = self.engine.respawn();
                self.apply_engine_events(events, true);
                Ok(())
            },
            SessionCommand::NewGame => {
                self.require_playing()?;
                let events = self.engine.reset();
                self.apply_engine_events(events, true);
                Ok(())
            },
            SessionCommand::QuitToHome => {
                self.quit();
                Ok(())
            },
            SessionCommand::Suspend => {
                self.suspended = true;
                self.transport.suspend();
                tracing::debug!("Session suspended");
                Ok(())
            },
            SessionCommand::Resume => {
                self.transport.resume();
                self.suspended = false;
                tracing::debug!("Session resumed");
                Ok(())
            },
        };
        self.publish();
        result
    }

    /// Players can only join before the game starts.
    fn require_lobby(&self) -> Result<(), SessionError> {
        if self.phase == SessionPhase::Lobby {
            Ok(())
        } else {
            Err(SessionError::WrongPhase(self.phase))
        }
    }

    fn require_playing(&self) -> Result<(), SessionError> {
        if self.phase == SessionPhase::Playing {
            Ok(())
        } else {
            Err(SessionError::WrongPhase(self.phase))
        }
    }

    fn accept(&mut self, peer: PeerId) -> Result<(), SessionError> {
        self.require_lobby()?;
        let idx = self
            .invitations
            .iter()
            .position(|inv| inv.from == peer)
            .ok_or(TransportError::NoInvitation(peer))?;
        let invitation = self.invitations.remove(idx);
        self.transport.accept(&invitation)?;
        Ok(())
    }

    fn start_game(&mut self) -> Result<(), SessionError> {
        self.require_lobby()?;
        if !self.is_host && self.roster.len() > 1 {
            return Err(SessionError::NotHost);
        }
        if !self.roster.all_ready() {
            tracing::debug!("Starting before every player is ready");
        }
        let msg = GameStartMsg {
            level: self.config.game.first_level,
            starting_lives: self.config.game.starting_lives,
            order: self.roster.ids(),
        };
        self.broadcast(&PeerMessage::GameStart(msg.clone()));
        self.begin_game(&msg);
        Ok(())
    }

    fn begin_game(&mut self, msg: &GameStartMsg) {
        let spawn = self.world.load_level(msg.level);
        self.roster.assign_edges(&msg.order);
        self.roster.place_all(spawn);
        for id in self.roster.ids() {
            self.world.spawn_player(id, spawn);
        }
        self.engine
            .start(msg.level, msg.starting_lives, &self.roster.ids(), spawn);
        self.camera.reset(spawn);
        self.phase = SessionPhase::Playing;
        tracing::info!(
            level = msg.level,
            players = self.roster.len(),
            edge = ?self.roster.local().assigned_edge,
            "Maze started"
        );
    }

    fn quit(&mut self) {
        let id = self.local_id();
        self.broadcast(&PeerMessage::Goodbye(GoodbyeMsg { player_id: id }));
        self.transport.disconnect_all();
        let remotes: Vec<PeerId> = self
            .roster
            .players()
            .iter()
            .filter(|p| !p.is_local)
            .map(|p| p.peer)
            .collect();
        for peer in remotes {
            self.roster.disconnect(peer);
        }
        self.engine.stop();
        self.roster.reset();
        self.phase = SessionPhase::Ended;
        tracing::info!(player_id = %id, "Quit to home");
    }

    // ---------------------------------------------------------------------
    // Tick
    // ---------------------------------------------------------------------

    /// Advance the session by one fixed step.
    pub fn tick(&mut self) {
        if self.phase == SessionPhase::Ended {
            return;
        }
        let dt = self.config.tick_secs();
        self.drain_transport();

        if self.phase == SessionPhase::Playing && !self.suspended {
            self.simulate(dt);
            self.broadcast_local_state();
        }

        self.sync.interpolate(&mut self.roster);
        if self.phase == SessionPhase::Playing {
            for p in self.roster.players().iter().filter(|p| !p.is_local) {
                self.world.set_body(
                    p.id,
                    BodyState {
                        position: p.position,
                        velocity: p.velocity,
                    },
                );
            }
            self.engine.purge_expired(self.sim_time);
            self.update_camera();
        }

        self.sim_time += dt;
        self.tick += 1;
        self.publish();
    }

    fn simulate(&mut self, dt: f64) {
        let local = self.local_id();
        if !self.engine.state().is_suspended() {
            let multiplier = self.engine.speed_multiplier(local, self.sim_time);
            let force = tilt_force(
                self.motion.sample(),
                &self.config.input,
                self.engine.config().force_scale,
                multiplier,
            );
            self.world.apply_force(local, force);
            self.world.step(dt as f32);
            if let Some(body) = self.world.body(local) {
                let p = self.roster.local_mut();
                p.position = body.position;
                p.velocity = body.velocity;
            }
        }

        for contact in self.world.drain_contacts() {
            if !contact.involves(local) {
                continue;
            }
            let events = self.engine.handle_contact(&contact, self.sim_time);
            self.apply_engine_events(events, true);
        }
    }

    fn broadcast_local_state(&mut self) {
        // Strictly increasing even when two ticks land in the same millisecond.
        let ts = unix_millis().max(self.last_state_ts + 1);
        self.last_state_ts = ts;
        let msg = StateSync::local_state(self.roster.local(), ts);
        self.broadcast(&PeerMessage::PlayerState(msg));
    }

    fn update_camera(&mut self) {
        let mv = self
            .camera
            .update(self.roster.local(), self.roster.len(), self.sim_time);
        if let Some(CameraMove::Scrolled { edge, .. }) = mv {
            let id = self.local_id();
            if self.roster.map_mover() != Some(id) {
                tracing::debug!(player_id = %id, ?edge, "Took over map mover");
            }
            self.roster.set_map_mover(id);
        }
    }

    /// React to engine events. Locally decided events are also broadcast so
    /// every device reaches the same shared state.
    fn apply_engine_events(&mut self, events: Vec<EngineEvent>, broadcast: bool) {
        let local = self.local_id();
        for event in events {
            if broadcast && let Some(outcome) = event.to_outcome() {
                self.broadcast(&PeerMessage::Outcome(OutcomeMsg {
                    player_id: local,
                    outcome,
                }));
            }
            match event {
                EngineEvent::Damaged { lives_left, .. } => {
                    tracing::debug!(lives_left, "Team took damage");
                },
                EngineEvent::AlertChanged(alert) => {
                    if alert != Alert::None {
                        tracing::info!(?alert, "Alert raised");
                    }
                },
                EngineEvent::Respawned { point } => self.place_everyone(point),
                EngineEvent::LevelComplete(record) => {
                    self.scores.record(record);
                    self.load_current_level();
                },
                EngineEvent::GameReset { .. } => self.load_current_level(),
                EngineEvent::CheckpointReached { .. }
                | EngineEvent::EffectApplied { .. }
                | EngineEvent::FinishPresence { .. } => {},
            }
        }
    }

    fn load_current_level(&mut self) {
        let spawn = self.world.load_level(self.engine.state().current_level);
        self.engine.set_spawn_point(spawn);
        self.place_everyone(spawn);
    }

    fn place_everyone(&mut self, point: Vec2) {
        self.roster.place_all(point);
        for id in self.roster.ids() {
            self.world.set_body(
                id,
                BodyState {
                    position: point,
                    velocity: Vec2::ZERO,
                },
            );
        }
        self.camera.reset(point);
    }

    // ---------------------------------------------------------------------
    // Transport
    // ---------------------------------------------------------------------

    fn broadcast(&mut self, msg: &PeerMessage) {
        self.send_to(msg, SendTarget::All);
    }

    fn send_to(&mut self, msg: &PeerMessage, to: SendTarget) {
        match encode_peer_message(msg) {
            Ok(data) => self.transport.send(Bytes::from(data), to),
            Err(e) => tracing::warn!(error = %e, "Failed to encode peer message"),
        }
    }

    fn drain_transport(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_transport_event(event);
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeerDiscovered { peer, display_name } => {
                self.discovered.insert(peer, display_name);
            },
            TransportEvent::PeerLost(peer) => {
                self.discovered.remove(&peer);
            },
            TransportEvent::InvitationReceived(invitation) => {
                if !self.invitations.iter().any(|i| i.from == invitation.from) {
                    self.invitations.push(invitation);
                }
            },
            TransportEvent::PeerConnected(peer) => {
                self.discovered.remove(&peer);
                let hello = PeerMessage::Hello(HelloMsg {
                    player_id: self.local_id(),
                    display_name: self.roster.local().display_name.clone(),
                    is_host: self.is_host,
                    protocol_version: PROTOCOL_VERSION,
                });
                self.send_to(&hello, SendTarget::Peer(peer));
            },
            TransportEvent::PeerDisconnected(peer) => self.handle_departure(peer),
            TransportEvent::Message { from, payload } => match decode_peer_message(&payload) {
                Ok(msg) => self.handle_peer_message(from, msg),
                Err(e) => tracing::debug!(peer = from, error = %e, "Dropping bad peer message"),
            },
        }
    }

    fn handle_peer_message(&mut self, from: PeerId, msg: PeerMessage) {
        if let PeerMessage::Hello(hello) = msg {
            self.handle_hello(from, hello);
            return;
        }
        // Everything else must come from an announced peer, about itself.
        let Some(sender) = self.roster.by_peer(from).map(|p| p.id) else {
            tracing::debug!(peer = from, "Message before hello dropped");
            return;
        };
        match msg {
            PeerMessage::Goodbye(g) if g.player_id == sender => self.handle_departure(from),
            PeerMessage::Ready(r) if r.player_id == sender => {
                self.roster.set_ready(sender, r.ready);
            },
            PeerMessage::PlayerState(s) if s.player_id == sender => {
                if self.sync.apply_remote(&mut self.roster, &s) == SyncOutcome::Local {
                    tracing::warn!(peer = from, "Peer sent state for the local player");
                }
            },
            PeerMessage::GameStart(start) => {
                if self.host_peer != Some(from) {
                    tracing::warn!(peer = from, "GameStart from non-host ignored");
                } else if self.phase != SessionPhase::Lobby {
                    tracing::debug!(peer = from, "GameStart while not in lobby ignored");
                } else {
                    self.begin_game(&start);
                }
            },
            PeerMessage::Outcome(o) if o.player_id == sender => {
                if self.phase == SessionPhase::Playing {
                    let events = self.engine.apply_outcome(sender, &o.outcome);
                    self.apply_engine_events(events, false);
                }
            },
            other => {
                tracing::warn!(peer = from, kind = ?other.message_type(), "Message about another player dropped");
            },
        }
    }

    fn handle_hello(&mut self, from: PeerId, hello: HelloMsg) {
        if hello.protocol_version != PROTOCOL_VERSION {
            tracing::warn!(
                peer = from,
                version = hello.protocol_version,
                "Peer speaks another protocol version"
            );
            return;
        }
        if self.phase == SessionPhase::Playing
            && self.roster.get(hello.player_id).is_none()
            && !self.roster.in_game_order(hello.player_id)
        {
            tracing::warn!(
                peer = from,
                player_id = %hello.player_id,
                "Refused player joining mid-game"
            );
            return;
        }
        let id = match self.roster.connect(from, hello.player_id, hello.display_name) {
            Ok(p) => p.id,
            Err(e) => {
                tracing::warn!(peer = from, error = %e, "Rejected peer");
                return;
            },
        };
        if hello.is_host {
            self.host_peer = Some(from);
        }
        if self.phase == SessionPhase::Playing {
            let at = self.engine.respawn_point();
            self.engine.player_joined(id);
            self.world.spawn_player(id, at);
            if let Some(p) = self.roster.get_mut(id) {
                p.place_at(at);
            }
        }
    }

    fn handle_departure(&mut self, peer: PeerId) {
        let Some(departure) = self.roster.disconnect(peer) else {
            return;
        };
        if self.host_peer == Some(peer) {
            self.host_peer = None;
        }
        let id = departure.player.id;
        if let Some(promoted) = departure.promoted {
            tracing::info!(player_id = %promoted, "Map mover promoted");
        }
        if self.phase == SessionPhase::Playing {
            self.world.remove_player(id);
            let events = self.engine.player_left(id);
            self.apply_engine_events(events, false);
        }
    }
}

impl Drop for GameSession {
    fn drop(&mut self) {
        if self.phase != SessionPhase::Ended {
            self.transport.disconnect_all();
        }
    }
}
