use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::session::{GameSession, SessionCommand, SessionHandle};

/// Drive `session` at its configured tick rate until it quits to home or
/// every command sender is dropped.
pub async fn run_session(
    mut session: GameSession,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
) -> GameSession {
    let tick_interval = Duration::from_secs_f64(session.config().tick_secs());
    let mut interval = tokio::time::interval(tick_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                session.tick();
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(cmd) => {
                        tracing::debug!(?cmd, "Session command");
                        if let Err(e) = session.command(cmd) {
                            tracing::warn!(error = %e, "Session command failed");
                        }
                    },
                    None => {
                        tracing::debug!("Command channel closed, quitting");
                        if let Err(e) = session.command(SessionCommand::QuitToHome) {
                            tracing::debug!(error = %e, "Quit on close");
                        }
                    },
                }
                if session.is_ended() {
                    break;
                }
            }
        }
    }

    tracing::info!(ticks = session.snapshot().tick, "Session loop exited");
    session
}

/// Spawn [`run_session`] as a tokio task.
pub fn spawn_session(session: GameSession) -> (SessionHandle, JoinHandle<GameSession>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let handle = SessionHandle::new(cmd_tx, session.subscribe());
    let task = tokio::spawn(run_session(session, cmd_rx));
    (handle, task)
}
