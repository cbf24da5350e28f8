//! Peer session runtime for Mechmaze.
//!
//! A [`session::GameSession`] is one device's single-writer view of a shared
//! maze: it drains its [`transport::Transport`] at the start of every tick,
//! steps the local mech through the [`world::PhysicsWorld`], feeds local
//! contacts to the game engine and broadcasts the outcomes so every device
//! converges on the same lives, level and checkpoints.

pub mod camera;
pub mod config;
pub mod roster;
pub mod runner;
pub mod session;
pub mod sync;
pub mod transport;
pub mod world;

pub use runner::{run_session, spawn_session};
pub use session::{GameSession, SessionCommand, SessionHandle, SessionSnapshot};
