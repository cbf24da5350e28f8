pub mod effect;
pub mod net;
pub mod player;
pub mod room;
pub mod time;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use crate::player::{MechColor, NetworkPlayer, PeerId, PlayerId};

    /// Create `n` remote test players on peers 1..=n with palette colors by slot.
    /// Ids are random, so sort by id when a test depends on ordering.
    pub fn make_players(n: usize) -> Vec<NetworkPlayer> {
        (0..n)
            .map(|i| {
                let mut p = NetworkPlayer::new(
                    PlayerId::new_random(),
                    i as PeerId + 1,
                    format!("Player{}", i + 1),
                    false,
                );
                p.color = MechColor::for_slot(i);
                p
            })
            .collect()
    }

    /// Create the local player (peer 0).
    pub fn local_player(name: &str) -> NetworkPlayer {
        NetworkPlayer::new(PlayerId::new_random(), 0, name.to_string(), true)
    }

    /// A `PlayerId` with a fixed value, handy for tests that need a known
    /// ordering between ids.
    pub fn player_id(n: u128) -> PlayerId {
        PlayerId(uuid::Uuid::from_u128(n))
    }
}
