use std::fmt;

use glam::Vec2;

use mechmaze_core::player::{Edge, MechColor, NetworkPlayer, PeerId, PlayerId};
use mechmaze_core::room::MAX_SESSION_DEVICES;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterError {
    Full,
    LocalIdClash(PlayerId),
}

impl fmt::Display for RosterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "roster is full ({MAX_SESSION_DEVICES} devices)"),
            Self::LocalIdClash(id) => write!(f, "remote peer claims the local player id {id}"),
        }
    }
}

impl std::error::Error for RosterError {}

/// Result of removing a player.
#[derive(Debug, Clone, PartialEq)]
pub struct Departure {
    pub player: NetworkPlayer,
    /// Player promoted to map mover because the departed one held it.
    pub promoted: Option<PlayerId>,
}

/// Every player in the session, the local one included, in join order.
#[derive(Debug, Clone)]
pub struct Roster {
    players: Vec<NetworkPlayer>,
    started: bool,
    /// Edge order of the running game, including players not yet announced.
    order: Vec<PlayerId>,
}

impl Roster {
    pub fn new(mut local: NetworkPlayer) -> Self {
        local.is_local = true;
        local.color = MechColor::for_slot(0);
        Self {
            players: vec![local],
            started: false,
            order: Vec::new(),
        }
    }

    pub fn players(&self) -> &[NetworkPlayer] {
        &self.players
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn ids(&self) -> Vec<PlayerId> {
        self.players.iter().map(|p| p.id).collect()
    }

    pub fn local(&self) -> &NetworkPlayer {
        // The local player is inserted first and never removed.
        &self.players[0]
    }

    pub fn local_mut(&mut self) -> &mut NetworkPlayer {
        &mut self.players[0]
    }

    pub fn local_id(&self) -> PlayerId {
        self.local().id
    }

    pub fn get(&self, id: PlayerId) -> Option<&NetworkPlayer> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut NetworkPlayer> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    /// Remote player behind a transport peer.
    pub fn by_peer(&self, peer: PeerId) -> Option<&NetworkPlayer> {
        self.players.iter().find(|p| !p.is_local && p.peer == peer)
    }

    pub fn remotes_mut(&mut self) -> impl Iterator<Item = &mut NetworkPlayer> {
        self.players.iter_mut().filter(|p| !p.is_local)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Whether `id` was part of the game when it started.
    pub fn in_game_order(&self, id: PlayerId) -> bool {
        self.order.contains(&id)
    }

    /// Register the player announced on `peer`.
    ///
    /// A peer that announces itself again only has its name refreshed; a
    /// player id that reappears on a new peer (reconnect) is moved to it.
    /// Once the game has started the newcomer takes the edge its place in
    /// the game order gives it, or the lowest free edge.
    pub fn connect(
        &mut self,
        peer: PeerId,
        id: PlayerId,
        display_name: String,
    ) -> Result<&NetworkPlayer, RosterError> {
        if id == self.local_id() {
            return Err(RosterError::LocalIdClash(id));
        }
        if let Some(idx) = self
            .players
            .iter()
            .position(|p| !p.is_local && (p.peer == peer || p.id == id))
        {
            // A peer slot is reused by a different player only if the old one
            // never said goodbye; drop the stale entry first.
            if self.players[idx].id != id {
                self.players.remove(idx);
            } else {
                let p = &mut self.players[idx];
                p.peer = peer;
                p.display_name = display_name;
                return Ok(&self.players[idx]);
            }
        }
        if self.players.len() >= MAX_SESSION_DEVICES as usize {
            return Err(RosterError::Full);
        }

        let mut player = NetworkPlayer::new(id, peer, display_name, false);
        player.place_at(Vec2::ZERO);
        player.color = MechColor::for_slot(self.players.len());
        if self.started {
            player.assigned_edge = self.ordered_edge(id).or_else(|| self.lowest_free_edge());
        }
        tracing::info!(player_id = %id, peer, edge = ?player.assigned_edge, "Player connected");
        self.players.push(player);
        let idx = self.players.len() - 1;
        Ok(&self.players[idx])
    }

    /// Remove the player behind `peer`. If it held the map mover role the
    /// remaining player with the lowest id takes it over immediately.
    pub fn disconnect(&mut self, peer: PeerId) -> Option<Departure> {
        let idx = self
            .players
            .iter()
            .position(|p| !p.is_local && p.peer == peer)?;
        let player = self.players.remove(idx);
        let promoted = if player.is_map_mover {
            let next = self.players.iter().map(|p| p.id).min();
            if let Some(next) = next {
                self.set_map_mover(next);
            }
            next
        } else {
            None
        };
        tracing::info!(player_id = %player.id, peer, ?promoted, "Player disconnected");
        Some(Departure { player, promoted })
    }

    fn edge_is_free(&self, edge: Edge) -> bool {
        !self.players.iter().any(|p| p.assigned_edge == Some(edge))
    }

    fn lowest_free_edge(&self) -> Option<Edge> {
        Edge::ALL.into_iter().find(|e| self.edge_is_free(*e))
    }

    fn ordered_edge(&self, id: PlayerId) -> Option<Edge> {
        let idx = self.order.iter().position(|p| *p == id)?;
        Edge::ALL.get(idx).copied().filter(|e| self.edge_is_free(*e))
    }

    /// Hand out edges for a starting game.
    ///
    /// `order` is the host's join order and is the same on every device, so
    /// every device computes the same assignment. A player in `order` this
    /// device has not heard from yet keeps its edge for when it announces
    /// itself. Players missing from `order` get the remaining edges in
    /// roster order. The first known player in the sequence becomes map
    /// mover.
    pub fn assign_edges(&mut self, order: &[PlayerId]) {
        self.started = true;
        for p in &mut self.players {
            p.assigned_edge = None;
            p.is_map_mover = false;
        }

        let mut sequence: Vec<PlayerId> = Vec::with_capacity(order.len());
        for id in order {
            if !sequence.contains(id) {
                sequence.push(*id);
            }
        }
        for p in &self.players {
            if !sequence.contains(&p.id) {
                sequence.push(p.id);
            }
        }

        for (id, edge) in sequence.iter().zip(Edge::ALL) {
            if let Some(p) = self.get_mut(*id) {
                p.assigned_edge = Some(edge);
            }
        }
        if let Some(first) = sequence.iter().find(|id| self.get(**id).is_some()) {
            self.set_map_mover(*first);
        }
        self.order = sequence;
    }

    /// Make `id` the only map mover. Unknown ids leave the role unchanged.
    pub fn set_map_mover(&mut self, id: PlayerId) {
        if self.get(id).is_none() {
            return;
        }
        for p in &mut self.players {
            p.is_map_mover = p.id == id;
        }
    }

    pub fn map_mover(&self) -> Option<PlayerId> {
        self.players.iter().find(|p| p.is_map_mover).map(|p| p.id)
    }

    pub fn set_ready(&mut self, id: PlayerId, ready: bool) -> bool {
        match self.get_mut(id) {
            Some(p) => {
                p.is_ready = ready;
                true
            },
            None => false,
        }
    }

    pub fn all_ready(&self) -> bool {
        self.players.iter().all(|p| p.is_ready)
    }

    /// Back to the lobby: roles and readiness cleared, players kept.
    pub fn reset(&mut self) {
        self.started = false;
        self.order.clear();
        for p in &mut self.players {
            p.assigned_edge = None;
            p.is_map_mover = false;
            p.is_ready = false;
        }
    }

    /// Move every player to `point`.
    pub fn place_all(&mut self, point: Vec2) {
        for p in &mut self.players {
            p.place_at(point);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use mechmaze_core::test_helpers::{local_player, player_id};

    fn roster_with(n: usize) -> Roster {
        let mut r = Roster::new(local_player("me"));
        for i in 0..n {
            r.connect(i as PeerId + 1, player_id(100 + i as u128), format!("p{i}"))
                .unwrap();
        }
        r
    }

    #[test]
    fn local_player_is_first() {
        let r = roster_with(2);
        assert!(r.local().is_local);
        assert_eq!(r.len(), 3);
        assert!(r.players()[1..].iter().all(|p| !p.is_local));
    }

    #[test]
    fn new_player_starts_at_origin_without_edge() {
        let r = roster_with(1);
        let p = &r.players()[1];
        assert_eq!(p.position, Vec2::ZERO);
        assert_eq!(p.assigned_edge, None);
    }

    #[test]
    fn one_player_per_peer() {
        let mut r = roster_with(1);
        r.connect(1, player_id(100), "renamed".into()).unwrap();
        assert_eq!(r.len(), 2);
        assert_eq!(r.players()[1].display_name, "renamed");

        // Another player announced on the same peer replaces the stale one.
        r.connect(1, player_id(200), "other".into()).unwrap();
        assert_eq!(r.len(), 2);
        assert!(r.get(player_id(100)).is_none());
    }

    #[test]
    fn remote_cannot_claim_local_id() {
        let mut r = roster_with(0);
        let local = r.local_id();
        assert_eq!(
            r.connect(9, local, "imposter".into()).unwrap_err(),
            RosterError::LocalIdClash(local)
        );
    }

    #[test]
    fn roster_caps_at_session_size() {
        let mut r = roster_with(MAX_SESSION_DEVICES as usize - 1);
        assert_eq!(
            r.connect(99, player_id(999), "late".into()).unwrap_err(),
            RosterError::Full
        );
    }

    #[test]
    fn edges_follow_host_order() {
        let mut r = roster_with(3);
        let mut order = r.ids();
        order.reverse();
        r.assign_edges(&order);
        for (id, edge) in order.iter().zip(Edge::ALL) {
            assert_eq!(r.get(*id).unwrap().assigned_edge, Some(edge));
        }
        assert_eq!(r.map_mover(), Some(order[0]));
    }

    #[test]
    fn fewer_than_four_leaves_edges_unassigned() {
        let mut r = roster_with(1);
        r.assign_edges(&r.ids());
        let edges: Vec<Option<Edge>> = r.players().iter().map(|p| p.assigned_edge).collect();
        assert_eq!(edges, vec![Some(Edge::Left), Some(Edge::Right)]);
    }

    #[test]
    fn late_joiner_gets_lowest_free_edge() {
        let mut r = roster_with(2);
        r.assign_edges(&r.ids());
        r.disconnect(1);
        let p = r.connect(7, player_id(300), "late".into()).unwrap();
        assert_eq!(p.assigned_edge, Some(Edge::Right));
    }

    #[test]
    fn late_announcement_keeps_its_ordered_edge() {
        let mut r = roster_with(1);
        let order = vec![r.local_id(), player_id(500), player_id(100)];
        r.assign_edges(&order);
        assert_eq!(r.get(player_id(100)).unwrap().assigned_edge, Some(Edge::Top));
        assert!(r.in_game_order(player_id(500)));
        assert!(!r.in_game_order(player_id(501)));

        let p = r.connect(5, player_id(500), "late".into()).unwrap();
        assert_eq!(p.assigned_edge, Some(Edge::Right));
        assert_eq!(r.map_mover(), Some(r.local_id()));

        r.reset();
        assert!(!r.in_game_order(player_id(500)));
    }

    #[test]
    fn map_mover_promotion_picks_lowest_id() {
        let mut r = roster_with(3);
        let order = vec![player_id(101), player_id(100), player_id(102), r.local_id()];
        r.assign_edges(&order);
        assert_eq!(r.map_mover(), Some(player_id(101)));

        let dep = r.disconnect(2).unwrap();
        assert_eq!(dep.player.id, player_id(101));
        let lowest = r.ids().into_iter().min();
        assert_eq!(dep.promoted, lowest);
        assert_eq!(r.map_mover(), lowest);
        assert_eq!(r.players().iter().filter(|p| p.is_map_mover).count(), 1);
    }

    #[test]
    fn non_mover_departure_promotes_nobody() {
        let mut r = roster_with(2);
        r.assign_edges(&r.ids());
        let dep = r.disconnect(2).unwrap();
        assert_eq!(dep.promoted, None);
        assert_eq!(r.map_mover(), Some(r.local_id()));
    }

    #[test]
    fn disconnect_unknown_peer_is_none() {
        let mut r = roster_with(1);
        assert!(r.disconnect(42).is_none());
    }

    #[test]
    fn ordering_is_stable() {
        let r = roster_with(3);
        assert_eq!(r.ids(), r.ids());
    }

    #[test]
    fn ready_tracking() {
        let mut r = roster_with(1);
        assert!(!r.all_ready());
        for id in r.ids() {
            assert!(r.set_ready(id, true));
        }
        assert!(r.all_ready());
        assert!(!r.set_ready(player_id(5), true));
        r.reset();
        assert!(!r.all_ready());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn edges_are_distinct(remotes in 0usize..4, seed in any::<u64>()) {
                let mut r = roster_with(remotes);
                let mut order = r.ids();
                // Deterministic shuffle from the seed.
                let len = order.len();
                for i in 0..len {
                    let j = ((seed >> (i * 8)) as usize) % len;
                    order.swap(i, j);
                }
                r.assign_edges(&order);
                let edges: HashSet<Edge> =
                    r.players().iter().filter_map(|p| p.assigned_edge).collect();
                prop_assert_eq!(edges.len(), remotes + 1);
                prop_assert_eq!(r.players().iter().filter(|p| p.is_map_mover).count(), 1);
            }
        }
    }
}
