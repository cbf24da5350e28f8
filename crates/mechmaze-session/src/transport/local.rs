use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc;

use mechmaze_core::player::PeerId;

use super::{Invitation, SendTarget, Transport, TransportError, TransportEvent};

/// One device attached to the mesh.
struct Endpoint {
    display_name: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    max_peers: usize,
    hosting: bool,
    browsing: bool,
    suspended: bool,
    connections: BTreeSet<PeerId>,
    /// Peers whose invitation is waiting for us to accept.
    invitations: HashSet<PeerId>,
}

#[derive(Default)]
struct MeshInner {
    next_id: PeerId,
    endpoints: HashMap<PeerId, Endpoint>,
}

impl MeshInner {
    fn emit(&self, to: PeerId, event: TransportEvent) {
        if let Some(ep) = self.endpoints.get(&to) {
            // Receiver gone means the device is shutting down.
            let _ = ep.events.send(event);
        }
    }
}

/// In-process stand-in for the short-range wireless mesh. Every device that
/// joins gets a [`LocalTransport`] sharing the same hub.
#[derive(Clone, Default)]
pub struct LocalMesh {
    inner: Arc<Mutex<MeshInner>>,
}

impl LocalMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device. Returns its transport and the event stream the
    /// session should drain.
    pub fn join(
        &self,
        display_name: &str,
        max_peers: usize,
    ) -> (LocalTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = lock(&self.inner);
        inner.next_id += 1;
        let id = inner.next_id;
        inner.endpoints.insert(
            id,
            Endpoint {
                display_name: display_name.to_string(),
                events: tx,
                max_peers,
                hosting: false,
                browsing: false,
                suspended: false,
                connections: BTreeSet::new(),
                invitations: HashSet::new(),
            },
        );
        drop(inner);
        tracing::debug!(peer = id, name = display_name, "Device joined local mesh");
        (
            LocalTransport {
                id,
                mesh: Arc::clone(&self.inner),
            },
            rx,
        )
    }

    pub fn device_count(&self) -> usize {
        lock(&self.inner).endpoints.len()
    }
}

fn lock(mesh: &Mutex<MeshInner>) -> MutexGuard<'_, MeshInner> {
    mesh.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connect `a` and `b` and tell both sides.
fn link(inner: &mut MeshInner, a: PeerId, b: PeerId) {
    for (x, y) in [(a, b), (b, a)] {
        if let Some(ep) = inner.endpoints.get_mut(&x) {
            ep.connections.insert(y);
        }
    }
    inner.emit(a, TransportEvent::PeerConnected(b));
    inner.emit(b, TransportEvent::PeerConnected(a));
}

/// A device's handle on a [`LocalMesh`].
pub struct LocalTransport {
    id: PeerId,
    mesh: Arc<Mutex<MeshInner>>,
}

impl LocalTransport {
    pub fn peer_id(&self) -> PeerId {
        self.id
    }

    fn close(&self, inner: &mut MeshInner) {
        let Some(me) = inner.endpoints.get_mut(&self.id) else {
            return;
        };
        let peers: Vec<PeerId> = std::mem::take(&mut me.connections).into_iter().collect();
        let was_hosting = std::mem::replace(&mut me.hosting, false);
        me.browsing = false;

        for peer in &peers {
            if let Some(ep) = inner.endpoints.get_mut(peer) {
                ep.connections.remove(&self.id);
            }
            inner.emit(*peer, TransportEvent::PeerDisconnected(self.id));
            inner.emit(self.id, TransportEvent::PeerDisconnected(*peer));
        }
        if was_hosting {
            let browsers: Vec<PeerId> = inner
                .endpoints
                .iter()
                .filter(|(id, ep)| **id != self.id && ep.browsing)
                .map(|(id, _)| *id)
                .collect();
            for b in browsers {
                inner.emit(b, TransportEvent::PeerLost(self.id));
            }
        }
    }
}

impl Transport for LocalTransport {
    fn start_hosting(&mut self) -> Result<(), TransportError> {
        let mut inner = lock(&self.mesh);
        let me = inner
            .endpoints
            .get_mut(&self.id)
            .ok_or(TransportError::Closed)?;
        if me.hosting {
            return Ok(());
        }
        me.hosting = true;
        let name = me.display_name.clone();
        let browsers: Vec<PeerId> = inner
            .endpoints
            .iter()
            .filter(|(id, ep)| **id != self.id && ep.browsing)
            .map(|(id, _)| *id)
            .collect();
        for b in browsers {
            inner.emit(
                b,
                TransportEvent::PeerDiscovered {
                    peer: self.id,
                    display_name: name.clone(),
                },
            );
        }
        Ok(())
    }

    fn start_browsing(&mut self) -> Result<(), TransportError> {
        let mut inner = lock(&self.mesh);
        let me = inner
            .endpoints
            .get_mut(&self.id)
            .ok_or(TransportError::Closed)?;
        if me.browsing {
            return Ok(());
        }
        me.browsing = true;
        let hosts: Vec<(PeerId, String)> = inner
            .endpoints
            .iter()
            .filter(|(id, ep)| **id != self.id && ep.hosting)
            .map(|(id, ep)| (*id, ep.display_name.clone()))
            .collect();
        for (peer, display_name) in hosts {
            inner.emit(
                self.id,
                TransportEvent::PeerDiscovered { peer, display_name },
            );
        }
        Ok(())
    }

    fn invite(&mut self, peer: PeerId) -> Result<(), TransportError> {
        let mut inner = lock(&self.mesh);
        let name = inner
            .endpoints
            .get(&self.id)
            .map(|ep| ep.display_name.clone())
            .ok_or(TransportError::Closed)?;
        let target = inner
            .endpoints
            .get_mut(&peer)
            .filter(|ep| ep.hosting)
            .ok_or(TransportError::UnknownPeer(peer))?;
        target.invitations.insert(self.id);
        inner.emit(
            peer,
            TransportEvent::InvitationReceived(Invitation {
                from: self.id,
                display_name: name,
            }),
        );
        Ok(())
    }

    fn accept(&mut self, invitation: &Invitation) -> Result<(), TransportError> {
        let from = invitation.from;
        let mut inner = lock(&self.mesh);
        let (my_len, my_max) = {
            let me = inner
                .endpoints
                .get_mut(&self.id)
                .ok_or(TransportError::Closed)?;
            if !me.invitations.remove(&from) {
                return Err(TransportError::NoInvitation(from));
            }
            (me.connections.len(), me.max_peers)
        };
        let inviter = inner
            .endpoints
            .get(&from)
            .ok_or(TransportError::UnknownPeer(from))?;
        if my_len >= my_max || inviter.connections.len() >= inviter.max_peers {
            return Err(TransportError::AtCapacity);
        }

        // Joining a session joins all of it: the newcomer is linked to every
        // member that still has room.
        let members: Vec<PeerId> = inner
            .endpoints
            .get(&self.id)
            .map(|ep| ep.connections.iter().copied().collect())
            .unwrap_or_default();
        link(&mut inner, self.id, from);
        for member in members {
            if member == from {
                continue;
            }
            let member_has_room = inner
                .endpoints
                .get(&member)
                .is_some_and(|ep| ep.connections.len() < ep.max_peers);
            let newcomer_has_room = inner
                .endpoints
                .get(&from)
                .is_some_and(|ep| ep.connections.len() < ep.max_peers);
            if member_has_room && newcomer_has_room {
                link(&mut inner, member, from);
            }
        }
        tracing::debug!(peer = self.id, inviter = from, "Invitation accepted");
        Ok(())
    }

    fn send(&mut self, payload: Bytes, to: SendTarget) {
        let inner = lock(&self.mesh);
        let Some(me) = inner.endpoints.get(&self.id) else {
            return;
        };
        if me.suspended {
            tracing::trace!(peer = self.id, "Send dropped while suspended");
            return;
        }
        let targets: Vec<PeerId> = match to {
            SendTarget::All => me.connections.iter().copied().collect(),
            SendTarget::Peer(p) if me.connections.contains(&p) => vec![p],
            SendTarget::Peer(p) => {
                tracing::debug!(peer = self.id, to = p, "Send to unconnected peer dropped");
                return;
            },
        };
        for t in targets {
            let receiving = inner.endpoints.get(&t).is_some_and(|ep| !ep.suspended);
            if receiving {
                inner.emit(
                    t,
                    TransportEvent::Message {
                        from: self.id,
                        payload: payload.clone(),
                    },
                );
            }
        }
    }

    fn suspend(&mut self) {
        if let Some(me) = lock(&self.mesh).endpoints.get_mut(&self.id) {
            me.suspended = true;
        }
    }

    fn resume(&mut self) {
        if let Some(me) = lock(&self.mesh).endpoints.get_mut(&self.id) {
            me.suspended = false;
        }
    }

    fn disconnect_all(&mut self) {
        let mesh = Arc::clone(&self.mesh);
        let mut inner = lock(&mesh);
        self.close(&mut inner);
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        lock(&self.mesh)
            .endpoints
            .get(&self.id)
            .map(|ep| ep.connections.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        let mesh = Arc::clone(&self.mesh);
        let mut inner = lock(&mesh);
        self.close(&mut inner);
        inner.endpoints.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    /// Host + guest connected through discovery and invitation.
    fn connected_pair() -> (
        LocalMesh,
        (LocalTransport, mpsc::UnboundedReceiver<TransportEvent>),
        (LocalTransport, mpsc::UnboundedReceiver<TransportEvent>),
    ) {
        let mesh = LocalMesh::new();
        let (mut host, mut host_rx) = mesh.join("host", 7);
        let (mut guest, mut guest_rx) = mesh.join("guest", 7);
        host.start_hosting().unwrap();
        guest.start_browsing().unwrap();
        guest.invite(host.peer_id()).unwrap();
        let inv = drain(&mut host_rx)
            .into_iter()
            .find_map(|e| match e {
                TransportEvent::InvitationReceived(inv) => Some(inv),
                _ => None,
            })
            .unwrap();
        host.accept(&inv).unwrap();
        drain(&mut host_rx);
        drain(&mut guest_rx);
        (mesh, (host, host_rx), (guest, guest_rx))
    }

    #[test]
    fn browsing_discovers_existing_host() {
        let mesh = LocalMesh::new();
        let (mut host, _host_rx) = mesh.join("host", 7);
        let (mut guest, mut guest_rx) = mesh.join("guest", 7);
        host.start_hosting().unwrap();
        guest.start_browsing().unwrap();
        assert_eq!(
            drain(&mut guest_rx),
            vec![TransportEvent::PeerDiscovered {
                peer: host.peer_id(),
                display_name: "host".to_string()
            }]
        );
    }

    #[test]
    fn hosting_twice_announces_once() {
        let mesh = LocalMesh::new();
        let (mut guest, mut guest_rx) = mesh.join("guest", 7);
        guest.start_browsing().unwrap();
        let (mut host, _host_rx) = mesh.join("host", 7);
        host.start_hosting().unwrap();
        host.start_hosting().unwrap();
        assert_eq!(drain(&mut guest_rx).len(), 1);
    }

    #[test]
    fn accept_connects_both_sides() {
        let mesh = LocalMesh::new();
        let (mut host, mut host_rx) = mesh.join("host", 7);
        let (mut guest, mut guest_rx) = mesh.join("guest", 7);
        host.start_hosting().unwrap();
        guest.start_browsing().unwrap();
        guest.invite(host.peer_id()).unwrap();
        let inv = Invitation {
            from: guest.peer_id(),
            display_name: "guest".to_string(),
        };
        assert_eq!(
            drain(&mut host_rx),
            vec![TransportEvent::InvitationReceived(inv.clone())]
        );
        host.accept(&inv).unwrap();
        assert_eq!(
            drain(&mut host_rx),
            vec![TransportEvent::PeerConnected(guest.peer_id())]
        );
        assert!(
            drain(&mut guest_rx).contains(&TransportEvent::PeerConnected(host.peer_id()))
        );
        assert_eq!(host.connected_peers(), vec![guest.peer_id()]);
    }

    #[test]
    fn newcomer_joins_every_member() {
        let (mesh, (mut host, mut host_rx), (guest, mut guest_rx)) = connected_pair();
        let (mut third, mut third_rx) = mesh.join("third", 7);
        third.invite(host.peer_id()).unwrap();
        let inv = drain(&mut host_rx)
            .into_iter()
            .find_map(|e| match e {
                TransportEvent::InvitationReceived(inv) => Some(inv),
                _ => None,
            })
            .unwrap();
        host.accept(&inv).unwrap();

        assert!(drain(&mut guest_rx).contains(&TransportEvent::PeerConnected(third.peer_id())));
        let third_events = drain(&mut third_rx);
        assert!(third_events.contains(&TransportEvent::PeerConnected(host.peer_id())));
        assert!(third_events.contains(&TransportEvent::PeerConnected(guest.peer_id())));
        assert_eq!(
            third.connected_peers(),
            vec![host.peer_id(), guest.peer_id()]
        );
    }

    #[test]
    fn accept_without_invitation_fails() {
        let mesh = LocalMesh::new();
        let (mut host, _rx) = mesh.join("host", 7);
        let err = host
            .accept(&Invitation {
                from: 99,
                display_name: "ghost".into(),
            })
            .unwrap_err();
        assert!(matches!(err, TransportError::NoInvitation(99)));
    }

    #[test]
    fn invite_non_host_fails() {
        let mesh = LocalMesh::new();
        let (mut a, _arx) = mesh.join("a", 7);
        let (b, _brx) = mesh.join("b", 7);
        assert!(matches!(
            a.invite(b.peer_id()),
            Err(TransportError::UnknownPeer(_))
        ));
    }

    #[test]
    fn capacity_enforced() {
        let mesh = LocalMesh::new();
        let (mut host, mut host_rx) = mesh.join("host", 1);
        host.start_hosting().unwrap();
        let (mut g1, _g1rx) = mesh.join("g1", 7);
        let (mut g2, _g2rx) = mesh.join("g2", 7);
        g1.invite(host.peer_id()).unwrap();
        g2.invite(host.peer_id()).unwrap();
        let invs: Vec<Invitation> = drain(&mut host_rx)
            .into_iter()
            .filter_map(|e| match e {
                TransportEvent::InvitationReceived(inv) => Some(inv),
                _ => None,
            })
            .collect();
        host.accept(&invs[0]).unwrap();
        assert!(matches!(
            host.accept(&invs[1]),
            Err(TransportError::AtCapacity)
        ));
    }

    #[test]
    fn send_preserves_per_peer_order() {
        let (_mesh, (mut host, _host_rx), (guest, mut guest_rx)) = connected_pair();
        for i in 0..10u8 {
            host.send(Bytes::from(vec![i]), SendTarget::Peer(guest.peer_id()));
        }
        let got: Vec<u8> = drain(&mut guest_rx)
            .into_iter()
            .filter_map(|e| match e {
                TransportEvent::Message { payload, .. } => Some(payload[0]),
                _ => None,
            })
            .collect();
        assert_eq!(got, (0..10).collect::<Vec<u8>>());
    }

    #[test]
    fn suspended_device_neither_sends_nor_receives() {
        let (_mesh, (mut host, mut host_rx), (mut guest, mut guest_rx)) = connected_pair();
        guest.suspend();
        host.send(Bytes::from_static(b"x"), SendTarget::All);
        guest.send(Bytes::from_static(b"y"), SendTarget::All);
        assert!(drain(&mut guest_rx).is_empty());
        assert!(drain(&mut host_rx).is_empty());
        assert_eq!(guest.connected_peers(), vec![host.peer_id()]);

        guest.resume();
        host.send(Bytes::from_static(b"z"), SendTarget::All);
        assert_eq!(drain(&mut guest_rx).len(), 1);
    }

    #[test]
    fn disconnect_all_notifies_peers() {
        let (_mesh, (mut host, mut host_rx), (guest, _guest_rx)) = connected_pair();
        host.disconnect_all();
        assert!(host.connected_peers().is_empty());
        assert!(guest.connected_peers().is_empty());
        assert!(drain(&mut host_rx).contains(&TransportEvent::PeerDisconnected(guest.peer_id())));
    }

    #[test]
    fn drop_disconnects_and_leaves_mesh() {
        let (mesh, (host, _host_rx), (guest, mut guest_rx)) = connected_pair();
        let host_id = host.peer_id();
        drop(host);
        assert_eq!(mesh.device_count(), 1);
        assert!(drain(&mut guest_rx).contains(&TransportEvent::PeerDisconnected(host_id)));
        assert!(guest.connected_peers().is_empty());
    }
}
