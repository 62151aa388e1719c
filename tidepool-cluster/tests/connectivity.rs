//! Connectivity-layer scenarios: mesh formation, messaging, ordering,
//! peer-list events.

mod common;

use std::sync::{Arc, Mutex};

use common::{addr_of, bind_group, block_on, settle, wait_until, RecordingApp};
use tidepool_cluster::{
    Cluster, ClusterConfig, DisconnectWatcher, PeerId, PeersSubscription, Signal,
};

fn meshed(nodes: &[Cluster], size: usize) -> impl FnMut() -> bool + '_ {
    move || nodes.iter().all(|n| n.peers_list().len() == size)
}

/// Three nodes come up, mesh, and shut down in an arbitrary order.
fn run_start_stop(config: ClusterConfig) {
    block_on(async {
        let mut nodes = bind_group(3, &config);
        let seed = addr_of(&nodes[0]);
        nodes[1].join(seed.clone());
        nodes[2].join(seed);

        assert!(
            wait_until(meshed(&nodes, 3)).await,
            "mesh should reach size 3 on every node"
        );

        // Tear down in a different order than construction.
        nodes.swap(0, 2);
        drop(nodes);
    });
}

#[test]
fn start_stop() {
    run_start_stop(ClusterConfig::default());
}

#[test]
fn start_stop_multi_scheduler() {
    run_start_stop(ClusterConfig::with_schedulers(3));
}

/// Simple point-to-point messages, including a node messaging itself.
fn run_message(config: ClusterConfig) {
    block_on(async {
        let nodes = bind_group(3, &config);
        let apps: Vec<_> = nodes.iter().map(RecordingApp::new).collect();
        let seed = addr_of(&nodes[0]);
        nodes[1].join(seed.clone());
        nodes[2].join(seed);
        assert!(wait_until(meshed(&nodes, 3)).await);
        // Let any gossip-induced double-connects finish resolving before
        // relying on the connections.
        settle().await;

        apps[0].send(873, nodes[1].me());
        apps[1].send(66663, nodes[0].me());
        apps[2].send(6849, nodes[0].me());
        apps[2].send(999, nodes[2].me());

        assert!(wait_until(|| apps[1].has(873) && apps[0].has(66663) && apps[0].has(6849)).await);
        apps[1].expect(873, nodes[0].me());
        apps[0].expect(66663, nodes[1].me());
        apps[0].expect(6849, nodes[2].me());
        apps[2].expect(999, nodes[2].me());
    });
}

#[test]
fn message() {
    run_message(ClusterConfig::default());
}

#[test]
fn message_multi_scheduler() {
    run_message(ClusterConfig::with_schedulers(3));
}

/// Messages to a peer we never joined silently vanish; after joining,
/// delivery works and the old message stays undelivered.
#[test]
fn unreachable_peer() {
    block_on(async {
        let nodes = bind_group(2, &ClusterConfig::default());
        let a1 = RecordingApp::new(&nodes[0]);
        let a2 = RecordingApp::new(&nodes[1]);

        // Note that we DON'T join them together.
        settle().await;
        a1.send(888, nodes[1].me());
        settle().await;
        a2.expect_undelivered(888);

        nodes[0].join(addr_of(&nodes[1]));
        assert!(wait_until(meshed(&nodes, 2)).await);

        a1.send(999, nodes[1].me());
        assert!(wait_until(|| a2.has(999)).await);
        a2.expect_undelivered(888);
        a2.expect(999, nodes[0].me());
    });
}

/// Messages sent by the same route arrive in the order they were sent,
/// both to a remote peer and over the local loopback.
#[test]
fn ordering() {
    block_on(async {
        let nodes = bind_group(2, &ClusterConfig::default());
        let a1 = RecordingApp::new(&nodes[0]);
        let a2 = RecordingApp::new(&nodes[1]);

        nodes[0].join(addr_of(&nodes[1]));
        assert!(wait_until(meshed(&nodes, 2)).await);

        for i in 0..10 {
            a1.send(i, nodes[1].me());
            a1.send(i, nodes[0].me());
        }
        assert!(wait_until(|| (0..10).all(|i| a1.has(i) && a2.has(i))).await);

        for i in 0..9 {
            a1.expect_order(i, i + 1);
            a2.expect_order(i, i + 1);
        }
    });
}

/// `peers_list()` contains the node itself, notices connects (with the
/// right advertised address) and notices disconnects.
#[test]
fn get_peers_list() {
    block_on(async {
        let nodes = bind_group(2, &ClusterConfig::default());
        let c1 = &nodes[0];

        let initial = c1.peers_list();
        assert_eq!(initial.len(), 1);
        assert!(initial.contains(&c1.me()));

        let c2 = &nodes[1];
        let c2_port = addr_of(c2).port;
        c2.join(addr_of(c1));
        assert!(wait_until(|| c1.peers_list().contains(&c2.me())).await);
        assert_eq!(
            c1.peer_address(c2.me()).expect("address of connected peer").port,
            c2_port
        );
    });
}

/// Like `get_peers_list`, but keeps `c1` alive to observe the disconnect.
#[test]
fn get_peers_list_notices_disconnect() {
    block_on(async {
        let mut nodes = bind_group(2, &ClusterConfig::default());
        let c2 = nodes.pop().expect("two nodes");
        let c1 = nodes.pop().expect("two nodes");

        c2.join(addr_of(&c1));
        assert!(wait_until(|| c1.peers_list().len() == 2).await);

        drop(c2);
        assert!(
            wait_until(|| c1.peers_list().len() == 1).await,
            "disconnect should shrink the peers list back to self"
        );
        assert!(c1.peers_list().contains(&c1.me()));
    });
}

/// Freeze-protected subscriptions and disconnect watchers.
#[test]
fn event_watchers() {
    block_on(async {
        let mut nodes = bind_group(2, &ClusterConfig::default());
        let c2 = nodes.pop().expect("two nodes");
        let c1 = nodes.pop().expect("two nodes");
        let c2_id = c2.me();

        // Subscribe for c2's arrival, race-free: inspect the peers list
        // inside the freeze window.
        let connection_established = Arc::new(Signal::new());
        let subscription: Option<PeersSubscription> = {
            let mut freeze = c1.freeze_peers();
            if c1.peers_list().contains(&c2_id) {
                connection_established.pulse();
                None
            } else {
                let signal = connection_established.clone();
                Some(c1.subscribe_peers(
                    &mut freeze,
                    move |_peer| signal.pulse(),
                    |_peer| {},
                ))
            }
        };

        assert!(!connection_established.is_pulsed());
        c1.join(addr_of(&c2));
        assert!(wait_until(|| connection_established.is_pulsed()).await);
        drop(subscription);

        // Watch for c2 going away.
        let disconnect_watcher = DisconnectWatcher::new(&c1, c2_id);
        assert!(!disconnect_watcher.is_pulsed());
        drop(c2);
        assert!(wait_until(|| disconnect_watcher.is_pulsed()).await);

        // A watcher for an already-absent peer is born pulsed.
        let watcher_after = DisconnectWatcher::new(&c1, c2_id);
        assert!(watcher_after.is_pulsed());
        watcher_after.wait().await;
    });
}

/// Event notifications are consistent with `peers_list()`, and a message
/// sent from inside `on_connect` is delivered.
#[test]
fn event_watcher_ordering() {
    block_on(async {
        let mut nodes = bind_group(2, &ClusterConfig::default());
        let c2 = nodes.pop().expect("two nodes");
        let c1 = Arc::new(nodes.pop().expect("two nodes"));
        let a1 = RecordingApp::new(&c1);
        let a2 = RecordingApp::new(&c2);

        let violations: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let _watcher = {
            let mut freeze = c1.freeze_peers();
            let on_connect = {
                let cluster = c1.clone();
                let app = a1.clone();
                let violations = violations.clone();
                move |peer: PeerId| {
                    if !cluster.peers_list().contains(&peer) {
                        violations
                            .lock()
                            .unwrap()
                            .push(format!("on_connect({peer}) without routing entry"));
                    }
                    app.send(89765, peer);
                }
            };
            let on_disconnect = {
                let cluster = c1.clone();
                let violations = violations.clone();
                move |peer: PeerId| {
                    if cluster.peers_list().contains(&peer) {
                        violations
                            .lock()
                            .unwrap()
                            .push(format!("on_disconnect({peer}) with routing entry"));
                    }
                }
            };
            c1.subscribe_peers(&mut freeze, on_connect, on_disconnect)
        };

        c2.join(addr_of(&c1));
        assert!(wait_until(|| a2.has(89765)).await);
        a2.expect(89765, c1.me());

        drop(c2);
        assert!(wait_until(|| c1.peers_list().len() == 1).await);
        assert!(
            violations.lock().unwrap().is_empty(),
            "{:?}",
            violations.lock().unwrap()
        );
    });
}

/// Nothing breaks when nodes are torn down while the mesh is still forming.
#[test]
fn stop_mid_join() {
    block_on(async {
        let nodes = bind_group(5, &ClusterConfig::default());
        let seed = addr_of(&nodes[0]);
        for node in &nodes[1..] {
            node.join(seed.clone());
        }
        // Destroy everything immediately, mid-handshake.
        drop(nodes);
    });
}

/// Two internally-joined blobs merge into one full mesh through a single
/// cross edge.
#[test]
fn blob_join() {
    block_on(async {
        const BLOB: usize = 4;
        let nodes = bind_group(BLOB * 2, &ClusterConfig::default());

        for i in 1..BLOB {
            nodes[i].join(addr_of(&nodes[0]));
        }
        for i in (BLOB + 1)..(BLOB * 2) {
            nodes[i].join(addr_of(&nodes[BLOB]));
        }
        assert!(
            wait_until(|| {
                nodes[..BLOB].iter().all(|n| n.peers_list().len() == BLOB)
                    && nodes[BLOB..].iter().all(|n| n.peers_list().len() == BLOB)
            })
            .await,
            "both blobs should form internally first"
        );

        nodes[1].join(addr_of(&nodes[BLOB + 1]));
        assert!(
            wait_until(meshed(&nodes, BLOB * 2)).await,
            "every node should see all {} members",
            BLOB * 2
        );
    });
}

/// Every octet survives the wire in one message, exactly once.
#[test]
fn binary_data() {
    block_on(async {
        let nodes = bind_group(2, &ClusterConfig::default());
        let spectrum: Vec<u8> = (0..=255u8).collect();

        let received: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
        let sender_reg = nodes[0].register_handler(|_peer, _payload| {});
        let receiver_reg = {
            let received = received.clone();
            nodes[1].register_handler(move |_peer, payload| {
                *received.lock().unwrap() = Some(payload);
            })
        };
        assert_eq!(sender_reg.tag(), receiver_reg.tag());

        nodes[0].join(addr_of(&nodes[1]));
        assert!(wait_until(meshed(&nodes, 2)).await);

        sender_reg.send(nodes[1].me(), &spectrum);
        assert!(wait_until(|| received.lock().unwrap().is_some()).await);
        assert_eq!(
            received.lock().unwrap().as_deref(),
            Some(spectrum.as_slice()),
            "payload should arrive byte-identical with nothing trailing"
        );
    });
}

/// Nil ids are sentinels; live nodes never have one.
#[test]
fn peer_id_semantics() {
    block_on(async {
        assert!(PeerId::NIL.is_nil());
        assert!(PeerId::default().is_nil());

        let nodes = bind_group(1, &ClusterConfig::default());
        assert!(!nodes[0].me().is_nil());
    });
}

/// Two nodes dialing each other at the same time converge on exactly one
/// usable connection in each routing table.
#[test]
fn simultaneous_double_connect() {
    block_on(async {
        let nodes = bind_group(2, &ClusterConfig::default());
        let a1 = RecordingApp::new(&nodes[0]);
        let a2 = RecordingApp::new(&nodes[1]);

        nodes[0].join(addr_of(&nodes[1]));
        nodes[1].join(addr_of(&nodes[0]));
        assert!(wait_until(meshed(&nodes, 2)).await);
        settle().await;

        // Whichever connection survived the tie-break, messages flow both
        // ways and the tables hold exactly one entry per peer.
        assert_eq!(nodes[0].peers_list().len(), 2);
        assert_eq!(nodes[1].peers_list().len(), 2);
        a1.send(1, nodes[1].me());
        a2.send(2, nodes[0].me());
        assert!(wait_until(|| a2.has(1) && a1.has(2)).await);
    });
}
