//! Shared scaffolding for the integration suites.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use tidepool_cluster::{
    Cluster, ClusterConfig, HandlerRegistration, JsonCodec, MessageCodec, PeerAddress, PeerId,
};

/// Run a test body on a fresh current-thread runtime.
pub fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build test runtime")
        .block_on(future)
}

/// Random base port in `[10000, 30000)`.
pub fn pick_port() -> u16 {
    10000 + rand::rng().random_range(0..20000) as u16
}

/// Bind `count` nodes on consecutive ports, retrying with a different base
/// port if a bind collides with another test.
pub fn bind_group(count: usize, config: &ClusterConfig) -> Vec<Cluster> {
    for _ in 0..16 {
        let base = pick_port();
        let mut nodes = Vec::with_capacity(count);
        let mut ok = true;
        for i in 0..count {
            match Cluster::bind_with(base + i as u16, config.clone()) {
                Ok(node) => nodes.push(node),
                Err(_) => {
                    ok = false;
                    break;
                }
            }
        }
        if ok {
            return nodes;
        }
    }
    panic!("could not find a free port range");
}

/// Address of a bound node.
pub fn addr_of(node: &Cluster) -> PeerAddress {
    node.listen_address()
}

/// Delay long enough for in-flight events to land. Only negative
/// assertions should rely on this; positive ones poll with [`wait_until`].
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(400)).await;
}

/// Poll `condition` until it holds or a 10s deadline passes.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[derive(Default)]
struct RecordingState {
    inbox: HashMap<i32, PeerId>,
    timing: HashMap<i32, u32>,
    sequence: u32,
}

/// Sends and receives integers over the message service, recording what
/// arrived from whom and in which order.
pub struct RecordingApp {
    registration: HandlerRegistration,
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingApp {
    pub fn new(cluster: &Cluster) -> Arc<Self> {
        let state = Arc::new(Mutex::new(RecordingState::default()));
        let registration = {
            let state = state.clone();
            cluster.register_handler(move |peer, payload| {
                let value: i32 = JsonCodec.decode(&payload).expect("undecodable test message");
                let mut state = state.lock().unwrap();
                let sequence = state.sequence;
                state.sequence += 1;
                state.inbox.insert(value, peer);
                state.timing.insert(value, sequence);
            })
        };
        Arc::new(Self {
            registration,
            state,
        })
    }

    pub fn send(&self, value: i32, peer: PeerId) {
        let payload = JsonCodec.encode(&value).expect("encode test message");
        self.registration.send(peer, &payload);
    }

    pub fn has(&self, value: i32) -> bool {
        self.state.lock().unwrap().inbox.contains_key(&value)
    }

    pub fn expect(&self, value: i32, from: PeerId) {
        let state = self.state.lock().unwrap();
        assert_eq!(
            state.inbox.get(&value),
            Some(&from),
            "message {value} should have been delivered from {from}"
        );
    }

    pub fn expect_undelivered(&self, value: i32) {
        assert!(
            !self.has(value),
            "message {value} should not have been delivered"
        );
    }

    pub fn expect_order(&self, first: i32, second: i32) {
        let state = self.state.lock().unwrap();
        let a = state.timing.get(&first).expect("first message missing");
        let b = state.timing.get(&second).expect("second message missing");
        assert!(a < b, "message {first} should precede {second}");
    }
}
