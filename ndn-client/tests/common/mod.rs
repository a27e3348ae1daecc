//! In-process forwarder for client tests: content store, pending interest table and
//! prefix registrations, speaking the length-prefixed frame protocol over loopback TCP.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use ndn_client::ClientConfig;
use ndn_core::{decode_frame, encode_frame, ContentObject, FrameDecodeError, Interest, Message, Name};

struct Peer {
    writer: TcpStream,
    filters: Vec<Name>,
}

#[derive(Default)]
struct Hub {
    peers: HashMap<usize, Peer>,
    store: Vec<ContentObject>,
    pending: Vec<(usize, Interest)>,
    interests: Vec<Interest>,
    next_peer: usize,
}

impl Hub {
    fn send(&mut self, peer: usize, msg: &Message) {
        let Some(p) = self.peers.get_mut(&peer) else {
            return;
        };
        let frame = encode_frame(msg).expect("encode frame");
        let _ = p.writer.write_all(&frame);
    }

    fn handle(&mut self, from: usize, msg: Message) {
        match msg {
            Message::Hello { .. } => {}
            Message::Register { prefix, .. } => {
                if let Some(p) = self.peers.get_mut(&from) {
                    p.filters.push(prefix);
                }
            }
            Message::Unregister { prefix } => {
                if let Some(p) = self.peers.get_mut(&from) {
                    p.filters.retain(|f| f != &prefix);
                }
            }
            Message::Interest(interest) => {
                self.interests.push(interest.clone());
                if let Some(co) = self.store.iter().find(|co| co.matches_interest(&interest)) {
                    let msg = Message::Data(co.clone());
                    self.send(from, &msg);
                    return;
                }
                let targets: Vec<usize> = self
                    .peers
                    .iter()
                    .filter(|(id, p)| {
                        **id != from && p.filters.iter().any(|f| f.is_prefix_of(&interest.name))
                    })
                    .map(|(id, _)| *id)
                    .collect();
                let forwarded = Message::Interest(interest.clone());
                for t in targets {
                    self.send(t, &forwarded);
                }
                self.pending.push((from, interest));
            }
            Message::Data(co) => {
                let waiting: Vec<usize> = self
                    .pending
                    .iter()
                    .filter(|(_, i)| co.matches_interest(i))
                    .map(|(peer, _)| *peer)
                    .collect();
                self.pending.retain(|(_, i)| !co.matches_interest(i));
                let msg = Message::Data(co.clone());
                for peer in waiting {
                    self.send(peer, &msg);
                }
                self.store.push(co);
            }
        }
    }
}

pub struct MockForwarder {
    addr: String,
    hub: Arc<Mutex<Hub>>,
}

impl MockForwarder {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr").to_string();
        let hub: Arc<Mutex<Hub>> = Arc::default();
        let accept_hub = hub.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else {
                    continue;
                };
                let id = {
                    let mut hub = accept_hub.lock();
                    let id = hub.next_peer;
                    hub.next_peer += 1;
                    let writer = stream.try_clone().expect("clone stream");
                    hub.peers.insert(
                        id,
                        Peer {
                            writer,
                            filters: Vec::new(),
                        },
                    );
                    id
                };
                let hub = accept_hub.clone();
                thread::spawn(move || serve_peer(hub, id, stream));
            }
        });
        Self { addr, hub }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            forwarder_addr: self.addr.clone(),
            tick_interval_ms: 10,
            ..ClientConfig::default()
        }
    }

    /// Put `co` in the content store without signature checks.
    pub fn insert(&self, co: ContentObject) {
        self.hub.lock().store.push(co);
    }

    /// Every interest the forwarder has seen, in arrival order.
    pub fn interests(&self) -> Vec<Interest> {
        self.hub.lock().interests.clone()
    }

    pub fn stored(&self) -> usize {
        self.hub.lock().store.len()
    }

    pub fn peers(&self) -> usize {
        self.hub.lock().peers.len()
    }

    /// Registered prefixes across all clients.
    pub fn registrations(&self) -> Vec<Name> {
        let hub = self.hub.lock();
        hub.peers.values().flat_map(|p| p.filters.iter().cloned()).collect()
    }

    /// Write raw bytes to every connected client.
    pub fn send_raw(&self, bytes: &[u8]) {
        let mut hub = self.hub.lock();
        for p in hub.peers.values_mut() {
            let _ = p.writer.write_all(bytes);
        }
    }

    /// Close every client connection.
    pub fn close_all(&self) {
        let hub = self.hub.lock();
        for p in hub.peers.values() {
            let _ = p.writer.shutdown(Shutdown::Both);
        }
    }

    /// Poll `cond` until it holds or two seconds pass.
    pub fn wait_for(&self, cond: impl Fn(&MockForwarder) -> bool) -> bool {
        for _ in 0..200 {
            if cond(self) {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }
}

fn serve_peer(hub: Arc<Mutex<Hub>>, id: usize, mut stream: TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 16 * 1024];
    loop {
        let n = match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        loop {
            match decode_frame(&buf) {
                Ok((msg, used)) => {
                    buf.drain(..used);
                    hub.lock().handle(id, msg);
                }
                Err(FrameDecodeError::NeedMore) => break,
                Err(_) => return,
            }
        }
    }
    hub.lock().peers.remove(&id);
}
