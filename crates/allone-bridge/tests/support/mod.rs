//! In-memory emulated bridge network for integration tests.
//!
//! [`FakeNetwork`] implements [`Transport`].  Every link it opens gets its own
//! inbox; a request sent on a link is decoded, handed to every emulated
//! bridge it is addressed to, and the bridges' replies are delivered back to
//! that link's inbox after their configured delays.
//!
//! Every request and every delivered reply is appended to one event log so
//! tests can assert on exactly what crossed the "wire" and in which order.

#![allow(dead_code)]

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use allone_bridge::application::ports::{Link, LinkPurpose, Transport};
use allone_bridge::application::{AckPolicy, EngineSettings};
use allone_core::protocol::{
    DiscoverReply, EmitAck, LearnReply, Reply, Request, SubscribeReply, PROTOCOL_PORT,
};
use allone_core::Identifier;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Timeouts short enough for tests, long enough for a loaded CI box.
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        broadcast: SocketAddr::from(([255, 255, 255, 255], PROTOCOL_PORT)),
        discovery_window: Duration::from_millis(60),
        subscribe_timeout: Duration::from_millis(60),
        subscribe_min_interval: Duration::ZERO,
        learn_timeout: Duration::from_millis(250),
        learn_ack_timeout: Duration::from_millis(60),
        emit_ack_timeout: Duration::from_millis(60),
        emit_spacing: Duration::from_millis(5),
        ack_policy: AckPolicy::Required,
    }
}

pub fn bridge_addr(last: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, last], PROTOCOL_PORT))
}

pub fn bridge_id(last: u8) -> Identifier {
    Identifier::new([0xAC, 0xCF, 0x23, 0x00, 0x00, last])
}

// ── Wire log ──────────────────────────────────────────────────────────────────

/// One thing that crossed the emulated wire.
#[derive(Debug, Clone, PartialEq)]
pub enum WireEvent {
    /// Controller → bridge(s).
    Request { target: SocketAddr, request: Request },
    /// Bridge → controller, logged when it lands in the controller's inbox.
    Reply { from: SocketAddr, reply: Reply },
    /// Undecodable bytes delivered to the controller.
    Garbage { from: SocketAddr },
}

// ── Bridge behaviour ──────────────────────────────────────────────────────────

/// How an emulated bridge answers emit requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Always,
    Never,
    /// Swallow this many emits, then ack every later one.
    DropFirst(usize),
}

#[derive(Debug, Clone)]
pub struct Behaviour {
    pub model: Vec<u8>,
    pub answers_discovery: bool,
    /// Answer each discovery request this many times.
    pub discovery_repeats: usize,
    pub answers_subscribe: bool,
    /// Answer subscriptions in the name of this identifier instead.
    pub subscribe_as: Option<Identifier>,
    /// Reply "waiting" to enter-learn.
    pub acks_learn: bool,
    /// Deliver this code this long after enter-learn.
    pub capture: Option<(Duration, Vec<u8>)>,
    pub acks: AckMode,
    /// Codes that are never acknowledged, whatever `acks` says.
    pub silent_codes: Vec<Vec<u8>>,
    pub ack_delay: Duration,
    /// Precede every reply with garbage and with a frame for a foreign
    /// identifier, both from this bridge's address.
    pub noisy: bool,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            model: b"IRD005".to_vec(),
            answers_discovery: true,
            discovery_repeats: 1,
            answers_subscribe: true,
            subscribe_as: None,
            acks_learn: true,
            capture: None,
            acks: AckMode::Always,
            silent_codes: Vec::new(),
            ack_delay: Duration::ZERO,
            noisy: false,
        }
    }
}

/// What a bridge wants delivered, and after how long.
enum Outgoing {
    Reply(Duration, Reply),
    Garbage(Duration, Vec<u8>),
}

/// One emulated Allone bridge.
#[derive(Debug)]
pub struct FakeBridge {
    pub address: SocketAddr,
    pub identifier: Identifier,
    behaviour: Mutex<Behaviour>,
    /// Bridge-side session: learn and emit are ignored until subscribed.
    subscribed: Mutex<bool>,
    emits_seen: AtomicUsize,
}

impl FakeBridge {
    pub fn new(address: SocketAddr, identifier: Identifier, behaviour: Behaviour) -> Self {
        Self {
            address,
            identifier,
            behaviour: Mutex::new(behaviour),
            subscribed: Mutex::new(false),
            emits_seen: AtomicUsize::new(0),
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut Behaviour)) {
        f(&mut self.behaviour.lock().unwrap());
    }

    /// Drops the bridge-side session, as a bridge does after a while.
    pub fn forget_subscription(&self) {
        *self.subscribed.lock().unwrap() = false;
    }

    pub fn is_subscribed(&self) -> bool {
        *self.subscribed.lock().unwrap()
    }

    fn handle(&self, request: &Request) -> Vec<Outgoing> {
        let b = self.behaviour.lock().unwrap().clone();
        let mut out = Vec::new();

        let replies: Vec<(Duration, Reply)> = match request {
            Request::Discover => {
                if !b.answers_discovery {
                    return out;
                }
                let reply = Reply::Discover(DiscoverReply {
                    identifier: self.identifier,
                    model: b.model.clone(),
                    trailer: vec![0x00, 0x01],
                });
                vec![(Duration::ZERO, reply); b.discovery_repeats]
            }
            Request::Subscribe { identifier } => {
                if *identifier != self.identifier || !b.answers_subscribe {
                    return out;
                }
                *self.subscribed.lock().unwrap() = true;
                vec![(
                    Duration::ZERO,
                    Reply::Subscribe(SubscribeReply {
                        identifier: b.subscribe_as.unwrap_or(self.identifier),
                        state: 0x01,
                    }),
                )]
            }
            Request::EnterLearn { identifier } => {
                if *identifier != self.identifier || !self.is_subscribed() {
                    return out;
                }
                let mut replies = Vec::new();
                if b.acks_learn {
                    replies.push((
                        Duration::ZERO,
                        Reply::Learn(LearnReply::Waiting {
                            identifier: self.identifier,
                        }),
                    ));
                }
                if let Some((delay, code)) = b.capture {
                    replies.push((
                        delay,
                        Reply::Learn(LearnReply::Captured {
                            identifier: self.identifier,
                            code,
                        }),
                    ));
                }
                replies
            }
            Request::Emit { identifier, code, .. } => {
                if *identifier != self.identifier || !self.is_subscribed() {
                    return out;
                }
                let seen = self.emits_seen.fetch_add(1, Ordering::SeqCst);
                let ack = !b.silent_codes.contains(code)
                    && match b.acks {
                        AckMode::Always => true,
                        AckMode::Never => false,
                        AckMode::DropFirst(n) => seen >= n,
                    };
                if !ack {
                    Vec::new()
                } else {
                    vec![(
                        b.ack_delay,
                        Reply::EmitAck(EmitAck {
                            identifier: self.identifier,
                        }),
                    )]
                }
            }
        };

        if b.noisy {
            let foreign = Identifier::new([0xEE; 6]);
            out.push(Outgoing::Garbage(Duration::ZERO, b"\x00\x01not a frame".to_vec()));
            out.push(Outgoing::Reply(
                Duration::ZERO,
                Reply::Learn(LearnReply::Captured {
                    identifier: foreign,
                    code: vec![0xBA, 0xD0],
                }),
            ));
            out.push(Outgoing::Reply(
                Duration::ZERO,
                Reply::EmitAck(EmitAck { identifier: foreign }),
            ));
        }
        out.extend(replies.into_iter().map(|(d, r)| Outgoing::Reply(d, r)));
        out
    }
}

// ── Network ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Inner {
    bridges: Mutex<Vec<Arc<FakeBridge>>>,
    events: Mutex<Vec<WireEvent>>,
    links_opened: AtomicUsize,
    /// Set while a discovery link holds the listen port.
    discovery_port_bound: AtomicBool,
}

/// An emulated LAN of Allone bridges.
#[derive(Debug, Clone, Default)]
pub struct FakeNetwork {
    inner: Arc<Inner>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bridge(&self, last: u8, behaviour: Behaviour) -> Arc<FakeBridge> {
        self.add(FakeBridge::new(bridge_addr(last), bridge_id(last), behaviour))
    }

    pub fn add(&self, bridge: FakeBridge) -> Arc<FakeBridge> {
        let bridge = Arc::new(bridge);
        self.inner.bridges.lock().unwrap().push(Arc::clone(&bridge));
        bridge
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }

    pub fn events(&self) -> Vec<WireEvent> {
        self.inner.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.inner.events.lock().unwrap().clear();
    }

    /// Every request sent so far, in order.
    pub fn requests(&self) -> Vec<(SocketAddr, Request)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                WireEvent::Request { target, request } => Some((target, request)),
                _ => None,
            })
            .collect()
    }

    pub fn count_requests(&self, pred: impl Fn(&Request) -> bool) -> usize {
        self.requests().iter().filter(|(_, r)| pred(r)).count()
    }

    /// Packet ids of every emit sent so far.
    pub fn emit_packet_ids(&self) -> Vec<u16> {
        self.requests()
            .into_iter()
            .filter_map(|(_, r)| match r {
                Request::Emit { packet_id, .. } => Some(packet_id),
                _ => None,
            })
            .collect()
    }

    /// Codes of every emit sent so far.
    pub fn emitted_codes(&self) -> Vec<Vec<u8>> {
        self.requests()
            .into_iter()
            .filter_map(|(_, r)| match r {
                Request::Emit { code, .. } => Some(code),
                _ => None,
            })
            .collect()
    }

    pub fn links_opened(&self) -> usize {
        self.inner.links_opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeNetwork {
    async fn open(&self, purpose: LinkPurpose) -> io::Result<Box<dyn Link>> {
        // Like a real socket on the fixed listen port: one holder at a time.
        let holds_discovery_port = purpose == LinkPurpose::Discovery;
        if holds_discovery_port && self.inner.discovery_port_bound.swap(true, Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                "discovery port already bound",
            ));
        }
        let n = self.inner.links_opened.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Box::new(FakeLink {
            inner: Arc::clone(&self.inner),
            tx,
            rx,
            local: SocketAddr::from(([10, 0, 0, 1], 40000 + n as u16)),
            holds_discovery_port,
        }))
    }
}

fn is_broadcast(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_broadcast() || v4.octets()[3] == 255,
        IpAddr::V6(_) => false,
    }
}

struct FakeLink {
    inner: Arc<Inner>,
    tx: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    rx: mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>,
    local: SocketAddr,
    holds_discovery_port: bool,
}

impl Drop for FakeLink {
    fn drop(&mut self) {
        if self.holds_discovery_port {
            self.inner.discovery_port_bound.store(false, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Link for FakeLink {
    async fn send_to(&mut self, datagram: &[u8], target: SocketAddr) -> io::Result<()> {
        let request = Request::decode(datagram)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        self.inner.events.lock().unwrap().push(WireEvent::Request {
            target,
            request: request.clone(),
        });

        let bridges: Vec<Arc<FakeBridge>> = self
            .inner
            .bridges
            .lock()
            .unwrap()
            .iter()
            .filter(|b| is_broadcast(target.ip()) || b.address.ip() == target.ip())
            .cloned()
            .collect();

        for bridge in bridges {
            for outgoing in bridge.handle(&request) {
                let (delay, bytes, event) = match outgoing {
                    Outgoing::Reply(delay, reply) => {
                        let bytes = reply.encode().expect("emulated reply encodes");
                        let event = WireEvent::Reply {
                            from: bridge.address,
                            reply,
                        };
                        (delay, bytes, event)
                    }
                    Outgoing::Garbage(delay, bytes) => (
                        delay,
                        bytes,
                        WireEvent::Garbage {
                            from: bridge.address,
                        },
                    ),
                };
                deliver(
                    Arc::clone(&self.inner),
                    self.tx.clone(),
                    bridge.address,
                    delay,
                    bytes,
                    event,
                );
            }
        }
        Ok(())
    }

    async fn recv_from(&mut self) -> io::Result<(Vec<u8>, SocketAddr)> {
        // The link keeps a sender, so the channel never closes; callers bound
        // this wait with their own deadline.
        self.rx
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, format!("{} closed", self.local)))
    }
}

fn deliver(
    inner: Arc<Inner>,
    tx: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    from: SocketAddr,
    delay: Duration,
    bytes: Vec<u8>,
    event: WireEvent,
) {
    if delay.is_zero() {
        inner.events.lock().unwrap().push(event);
        let _ = tx.send((bytes, from));
        return;
    }
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        inner.events.lock().unwrap().push(event);
        let _ = tx.send((bytes, from));
    });
}
