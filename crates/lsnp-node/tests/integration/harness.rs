//! Test harness for in-process lsnp-node integration tests.
//!
//! `TestNet` holds several `NodeState`s and plays the network between them:
//! every `Effect::Send` is encoded to bytes, optionally dropped by a loss
//! rule, and dispatched to the addressed node(s). Time is simulated, so
//! retry behaviour is deterministic and tests run instantly.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use lsnp_node::{Effect, NodeError, NodeState, Notice, Now};
use lsnp_protocol::{encode, Destination, Message, Profile, UserId};
use lsnp_transfer::ReceivedFile;

pub const T0: u64 = 1_700_000_000;

/// Decides whether a datagram from `from` to `to` is lost.
pub type LossRule = Box<dyn FnMut(&UserId, &UserId, &Message) -> bool>;

pub struct TestNet {
    nodes: BTreeMap<UserId, NodeState>,
    names: HashMap<String, UserId>,
    queue: VecDeque<(UserId, Message, Destination)>,
    start: Instant,
    elapsed: Duration,
    loss: Option<LossRule>,
    notices: HashMap<UserId, Vec<Notice>>,
    files: HashMap<UserId, Vec<ReceivedFile>>,
    /// Datagrams put on the wire, by message type, lost or not.
    pub sent: Vec<(UserId, Message)>,
}

#[allow(dead_code)]
impl TestNet {
    /// Nodes named `name@10.0.0.N`, N counting from 1.
    pub fn new(names: &[&str]) -> Self {
        let mut nodes = BTreeMap::new();
        let mut ids = HashMap::new();
        for (i, name) in names.iter().enumerate() {
            let user_id = UserId::parse(&format!("{name}@10.0.0.{}", i + 1)).unwrap();
            let state = NodeState::new(
                Profile {
                    user_id: user_id.clone(),
                    display_name: capitalise(name),
                    status: format!("{name} testing"),
                    avatar: None,
                },
                3600,
                16,
            );
            ids.insert(name.to_string(), user_id.clone());
            nodes.insert(user_id, state);
        }
        Self {
            nodes,
            names: ids,
            queue: VecDeque::new(),
            start: Instant::now(),
            elapsed: Duration::ZERO,
            loss: None,
            notices: HashMap::new(),
            files: HashMap::new(),
            sent: Vec::new(),
        }
    }

    pub fn id(&self, name: &str) -> UserId {
        self.names[name].clone()
    }

    pub fn now(&self) -> Now {
        Now {
            wall: T0 + self.elapsed.as_secs(),
            mono: self.start + self.elapsed,
        }
    }

    pub fn node(&self, name: &str) -> &NodeState {
        &self.nodes[&self.names[name]]
    }

    pub fn set_loss(&mut self, rule: impl FnMut(&UserId, &UserId, &Message) -> bool + 'static) {
        self.loss = Some(Box::new(rule));
    }

    pub fn clear_loss(&mut self) {
        self.loss = None;
    }

    /// Run a local operation on `name`, then deliver until quiet.
    pub fn act<T>(
        &mut self,
        name: &str,
        op: impl FnOnce(&mut NodeState, Now) -> Result<T, NodeError>,
    ) -> Result<T::Value, NodeError>
    where
        T: IntoEffects,
    {
        let id = self.id(name);
        let now = self.now();
        let state = self.nodes.get_mut(&id).unwrap();
        let (value, effects) = op(state, now)?.split();
        self.absorb(&id, effects);
        self.deliver();
        Ok(value)
    }

    /// Broadcast `name`'s PROFILE and PING, as its announce task would.
    pub fn announce(&mut self, name: &str) {
        let id = self.id(name);
        let state = &self.nodes[&id];
        let mut effects = state.announce_profile();
        effects.extend(state.announce_ping());
        self.absorb(&id, effects);
        self.deliver();
    }

    /// Put a hand-built message on the wire as if `from` had sent it.
    pub fn inject(&mut self, from: &UserId, message: Message, to: Destination) {
        self.queue.push_back((from.clone(), message, to));
        self.deliver();
    }

    /// Move the clock forward one second at a time, ticking every node's
    /// retry table and delivering after each step.
    pub fn advance(&mut self, secs: u64) {
        for _ in 0..secs {
            self.elapsed += Duration::from_secs(1);
            let now = self.now();
            let ids: Vec<UserId> = self.nodes.keys().cloned().collect();
            for id in ids {
                let effects = self.nodes.get_mut(&id).unwrap().on_tick(now);
                self.absorb(&id, effects);
            }
            self.deliver();
        }
    }

    /// Shut a node down; its REVOKE broadcast is delivered.
    pub fn shutdown(&mut self, name: &str) {
        let id = self.id(name);
        let now = self.now();
        let effects = self.nodes.get_mut(&id).unwrap().shutdown(now);
        self.absorb(&id, effects);
        self.deliver();
    }

    pub fn notices(&self, name: &str) -> &[Notice] {
        self.notices
            .get(&self.names[name])
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn take_notices(&mut self, name: &str) -> Vec<Notice> {
        let id = self.id(name);
        self.notices.remove(&id).unwrap_or_default()
    }

    pub fn files(&self, name: &str) -> &[ReceivedFile] {
        self.files
            .get(&self.names[name])
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Datagrams of the given TYPE put on the wire so far.
    pub fn count_sent(&self, msg_type: &str) -> usize {
        self.sent
            .iter()
            .filter(|(_, m)| m.message_type().as_str() == msg_type)
            .count()
    }

    fn absorb(&mut self, from: &UserId, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send { message, to } => self.queue.push_back((from.clone(), message, to)),
                Effect::Persist(file) => self.files.entry(from.clone()).or_default().push(file),
                Effect::Notify(notice) => self.notices.entry(from.clone()).or_default().push(notice),
            }
        }
    }

    fn deliver(&mut self) {
        let mut budget = 10_000;
        while let Some((from, message, to)) = self.queue.pop_front() {
            budget -= 1;
            assert!(budget > 0, "message storm");
            self.sent.push((from.clone(), message.clone()));
            let bytes = encode(&message.to_frame());
            let targets: Vec<UserId> = match &to {
                Destination::Broadcast => self.nodes.keys().cloned().collect(),
                Destination::Peer(user) => vec![user.clone()],
            };
            for target in targets {
                if let Some(rule) = self.loss.as_mut() {
                    if rule(&from, &target, &message) {
                        continue;
                    }
                }
                let now = self.now();
                let Some(state) = self.nodes.get_mut(&target) else {
                    continue;
                };
                let effects = state.dispatch(&bytes, now);
                self.absorb(&target, effects);
            }
        }
    }
}

/// Results of local operations: effects, possibly with a value.
pub trait IntoEffects {
    type Value;
    fn split(self) -> (Self::Value, Vec<Effect>);
}

impl IntoEffects for Vec<Effect> {
    type Value = ();
    fn split(self) -> ((), Vec<Effect>) {
        ((), self)
    }
}

impl<V> IntoEffects for (V, Vec<Effect>) {
    type Value = V;
    fn split(self) -> (V, Vec<Effect>) {
        self
    }
}

fn capitalise(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
