//! PUB/SUB: topic-prefix fan-out.
//!
//! Subscriptions travel from SUB to PUB as control commands. PUB keeps a
//! [`SubscriptionIndex`] over its pipes; SUB keeps the same prefixes in a
//! [`SubscriptionSet`] to replay them to new publishers and to filter locally.

use super::{PipeId, Pipes, Route};
use crate::pipe::Pipe;
use crate::queue::{Counters, Delivery, Outgoing};
use bytes::Bytes;
use ferrite_core::message::Message;
use ferrite_core::subscription::{SubscriptionIndex, SubscriptionSet};
use ferrite_wire::codec::encode;
use ferrite_wire::command::Command;
use tracing::trace;

#[derive(Debug, Default)]
pub(crate) struct PubEngine {
    index: SubscriptionIndex,
}

impl PubEngine {
    pub(crate) fn detach(&mut self, pipe: PipeId) {
        self.index.remove_peer_everywhere(pipe);
    }

    pub(crate) fn command(&mut self, pipe: PipeId, cmd: Command) {
        match cmd {
            Command::Subscribe(prefix) => {
                trace!(pipe, ?prefix, "[PUB] subscription added");
                self.index.subscribe(pipe, prefix);
            }
            Command::Unsubscribe(prefix) => {
                trace!(pipe, ?prefix, "[PUB] subscription removed");
                self.index.unsubscribe(pipe, &prefix);
            }
            Command::Hello { .. } => {}
        }
    }

    /// Fan a message out to every matching subscriber. Never blocks: a full
    /// subscriber ring evicts its oldest unsent message.
    pub(crate) fn route(&mut self, out: Outgoing, pipes: &mut Pipes, stats: &Counters) -> Route {
        let topic = out.msg.first().map_or(&b""[..], |f| f.as_ref());
        let peers = self.index.match_topic(topic);
        if peers.is_empty() {
            return Route::Dropped;
        }

        let chunk = encode(&out.msg);
        let mut delivered = false;
        for peer in peers {
            if let Some(pipe) = pipes.get_mut(&peer).filter(|p| p.greeted) {
                if pipe.enqueue_evicting(chunk.clone()) {
                    stats.add_dropped(1);
                }
                delivered = true;
            }
        }
        if delivered {
            stats.add_sent(1);
        }
        Route::Sent
    }
}

#[derive(Debug, Default)]
pub(crate) struct SubEngine {
    filter: SubscriptionSet,
}

impl SubEngine {
    /// Replay every current subscription to a newly greeted publisher.
    pub(crate) fn attach(&mut self, pipe: &mut Pipe) {
        for prefix in self.filter.prefixes() {
            pipe.enqueue_control(Command::Subscribe(prefix.clone()).encode());
        }
    }

    pub(crate) fn subscribe(&mut self, prefix: Bytes, pipes: &mut Pipes) {
        if self.filter.subscribe(prefix.clone()) {
            broadcast(pipes, &Command::Subscribe(prefix));
        }
    }

    pub(crate) fn unsubscribe(&mut self, prefix: Bytes, pipes: &mut Pipes) {
        if self.filter.unsubscribe(&prefix) {
            broadcast(pipes, &Command::Unsubscribe(prefix));
        }
    }

    pub(crate) fn deliver(&mut self, pipe: PipeId, msg: Message) -> Option<Delivery> {
        let topic = msg.first().map_or(&b""[..], |f| f.as_ref());
        if !self.filter.matches(topic) {
            return None;
        }
        Some(Delivery {
            pipe,
            envelope: Vec::new(),
            msg,
        })
    }
}

fn broadcast(pipes: &mut Pipes, cmd: &Command) {
    let chunk = cmd.encode();
    for pipe in pipes.values_mut().filter(|p| p.greeted) {
        pipe.enqueue_control(chunk.clone());
    }
}
