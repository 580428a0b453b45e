//! ROUTER: identity-addressed routing.
//!
//! Inbound messages get the sending pipe's identity prepended; outbound
//! messages name their destination in the first frame, which is stripped
//! before the rest goes on the wire.

use super::{PipeId, Pipes, Route};
use crate::pipe::Pipe;
use crate::queue::{Counters, Delivery, Outgoing};
use bytes::{BufMut, Bytes, BytesMut};
use ferrite_core::message::Message;
use ferrite_wire::codec::encode;
use hashbrown::HashMap;
use tracing::{debug, trace};

#[derive(Debug)]
pub(crate) struct RouterEngine {
    by_identity: HashMap<Bytes, PipeId>,
    by_pipe: HashMap<PipeId, Bytes>,
    next_generated: u32,
}

impl Default for RouterEngine {
    fn default() -> Self {
        Self {
            by_identity: HashMap::new(),
            by_pipe: HashMap::new(),
            next_generated: rand::random(),
        }
    }
}

impl RouterEngine {
    /// Generated identities are `0x00` followed by a big-endian counter, so
    /// they never collide with peer-chosen ones (which may not start with 0).
    fn generate_identity(&mut self) -> Bytes {
        loop {
            let mut id = BytesMut::with_capacity(5);
            id.put_u8(0);
            id.put_u32(self.next_generated);
            self.next_generated = self.next_generated.wrapping_add(1);
            let id = id.freeze();
            if !self.by_identity.contains_key(&id) {
                return id;
            }
        }
    }

    pub(crate) fn attach(&mut self, pipe: &mut Pipe) {
        let announced = pipe.peer_identity.clone();
        let identity = if announced.is_empty() {
            self.generate_identity()
        } else if self.by_identity.contains_key(&announced) {
            debug!(pipe = pipe.id, ?announced, "[ROUTER] duplicate identity, generating one");
            self.generate_identity()
        } else {
            announced
        };
        trace!(pipe = pipe.id, ?identity, "[ROUTER] peer attached");
        self.by_identity.insert(identity.clone(), pipe.id);
        self.by_pipe.insert(pipe.id, identity.clone());
        pipe.routing_id = identity;
    }

    pub(crate) fn detach(&mut self, pipe: PipeId) {
        if let Some(identity) = self.by_pipe.remove(&pipe) {
            self.by_identity.remove(&identity);
        }
    }

    pub(crate) fn route(&mut self, out: Outgoing, pipes: &mut Pipes, stats: &Counters) -> Route {
        let mut msg = out.msg;
        let Some(identity) = msg.pop_front() else {
            return Route::Dropped;
        };
        if msg.is_empty() {
            trace!(?identity, "[ROUTER] dropping message with no body");
            return Route::Dropped;
        }
        let Some(pipe) = self
            .by_identity
            .get(&identity)
            .and_then(|id| pipes.get_mut(id))
        else {
            trace!(?identity, "[ROUTER] unknown identity, dropping");
            return Route::Dropped;
        };
        if pipe.accepts() {
            pipe.enqueue(encode(&msg));
            stats.add_sent(1);
        } else {
            trace!(?identity, "[ROUTER] peer queue full, dropping");
            stats.add_dropped(1);
        }
        Route::Sent
    }

    pub(crate) fn deliver(&mut self, pipe: PipeId, mut msg: Message) -> Option<Delivery> {
        let identity = self.by_pipe.get(&pipe)?.clone();
        msg.prepend(identity);
        Some(Delivery {
            pipe,
            envelope: Vec::new(),
            msg,
        })
    }
}
