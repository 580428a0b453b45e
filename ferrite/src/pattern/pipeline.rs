//! PUSH/PULL and DEALER: load-balanced outbound, fair-queued inbound.

use super::{LoadBalancer, PipeId, Pipes, Route};
use crate::pipe::Pipe;
use crate::queue::{Counters, Delivery, Outgoing};
use ferrite_core::message::Message;
use ferrite_wire::codec::encode;

/// Round-robin distributor shared by PUSH and DEALER.
#[derive(Debug, Default)]
pub(crate) struct Distributor {
    balancer: LoadBalancer,
}

impl Distributor {
    pub(crate) fn attach(&mut self, pipe: &Pipe) {
        self.balancer.add(pipe.id);
    }

    pub(crate) fn detach(&mut self, pipe: PipeId) {
        self.balancer.remove(pipe);
    }

    /// Hand the message to the next pipe with room. When every pipe is full
    /// the message stays on the socket queue.
    pub(crate) fn route(&mut self, out: Outgoing, pipes: &mut Pipes, stats: &Counters) -> Route {
        let picked = self
            .balancer
            .pick(|id| pipes.get(&id).is_some_and(Pipe::accepts));
        match picked.and_then(|id| pipes.get_mut(&id)) {
            Some(pipe) => {
                pipe.enqueue(encode(&out.msg));
                stats.add_sent(1);
                Route::Sent
            }
            None => Route::Blocked(out),
        }
    }
}

/// Inbound side of PULL and DEALER: every message is passed through.
pub(crate) fn pass_through(pipe: PipeId, msg: Message) -> Delivery {
    Delivery {
        pipe,
        envelope: Vec::new(),
        msg,
    }
}
