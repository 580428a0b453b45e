//! REQ/REP: strict request-reply alternation.
//!
//! The application side of the alternation is tracked by [`Lockstep`] under
//! the socket's queue lock, so violations are reported synchronously. The
//! reactor side ([`ReqEngine`], [`RepEngine`]) handles routing and envelopes.

use super::{LoadBalancer, PipeId, Pipes, Route};
use crate::pipe::Pipe;
use crate::queue::{Counters, Delivery, Outgoing};
use bytes::Bytes;
use ferrite_core::error::{Error, Result};
use ferrite_core::message::Message;
use ferrite_core::socket_type::SocketType;
use ferrite_wire::codec::encode;
use tracing::trace;

/// Application-side alternation state.
#[derive(Debug)]
pub(crate) enum Lockstep {
    /// Pattern without alternation rules.
    Free,
    /// REQ ready to send a request.
    ReqIdle,
    /// REQ waiting for the reply to its request.
    ReqAwaiting,
    /// REP waiting for a request.
    RepIdle,
    /// REP owes a reply to `pipe`.
    RepReplying { pipe: PipeId, envelope: Vec<Bytes> },
}

impl Lockstep {
    pub(crate) fn for_type(socket_type: SocketType) -> Self {
        match socket_type {
            SocketType::Req => Self::ReqIdle,
            SocketType::Rep => Self::RepIdle,
            _ => Self::Free,
        }
    }

    pub(crate) fn check_send(&self) -> Result<()> {
        match self {
            Self::ReqAwaiting => Err(Error::state(
                "REQ socket must receive the reply before sending again",
            )),
            Self::RepIdle => Err(Error::state("REP socket has no request to reply to")),
            _ => Ok(()),
        }
    }

    pub(crate) fn check_recv(&self) -> Result<()> {
        match self {
            Self::ReqIdle => Err(Error::state(
                "REQ socket must send a request before receiving",
            )),
            Self::RepReplying { .. } => Err(Error::state(
                "REP socket must send a reply before receiving again",
            )),
            _ => Ok(()),
        }
    }

    /// Advance past a successful send, producing what the reactor routes.
    pub(crate) fn commit_send(&mut self, msg: Message) -> Outgoing {
        match std::mem::replace(self, Self::Free) {
            Self::ReqIdle => {
                *self = Self::ReqAwaiting;
                Outgoing::new(msg)
            }
            Self::RepReplying { pipe, envelope } => {
                *self = Self::RepIdle;
                let mut frames = envelope;
                frames.reserve(msg.len() + 1);
                frames.push(Bytes::new());
                frames.extend(msg.into_frames());
                Outgoing {
                    msg: Message::from_frames(frames),
                    route: Some(pipe),
                }
            }
            other => {
                *self = other;
                Outgoing::new(msg)
            }
        }
    }

    /// Advance past a received message, returning its application payload.
    pub(crate) fn accept(&mut self, delivery: Delivery) -> Message {
        match self {
            Self::ReqAwaiting => *self = Self::ReqIdle,
            Self::RepIdle => {
                *self = Self::RepReplying {
                    pipe: delivery.pipe,
                    envelope: delivery.envelope,
                };
            }
            _ => {}
        }
        delivery.msg
    }

    /// Abandon the outstanding request after its peer was lost.
    pub(crate) fn reset(&mut self) {
        if matches!(self, Self::ReqAwaiting) {
            *self = Self::ReqIdle;
        }
    }

    pub(crate) fn is_awaiting_reply(&self) -> bool {
        matches!(self, Self::ReqAwaiting)
    }
}

/// REQ routing: one request at a time, round-robin across peers.
#[derive(Debug, Default)]
pub(crate) struct ReqEngine {
    balancer: LoadBalancer,
    in_flight: Option<PipeId>,
}

impl ReqEngine {
    pub(crate) fn attach(&mut self, pipe: &Pipe) {
        self.balancer.add(pipe.id);
    }

    pub(crate) fn detach(&mut self, pipe: PipeId) -> Option<Error> {
        self.balancer.remove(pipe);
        if self.in_flight == Some(pipe) {
            self.in_flight = None;
            return Some(Error::unreachable(format!(
                "peer of pipe {pipe} closed before replying"
            )));
        }
        None
    }

    pub(crate) fn route(&mut self, out: Outgoing, pipes: &mut Pipes, stats: &Counters) -> Route {
        let Some(id) = self
            .balancer
            .pick(|id| pipes.get(&id).is_some_and(Pipe::accepts))
        else {
            return Route::Blocked(out);
        };
        let mut msg = out.msg;
        msg.prepend(Bytes::new());
        if let Some(pipe) = pipes.get_mut(&id) {
            pipe.enqueue(encode(&msg));
        }
        self.in_flight = Some(id);
        stats.add_sent(1);
        trace!(pipe = id, "[REQ] request routed");
        Route::Sent
    }

    pub(crate) fn deliver(&mut self, pipe: PipeId, mut msg: Message) -> Option<Delivery> {
        if self.in_flight != Some(pipe) {
            trace!(pipe, "[REQ] dropping reply from unexpected peer");
            return None;
        }
        match msg.pop_front() {
            Some(delimiter) if delimiter.is_empty() && !msg.is_empty() => {}
            _ => {
                trace!(pipe, "[REQ] dropping reply without delimiter");
                return None;
            }
        }
        self.in_flight = None;
        Some(Delivery {
            pipe,
            envelope: Vec::new(),
            msg,
        })
    }

    pub(crate) fn has_peers(&self) -> bool {
        self.balancer.len() > 0
    }
}

/// REP routing: replies go back to the pipe the request came from.
#[derive(Debug, Default)]
pub(crate) struct RepEngine;

impl RepEngine {
    pub(crate) fn route(&mut self, out: Outgoing, pipes: &mut Pipes, stats: &Counters) -> Route {
        let Some(pipe) = out.route.and_then(|id| pipes.get_mut(&id)) else {
            trace!("[REP] requester gone, dropping reply");
            stats.add_discarded(1);
            return Route::Dropped;
        };
        if !pipe.accepts() {
            return Route::Blocked(out);
        }
        pipe.enqueue(encode(&out.msg));
        stats.add_sent(1);
        Route::Sent
    }

    pub(crate) fn deliver(&mut self, pipe: PipeId, msg: Message) -> Option<Delivery> {
        let mut frames = msg.into_frames();
        let Some(split) = frames.iter().position(Bytes::is_empty) else {
            trace!(pipe, "[REP] dropping request without envelope delimiter");
            return None;
        };
        let body = frames.split_off(split + 1);
        if body.is_empty() {
            return None;
        }
        frames.truncate(split);
        Some(Delivery {
            pipe,
            envelope: frames,
            msg: Message::from_frames(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_req_lockstep() {
        let mut gate = Lockstep::for_type(SocketType::Req);
        assert!(matches!(gate.check_recv(), Err(Error::State(_))));
        assert!(gate.check_send().is_ok());

        let _ = gate.commit_send(Message::from("hello"));
        assert!(gate.is_awaiting_reply());
        assert!(matches!(gate.check_send(), Err(Error::State(_))));
        assert!(gate.check_recv().is_ok());

        let reply = gate.accept(Delivery {
            pipe: 1,
            envelope: Vec::new(),
            msg: Message::from("world"),
        });
        assert_eq!(reply, Message::from("world"));
        assert!(gate.check_send().is_ok());
    }

    #[test]
    fn test_req_reset_after_loss() {
        let mut gate = Lockstep::for_type(SocketType::Req);
        let _ = gate.commit_send(Message::from("x"));
        gate.reset();
        assert!(gate.check_send().is_ok());
    }

    #[test]
    fn test_rep_reattaches_envelope() {
        let mut gate = Lockstep::for_type(SocketType::Rep);
        assert!(matches!(gate.check_send(), Err(Error::State(_))));

        let body = gate.accept(Delivery {
            pipe: 7,
            envelope: vec![Bytes::from_static(b"hop")],
            msg: Message::from("request"),
        });
        assert_eq!(body, Message::from("request"));
        assert!(matches!(gate.check_recv(), Err(Error::State(_))));

        let out = gate.commit_send(Message::from("reply"));
        assert_eq!(out.route, Some(7));
        assert_eq!(
            out.msg,
            Message::new().push_str("hop").push_empty().push_str("reply")
        );
        assert!(gate.check_recv().is_ok());
    }

    #[test]
    fn test_rep_strips_envelope() {
        let mut engine = RepEngine;
        let request = Message::new()
            .push_str("a")
            .push_str("b")
            .push_empty()
            .push_str("body");
        let delivery = engine.deliver(3, request).unwrap();
        assert_eq!(delivery.envelope.len(), 2);
        assert_eq!(delivery.msg, Message::from("body"));

        assert!(engine.deliver(3, Message::from("no delimiter")).is_none());
    }

    #[test]
    fn test_req_accepts_only_in_flight_peer() {
        let mut engine = ReqEngine::default();
        engine.in_flight = Some(1);

        let reply = Message::new().push_empty().push_str("ok");
        assert!(engine.deliver(2, reply.clone()).is_none());
        let delivery = engine.deliver(1, reply).unwrap();
        assert_eq!(delivery.msg, Message::from("ok"));
        assert!(engine.in_flight.is_none());
    }

    #[test]
    fn test_req_detach_in_flight() {
        let mut engine = ReqEngine::default();
        engine.in_flight = Some(4);
        assert!(engine.detach(5).is_none());
        assert!(matches!(engine.detach(4), Some(Error::Unreachable(_))));
    }
}
