//! Socket pattern engines.
//!
//! Each socket owns exactly one [`Engine`], chosen by its [`SocketType`] when
//! the socket is created. Engines run on the reactor thread: they decide
//! which pipe an outbound message goes to and what an inbound message looks
//! like by the time the application receives it.
//!
//! | pattern | outbound                         | inbound                       |
//! |---------|----------------------------------|-------------------------------|
//! | REQ     | round-robin, delimiter prepended | only from the in-flight peer  |
//! | REP     | back to the requester            | envelope stripped             |
//! | PUB     | fan-out by prefix, drop oldest   | ignored                       |
//! | SUB     | (subscriptions only)             | filtered by prefix            |
//! | PUSH    | round-robin, blocks when full    | n/a                           |
//! | PULL    | n/a                              | fair-queued                   |
//! | DEALER  | round-robin, blocks when full    | fair-queued                   |
//! | ROUTER  | by identity frame                | identity frame prepended      |

mod balance;
mod pipeline;
mod pubsub;
mod reqrep;
mod router;

pub(crate) use balance::LoadBalancer;
pub(crate) use reqrep::Lockstep;

use crate::pipe::Pipe;
use crate::queue::{Counters, Delivery, Outgoing};
use bytes::Bytes;
use ferrite_core::error::Error;
use ferrite_core::message::Message;
use ferrite_core::socket_type::SocketType;
use ferrite_core::subscription::PeerKey;
use ferrite_wire::command::Command;
use pipeline::{pass_through, Distributor};
use pubsub::{PubEngine, SubEngine};
use reqrep::{RepEngine, ReqEngine};
use router::RouterEngine;

/// Identifier of one connection within a reactor. Never reused.
pub(crate) type PipeId = PeerKey;

pub(crate) type Pipes = hashbrown::HashMap<PipeId, Pipe>;

/// What happened to an outbound message.
#[derive(Debug)]
pub(crate) enum Route {
    /// Handed to at least one pipe (or deliberately dropped by policy).
    Sent,
    /// No pipe can take it now; keep it at the head of the socket queue.
    Blocked(Outgoing),
    /// Removed from the queue without being sent.
    Dropped,
}

#[derive(Debug)]
pub(crate) enum Engine {
    Req(ReqEngine),
    Rep(RepEngine),
    Pub(PubEngine),
    Sub(SubEngine),
    Push(Distributor),
    Pull,
    Dealer(Distributor),
    Router(RouterEngine),
}

impl Engine {
    pub(crate) fn new(socket_type: SocketType) -> Self {
        match socket_type {
            SocketType::Req => Self::Req(ReqEngine::default()),
            SocketType::Rep => Self::Rep(RepEngine),
            SocketType::Pub => Self::Pub(PubEngine::default()),
            SocketType::Sub => Self::Sub(SubEngine::default()),
            SocketType::Push => Self::Push(Distributor::default()),
            SocketType::Pull => Self::Pull,
            SocketType::Dealer => Self::Dealer(Distributor::default()),
            SocketType::Router => Self::Router(RouterEngine::default()),
        }
    }

    /// A pipe completed its greeting and may now carry traffic.
    pub(crate) fn attach(&mut self, pipe: &mut Pipe) {
        match self {
            Self::Req(engine) => engine.attach(pipe),
            Self::Sub(engine) => engine.attach(pipe),
            Self::Push(engine) | Self::Dealer(engine) => engine.attach(pipe),
            Self::Router(engine) => engine.attach(pipe),
            Self::Rep(_) | Self::Pub(_) | Self::Pull => {}
        }
    }

    /// A greeted pipe went away. Returns an error owed to the application.
    pub(crate) fn detach(&mut self, pipe: PipeId) -> Option<Error> {
        match self {
            Self::Req(engine) => return engine.detach(pipe),
            Self::Pub(engine) => engine.detach(pipe),
            Self::Push(engine) | Self::Dealer(engine) => engine.detach(pipe),
            Self::Router(engine) => engine.detach(pipe),
            Self::Rep(_) | Self::Sub(_) | Self::Pull => {}
        }
        None
    }

    pub(crate) fn route(&mut self, out: Outgoing, pipes: &mut Pipes, stats: &Counters) -> Route {
        match self {
            Self::Req(engine) => engine.route(out, pipes, stats),
            Self::Rep(engine) => engine.route(out, pipes, stats),
            Self::Pub(engine) => engine.route(out, pipes, stats),
            Self::Push(engine) | Self::Dealer(engine) => engine.route(out, pipes, stats),
            Self::Router(engine) => engine.route(out, pipes, stats),
            // Receive-only sockets never enqueue outbound messages.
            Self::Sub(_) | Self::Pull => Route::Dropped,
        }
    }

    /// Turn a message read from `pipe` into what `recv` returns, or drop it.
    pub(crate) fn deliver(&mut self, pipe: PipeId, msg: Message) -> Option<Delivery> {
        match self {
            Self::Req(engine) => engine.deliver(pipe, msg),
            Self::Rep(engine) => engine.deliver(pipe, msg),
            Self::Sub(engine) => engine.deliver(pipe, msg),
            Self::Pull | Self::Dealer(_) => Some(pass_through(pipe, msg)),
            Self::Router(engine) => engine.deliver(pipe, msg),
            Self::Pub(_) | Self::Push(_) => None,
        }
    }

    /// A control command other than the greeting arrived on `pipe`.
    pub(crate) fn command(&mut self, pipe: PipeId, cmd: Command) {
        if let Self::Pub(engine) = self {
            engine.command(pipe, cmd);
        }
    }

    pub(crate) fn subscribe(&mut self, prefix: Bytes, pipes: &mut Pipes) {
        if let Self::Sub(engine) = self {
            engine.subscribe(prefix, pipes);
        }
    }

    pub(crate) fn unsubscribe(&mut self, prefix: Bytes, pipes: &mut Pipes) {
        if let Self::Sub(engine) = self {
            engine.unsubscribe(prefix, pipes);
        }
    }

    /// REQ with no ready peer to carry a request.
    pub(crate) fn lacks_request_peer(&self) -> bool {
        matches!(self, Self::Req(engine) if !engine.has_peers())
    }
}
