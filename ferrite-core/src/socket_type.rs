//! The eight socket kinds and which of them may talk to each other.
//!
//! The discriminant is the byte sent in the greeting, so the values must not
//! be renumbered.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SocketType {
    /// Fan-out sender; never blocks, drops for slow subscribers.
    Pub = 1,
    /// Prefix-filtered receiver for a `Pub`.
    Sub = 2,
    /// Strict send/recv alternation, one outstanding request.
    Req = 3,
    /// Answers requests in arrival order, replying to the asker.
    Rep = 4,
    /// Unrestricted send/recv, load-balanced out and fair-queued in.
    Dealer = 5,
    /// Identity-addressed peer table.
    Router = 6,
    Pull = 7,
    Push = 8,
}

impl SocketType {
    pub const ALL: [SocketType; 8] = [
        Self::Pub,
        Self::Sub,
        Self::Req,
        Self::Rep,
        Self::Dealer,
        Self::Router,
        Self::Pull,
        Self::Push,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(usize::from(value).checked_sub(1)?).copied()
    }

    /// Whether a greeting from `peer` may be accepted.
    pub fn is_compatible(self, peer: SocketType) -> bool {
        use SocketType::*;
        let allowed: &[SocketType] = match self {
            Pub => &[Sub],
            Sub => &[Pub],
            Req => &[Rep, Router],
            Rep => &[Req, Dealer],
            Dealer => &[Rep, Router, Dealer],
            Router => &[Req, Dealer, Router],
            Push => &[Pull],
            Pull => &[Push],
        };
        allowed.contains(&peer)
    }

    pub const fn can_send(self) -> bool {
        !matches!(self, Self::Sub | Self::Pull)
    }

    pub const fn can_recv(self) -> bool {
        !matches!(self, Self::Pub | Self::Push)
    }
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pub => "PUB",
            Self::Sub => "SUB",
            Self::Req => "REQ",
            Self::Rep => "REP",
            Self::Dealer => "DEALER",
            Self::Router => "ROUTER",
            Self::Pull => "PULL",
            Self::Push => "PUSH",
        };
        f.pad(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_byte_round_trips() {
        assert!(SocketType::ALL.iter().all(|t| SocketType::from_u8(*t as u8) == Some(*t)));
        assert_eq!(SocketType::from_u8(0), None);
        assert_eq!(SocketType::from_u8(9), None);
    }

    #[test]
    fn compatibility_is_symmetric() {
        for a in SocketType::ALL {
            for b in SocketType::ALL {
                assert_eq!(a.is_compatible(b), b.is_compatible(a), "{a} / {b}");
            }
        }
        let pairs = SocketType::ALL
            .iter()
            .flat_map(|a| SocketType::ALL.iter().map(move |b| (*a, *b)))
            .filter(|(a, b)| a.is_compatible(*b))
            .count();
        assert_eq!(pairs, 14);
    }

    #[test]
    fn mismatched_patterns_refused() {
        assert!(!SocketType::Req.is_compatible(SocketType::Dealer));
        assert!(!SocketType::Rep.is_compatible(SocketType::Router));
        assert!(!SocketType::Push.is_compatible(SocketType::Push));
    }

    #[test]
    fn one_way_sockets() {
        let send_only: Vec<_> = SocketType::ALL.into_iter().filter(|t| !t.can_recv()).collect();
        let recv_only: Vec<_> = SocketType::ALL.into_iter().filter(|t| !t.can_send()).collect();
        assert_eq!(send_only, [SocketType::Pub, SocketType::Push]);
        assert_eq!(recv_only, [SocketType::Sub, SocketType::Pull]);
        assert_eq!(format!("{:>6}", SocketType::Req), "   REQ");
    }
}
