use super::PipeId;

/// Round-robin selection over the ready pipes of a socket.
///
/// A pipe that cannot take a message right now is skipped for this round and
/// considered again on the next pick.
#[derive(Debug, Default)]
pub(crate) struct LoadBalancer {
    pipes: Vec<PipeId>,
    next: usize,
}

impl LoadBalancer {
    pub(crate) fn add(&mut self, pipe: PipeId) {
        if !self.pipes.contains(&pipe) {
            self.pipes.push(pipe);
        }
    }

    pub(crate) fn remove(&mut self, pipe: PipeId) {
        if let Some(pos) = self.pipes.iter().position(|p| *p == pipe) {
            self.pipes.remove(pos);
            if pos < self.next {
                self.next -= 1;
            }
            if self.next >= self.pipes.len() {
                self.next = 0;
            }
        }
    }

    /// Pick the next pipe for which `ready` returns `true`.
    pub(crate) fn pick(&mut self, mut ready: impl FnMut(PipeId) -> bool) -> Option<PipeId> {
        let n = self.pipes.len();
        for i in 0..n {
            let idx = (self.next + i) % n;
            let pipe = self.pipes[idx];
            if ready(pipe) {
                self.next = (idx + 1) % n;
                return Some(pipe);
            }
        }
        None
    }

    pub(crate) fn len(&self) -> usize {
        self.pipes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin() {
        let mut lb = LoadBalancer::default();
        lb.add(1);
        lb.add(2);
        lb.add(3);

        let picks: Vec<_> = (0..6).filter_map(|_| lb.pick(|_| true)).collect();
        assert_eq!(picks, vec![1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_skips_blocked_pipe() {
        let mut lb = LoadBalancer::default();
        lb.add(10);
        lb.add(20);

        // Pipe 10 reports WouldBlock for this round: 20 takes the message.
        assert_eq!(lb.pick(|p| p != 10), Some(20));
        // Next round both are ready again and rotation continues at 10.
        assert_eq!(lb.pick(|_| true), Some(10));
        assert_eq!(lb.pick(|_| true), Some(20));
    }

    #[test]
    fn test_none_ready() {
        let mut lb = LoadBalancer::default();
        assert_eq!(lb.pick(|_| true), None);
        lb.add(1);
        assert_eq!(lb.pick(|_| false), None);
    }

    #[test]
    fn test_remove_keeps_rotation() {
        let mut lb = LoadBalancer::default();
        lb.add(1);
        lb.add(2);
        lb.add(3);
        assert_eq!(lb.pick(|_| true), Some(1));
        assert_eq!(lb.pick(|_| true), Some(2));

        lb.remove(1);
        assert_eq!(lb.len(), 2);
        assert_eq!(lb.pick(|_| true), Some(3));
        assert_eq!(lb.pick(|_| true), Some(2));

        lb.remove(2);
        lb.remove(3);
        assert_eq!(lb.pick(|_| true), None);
    }
}
