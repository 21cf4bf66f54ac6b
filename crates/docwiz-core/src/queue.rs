//! Priority Queue (spec §4.3): a durable ordered set of jobs keyed by
//! `(priority, enqueue sequence)`. The in-memory `BinaryHeap` is the live
//! structure actually popped from at runtime; `docwiz_core::durable`
//! persists its contents so `enqueue`/`pop` survive a process restart.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use parking_lot::Mutex;

use crate::prompt::PromptId;
use crate::session::SessionId;

/// Ephemeral queue element (spec §3 "Job"). Owned by the queue; references
/// the session/prompt by id only (weak reference).
#[derive(Debug, Clone)]
pub struct Job {
    pub session_id: SessionId,
    pub prompt_id: PromptId,
    pub priority: i32,
    /// Global monotonic enqueue sequence, the FIFO-within-priority tie-breaker.
    pub sequence: u64,
}

// BinaryHeap is a max-heap; invert priority/sequence comparison so the
// *lowest* (priority, sequence) pair is popped first (spec: "lower wins").
impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

pub struct PriorityQueue {
    inner: Mutex<QueueInner>,
}

struct QueueInner {
    heap: BinaryHeap<Job>,
    next_sequence: u64,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                next_sequence: 0,
            }),
        }
    }

    /// Rebuilds a queue from durably-persisted jobs on process restart. The
    /// jobs' own `sequence` fields are preserved so FIFO order survives.
    pub fn from_jobs(jobs: Vec<Job>) -> Self {
        let next_sequence = jobs.iter().map(|j| j.sequence + 1).max().unwrap_or(0);
        Self {
            inner: Mutex::new(QueueInner {
                heap: jobs.into_iter().collect(),
                next_sequence,
            }),
        }
    }

    /// Assigns the next sequence number and pushes one job.
    pub fn enqueue(&self, session_id: SessionId, prompt_id: PromptId, priority: i32) -> Job {
        let mut inner = self.inner.lock();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        let job = Job {
            session_id,
            prompt_id,
            priority,
            sequence,
        };
        inner.heap.push(job.clone());
        job
    }

    pub fn enqueue_batch(
        &self,
        jobs: impl IntoIterator<Item = (SessionId, PromptId, i32)>,
    ) -> Vec<Job> {
        jobs.into_iter()
            .map(|(s, p, pr)| self.enqueue(s, p, pr))
            .collect()
    }

    pub fn pop(&self) -> Option<Job> {
        self.inner.lock().heap.pop()
    }

    /// Reinserts a job that was popped but deferred, preserving its
    /// original priority/sequence so it keeps its place in line.
    pub fn push_back(&self, job: Job) {
        self.inner.lock().heap.push(job);
    }

    pub fn peek(&self) -> Option<Job> {
        self.inner.lock().heap.peek().cloned()
    }

    /// Removes every queued job belonging to `session_id` (lazy cancellation,
    /// spec §4.4, invoked when a session transitions to EXPIRED or FAILED).
    pub fn remove_session(&self, session_id: SessionId) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.heap.len();
        let remaining: Vec<Job> = inner
            .heap
            .drain()
            .filter(|j| j.session_id != session_id)
            .collect();
        inner.heap = remaining.into_iter().collect();
        before - inner.heap.len()
    }

    pub fn size(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn clear(&self) {
        self.inner.lock().heap.clear();
    }

    pub fn snapshot(&self) -> Vec<Job> {
        self.inner.lock().heap.iter().cloned().collect()
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn lower_priority_value_pops_first() {
        let q = PriorityQueue::new();
        let session = Uuid::new_v4();
        q.enqueue(session, Uuid::new_v4(), 2);
        q.enqueue(session, Uuid::new_v4(), 1);
        let first = q.pop().unwrap();
        assert_eq!(first.priority, 1);
    }

    #[test]
    fn fifo_within_same_priority() {
        let q = PriorityQueue::new();
        let session = Uuid::new_v4();
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        q.enqueue(session, p1, 1);
        q.enqueue(session, p2, 1);
        assert_eq!(q.pop().unwrap().prompt_id, p1);
        assert_eq!(q.pop().unwrap().prompt_id, p2);
    }

    #[test]
    fn remove_session_drops_only_its_jobs() {
        let q = PriorityQueue::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        q.enqueue(a, Uuid::new_v4(), 1);
        q.enqueue(a, Uuid::new_v4(), 2);
        q.enqueue(b, Uuid::new_v4(), 1);
        let removed = q.remove_session(a);
        assert_eq!(removed, 2);
        assert_eq!(q.size(), 1);
        assert_eq!(q.pop().unwrap().session_id, b);
    }

    #[test]
    fn rebuilds_from_persisted_jobs_preserving_order() {
        let session = Uuid::new_v4();
        let jobs = vec![
            Job {
                session_id: session,
                prompt_id: Uuid::new_v4(),
                priority: 2,
                sequence: 5,
            },
            Job {
                session_id: session,
                prompt_id: Uuid::new_v4(),
                priority: 1,
                sequence: 3,
            },
        ];
        let q = PriorityQueue::from_jobs(jobs);
        assert_eq!(q.pop().unwrap().priority, 1);
        let next = q.enqueue(session, Uuid::new_v4(), 1);
        assert_eq!(next.sequence, 6);
    }
}
