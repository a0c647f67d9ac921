//! Domain state for the job centre: named priority queues, reservations,
//! and multi-queue waits. Holds no sockets; every method is a synchronous
//! state transition so it can be driven by tests without networking.
use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::queue::Queue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Queued,
    Assigned(u64),
    Deleted,
}

struct JobRecord {
    queue: String,
    priority: i64,
    payload: Value,
    state: JobState,
}

struct Wait {
    id: u64,
    client_id: u64,
    queues: Vec<String>,
    sender: oneshot::Sender<JobView>,
}

/// A job as handed out to a client: the fields of a successful `get`.
#[derive(Debug, Clone)]
pub struct JobView {
    pub id: u64,
    pub queue: String,
    pub pri: i64,
    pub job: Value,
}

#[derive(Default)]
pub struct Centre {
    queues: HashMap<String, Queue>,
    jobs: HashMap<u64, JobRecord>,
    client_jobs: HashMap<u64, HashSet<u64>>,
    waits: VecDeque<Wait>,
    next_job_id: u64,
    next_wait_id: u64,
    next_client_id: u64,
}

impl Centre {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_client(&mut self) -> u64 {
        let id = self.next_client_id;
        self.next_client_id += 1;
        id
    }

    /// Inserts a new job, assigns it a fresh id, and either hands it
    /// straight to the oldest compatible waiter or places it on the queue.
    pub fn put(&mut self, queue: String, priority: i64, payload: Value) -> u64 {
        let id = self.next_job_id;
        self.next_job_id += 1;
        self.jobs.insert(
            id,
            JobRecord {
                queue: queue.clone(),
                priority,
                payload: payload.clone(),
                state: JobState::Queued,
            },
        );

        if !self.try_wake_waiter(&queue, id, priority, &payload) {
            self.queues.entry(queue).or_default().push(priority, id);
        }

        id
    }

    /// Picks the highest-priority present job across `queues` (ties broken
    /// by earliest id) and reserves it for `client_id`.
    pub fn get(&mut self, client_id: u64, queues: &[String]) -> Option<JobView> {
        let mut winner: Option<(i64, u64, &str)> = None;
        for name in queues {
            let Some(queue) = self.queues.get_mut(name) else {
                continue;
            };
            let jobs = &self.jobs;
            let Some((priority, id)) =
                queue.peek_present(|id| matches!(jobs.get(&id).map(|j| j.state), Some(JobState::Queued)))
            else {
                continue;
            };

            let better = match winner {
                None => true,
                Some((best_priority, best_id, _)) => {
                    priority > best_priority || (priority == best_priority && id < best_id)
                }
            };
            if better {
                winner = Some((priority, id, name.as_str()));
            }
        }

        let (_, id, name) = winner?;
        let name = name.to_string();
        let queue = self.queues.get_mut(&name).expect("winning queue must exist");
        let jobs = &self.jobs;
        let popped = queue.pop_present(|id| matches!(jobs.get(&id).map(|j| j.state), Some(JobState::Queued)));
        debug_assert_eq!(popped, Some(id));

        let record = self.jobs.get_mut(&id).expect("winning job must exist");
        record.state = JobState::Assigned(client_id);
        self.client_jobs.entry(client_id).or_default().insert(id);

        Some(JobView {
            id,
            queue: record.queue.clone(),
            pri: record.priority,
            job: record.payload.clone(),
        })
    }

    /// Registers a wait on behalf of `client_id`; the returned receiver
    /// fires the moment a compatible `put` or reinsertion is processed.
    pub fn register_wait(
        &mut self,
        client_id: u64,
        queues: Vec<String>,
    ) -> (u64, oneshot::Receiver<JobView>) {
        let id = self.next_wait_id;
        self.next_wait_id += 1;
        let (sender, receiver) = oneshot::channel();
        self.waits.push_back(Wait {
            id,
            client_id,
            queues,
            sender,
        });
        (id, receiver)
    }

    /// Removes a still-pending wait, e.g. because its client disconnected.
    pub fn cancel_wait(&mut self, wait_id: u64) {
        if let Some(pos) = self.waits.iter().position(|w| w.id == wait_id) {
            self.waits.remove(pos);
        }
    }

    /// Deletes a job wherever it currently lives (queued or reserved).
    pub fn delete(&mut self, id: u64) -> bool {
        let Some(record) = self.jobs.get_mut(&id) else {
            return false;
        };
        match record.state {
            JobState::Deleted => false,
            JobState::Queued => {
                record.state = JobState::Deleted;
                true
            }
            JobState::Assigned(client_id) => {
                record.state = JobState::Deleted;
                if let Some(set) = self.client_jobs.get_mut(&client_id) {
                    set.remove(&id);
                }
                true
            }
        }
    }

    /// Returns a job reserved by `client_id` to its originating queue.
    pub fn abort(&mut self, client_id: u64, id: u64) -> bool {
        let owner = match self.jobs.get(&id) {
            Some(record) => match record.state {
                JobState::Assigned(owner) => owner,
                _ => return false,
            },
            None => return false,
        };
        if owner != client_id {
            return false;
        }

        if let Some(set) = self.client_jobs.get_mut(&client_id) {
            set.remove(&id);
        }
        self.reinsert(id);
        true
    }

    /// Returns every job reserved by `client_id` to its originating queue.
    pub fn disconnect(&mut self, client_id: u64) {
        let Some(ids) = self.client_jobs.remove(&client_id) else {
            return;
        };
        for id in ids {
            self.reinsert(id);
        }
    }

    /// Both `put` and reinsertion (abort, disconnect reclaim) enter the
    /// heap through this single path, under the same `(priority, id)`
    /// ordering.
    fn reinsert(&mut self, id: u64) {
        let Some(record) = self.jobs.get_mut(&id) else {
            return;
        };
        record.state = JobState::Queued;
        let queue = record.queue.clone();
        let priority = record.priority;
        let payload = record.payload.clone();

        if !self.try_wake_waiter(&queue, id, priority, &payload) {
            self.queues.entry(queue).or_default().push(priority, id);
        }
    }

    /// Hands `id` directly to the oldest wait registered on `queue`,
    /// skipping waiters whose connection has already gone away. Returns
    /// whether the job was claimed by a waiter.
    fn try_wake_waiter(&mut self, queue: &str, id: u64, priority: i64, payload: &Value) -> bool {
        loop {
            let Some(pos) = self.waits.iter().position(|w| w.queues.iter().any(|q| q == queue)) else {
                return false;
            };
            let wait = self.waits.remove(pos).expect("position just found");
            let view = JobView {
                id,
                queue: queue.to_string(),
                pri: priority,
                job: payload.clone(),
            };
            if wait.sender.send(view).is_ok() {
                let record = self.jobs.get_mut(&id).expect("job just inserted or reinserted");
                record.state = JobState::Assigned(wait.client_id);
                self.client_jobs.entry(wait.client_id).or_default().insert(id);
                return true;
            }
        }
    }
}
