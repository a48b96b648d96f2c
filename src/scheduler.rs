//! Deduplicating, ordered job queue.
//!
//! Scheduled subscribers are not run when their dependency changes; they are
//! queued and run by [`Runtime::flush`]. The queue guarantees:
//!
//! - a subscriber queued several times before it runs is run once
//! - jobs run in ascending order key, so a creator always runs before what it
//!   created; within one order key `Pre` runs before `Render`
//! - `Post` jobs and hooks run after the main queue drains, in order-key order
//! - a subscriber that keeps re-queuing itself aborts the flush with
//!   [`Error::RunawayUpdate`] once it exceeds the recursion limit
//!
//! A job enqueued mid-flush with a key below the job currently running would
//! run out of order if it went into this flush; it is deferred to the next
//! flush instead.

use crate::arena::SubscriberId;
use crate::error::{Error, Result};
use crate::hash::FastHashBuilder;
use crate::runtime::Runtime;
use indexmap::IndexSet;
use std::collections::HashMap;

/// Which queue a scheduled subscriber goes into.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Phase {
    /// Main queue, ahead of render jobs with the same order key.
    Pre,
    /// Main queue. The phase render subscribers use.
    #[default]
    Render,
    /// Runs after the main queue has drained.
    Post,
}

type SortKey = (u64, Phase, u64);

#[derive(Copy, Clone, Debug)]
struct Job {
    id: SubscriberId,
    order: u64,
    phase: Phase,
    seq: u64,
}

impl Job {
    fn sort_key(&self) -> SortKey {
        (self.order, self.phase, self.seq)
    }
}

/// One-shot callback queued into the post phase.
pub(crate) type PostHook = Box<dyn FnOnce() + Send>;

enum PostTask {
    Subscriber(SubscriberId),
    Hook(PostHook),
}

struct PostJob {
    order: u64,
    seq: u64,
    task: PostTask,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Enqueued {
    Duplicate,
    Queued,
    Deferred,
}

/// Queue state owned by a runtime.
pub(crate) struct SchedulerState {
    queue: Vec<Job>,
    /// Jobs before the cursor already ran in this flush.
    cursor: usize,
    current: Option<SortKey>,
    post: Vec<PostJob>,
    deferred: Vec<Job>,
    /// Subscribers queued but not yet started, across all queues.
    pending: IndexSet<SubscriberId, FastHashBuilder>,
    runs: HashMap<SubscriberId, usize, FastHashBuilder>,
    flushing: bool,
    flush_scheduled: bool,
    seq: u64,
}

impl SchedulerState {
    pub(crate) fn new() -> Self {
        Self {
            queue: Vec::new(),
            cursor: 0,
            current: None,
            post: Vec::new(),
            deferred: Vec::new(),
            pending: IndexSet::with_hasher(FastHashBuilder),
            runs: HashMap::with_hasher(FastHashBuilder),
            flushing: false,
            flush_scheduled: false,
            seq: 0,
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    pub(crate) fn push(&mut self, id: SubscriberId, order: u64, phase: Phase) -> Enqueued {
        if self.pending.contains(&id) {
            return Enqueued::Duplicate;
        }
        let seq = self.next_seq();
        self.pending.insert(id);

        if phase == Phase::Post {
            self.post.push(PostJob {
                order,
                seq,
                task: PostTask::Subscriber(id),
            });
            return Enqueued::Queued;
        }

        let job = Job {
            id,
            order,
            phase,
            seq,
        };
        if self.flushing && self.current.is_some_and(|current| job.sort_key() < current) {
            self.deferred.push(job);
            return Enqueued::Deferred;
        }
        self.insert_sorted(job);
        Enqueued::Queued
    }

    fn insert_sorted(&mut self, job: Job) {
        let key = job.sort_key();
        let offset = self.queue[self.cursor..].partition_point(|j| j.sort_key() <= key);
        self.queue.insert(self.cursor + offset, job);
    }

    pub(crate) fn push_hook(&mut self, order: u64, hook: PostHook) {
        let seq = self.next_seq();
        self.post.push(PostJob {
            order,
            seq,
            task: PostTask::Hook(hook),
        });
    }

    /// Mark a flush as needed. Returns true if the schedule hook should fire.
    pub(crate) fn request_flush(&mut self) -> bool {
        if self.flushing || self.flush_scheduled {
            return false;
        }
        self.flush_scheduled = true;
        true
    }

    fn next_main(&mut self) -> Option<Job> {
        let job = *self.queue.get(self.cursor)?;
        self.cursor += 1;
        self.current = Some(job.sort_key());
        self.pending.swap_remove(&job.id);
        Some(job)
    }

    fn bump_runs(&mut self, id: SubscriberId) -> usize {
        let count = self.runs.entry(id).or_insert(0);
        *count += 1;
        *count
    }

    fn take_post(&mut self) -> Vec<PostJob> {
        let mut post = std::mem::take(&mut self.post);
        post.sort_by_key(|job| (job.order, job.seq));
        for job in &post {
            if let PostTask::Subscriber(id) = job.task {
                self.pending.swap_remove(&id);
            }
        }
        post
    }

    /// Put back post jobs that did not run because the flush aborted.
    fn restore_post(&mut self, rest: impl Iterator<Item = PostJob>) {
        for job in rest {
            if let PostTask::Subscriber(id) = job.task {
                self.pending.insert(id);
            }
            self.post.push(job);
        }
    }

    pub(crate) fn remove(&mut self, id: SubscriberId) -> bool {
        if !self.pending.swap_remove(&id) {
            return false;
        }
        if let Some(pos) = self.queue[self.cursor..].iter().position(|j| j.id == id) {
            self.queue.remove(self.cursor + pos);
        } else if let Some(pos) = self.deferred.iter().position(|j| j.id == id) {
            self.deferred.remove(pos);
        } else {
            self.post
                .retain(|job| !matches!(job.task, PostTask::Subscriber(s) if s == id));
        }
        true
    }

    /// Reset per-flush state. Jobs that did not run stay queued and deferred
    /// jobs join them. Returns true if another flush is needed.
    fn finish_flush(&mut self) -> bool {
        self.queue.drain(..self.cursor);
        self.cursor = 0;
        self.current = None;
        self.runs.clear();
        self.flushing = false;

        for job in std::mem::take(&mut self.deferred) {
            self.insert_sorted(job);
        }

        let needed = !self.queue.is_empty() || !self.post.is_empty();
        self.flush_scheduled = needed;
        needed
    }

    fn pending_len(&self) -> usize {
        self.pending.len() + self.post.iter().filter(|j| matches!(j.task, PostTask::Hook(_))).count()
    }
}

/// Resets scheduler state when a flush ends, including by error or panic.
struct FlushGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        let reschedule = self.runtime.inner.scheduler.lock().finish_flush();
        if reschedule {
            tracing::trace!(runtime = %self.runtime.id(), "jobs left after flush, rescheduling");
            self.runtime.fire_schedule_hook();
        }
    }
}

impl Runtime {
    /// Queue a subscriber. Queuing one that is already pending is a no-op.
    pub(crate) fn enqueue(&self, id: SubscriberId, phase: Phase) {
        let Some(order) = self.with_subscriber(id, |meta| meta.order) else {
            return;
        };
        let (outcome, fire) = {
            let mut state = self.inner.scheduler.lock();
            let outcome = state.push(id, order, phase);
            let fire = outcome != Enqueued::Duplicate && state.request_flush();
            (outcome, fire)
        };
        match outcome {
            Enqueued::Duplicate => {
                cov_mark::hit!(duplicate_job_ignored);
            }
            Enqueued::Deferred => {
                cov_mark::hit!(job_deferred_to_next_flush);
                tracing::warn!(subscriber = %id, "job sorts before the running one, deferred to next flush");
            }
            Enqueued::Queued => {
                tracing::trace!(subscriber = %id, ?phase, "job queued");
            }
        }
        if fire {
            self.fire_schedule_hook();
        }
    }

    /// Queue a one-shot callback for the post phase of the current or next
    /// flush. `order` positions it among post subscribers.
    pub(crate) fn queue_post_hook(&self, order: u64, hook: PostHook) {
        let fire = {
            let mut state = self.inner.scheduler.lock();
            state.push_hook(order, hook);
            state.request_flush()
        };
        if fire {
            self.fire_schedule_hook();
        }
    }

    pub(crate) fn fire_schedule_hook(&self) {
        if let Some(hook) = &self.inner.config.on_schedule {
            hook();
        }
    }

    /// Remove a queued job that has not started. Returns whether a job was
    /// removed; invalidating a job that already ran is a no-op.
    pub fn invalidate(&self, id: SubscriberId) -> bool {
        let removed = self.inner.scheduler.lock().remove(id);
        if removed {
            tracing::trace!(subscriber = %id, "job invalidated");
        }
        removed
    }

    /// Whether a flush has been requested and has not run yet.
    pub fn is_flush_scheduled(&self) -> bool {
        self.inner.scheduler.lock().flush_scheduled
    }

    /// Whether a flush is running right now.
    pub fn is_flushing(&self) -> bool {
        self.inner.scheduler.lock().flushing
    }

    /// Number of queued jobs and hooks that have not started.
    pub fn pending_count(&self) -> usize {
        self.inner.scheduler.lock().pending_len()
    }

    /// Run every queued job: the main queue in order, then the post queue,
    /// repeating until both are empty. Returns the number of jobs run.
    ///
    /// Calling `flush` from inside a running flush does nothing and returns
    /// `Ok(0)`. On error, jobs that did not run stay queued.
    pub fn flush(&self) -> Result<usize> {
        if !self.begin_flush() {
            cov_mark::hit!(reentrant_flush_ignored);
            return Ok(0);
        }
        let _span = tracing::debug_span!("flush", runtime = %self.id()).entered();

        let mut ran = 0;
        let outcome = {
            let _guard = FlushGuard { runtime: self };
            self.run_deferred_sync()
                .and_then(|()| self.drain_queues(&mut ran, true))
        };
        outcome?;

        if let Some(err) = self.take_stashed_error() {
            return Err(err);
        }
        tracing::debug!(ran, "flush complete");
        Ok(ran)
    }

    /// Run only the post queue. Main jobs queued meanwhile stay for the next
    /// flush.
    pub fn flush_post(&self) -> Result<usize> {
        if !self.begin_flush() {
            return Ok(0);
        }
        let mut ran = 0;
        let outcome = {
            let _guard = FlushGuard { runtime: self };
            self.drain_queues(&mut ran, false)
        };
        outcome.map(|()| ran)
    }

    fn begin_flush(&self) -> bool {
        let mut state = self.inner.scheduler.lock();
        if state.flushing {
            return false;
        }
        state.flushing = true;
        state.flush_scheduled = false;
        true
    }

    fn drain_queues(&self, ran: &mut usize, main: bool) -> Result<()> {
        loop {
            if main {
                while let Some(id) = self.next_main_job()? {
                    self.run_job(id)?;
                    *ran += 1;
                }
            }

            let post = self.inner.scheduler.lock().take_post();
            if post.is_empty() {
                return Ok(());
            }
            let mut jobs = post.into_iter();
            while let Some(job) = jobs.next() {
                let step = match job.task {
                    PostTask::Subscriber(id) => self
                        .check_runaway(id)
                        .and_then(|()| self.run_job(id)),
                    PostTask::Hook(hook) => {
                        hook();
                        Ok(())
                    }
                };
                if let Err(err) = step {
                    self.inner.scheduler.lock().restore_post(jobs);
                    return Err(err);
                }
                *ran += 1;
            }
            if !main {
                return Ok(());
            }
        }
    }

    fn next_main_job(&self) -> Result<Option<SubscriberId>> {
        let Some(job) = self.inner.scheduler.lock().next_main() else {
            return Ok(None);
        };
        self.check_runaway(job.id)?;
        Ok(Some(job.id))
    }

    fn check_runaway(&self, id: SubscriberId) -> Result<()> {
        let limit = self.recursion_limit();
        let count = self.inner.scheduler.lock().bump_runs(id);
        if count <= limit {
            return Ok(());
        }
        cov_mark::hit!(runaway_update_detected);
        let label = self.with_subscriber(id, |meta| meta.label.clone()).flatten();
        tracing::warn!(subscriber = %id, ?label, limit, "maximum recursive updates exceeded");
        Err(Error::RunawayUpdate {
            subscriber: id,
            label,
            limit,
        })
    }

    fn run_job(&self, id: SubscriberId) -> Result<()> {
        if !self.is_alive(id) {
            return Ok(());
        }
        match self.run_subscriber(id) {
            Ok(()) => Ok(()),
            Err(err) => self.report_error(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(index: u32) -> SubscriberId {
        SubscriberId::new(index, 0)
    }

    fn drain(state: &mut SchedulerState) -> Vec<SubscriberId> {
        let mut out = Vec::new();
        while let Some(job) = state.next_main() {
            out.push(job.id);
        }
        out
    }

    #[test]
    fn duplicate_push_is_ignored() {
        let mut state = SchedulerState::new();
        assert_eq!(state.push(sub(0), 0, Phase::Render), Enqueued::Queued);
        assert_eq!(state.push(sub(0), 0, Phase::Render), Enqueued::Duplicate);
        assert_eq!(drain(&mut state), vec![sub(0)]);
    }

    #[test]
    fn jobs_run_in_order_key_order() {
        let mut state = SchedulerState::new();
        state.push(sub(2), 5, Phase::Render);
        state.push(sub(0), 1, Phase::Render);
        state.push(sub(1), 1, Phase::Pre);
        state.push(sub(3), 3, Phase::Render);
        assert_eq!(drain(&mut state), vec![sub(1), sub(0), sub(3), sub(2)]);
    }

    #[test]
    fn equal_keys_keep_insertion_order() {
        let mut state = SchedulerState::new();
        state.push(sub(4), 2, Phase::Render);
        state.push(sub(5), 2, Phase::Render);
        assert_eq!(drain(&mut state), vec![sub(4), sub(5)]);
    }

    #[test]
    fn job_before_running_one_is_deferred() {
        let mut state = SchedulerState::new();
        state.flushing = true;
        state.push(sub(0), 10, Phase::Render);
        assert_eq!(state.next_main().map(|j| j.id), Some(sub(0)));

        assert_eq!(state.push(sub(1), 3, Phase::Render), Enqueued::Deferred);
        assert_eq!(state.push(sub(2), 11, Phase::Render), Enqueued::Queued);
        assert_eq!(drain(&mut state), vec![sub(2)]);

        assert!(state.finish_flush());
        assert_eq!(drain(&mut state), vec![sub(1)]);
    }

    #[test]
    fn remove_only_affects_pending_jobs() {
        let mut state = SchedulerState::new();
        state.push(sub(0), 0, Phase::Render);
        state.push(sub(1), 1, Phase::Post);
        assert!(state.remove(sub(1)));
        assert!(!state.remove(sub(1)));

        assert_eq!(state.next_main().map(|j| j.id), Some(sub(0)));
        assert!(!state.remove(sub(0)), "already started");
        assert!(state.take_post().is_empty());
    }

    #[test]
    fn post_jobs_sorted_by_order() {
        let mut state = SchedulerState::new();
        state.push(sub(0), 9, Phase::Post);
        state.push_hook(2, Box::new(|| {}));
        state.push(sub(1), 4, Phase::Post);
        let orders: Vec<u64> = state.take_post().iter().map(|j| j.order).collect();
        assert_eq!(orders, vec![2, 4, 9]);
    }

    #[test]
    fn request_flush_fires_once() {
        let mut state = SchedulerState::new();
        assert!(state.request_flush());
        assert!(!state.request_flush());
        state.flushing = true;
        state.flush_scheduled = false;
        assert!(!state.request_flush());
    }
}
