// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Combinators composing several promises, and a blocking [`Barrier`] over a single one.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use crate::{
    error::{Error, Result},
    promise::{Promise, Resolver},
};

struct AllData<T> {
    slots: Mutex<Vec<Option<Result<T>>>>,
    remaining: AtomicUsize,
    resolver: Resolver<Vec<T>>,
}

impl<T> AllData<T>
where
    T: Clone + Send + 'static,
{
    fn store(&self, index: usize, result: Result<T>) {
        let slots = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots[index] = Some(result);

            if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
                return;
            }
            std::mem::take(&mut *slots)
        };

        // every slot is filled; the lowest index wins on rejection
        let collected: Result<Vec<T>> = slots.into_iter().flatten().collect();
        let _ = self.resolver.settle(collected);
    }
}

/// Aggregates promises into one that settles once every input has settled.
///
/// The aggregate resolves with the values in input order, regardless of the order in which the
/// inputs settled. If any input rejects, the aggregate rejects with the error of the rejected
/// input with the lowest index. Rejections do not short-circuit: the aggregate stays pending
/// until the last input settles. An empty input resolves immediately with an empty vector.
///
/// ```
/// use ferry::{combinators::when_all, Promise};
///
/// let all = when_all(vec![Promise::resolved(1), Promise::resolved(2)]);
/// assert_eq!(Some(vec![1, 2]), all.value());
/// ```
pub fn when_all<T, I>(promises: I) -> Promise<Vec<T>>
where
    T: Clone + Send + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let promises: Vec<Promise<T>> = promises.into_iter().collect();
    if promises.is_empty() {
        return Promise::resolved(Vec::new());
    }

    let (aggregate, resolver) = Promise::pending();
    let data = Arc::new(AllData {
        slots: Mutex::new((0..promises.len()).map(|_| None).collect()),
        remaining: AtomicUsize::new(promises.len()),
        resolver,
    });

    for (index, promise) in promises.iter().enumerate() {
        let data = data.clone();
        promise.on_settle(move |result| data.store(index, result));
    }

    aggregate
}

/// Settles with the first input to settle, in time.
///
/// The aggregate resolves with `(index, value)` of the first input to resolve, or rejects with
/// the error of the first input to reject, whichever happens first. An empty input rejects
/// immediately, as nothing could ever settle it.
pub fn when_any<T, I>(promises: I) -> Promise<(usize, T)>
where
    T: Clone + Send + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let promises: Vec<Promise<T>> = promises.into_iter().collect();
    if promises.is_empty() {
        return Promise::rejected(Error::rejected("when_any called without promises"));
    }

    let (aggregate, resolver) = Promise::pending();
    let done = Arc::new(AtomicBool::new(false));

    for (index, promise) in promises.iter().enumerate() {
        let done = done.clone();
        let resolver = resolver.clone();
        promise.on_settle(move |result| {
            if done.swap(true, Ordering::AcqRel) {
                return;
            }
            let _ = resolver.settle(result.map(|value| (index, value)));
        });
    }

    aggregate
}

/// Outcome of [`Barrier::wait_for`]
#[derive(Debug, Clone)]
pub enum WaitResult<T> {
    /// The promise resolved before the deadline
    Resolved(T),
    /// The promise rejected before the deadline
    Rejected(Error),
    /// The deadline passed while the promise was still pending
    TimedOut,
}

impl<T> WaitResult<T> {
    /// True if the wait ended on the deadline rather than on settlement
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    /// Converts to a `Result`, mapping a timeout to [`Error::Timeout`]
    pub fn into_result(self, waited: Duration) -> Result<T> {
        match self {
            Self::Resolved(v) => Ok(v),
            Self::Rejected(e) => Err(e),
            Self::TimedOut => Err(Error::Timeout(waited)),
        }
    }
}

/// Lets a thread block on a promise, with or without a deadline.
///
/// The barrier is only a view: timing out does not cancel the work behind the promise, whose
/// continuations may still run later on the settling thread.
#[derive(Debug)]
pub struct Barrier<T> {
    promise: Promise<T>,
}

impl<T> Barrier<T>
where
    T: Clone + Send + 'static,
{
    /// Creates a barrier over `promise`
    pub fn new(promise: &Promise<T>) -> Self {
        Self {
            promise: promise.clone(),
        }
    }

    /// Blocks until the promise settles or `timeout` elapses.
    pub fn wait_for(&self, timeout: Duration) -> WaitResult<T> {
        match self.promise.wait(Some(timeout)) {
            Some(Ok(value)) => WaitResult::Resolved(value),
            Some(Err(error)) => WaitResult::Rejected(error),
            None => WaitResult::TimedOut,
        }
    }

    /// Blocks until the promise settles.
    pub fn wait(&self) -> Result<T> {
        match self.promise.wait(None) {
            Some(result) => result,
            // wait(None) only returns once settled
            None => Err(Error::rejected("promise abandoned while waiting")),
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        thread,
        time::{Duration, Instant},
    };

    use super::*;

    fn settle_later<T>(resolver: Resolver<T>, after: Duration, result: Result<T>)
    where
        T: Clone + Send + 'static,
    {
        thread::spawn(move || {
            thread::sleep(after);
            resolver.settle(result).unwrap();
        });
    }

    #[test]
    fn when_all_of_nothing_resolves_empty() {
        let all = when_all(Vec::<Promise<u8>>::new());
        assert_eq!(Some(Vec::new()), all.value());
    }

    #[test]
    fn when_all_keeps_input_order() {
        let mut promises = Vec::new();
        let mut resolvers = Vec::new();
        for _ in 0..6 {
            let (p, r) = Promise::pending();
            promises.push(p);
            resolvers.push(r);
        }

        let all = when_all(promises);
        for (i, resolver) in resolvers.iter().enumerate().rev() {
            assert!(all.is_pending());
            resolver.resolve(i * 10).unwrap();
        }

        assert_eq!(Some(vec![0, 10, 20, 30, 40, 50]), all.value());
    }

    #[test]
    fn when_all_keeps_input_order_across_threads() {
        let promises: Vec<_> = (0..5u64)
            .map(|i| {
                let (p, r) = Promise::pending();
                settle_later(r, Duration::from_millis(50 - i * 10), Ok(i));
                p
            })
            .collect();

        let all = when_all(promises);
        let result = Barrier::new(&all).wait_for(Duration::from_secs(5));
        assert!(matches!(result, WaitResult::Resolved(ref v) if *v == vec![0, 1, 2, 3, 4]));
    }

    #[test]
    fn when_all_rejects_with_lowest_index() {
        let mut promises = Vec::new();
        let mut resolvers = Vec::new();
        for _ in 0..7 {
            let (p, r) = Promise::<u32>::pending();
            promises.push(p);
            resolvers.push(r);
        }
        let all = when_all(promises);

        resolvers[5].reject(Error::rejected("five")).unwrap();
        resolvers[2].reject(Error::rejected("two")).unwrap();
        for i in [0, 1, 3, 4] {
            resolvers[i].resolve(1).unwrap();
        }
        assert!(all.is_pending(), "must wait for every input");
        resolvers[6].resolve(1).unwrap();

        match all.error() {
            Some(Error::Rejected(reason)) => assert_eq!("two", reason),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn aggregate_settles_outside_the_slot_lock() {
        let (aggregate, resolver) = Promise::pending();
        let data = Arc::new(AllData {
            slots: Mutex::new(vec![None]),
            remaining: AtomicUsize::new(1),
            resolver,
        });

        let observed = data.clone();
        let unlocked = aggregate.then(move |_| observed.slots.try_lock().is_ok(), |_| {});
        data.store(0, Ok(1u32));

        assert_eq!(Some(true), unlocked.value());
    }

    #[test]
    fn when_any_takes_first_in_time() {
        let (slow, slow_resolver) = Promise::pending();
        let (fast, fast_resolver) = Promise::pending();
        let any = when_any(vec![slow, fast]);

        fast_resolver.resolve("fast").unwrap();
        slow_resolver.resolve("slow").unwrap();

        assert_eq!(Some((1, "fast")), any.value());
    }

    #[test]
    fn when_any_of_nothing_rejects() {
        assert!(when_any(Vec::<Promise<u8>>::new()).is_rejected());
    }

    #[test]
    fn barrier_times_out_on_pending_promise() {
        let (p, _resolver) = Promise::<u8>::pending();
        let barrier = Barrier::new(&p);

        let start = Instant::now();
        let result = barrier.wait_for(Duration::from_millis(100));
        let elapsed = start.elapsed();

        assert!(result.is_timed_out());
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn barrier_reports_rejection_distinctly() {
        let p = Promise::<u8>::rejected(Error::rejected("failed"));
        let result = Barrier::new(&p).wait_for(Duration::from_millis(10));
        assert!(matches!(result, WaitResult::Rejected(_)));
    }

    #[test]
    fn barrier_wakes_on_settlement() {
        let (p, r) = Promise::pending();
        settle_later(r, Duration::from_millis(20), Ok(7));

        let start = Instant::now();
        let result = Barrier::new(&p).wait_for(Duration::from_secs(10));
        assert!(matches!(result, WaitResult::Resolved(7)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn barrier_wait_blocks_until_settled() {
        let (p, r) = Promise::pending();
        settle_later(r, Duration::from_millis(20), Ok("done"));
        assert_eq!("done", Barrier::new(&p).wait().unwrap());
    }

    #[test]
    fn timed_out_barrier_leaves_work_running() {
        let (p, r) = Promise::pending();
        let counted = p.then(|v: u32| v + 1, |_| {});

        let result = Barrier::new(&p).wait_for(Duration::from_millis(10));
        assert!(result.is_timed_out());

        r.resolve(1).unwrap();
        assert_eq!(Some(2), counted.value());
    }
}
