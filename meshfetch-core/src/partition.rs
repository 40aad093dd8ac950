// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Streaming group-by with bounded memory
//!
//! Groups are accumulated for a fixed number of input items (a window),
//! then all of them are emitted and cleared. A key can therefore be
//! emitted once per window it appears in; consumers must append each batch
//! rather than treat it as the complete group.
//!
//! ```text
//! input:  a1 b1 a2 | c1 a3 b2 | a4
//! output: (a,[a1,a2]) (b,[b1]) | (c,[c1]) (a,[a3]) (b,[b2]) | (a,[a4])
//! ```

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Default window size used when re-partitioning results files
pub const DEFAULT_WINDOW_SIZE: usize = 1_000_000;

/// Iterator returned by [`partition`].
pub struct StreamingPartitioner<I, K, F>
where
    I: Iterator,
{
    inner: I,
    key_fn: F,
    window_size: usize,
    consumed: usize,
    groups: Vec<(K, Vec<I::Item>)>,
    positions: HashMap<K, usize>,
    ready: VecDeque<(K, Vec<I::Item>)>,
    exhausted: bool,
}

impl<I, K, F> StreamingPartitioner<I, K, F>
where
    I: Iterator,
    K: Hash + Eq + Clone,
    F: FnMut(&I::Item) -> K,
{
    pub fn new(inner: I, key_fn: F, window_size: usize) -> Self {
        Self {
            inner,
            key_fn,
            window_size: window_size.max(1),
            consumed: 0,
            groups: Vec::new(),
            positions: HashMap::new(),
            ready: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Number of input items consumed so far
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    fn flush(&mut self) {
        self.positions.clear();
        self.ready.extend(self.groups.drain(..));
    }

    fn fill_window(&mut self) {
        for item in self.inner.by_ref() {
            let key = (self.key_fn)(&item);
            match self.positions.get(&key) {
                Some(&pos) => self.groups[pos].1.push(item),
                None => {
                    self.positions.insert(key.clone(), self.groups.len());
                    self.groups.push((key, vec![item]));
                }
            }
            self.consumed += 1;
            if self.consumed % self.window_size == 0 {
                self.flush();
                return;
            }
        }
        self.exhausted = true;
        self.flush();
    }
}

impl<I, K, F> Iterator for StreamingPartitioner<I, K, F>
where
    I: Iterator,
    K: Hash + Eq + Clone,
    F: FnMut(&I::Item) -> K,
{
    type Item = (K, Vec<I::Item>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(group) = self.ready.pop_front() {
                return Some(group);
            }
            if self.exhausted {
                return None;
            }
            self.fill_window();
        }
    }
}

/// Group `stream` by `key_fn`, flushing every `window_size` items.
pub fn partition<I, K, F>(
    stream: I,
    key_fn: F,
    window_size: usize,
) -> StreamingPartitioner<I::IntoIter, K, F>
where
    I: IntoIterator,
    K: Hash + Eq + Clone,
    F: FnMut(&I::Item) -> K,
{
    StreamingPartitioner::new(stream.into_iter(), key_fn, window_size)
}

/// Extension adaptor: `iter.partition_stream(key_fn, window_size)`
pub trait PartitionExt: Iterator + Sized {
    fn partition_stream<K, F>(
        self,
        key_fn: F,
        window_size: usize,
    ) -> StreamingPartitioner<Self, K, F>
    where
        K: Hash + Eq + Clone,
        F: FnMut(&Self::Item) -> K,
    {
        StreamingPartitioner::new(self, key_fn, window_size)
    }
}

impl<I: Iterator> PartitionExt for I {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_windows_flush() {
        let input = vec!["a1", "b1", "a2", "c1", "a3", "b2", "a4"];
        let out: Vec<(char, Vec<&str>)> =
            partition(input, |s: &&str| s.chars().next().unwrap(), 3).collect();
        assert_eq!(
            out,
            vec![
                ('a', vec!["a1", "a2"]),
                ('b', vec!["b1"]),
                ('c', vec!["c1"]),
                ('a', vec!["a3"]),
                ('b', vec!["b2"]),
                ('a', vec!["a4"]),
            ]
        );
    }

    #[test]
    fn test_empty_input() {
        let out: Vec<(u8, Vec<u8>)> = partition(Vec::<u8>::new(), |x| *x, 10).collect();
        assert!(out.is_empty());
    }

    #[test]
    fn test_exact_window_boundary() {
        let out: Vec<(u8, Vec<u8>)> = partition(vec![1u8, 1, 2, 2], |x| *x, 2).collect();
        assert_eq!(out, vec![(1, vec![1, 1]), (2, vec![2, 2])]);
    }

    #[test]
    fn test_zero_window_is_one() {
        let out: Vec<(u8, Vec<u8>)> = partition(vec![1u8, 1], |x| *x, 0).collect();
        assert_eq!(out, vec![(1, vec![1]), (1, vec![1])]);
    }

    #[test]
    fn test_lazy_early_stop() {
        let mut pulled = 0;
        let source = (0..1_000_000u32).inspect(|_| pulled += 1);
        let first = source.partition_stream(|x| x % 2, 10).next();
        assert_eq!(first, Some((0, vec![0, 2, 4, 6, 8])));
        assert_eq!(pulled, 10);
    }

    proptest! {
        #[test]
        fn prop_regroup_reproduces_input(
            input in prop::collection::vec((0u8..8, any::<u16>()), 0..300),
            window in 1usize..50,
        ) {
            let mut expected: BTreeMap<u8, Vec<u16>> = BTreeMap::new();
            for (k, v) in &input {
                expected.entry(*k).or_default().push(*v);
            }

            let mut regrouped: BTreeMap<u8, Vec<u16>> = BTreeMap::new();
            for (k, batch) in partition(input.clone(), |x| x.0, window) {
                prop_assert!(batch.iter().all(|(bk, _)| *bk == k));
                regrouped.entry(k).or_default().extend(batch.into_iter().map(|(_, v)| v));
            }

            prop_assert_eq!(regrouped, expected);
        }
    }
}
