//! Iterators driving the bucket's lazy streams on the blocking runtime.

use std::fmt;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::runtime::Runtime;

use crate::{ObjectEntry, Result};

/// Blocking view over a fallible stream.
///
/// Each call to [`next`](Iterator::next) blocks until the next item, which
/// may require another listing page or range request.
pub struct BlockingIter<'a, T> {
    runtime: &'a Runtime,
    inner: BoxStream<'a, Result<T>>,
}

impl<'a, T> BlockingIter<'a, T> {
    pub(crate) fn new(runtime: &'a Runtime, inner: BoxStream<'a, Result<T>>) -> Self {
        Self { runtime, inner }
    }
}

impl<T> Iterator for BlockingIter<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.inner.next())
    }
}

impl<T> fmt::Debug for BlockingIter<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingIter").finish_non_exhaustive()
    }
}

/// Listing entries under a prefix.
pub type ListFiles<'a> = BlockingIter<'a, ObjectEntry>;

/// Pages of listing entries under a prefix.
pub type ListPages<'a> = BlockingIter<'a, Vec<ObjectEntry>>;

/// Consecutive byte chunks of one object.
pub type Chunks<'a> = BlockingIter<'a, Bytes>;
