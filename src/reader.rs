//! Abstractions for reading raw bytes out of a backing store.
//!
//! This module intentionally stays narrow: [`AsyncFileReader`] is the single capability the
//! rest of the crate requires of a backing store (get a byte range, report total length, report
//! a name). Chunking, caching, and endianness all live one layer up in [`crate::source`].

use std::fmt::Debug;
use std::ops::Range;
#[cfg(feature = "object_store")]
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, TryFutureExt};
#[cfg(feature = "object_store")]
use object_store::ObjectStore;

use crate::error::{CogError, CogResult};

/// The asynchronous interface used to read raw bytes out of a backing store.
///
/// This was derived from the Parquet
/// [`AsyncFileReader`](https://docs.rs/parquet/latest/parquet/arrow/async_reader/trait.AsyncFileReader.html)
/// trait. [`ObjectReader`], available when the `object_store` crate feature is enabled,
/// implements this interface over both HTTP and local-file backing stores, since
/// `object_store`'s own store implementations already cover that duality.
pub trait AsyncFileReader: Debug + Send + Sync {
    /// Retrieve the bytes in `range`.
    fn get_bytes(&self, range: Range<u64>) -> BoxFuture<'_, CogResult<Bytes>>;

    /// Retrieve multiple byte ranges. The default implementation calls `get_bytes`
    /// sequentially; implementations backed by a store that can batch range requests should
    /// override this.
    fn get_byte_ranges(&self, ranges: Vec<Range<u64>>) -> BoxFuture<'_, CogResult<Vec<Bytes>>> {
        async move {
            let mut result = Vec::with_capacity(ranges.len());
            for range in ranges.into_iter() {
                result.push(self.get_bytes(range).await?);
            }
            Ok(result)
        }
        .boxed()
    }

    /// The total length of the underlying object, in bytes.
    fn length(&self) -> BoxFuture<'_, CogResult<u64>>;

    /// A human-readable name for this backing store, for introspection (`cog.source.name`).
    fn name(&self) -> String;
}

/// This allows `Box<dyn AsyncFileReader + '_>` to be used as an `AsyncFileReader`.
impl AsyncFileReader for Box<dyn AsyncFileReader + '_> {
    fn get_bytes(&self, range: Range<u64>) -> BoxFuture<'_, CogResult<Bytes>> {
        self.as_ref().get_bytes(range)
    }

    fn get_byte_ranges(&self, ranges: Vec<Range<u64>>) -> BoxFuture<'_, CogResult<Vec<Bytes>>> {
        self.as_ref().get_byte_ranges(ranges)
    }

    fn length(&self) -> BoxFuture<'_, CogResult<u64>> {
        self.as_ref().length()
    }

    fn name(&self) -> String {
        self.as_ref().name()
    }
}

/// An [`AsyncFileReader`] that reads from an [`ObjectStore`].
///
/// `object_store::local::LocalFileSystem` and the stores returned by
/// `object_store::parse_url` for `http(s)://`/`s3://` URLs both implement `ObjectStore`, so
/// this one adapter covers both the HTTP and local-file backing stores.
#[cfg(feature = "object_store")]
#[derive(Clone, Debug)]
pub struct ObjectReader {
    store: Arc<dyn ObjectStore>,
    path: object_store::path::Path,
}

#[cfg(feature = "object_store")]
impl ObjectReader {
    /// Create a new [`ObjectReader`] for the provided store and path.
    pub fn new(store: Arc<dyn ObjectStore>, path: object_store::path::Path) -> Self {
        Self { store, path }
    }
}

#[cfg(feature = "object_store")]
impl AsyncFileReader for ObjectReader {
    fn get_bytes(&self, range: Range<u64>) -> BoxFuture<'_, CogResult<Bytes>> {
        let range = range.start as _..range.end as _;
        self.store
            .get_range(&self.path, range)
            .map_err(CogError::from)
            .boxed()
    }

    fn get_byte_ranges(&self, ranges: Vec<Range<u64>>) -> BoxFuture<'_, CogResult<Vec<Bytes>>> {
        let ranges = ranges
            .into_iter()
            .map(|r| r.start as _..r.end as _)
            .collect::<Vec<_>>();
        async move {
            self.store
                .get_ranges(&self.path, &ranges)
                .await
                .map_err(CogError::from)
        }
        .boxed()
    }

    fn length(&self) -> BoxFuture<'_, CogResult<u64>> {
        async move { Ok(self.store.head(&self.path).await?.size as u64) }.boxed()
    }

    fn name(&self) -> String {
        self.path.to_string()
    }
}
