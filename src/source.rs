//! A chunked, cached byte source and its typed-read surface.
//!
//! Reads against the backing store are mapped onto a table of fixed-size chunks covering the
//! whole source, each independently fetched and cached, with per-chunk fetch coalescing so
//! concurrent requests for the same chunk share one underlying range read.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use byteorder::{BigEndian, ByteOrder as _, LittleEndian};
use bytes::{Bytes, BytesMut};
use tokio::sync::OnceCell;

use crate::error::{CogError, CogResult};
use crate::reader::AsyncFileReader;
use crate::tags::Type;
use crate::value::Value;

/// Default chunk size: 64 KiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 64 * 1024;

/// Byte order detected from the first two bytes of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    LittleEndian,
    BigEndian,
}

/// The lifecycle state of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Empty,
    Fetching,
    Ready,
}

/// Per-chunk completion primitive. `requested` distinguishes `Empty` from `Fetching` for
/// introspection; `cell` is the actual fetch-once-and-share mechanism. Concurrent callers for
/// the same chunk id coalesce onto the same `OnceCell::get_or_try_init` call.
struct ChunkSlot {
    requested: AtomicBool,
    cell: OnceCell<Bytes>,
}

impl ChunkSlot {
    fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            cell: OnceCell::new(),
        }
    }
}

/// A read-only snapshot of one chunk, for introspection (`cog.source.chunk(id)`).
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: u64,
    pub id_offset: u64,
    pub state: ChunkState,
    pub bytes: Option<Bytes>,
}

/// The chunked byte source: serves `(offset, length)` reads against a backing
/// [`AsyncFileReader`] via a table of fixed-size, independently-cached chunks.
#[derive(Debug)]
pub struct ByteSource {
    reader: Box<dyn AsyncFileReader>,
    chunk_size: u64,
    length: u64,
    slots: Mutex<HashMap<u64, Arc<ChunkSlot>>>,
    byte_order: OnceCell<Endianness>,
    version: OnceCell<u16>,
}

impl std::fmt::Debug for ChunkSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkSlot")
            .field("requested", &self.requested.load(Ordering::Relaxed))
            .field("ready", &self.cell.initialized())
            .finish()
    }
}

impl ByteSource {
    /// Open a byte source over `reader`, discovering the backing store's total length.
    ///
    /// `chunk_size` must be at least 8 bytes (so that the header always fits in one chunk);
    /// violating this is a programmer error, not a data error, so it panics rather than
    /// returning a `Result`.
    pub async fn new(reader: Box<dyn AsyncFileReader>, chunk_size: u64) -> CogResult<Self> {
        assert!(chunk_size >= 8, "chunk_size must be at least 8 bytes");
        let length = reader.length().await?;
        Ok(Self {
            reader,
            chunk_size,
            length,
            slots: Mutex::new(HashMap::new()),
            byte_order: OnceCell::new(),
            version: OnceCell::new(),
        })
    }

    /// Human-readable backing identity, for introspection.
    pub fn name(&self) -> String {
        self.reader.name()
    }

    /// The configured chunk size.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Total length of the underlying source, in bytes.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Record the byte order detected from the header. Called once, by `Cog::init`.
    pub(crate) fn set_endianness(&self, order: Endianness) {
        let _ = self.byte_order.set(order);
    }

    /// The byte order in effect for typed reads. Defaults to little-endian before `init`
    /// has captured it (the magic-byte read itself is order-independent).
    pub fn endianness(&self) -> Endianness {
        self.byte_order.get().copied().unwrap_or(Endianness::LittleEndian)
    }

    /// Record the TIFF version detected from the header. Called once, by `Cog::init`.
    pub(crate) fn set_version(&self, version: u16) {
        let _ = self.version.set(version);
    }

    /// The TIFF version detected at `init`, if any.
    pub fn version(&self) -> Option<u16> {
        self.version.get().copied()
    }

    fn chunk_id_for(&self, offset: u64) -> u64 {
        offset / self.chunk_size
    }

    fn chunk_range(&self, id: u64) -> Range<u64> {
        let start = id * self.chunk_size;
        let end = (start + self.chunk_size).min(self.length);
        start..end
    }

    fn slot(&self, id: u64) -> Arc<ChunkSlot> {
        let mut slots = self.slots.lock().unwrap();
        slots
            .entry(id)
            .or_insert_with(|| Arc::new(ChunkSlot::new()))
            .clone()
    }

    /// Fetch (or wait for an in-flight fetch of, or serve from cache) the chunk with the given
    /// id. Never holds the `slots` lock across the backing-store call.
    async fn fetch_chunk(&self, id: u64) -> CogResult<Bytes> {
        let slot = self.slot(id);
        slot.requested.store(true, Ordering::SeqCst);
        let range = self.chunk_range(id);
        let want = range.end - range.start;
        let bytes = slot
            .cell
            .get_or_try_init(|| {
                log::trace!("issuing fetch for chunk {id} ({}..{})", range.start, range.end);
                self.reader.get_bytes(range.clone())
            })
            .await?;
        if bytes.len() as u64 != want {
            return Err(CogError::ShortRead {
                offset: range.start,
                want,
                got: bytes.len() as u64,
            });
        }
        Ok(bytes.clone())
    }

    /// Snapshot the state of a single chunk without fetching it.
    pub fn chunk(&self, id: u64) -> Chunk {
        let id_offset = id * self.chunk_size;
        let slots = self.slots.lock().unwrap();
        let Some(slot) = slots.get(&id) else {
            return Chunk {
                id,
                id_offset,
                state: ChunkState::Empty,
                bytes: None,
            };
        };
        if let Some(bytes) = slot.cell.get() {
            Chunk {
                id,
                id_offset,
                state: ChunkState::Ready,
                bytes: Some(bytes.clone()),
            }
        } else if slot.requested.load(Ordering::SeqCst) {
            Chunk {
                id,
                id_offset,
                state: ChunkState::Fetching,
                bytes: None,
            }
        } else {
            Chunk {
                id,
                id_offset,
                state: ChunkState::Empty,
                bytes: None,
            }
        }
    }

    /// All chunks touched so far, ordered by id (`cog.source.chunks`).
    pub fn chunks(&self) -> Vec<Chunk> {
        let mut ids: Vec<u64> = self.slots.lock().unwrap().keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().map(|id| self.chunk(id)).collect()
    }

    /// True iff every chunk covering `[offset, offset+length)` is currently `Ready`.
    ///
    /// Never issues a fetch; this is the synchronous residency predicate the IFD parser uses
    /// to decide whether a tag value can be resolved eagerly.
    pub fn has_bytes(&self, offset: u64, length: u64) -> bool {
        if length == 0 {
            return true;
        }
        if offset.checked_add(length).is_none_or(|end| end > self.length) {
            return false;
        }
        let start_chunk = self.chunk_id_for(offset);
        let end_chunk = self.chunk_id_for(offset + length - 1);
        (start_chunk..=end_chunk).all(|id| self.chunk(id).state == ChunkState::Ready)
    }

    /// Read exactly `length` bytes starting at `offset`, stitching across as many chunks as
    /// needed.
    pub async fn bytes(&self, offset: u64, length: u64) -> CogResult<Bytes> {
        if length == 0 {
            return Ok(Bytes::new());
        }
        if offset.checked_add(length).is_none_or(|end| end > self.length) {
            return Err(CogError::OffsetOutOfRange(offset));
        }

        let start_chunk = self.chunk_id_for(offset);
        let end_chunk = self.chunk_id_for(offset + length - 1);

        if start_chunk == end_chunk {
            let chunk = self.fetch_chunk(start_chunk).await?;
            let local_start = (offset - start_chunk * self.chunk_size) as usize;
            return Ok(chunk.slice(local_start..local_start + length as usize));
        }

        let mut buf = BytesMut::with_capacity(length as usize);
        for id in start_chunk..=end_chunk {
            let chunk = self.fetch_chunk(id).await?;
            let chunk_start = id * self.chunk_size;
            let lo = offset.max(chunk_start) - chunk_start;
            let hi = (offset + length).min(chunk_start + chunk.len() as u64) - chunk_start;
            buf.extend_from_slice(&chunk[lo as usize..hi as usize]);
        }
        Ok(buf.freeze())
    }

    /// Read a little/big-endian `u16` at `offset` (endianness per the detected header).
    pub async fn u16(&self, offset: u64) -> CogResult<u16> {
        let raw = self.bytes(offset, 2).await?;
        Ok(match self.endianness() {
            Endianness::LittleEndian => LittleEndian::read_u16(&raw),
            Endianness::BigEndian => BigEndian::read_u16(&raw),
        })
    }

    /// Read a little/big-endian `u32` at `offset`.
    pub async fn u32(&self, offset: u64) -> CogResult<u32> {
        let raw = self.bytes(offset, 4).await?;
        Ok(match self.endianness() {
            Endianness::LittleEndian => LittleEndian::read_u32(&raw),
            Endianness::BigEndian => BigEndian::read_u32(&raw),
        })
    }

    /// The typed reader: interpret `count` values of `ty` at `offset`.
    pub async fn read_type(&self, offset: u64, ty: Type, count: u32) -> CogResult<Value> {
        if count == 0 {
            return Ok(Value::List(vec![]));
        }

        if ty == Type::ASCII {
            let raw = self.bytes(offset, count as u64).await?;
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            return Ok(Value::Ascii(
                String::from_utf8_lossy(&raw[..end]).into_owned(),
            ));
        }

        let size = ty.size() as u64;
        let raw = self.bytes(offset, count as u64 * size).await?;
        let endianness = self.endianness();
        let mut values = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            let start = i * size as usize;
            let slice = &raw[start..start + size as usize];
            values.push(decode_scalar(ty, slice, endianness));
        }

        if count == 1 {
            Ok(values.into_iter().next().unwrap())
        } else {
            Ok(Value::List(values))
        }
    }
}

fn decode_scalar(ty: Type, b: &[u8], endianness: Endianness) -> Value {
    macro_rules! read {
        ($f:ident, $s:expr) => {
            match endianness {
                Endianness::LittleEndian => LittleEndian::$f($s),
                Endianness::BigEndian => BigEndian::$f($s),
            }
        };
    }
    match ty {
        Type::BYTE | Type::UNDEFINED => Value::Byte(b[0]),
        Type::SBYTE => Value::Signed(b[0] as i8 as i32),
        Type::SHORT => Value::Short(read!(read_u16, b)),
        Type::SSHORT => Value::Signed(read!(read_i16, b) as i32),
        Type::LONG | Type::IFD => Value::Unsigned(read!(read_u32, b)),
        Type::SLONG => Value::Signed(read!(read_i32, b)),
        Type::FLOAT => Value::Float(read!(read_f32, b)),
        Type::DOUBLE => Value::Double(read!(read_f64, b)),
        Type::RATIONAL => Value::Rational(read!(read_u32, &b[0..4]), read!(read_u32, &b[4..8])),
        Type::SRATIONAL => Value::SRational(read!(read_i32, &b[0..4]), read!(read_i32, &b[4..8])),
        Type::ASCII => unreachable!("ASCII handled separately in read_type"),
    }
}
