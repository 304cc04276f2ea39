//! The IFD parser: walks the classic-TIFF directory chain and decodes tag entries lazily.
//!
//! A tag whose value lives outside the bytes already resident in the chunk cache is left as
//! [`TagValue::Deferred`] until [`ImageFileDirectory::fetch`] is called for it, rather than
//! forcing an eager fetch for every out-of-line value while walking the chain. Only the classic
//! 12-byte tag entry layout is supported; there is no BigTIFF branching.

use std::collections::HashMap;

use crate::error::{CogError, CogResult};
use crate::source::ByteSource;
use crate::tags::{Tag, Type};
use crate::value::{TagValue, Value};

/// One parsed image file directory: the tag table plus enough positional bookkeeping to resolve
/// deferred values and to locate the directory on disk.
#[derive(Debug, Clone)]
pub struct ImageFileDirectory {
    offset: u64,
    tags: HashMap<Tag, TagValue>,
}

impl ImageFileDirectory {
    /// The file offset this directory was read from.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Look up a tag's current value, whether resolved or still deferred.
    pub fn tag(&self, tag: Tag) -> Option<&TagValue> {
        self.tags.get(&tag)
    }

    /// Iterate all tags present in this directory (`cog.get_image(z).tags`).
    pub fn tags(&self) -> impl Iterator<Item = (&Tag, &TagValue)> {
        self.tags.iter()
    }

    /// Fetch a required tag's already-resolved value, or fail with [`CogError::MissingTag`].
    ///
    /// Callers that might still hold a deferred value for `tag` must call
    /// [`ImageFileDirectory::fetch`] first; this never performs I/O itself.
    pub(crate) fn require(&self, tag: Tag, name: &'static str) -> CogResult<&Value> {
        self.tags
            .get(&tag)
            .and_then(TagValue::resolved)
            .ok_or(CogError::MissingTag(name))
    }

    /// Resolve `tag`'s value against `source` if it is still deferred, caching the result.
    ///
    /// Returns `None` if the tag is absent entirely. There is no reverse transition: once
    /// resolved, a tag stays resolved for the lifetime of this directory.
    pub async fn fetch(&mut self, source: &ByteSource, tag: Tag) -> CogResult<Option<&Value>> {
        if let Some(TagValue::Deferred {
            offset,
            r#type,
            count,
        }) = self.tags.get(&tag)
        {
            let (offset, ty, count) = (*offset, *r#type, *count);
            let value = source.read_type(offset, ty, count).await?;
            self.tags.insert(tag, TagValue::Resolved(value));
        }
        Ok(self.tags.get(&tag).and_then(TagValue::resolved))
    }
}

/// Reads a single classic-TIFF IFD starting at a known offset.
///
/// Each entry is 12 bytes: a 2-byte tag code, a 2-byte type code, a 4-byte count, and a 4-byte
/// value-or-offset field. The directory is preceded by a 2-byte entry count and followed by a
/// 4-byte offset to the next IFD (0 if this is the last one).
struct IfdReader<'a> {
    source: &'a ByteSource,
    ifd_offset: u64,
    tag_count: u64,
}

impl<'a> IfdReader<'a> {
    async fn open(source: &'a ByteSource, ifd_offset: u64) -> CogResult<Self> {
        let tag_count = source.u16(ifd_offset).await? as u64;
        Ok(Self {
            source,
            ifd_offset,
            tag_count,
        })
    }

    fn entry_offset(&self, idx: u64) -> u64 {
        self.ifd_offset + 2 + idx * 12
    }

    async fn read(&self) -> CogResult<ImageFileDirectory> {
        let mut tags = HashMap::with_capacity(self.tag_count as usize);
        for idx in 0..self.tag_count {
            let entry_offset = self.entry_offset(idx);
            let tag_code = self.source.u16(entry_offset).await?;
            let tag = Tag::from_u16_exhaustive(tag_code);

            // First occurrence of a duplicated tag code wins; later ones are ignored.
            if tags.contains_key(&tag) {
                continue;
            }

            let type_code = self.source.u16(entry_offset + 2).await?;
            let Some(ty) = Type::from_u16(type_code) else {
                log::debug!("skipping tag {tag_code} with unrecognized type code {type_code}");
                continue;
            };
            let count = self.source.u32(entry_offset + 4).await?;
            let value_field_offset = entry_offset + 8;
            let total_bytes = count as u64 * ty.size() as u64;

            let tag_value = if total_bytes <= 4 {
                TagValue::Resolved(
                    self.source
                        .read_type(value_field_offset, ty, count)
                        .await?,
                )
            } else {
                let offset = self.source.u32(value_field_offset).await? as u64;
                if self.source.has_bytes(offset, total_bytes) {
                    TagValue::Resolved(self.source.read_type(offset, ty, count).await?)
                } else {
                    TagValue::Deferred {
                        offset,
                        r#type: ty,
                        count,
                    }
                }
            };
            tags.insert(tag, tag_value);
        }
        Ok(ImageFileDirectory {
            offset: self.ifd_offset,
            tags,
        })
    }

    async fn next_ifd_offset(&self) -> CogResult<Option<u64>> {
        let pos = self.entry_offset(self.tag_count);
        let next = self.source.u32(pos).await? as u64;
        Ok((next != 0).then_some(next))
    }
}

/// Walk the IFD chain starting at `first_ifd_offset`, reading every directory in order.
///
/// This is iterative, not recursive: each directory's trailing "next IFD" pointer just becomes
/// the next loop iteration's starting offset.
pub async fn read_chain(
    source: &ByteSource,
    first_ifd_offset: u64,
) -> CogResult<Vec<ImageFileDirectory>> {
    let mut ifds = Vec::new();
    let mut next_offset = Some(first_ifd_offset);
    while let Some(offset) = next_offset {
        let reader = IfdReader::open(source, offset).await?;
        let ifd = reader.read().await?;
        next_offset = reader.next_ifd_offset().await?;
        ifds.push(ifd);
    }
    Ok(ifds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::AsyncFileReader;
    use bytes::Bytes;
    use futures::future::{BoxFuture, FutureExt};
    use std::ops::Range;

    #[derive(Debug)]
    struct FixedReader(Bytes);

    impl AsyncFileReader for FixedReader {
        fn get_bytes(&self, range: Range<u64>) -> BoxFuture<'_, CogResult<Bytes>> {
            let data = self.0.slice(range.start as usize..range.end as usize);
            async move { Ok(data) }.boxed()
        }

        fn length(&self) -> BoxFuture<'_, CogResult<u64>> {
            let len = self.0.len() as u64;
            async move { Ok(len) }.boxed()
        }

        fn name(&self) -> String {
            "fixed".into()
        }
    }

    /// Builds a minimal classic-TIFF buffer: header (8 bytes, little-endian, IFD at offset 8),
    /// one IFD with an inline `ImageWidth` SHORT tag, and an out-of-line `ModelPixelScale`
    /// DOUBLE-list tag whose bytes live in a later chunk.
    fn build_tiff() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"II");
        buf.extend_from_slice(&42u16.to_le_bytes());
        buf.extend_from_slice(&8u32.to_le_bytes());

        // IFD at offset 8: 2 entries.
        buf.extend_from_slice(&2u16.to_le_bytes());

        // Entry 1: ImageWidth (256), SHORT (3), count 1, value 512 inline.
        buf.extend_from_slice(&256u16.to_le_bytes());
        buf.extend_from_slice(&3u16.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&512u16.to_le_bytes());
        buf.extend_from_slice(&[0u8, 0u8]); // pad value field to 4 bytes

        // Entry 2: ModelPixelScaleTag (33550), DOUBLE (12), count 3, offset points past the IFD.
        let data_offset: u32 = 8 + 2 + 2 * 12 + 4; // right after next-ifd pointer
        buf.extend_from_slice(&33550u16.to_le_bytes());
        buf.extend_from_slice(&12u16.to_le_bytes());
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&data_offset.to_le_bytes());

        // Next IFD offset: none.
        buf.extend_from_slice(&0u32.to_le_bytes());

        // Out-of-line data: three f64 values.
        for v in [1.0f64, 2.0, -1.0] {
            buf.extend_from_slice(&v.to_le_bytes());
        }

        buf
    }

    async fn source_with_chunk_size(chunk_size: u64) -> ByteSource {
        let data = build_tiff();
        let reader = FixedReader(Bytes::from(data));
        let source = ByteSource::new(Box::new(reader), chunk_size).await.unwrap();
        source.set_endianness(crate::source::Endianness::LittleEndian);
        source
    }

    #[tokio::test]
    async fn inline_value_resolves_without_fetch() {
        let source = source_with_chunk_size(1024).await;
        let ifds = read_chain(&source, 8).await.unwrap();
        assert_eq!(ifds.len(), 1);
        let ifd = &ifds[0];
        let value = ifd.require(Tag::ImageWidth, "ImageWidth").unwrap();
        assert_eq!(value.as_u32(), Some(512));
    }

    #[tokio::test]
    async fn out_of_line_value_stays_deferred_until_fetched() {
        // Small chunk size so the out-of-line data isn't already resident when the IFD is read.
        let source = source_with_chunk_size(8).await;
        let mut ifds = read_chain(&source, 8).await.unwrap();
        let ifd = &mut ifds[0];
        assert!(ifd
            .tag(Tag::ModelPixelScaleTag)
            .map(TagValue::is_deferred)
            .unwrap_or(false));

        let value = ifd
            .fetch(&source, Tag::ModelPixelScaleTag)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value.as_f64_list(), Some(vec![1.0, 2.0, -1.0]));
        assert!(!ifd
            .tag(Tag::ModelPixelScaleTag)
            .map(TagValue::is_deferred)
            .unwrap_or(true));
    }

    #[tokio::test]
    async fn duplicated_tag_keeps_first_occurrence() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"II");
        buf.extend_from_slice(&42u16.to_le_bytes());
        buf.extend_from_slice(&8u32.to_le_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes());

        buf.extend_from_slice(&256u16.to_le_bytes());
        buf.extend_from_slice(&3u16.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&111u16.to_le_bytes());
        buf.extend_from_slice(&[0u8, 0u8]);

        buf.extend_from_slice(&256u16.to_le_bytes());
        buf.extend_from_slice(&3u16.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&222u16.to_le_bytes());
        buf.extend_from_slice(&[0u8, 0u8]);

        buf.extend_from_slice(&0u32.to_le_bytes());

        let reader = FixedReader(Bytes::from(buf));
        let source = ByteSource::new(Box::new(reader), 1024).await.unwrap();
        source.set_endianness(crate::source::Endianness::LittleEndian);

        let ifds = read_chain(&source, 8).await.unwrap();
        let value = ifds[0].require(Tag::ImageWidth, "ImageWidth").unwrap();
        assert_eq!(value.as_u32(), Some(111));
    }
}
