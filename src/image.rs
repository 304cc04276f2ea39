//! The per-IFD image view and tile locator: derived geometry over one directory's tags, plus
//! resolution of a tile's on-disk byte range from its `TileOffsets`/`TileByteCounts` arrays.

use bytes::Bytes;

use crate::error::{CogError, CogResult};
use crate::geo::GeoKeyDirectory;
use crate::ifd::ImageFileDirectory;
use crate::source::ByteSource;
use crate::tags::{compression_media_type, Tag};
use crate::value::Value;

/// One resolution level of the image: the IFD plus derived geometry. `Image` does not own a
/// reference to the backing source; callers pass it explicitly to any method that may need to
/// resolve a still-deferred tag.
#[derive(Debug, Clone)]
pub struct Image {
    ifd: ImageFileDirectory,
}

impl Image {
    pub(crate) fn new(ifd: ImageFileDirectory) -> Self {
        Self { ifd }
    }

    /// The underlying IFD, for low-level tag access (`cog.get_image(z).tag_list()`-style use).
    pub fn ifd(&self) -> &ImageFileDirectory {
        &self.ifd
    }

    /// `(ImageWidth, ImageLength)`, or `None` if either tag is absent.
    pub fn size(&self) -> Option<(u32, u32)> {
        let width = self.ifd.tag(Tag::ImageWidth)?.resolved()?.as_u32()?;
        let length = self.ifd.tag(Tag::ImageLength)?.resolved()?.as_u32()?;
        Some((width, length))
    }

    /// `(TileWidth, TileLength)`, or `None` if this is a strip-based (non-tiled) image.
    pub fn tile_info(&self) -> Option<(u32, u32)> {
        let width = self.ifd.tag(Tag::TileWidth)?.resolved()?.as_u32()?;
        let length = self.ifd.tag(Tag::TileLength)?.resolved()?.as_u32()?;
        Some((width, length))
    }

    pub fn is_tiled(&self) -> bool {
        self.tile_info().is_some()
    }

    /// `(nx, ny)`, the tile-grid dimensions: `ceil(W/tw), ceil(L/tl)`.
    pub fn tile_count(&self) -> Option<(u32, u32)> {
        let (width, length) = self.size()?;
        let (tile_width, tile_length) = self.tile_info()?;
        let nx = width.div_ceil(tile_width);
        let ny = length.div_ceil(tile_length);
        Some((nx, ny))
    }

    /// The media type for this image's compression code, or `None` if the tag is absent or the
    /// code is not in the fixed table.
    pub fn compression(&self) -> Option<&'static str> {
        let code = self.ifd.tag(Tag::Compression)?.resolved()?.as_u32()?;
        compression_media_type(code as u16)
    }

    /// The human names of every tag present in this IFD, in no particular order.
    pub fn tag_list(&self) -> Vec<Tag> {
        self.ifd.tags().map(|(tag, _)| *tag).collect()
    }

    async fn fetch_f64_list(
        &mut self,
        source: &ByteSource,
        tag: Tag,
        name: &'static str,
    ) -> CogResult<Vec<f64>> {
        let value = self
            .ifd
            .fetch(source, tag)
            .await?
            .ok_or(CogError::MissingTag(name))?;
        value.as_f64_list().ok_or(CogError::MissingTag(name))
    }

    /// The model-space coordinates of pixel `(0, 0)`, from `ModelTiepoint[3..6]`.
    ///
    /// Fails with `MissingTag("ModelTiepoint")` if the tag is absent or its resolved length is
    /// not exactly 6.
    pub async fn origin(&mut self, source: &ByteSource) -> CogResult<(f64, f64, f64)> {
        let tiepoint = self
            .fetch_f64_list(source, Tag::ModelTiepointTag, "ModelTiepoint")
            .await?;
        if tiepoint.len() != 6 {
            return Err(CogError::MissingTag("ModelTiepoint"));
        }
        Ok((tiepoint[3], tiepoint[4], tiepoint[5]))
    }

    /// `(x_res, y_res, z_res)` from `ModelPixelScale`, with the Y axis negated: pixel-Y grows
    /// southward while model-Y grows northward.
    pub async fn resolution(&mut self, source: &ByteSource) -> CogResult<(f64, f64, f64)> {
        let scale = self
            .fetch_f64_list(source, Tag::ModelPixelScaleTag, "ModelPixelScale")
            .await?;
        if scale.len() < 3 {
            return Err(CogError::MissingTag("ModelPixelScale"));
        }
        Ok((scale[0], -scale[1], scale[2]))
    }

    /// `[min_x, min_y, max_x, max_y]` of the image's footprint in model space.
    pub async fn bbox(&mut self, source: &ByteSource) -> CogResult<[f64; 4]> {
        let (x1, y1, _) = self.origin(source).await?;
        let (res_x, res_y, _) = self.resolution(source).await?;
        let (width, length) = self
            .size()
            .ok_or(CogError::MissingTag("ImageWidth/ImageLength"))?;
        let x2 = x1 + res_x * width as f64;
        let y2 = y1 + res_y * length as f64;
        Ok([x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)])
    }

    /// Parse this image's `GeoKeyDirectoryTag` (plus its companion `GeoDoubleParamsTag`/
    /// `GeoAsciiParamsTag`, if present) into a [`GeoKeyDirectory`].
    ///
    /// Returns `None` if the image carries no `GeoKeyDirectoryTag` at all. This is pure metadata
    /// exposure, not reprojection: the crate never consults an EPSG database or computes a
    /// transform between CRSes.
    pub async fn geo_keys(&mut self, source: &ByteSource) -> CogResult<Option<GeoKeyDirectory>> {
        let Some(geo_keys) = self
            .ifd
            .fetch(source, Tag::GeoKeyDirectoryTag)
            .await?
            .and_then(Value::as_u32_list)
        else {
            return Ok(None);
        };
        let geo_keys: Vec<u16> = geo_keys.into_iter().map(|v| v as u16).collect();

        let doubles = self
            .ifd
            .fetch(source, Tag::GeoDoubleParamsTag)
            .await?
            .and_then(Value::as_f64_list)
            .unwrap_or_default();

        let ascii = self
            .ifd
            .fetch(source, Tag::GeoAsciiParamsTag)
            .await?
            .and_then(Value::as_ascii)
            .map(str::to_string)
            .unwrap_or_default();

        Ok(Some(GeoKeyDirectory::from_tags(&geo_keys, &doubles, &ascii)))
    }

    /// Resolve the on-disk `(offset, length)` of tile `(x, y)` and fetch its raw, still-compressed
    /// bytes. `TileOffsets`/`TileByteCounts` are resolved (and cached on this image) if still
    /// deferred; the two may be resolved in either order.
    pub async fn get_tile_raw(
        &mut self,
        source: &ByteSource,
        x: u32,
        y: u32,
    ) -> CogResult<(Option<&'static str>, Bytes)> {
        if !self.is_tiled() {
            return Err(CogError::NotTiled);
        }
        let (nx, ny) = self
            .tile_count()
            .ok_or(CogError::MissingTag("ImageWidth/ImageLength"))?;
        if x >= nx || y >= ny {
            return Err(CogError::TileOutOfRange { x, y });
        }
        let idx = (y * nx + x) as usize;

        let offsets = self
            .ifd
            .fetch(source, Tag::TileOffsets)
            .await?
            .and_then(Value::as_u32_list)
            .ok_or(CogError::MissingTag("TileOffsets"))?;
        let lengths = self
            .ifd
            .fetch(source, Tag::TileByteCounts)
            .await?
            .and_then(Value::as_u32_list)
            .ok_or(CogError::MissingTag("TileByteCounts"))?;

        let offset = *offsets.get(idx).ok_or(CogError::TileOutOfRange { x, y })? as u64;
        let length = *lengths.get(idx).ok_or(CogError::TileOutOfRange { x, y })? as u64;

        let bytes = source.bytes(offset, length).await?;
        Ok((self.compression(), bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ifd::read_chain;
    use crate::reader::AsyncFileReader;
    use crate::source::Endianness;
    use bytes::Bytes as BytesBuf;
    use futures::future::{BoxFuture, FutureExt};
    use std::ops::Range;

    #[derive(Debug)]
    struct FixedReader(BytesBuf);

    impl AsyncFileReader for FixedReader {
        fn get_bytes(&self, range: Range<u64>) -> BoxFuture<'_, CogResult<BytesBuf>> {
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

    fn push_entry(buf: &mut Vec<u8>, code: u16, ty: u16, count: u32, value_or_offset: u32) {
        buf.extend_from_slice(&code.to_le_bytes());
        buf.extend_from_slice(&ty.to_le_bytes());
        buf.extend_from_slice(&count.to_le_bytes());
        buf.extend_from_slice(&value_or_offset.to_le_bytes());
    }

    /// A tiled 600x400 image (tiles 256x256, so a 3x2 grid) with tile 5 ((x=2,y=1)) pointed at a
    /// distinctive offset/length so row-major tile indexing can be verified.
    fn build_tiled_tiff() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"II");
        buf.extend_from_slice(&42u16.to_le_bytes());
        buf.extend_from_slice(&8u32.to_le_bytes());

        let entries = 6u16;
        buf.extend_from_slice(&entries.to_le_bytes());

        push_entry(&mut buf, 256, 4, 1, 600); // ImageWidth, LONG
        push_entry(&mut buf, 257, 4, 1, 400); // ImageLength, LONG
        push_entry(&mut buf, 322, 4, 1, 256); // TileWidth, LONG
        push_entry(&mut buf, 323, 4, 1, 256); // TileLength, LONG

        let tile_offsets_pos: u32 = 8 + 2 + 6 * 12 + 4;
        let tile_byte_counts_pos: u32 = tile_offsets_pos + 6 * 4;

        push_entry(&mut buf, 324, 4, 6, tile_offsets_pos); // TileOffsets, LONG, 6 tiles
        push_entry(&mut buf, 325, 4, 6, tile_byte_counts_pos); // TileByteCounts, LONG, 6 tiles

        buf.extend_from_slice(&0u32.to_le_bytes()); // next IFD

        let offsets: [u32; 6] = [1000, 1100, 1200, 1300, 1400, 1500];
        for v in offsets {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        let lengths: [u32; 6] = [50, 51, 52, 53, 54, 55];
        for v in lengths {
            buf.extend_from_slice(&v.to_le_bytes());
        }

        // Pad out so the highest tile offset/length falls within the buffer.
        buf.resize(1500 + 55, 0);
        buf
    }

    async fn image_from(data: Vec<u8>) -> (Image, ByteSource) {
        let reader = FixedReader(BytesBuf::from(data));
        let source = ByteSource::new(Box::new(reader), 4096).await.unwrap();
        source.set_endianness(Endianness::LittleEndian);
        let ifds = read_chain(&source, 8).await.unwrap();
        (Image::new(ifds.into_iter().next().unwrap()), source)
    }

    #[tokio::test]
    async fn tile_count_matches_ceil_division() {
        let (image, _source) = image_from(build_tiled_tiff()).await;
        assert_eq!(image.tile_count(), Some((3, 2)));
    }

    #[tokio::test]
    async fn tile_index_is_row_major_with_nx_stride() {
        let (mut image, source) = image_from(build_tiled_tiff()).await;
        // idx = y * nx + x = 1 * 3 + 2 = 5
        let (_media, bytes) = image.get_tile_raw(&source, 2, 1).await.unwrap();
        assert_eq!(bytes.len(), 55);
    }

    #[tokio::test]
    async fn tile_out_of_range_is_rejected_with_ge_not_gt() {
        let (mut image, source) = image_from(build_tiled_tiff()).await;
        assert!(image.get_tile_raw(&source, 2, 1).await.is_ok());
        let err = image.get_tile_raw(&source, 3, 0).await.unwrap_err();
        assert!(matches!(err, CogError::TileOutOfRange { x: 3, y: 0 }));
    }
}
