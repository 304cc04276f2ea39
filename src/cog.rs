//! The facade: construct, `init`, then serve image metadata and tiles.

use bytes::Bytes;

use crate::error::{CogError, CogResult};
use crate::geo::GeoKeyDirectory;
use crate::ifd::read_chain;
use crate::image::Image;
use crate::reader::AsyncFileReader;
use crate::source::{ByteSource, Endianness, DEFAULT_CHUNK_SIZE};

/// A Cloud-Optimized GeoTIFF reader.
///
/// Construct with [`Cog::new`] (or [`Cog::with_chunk_size`]), then call [`Cog::init`] once before
/// any other method. Methods other than `init` panic if called first — this is a programmer
/// error, not a data error, so it is not represented in [`CogError`].
pub struct Cog {
    chunk_size: u64,
    reader: Option<Box<dyn AsyncFileReader>>,
    source: Option<ByteSource>,
    images: Vec<Image>,
}

impl Cog {
    /// Construct a reader over `reader`, using the default chunk size.
    pub fn new(reader: Box<dyn AsyncFileReader>) -> Self {
        Self::with_chunk_size(reader, DEFAULT_CHUNK_SIZE)
    }

    /// Construct a reader over `reader` with an explicit chunk size (must be at least 8 bytes).
    pub fn with_chunk_size(reader: Box<dyn AsyncFileReader>, chunk_size: u64) -> Self {
        Self {
            chunk_size,
            reader: Some(reader),
            source: None,
            images: Vec::new(),
        }
    }

    /// Validate the header, detect byte order and version, and walk the IFD chain.
    ///
    /// Must be called exactly once before any other method. Fetches chunk 0 (and whichever
    /// further chunks the IFD chain's tag values require).
    pub async fn init(&mut self) -> CogResult<()> {
        let reader = self
            .reader
            .take()
            .expect("Cog::init called more than once");
        let source = ByteSource::new(reader, self.chunk_size).await?;

        let magic = source.bytes(0, 2).await?;
        let endianness = match magic.as_ref() {
            b"II" => Endianness::LittleEndian,
            b"MM" => return Err(CogError::UnsupportedByteOrder),
            other => return Err(CogError::BadMagic([other[0], other[1]])),
        };
        source.set_endianness(endianness);

        let version = source.u16(2).await?;
        if version != 42 {
            return Err(CogError::UnsupportedVersion(version));
        }
        source.set_version(version);

        let first_ifd_offset = source.u32(4).await? as u64;
        let images = read_chain(&source, first_ifd_offset)
            .await?
            .into_iter()
            .map(Image::new)
            .collect();

        self.source = Some(source);
        self.images = images;
        Ok(())
    }

    /// The chunked byte source backing this reader, for introspection
    /// (`name`/`version`/`chunk_size`/`chunks`).
    pub fn source(&self) -> &ByteSource {
        self.source.as_ref().expect("Cog::source called before init()")
    }

    /// Every image (IFD) in the chain, base image first.
    pub fn images(&self) -> &[Image] {
        &self.images
    }

    /// The image at overview index `z` (0 = base image).
    pub fn get_image(&self, z: usize) -> CogResult<&Image> {
        self.images.get(z).ok_or(CogError::NoSuchOverview(z))
    }

    /// Mutable access to the image at overview index `z`, for callers that want to resolve
    /// georeferencing tags ahead of time via [`Image::origin`]/[`Image::resolution`].
    pub fn get_image_mut(&mut self, z: usize) -> CogResult<&mut Image> {
        if z >= self.images.len() {
            return Err(CogError::NoSuchOverview(z));
        }
        Ok(&mut self.images[z])
    }

    /// Fetch tile `(x, y)` of overview `z`'s raw, still-compressed bytes.
    pub async fn get_tile_raw(
        &mut self,
        x: u32,
        y: u32,
        z: usize,
    ) -> CogResult<(Option<&'static str>, Bytes)> {
        if z >= self.images.len() {
            return Err(CogError::NoSuchOverview(z));
        }
        let source = self.source.as_ref().expect("Cog::get_tile_raw called before init()");
        self.images[z].get_tile_raw(source, x, y).await
    }

    /// The model-space origin of overview `z`, resolving `ModelTiepoint` if still deferred.
    pub async fn origin(&mut self, z: usize) -> CogResult<(f64, f64, f64)> {
        if z >= self.images.len() {
            return Err(CogError::NoSuchOverview(z));
        }
        let source = self.source.as_ref().expect("Cog::origin called before init()");
        self.images[z].origin(source).await
    }

    /// The pixel resolution of overview `z`, resolving `ModelPixelScale` if still deferred.
    pub async fn resolution(&mut self, z: usize) -> CogResult<(f64, f64, f64)> {
        if z >= self.images.len() {
            return Err(CogError::NoSuchOverview(z));
        }
        let source = self.source.as_ref().expect("Cog::resolution called before init()");
        self.images[z].resolution(source).await
    }

    /// The model-space bounding box of overview `z`.
    pub async fn bbox(&mut self, z: usize) -> CogResult<[f64; 4]> {
        if z >= self.images.len() {
            return Err(CogError::NoSuchOverview(z));
        }
        let source = self.source.as_ref().expect("Cog::bbox called before init()");
        self.images[z].bbox(source).await
    }

    /// The parsed `GeoKeyDirectoryTag` of overview `z`, or `None` if it carries none.
    pub async fn geo_keys(&mut self, z: usize) -> CogResult<Option<GeoKeyDirectory>> {
        if z >= self.images.len() {
            return Err(CogError::NoSuchOverview(z));
        }
        let source = self.source.as_ref().expect("Cog::geo_keys called before init()");
        self.images[z].geo_keys(source).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[tokio::test]
    async fn minimal_header_has_no_images() {
        let bytes = [0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut cog = Cog::new(Box::new(FixedReader(Bytes::copy_from_slice(&bytes))));
        cog.init().await.unwrap();
        assert!(cog.images().is_empty());
        assert_eq!(cog.source().version(), Some(42));
    }

    #[tokio::test]
    async fn big_endian_is_rejected() {
        let bytes = [0x4D, 0x4D, 0x00, 0x2A, 0x00, 0x00, 0x00, 0x08];
        let mut cog = Cog::new(Box::new(FixedReader(Bytes::copy_from_slice(&bytes))));
        let err = cog.init().await.unwrap_err();
        assert!(matches!(err, CogError::UnsupportedByteOrder));
    }

    /// A well-formed but unsupported (BigTIFF) version is rejected.
    #[tokio::test]
    async fn unsupported_version_is_rejected() {
        let bytes = [0x49, 0x49, 0x2B, 0x00, 0x08, 0x00, 0x00, 0x00];
        let mut cog = Cog::new(Box::new(FixedReader(Bytes::copy_from_slice(&bytes))));
        let err = cog.init().await.unwrap_err();
        assert!(matches!(err, CogError::UnsupportedVersion(43)));
    }

    fn push_entry(buf: &mut Vec<u8>, code: u16, ty: u16, count: u32, value_or_offset: u32) {
        buf.extend_from_slice(&code.to_le_bytes());
        buf.extend_from_slice(&ty.to_le_bytes());
        buf.extend_from_slice(&count.to_le_bytes());
        buf.extend_from_slice(&value_or_offset.to_le_bytes());
    }

    /// A single inline ImageWidth tag resolves without any further fetch.
    #[tokio::test]
    async fn single_inline_width_tag() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"II");
        buf.extend_from_slice(&42u16.to_le_bytes());
        buf.extend_from_slice(&8u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        push_entry(&mut buf, 256, 3, 1, 256); // ImageWidth SHORT = 256
        buf.extend_from_slice(&0u32.to_le_bytes());

        let mut cog = Cog::new(Box::new(FixedReader(Bytes::from(buf))));
        cog.init().await.unwrap();
        let image = cog.get_image(0).unwrap();
        let width = image
            .ifd()
            .tag(crate::tags::Tag::ImageWidth)
            .and_then(crate::value::TagValue::resolved)
            .and_then(crate::value::Value::as_u32);
        assert_eq!(width, Some(256));
    }

    #[tokio::test]
    async fn overview_index_out_of_range_is_rejected() {
        let bytes = [0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut cog = Cog::new(Box::new(FixedReader(Bytes::copy_from_slice(&bytes))));
        cog.init().await.unwrap();
        let err = cog.get_image(0).unwrap_err();
        assert!(matches!(err, CogError::NoSuchOverview(0)));
    }
}
