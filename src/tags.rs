//! Static tag and type tables: tag code and type code lookups, plus the compression code to
//! media-type table.
//!
//! BigTIFF-only type codes (`LONG8`, `SLONG8`, `IFD8`) are dropped; everything else covers the
//! full classic-TIFF Appendix A tag space, so any tag resolves to a name rather than falling
//! back to raw hex.

macro_rules! tags {
    {
        $( #[$enum_attr:meta] )*
        $vis:vis enum $name:ident($ty:tt) $(unknown(#[$unknown_meta:meta] $unknown_doc:ident))* {
            $($(#[$ident_attr:meta])* $tag:ident = $val:expr,)*
        }
    } => {
        $( #[$enum_attr] )*
        #[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
        #[non_exhaustive]
        pub enum $name {
            $($(#[$ident_attr])* $tag,)*
            $(
                #[$unknown_meta]
                Unknown($ty),
            )*
        }

        impl $name {
            #[inline(always)]
            fn __from_inner_type(n: $ty) -> Result<Self, $ty> {
                match n {
                    $( $val => Ok($name::$tag), )*
                    n => Err(n),
                }
            }

            #[inline(always)]
            fn __to_inner_type(&self) -> $ty {
                match *self {
                    $( $name::$tag => $val, )*
                    $( $name::Unknown($unknown_doc) => { $unknown_doc }, )*
                }
            }
        }

        tags!($name, $ty, $($unknown_doc)*);
    };
    ($name:tt, u16, $($unknown_doc:ident)*) => {
        impl $name {
            #[inline(always)]
            pub fn from_u16(val: u16) -> Option<Self> {
                Self::__from_inner_type(val).ok()
            }

            $(
            #[inline(always)]
            pub fn from_u16_exhaustive($unknown_doc: u16) -> Self {
                Self::__from_inner_type($unknown_doc).unwrap_or_else(|_| $name::Unknown($unknown_doc))
            }
            )*

            #[inline(always)]
            pub fn to_u16(&self) -> u16 {
                Self::__to_inner_type(self)
            }
        }
    };
    ($name:tt, $ty:tt, $($unknown_doc:literal)*) => {};
}

tags! {
/// A TIFF tag code, by human name.
pub enum Tag(u16) unknown(
    /// A private, extension, or otherwise unrecognized tag
    unknown
) {
    NewSubfileType = 254,
    ImageWidth = 256,
    ImageLength = 257,
    BitsPerSample = 258,
    Compression = 259,
    PhotometricInterpretation = 262,
    Orientation = 274,
    SamplesPerPixel = 277,
    RowsPerStrip = 278,
    StripByteCounts = 279,
    StripOffsets = 273,
    PlanarConfiguration = 284,
    ResolutionUnit = 296,
    XResolution = 282,
    YResolution = 283,
    Software = 305,
    DateTime = 306,
    Artist = 315,
    Predictor = 317,
    ColorMap = 320,
    TileWidth = 322,
    TileLength = 323,
    TileOffsets = 324,
    TileByteCounts = 325,
    ExtraSamples = 338,
    SampleFormat = 339,
    JPEGTables = 347,
    Copyright = 33_432,
    ModelPixelScaleTag = 33550,
    ModelTiepointTag = 33922,
    ModelTransformationTag = 34264,
    GeoKeyDirectoryTag = 34735,
    GeoDoubleParamsTag = 34736,
    GeoAsciiParamsTag = 34737,
    GdalNodata = 42113,
}
}

tags! {
/// The type of an IFD entry (a 2 byte field).
///
/// BigTIFF's 64-bit variants (`LONG8`, `SLONG8`, `IFD8`) are not represented: this crate only
/// reads classic (32-bit offset) TIFF.
pub enum Type(u16) {
    /// 8-bit unsigned integer
    BYTE = 1,
    /// 8-bit byte that contains a 7-bit ASCII code; the last byte must be zero
    ASCII = 2,
    /// 16-bit unsigned integer
    SHORT = 3,
    /// 32-bit unsigned integer
    LONG = 4,
    /// Fraction stored as two 32-bit unsigned integers
    RATIONAL = 5,
    /// 8-bit signed integer
    SBYTE = 6,
    /// 8-bit byte that may contain anything, depending on the field
    UNDEFINED = 7,
    /// 16-bit signed integer
    SSHORT = 8,
    /// 32-bit signed integer
    SLONG = 9,
    /// Fraction stored as two 32-bit signed integers
    SRATIONAL = 10,
    /// 32-bit IEEE floating point
    FLOAT = 11,
    /// 64-bit IEEE floating point
    DOUBLE = 12,
    /// 32-bit unsigned integer (offset)
    IFD = 13,
}
}

impl Type {
    /// The number of bytes a single value of this type occupies (`type_size` in the data
    /// model).
    pub fn size(&self) -> u32 {
        match self {
            Type::BYTE | Type::SBYTE | Type::ASCII | Type::UNDEFINED => 1,
            Type::SHORT | Type::SSHORT => 2,
            Type::LONG | Type::SLONG | Type::FLOAT | Type::IFD => 4,
            Type::RATIONAL | Type::SRATIONAL | Type::DOUBLE => 8,
        }
    }
}

tags! {
/// See [TIFF compression tags](https://www.awaresystems.be/imaging/tiff/tifftags/compression.html).
pub enum CompressionMethod(u16) unknown(
    /// A custom or not-yet-cataloged compression method
    unknown
) {
    None = 1,
    Huffman = 2,
    Fax3 = 3,
    Fax4 = 4,
    LZW = 5,
    JPEG = 6,
    ModernJPEG = 7,
    Deflate = 8,
    OldDeflate = 0x80B2,
    PackBits = 0x8005,
    ZSTD = 0xC350,
}
}

tags! {
pub enum PhotometricInterpretation(u16) {
    WhiteIsZero = 0,
    BlackIsZero = 1,
    RGB = 2,
    RGBPalette = 3,
    TransparencyMask = 4,
    CMYK = 5,
    YCbCr = 6,
    CIELab = 8,
}
}

tags! {
pub enum PlanarConfiguration(u16) {
    Chunky = 1,
    Planar = 2,
}
}

tags! {
pub enum ResolutionUnit(u16) {
    None = 1,
    Inch = 2,
    Centimeter = 3,
}
}

tags! {
pub enum SampleFormat(u16) unknown(
    /// An unknown extension sample format
    unknown
) {
    Uint = 1,
    Int = 2,
    IEEEFP = 3,
    Void = 4,
}
}

/// The compression code → media-type table from the external interface.
///
/// Unknown codes return `None`, not a panic or a sentinel: the fixed table is deliberately
/// partial, and new compression codes are expected to show up in the wild.
pub fn compression_media_type(code: u16) -> Option<&'static str> {
    match code {
        1 => Some("none"),
        5 => Some("image/x-lzw"),
        6 => Some("image/jpeg"),
        7 => Some("image/jpeg"),
        8 => Some("image/deflate"),
        34712 => Some("image/jp2"),
        50001 => Some("image/webp"),
        _ => None,
    }
}
