#![doc = include_str!("../README.md")]

pub mod cog;
pub mod error;
pub mod geo;
pub mod ifd;
pub mod image;
pub mod reader;
pub mod source;
pub mod tags;
pub mod value;

pub use cog::Cog;
pub use error::{CogError, CogResult};
pub use ifd::ImageFileDirectory;
pub use image::Image;
pub use reader::AsyncFileReader;
#[cfg(feature = "object_store")]
pub use reader::ObjectReader;
pub use source::{ByteSource, Chunk, ChunkState, Endianness};
