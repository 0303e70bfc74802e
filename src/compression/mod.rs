// src/compression/mod.rs

//! Stream decompression for reading package archives and bundles
//!
//! Archive creation shells out to the host tar (it owns the
//! reproducibility flags); reading back is done in-process so integrity
//! checks do not depend on a second tool invocation. Format detection
//! works from the file extension with a magic-byte fallback.

use crate::error::{Error, Result};
use std::io::Read;

/// Supported stream compression formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    /// No compression (raw tar)
    None,
    /// Gzip (.gz)
    Gzip,
    /// XZ/LZMA (.xz)
    Xz,
    /// Zstandard (.zst)
    Zstd,
}

impl CompressionFormat {
    /// Detect format from the end of a file name
    pub fn from_extension(path: &str) -> Self {
        if path.ends_with(".gz") || path.ends_with(".tgz") {
            Self::Gzip
        } else if path.ends_with(".xz") {
            Self::Xz
        } else if path.ends_with(".zst") || path.ends_with(".zstd") {
            Self::Zstd
        } else {
            Self::None
        }
    }

    /// Detect format from magic bytes.
    ///
    /// - Gzip: `1f 8b`
    /// - XZ: `fd 37 7a 58 5a 00`
    /// - Zstd: `28 b5 2f fd`
    pub fn from_magic_bytes(data: &[u8]) -> Self {
        if data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b {
            Self::Gzip
        } else if data.len() >= 6 && data[..6] == [0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00] {
            Self::Xz
        } else if data.len() >= 4 && data[..4] == [0x28, 0xb5, 0x2f, 0xfd] {
            Self::Zstd
        } else {
            Self::None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Xz => "xz",
            Self::Zstd => "zstd",
        }
    }
}

impl std::fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Wrap a reader in the matching streaming decoder
pub fn create_decoder<'a, R: Read + 'a>(
    reader: R,
    format: CompressionFormat,
) -> Result<Box<dyn Read + 'a>> {
    match format {
        CompressionFormat::None => Ok(Box::new(reader)),
        CompressionFormat::Gzip => Ok(Box::new(flate2::read::GzDecoder::new(reader))),
        CompressionFormat::Xz => Ok(Box::new(xz2::read::XzDecoder::new(reader))),
        CompressionFormat::Zstd => {
            let decoder = zstd::Decoder::new(reader).map_err(Error::Io)?;
            Ok(Box::new(decoder))
        }
    }
}

/// Decompress a byte slice using the given format
pub fn decompress(data: &[u8], format: CompressionFormat) -> Result<Vec<u8>> {
    let mut decoder = create_decoder(data, format)?;
    let mut output = Vec::new();
    decoder.read_to_end(&mut output)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(CompressionFormat::from_extension("pkg.tar.gz"), CompressionFormat::Gzip);
        assert_eq!(CompressionFormat::from_extension("pkg.tgz"), CompressionFormat::Gzip);
        assert_eq!(CompressionFormat::from_extension("pkg.tar.xz"), CompressionFormat::Xz);
        assert_eq!(CompressionFormat::from_extension("pkg.tar.zst"), CompressionFormat::Zstd);
        assert_eq!(CompressionFormat::from_extension("pkg.tar"), CompressionFormat::None);
    }

    #[test]
    fn test_format_from_magic_bytes() {
        assert_eq!(
            CompressionFormat::from_magic_bytes(&[0x1f, 0x8b, 0x08, 0x00]),
            CompressionFormat::Gzip
        );
        assert_eq!(
            CompressionFormat::from_magic_bytes(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]),
            CompressionFormat::Xz
        );
        assert_eq!(
            CompressionFormat::from_magic_bytes(&[0x28, 0xb5, 0x2f, 0xfd]),
            CompressionFormat::Zstd
        );
        assert_eq!(
            CompressionFormat::from_magic_bytes(&[0x00, 0x00]),
            CompressionFormat::None
        );
    }

    #[test]
    fn test_decompress_none_is_identity() {
        let data = b"raw bytes";
        assert_eq!(decompress(data, CompressionFormat::None).unwrap(), data);
    }

    #[test]
    fn test_decompress_gzip() {
        // minimal gzip of "hello"
        let gzip_data: &[u8] = &[
            0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0xcb, 0x48, 0xcd, 0xc9,
            0xc9, 0x07, 0x00, 0x86, 0xa6, 0x10, 0x36, 0x05, 0x00, 0x00, 0x00,
        ];
        assert_eq!(decompress(gzip_data, CompressionFormat::Gzip).unwrap(), b"hello");
    }
}
