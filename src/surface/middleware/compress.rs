//! Response compression
//!
//! Payloads at or above the threshold compress with the best encoding the
//! client accepts (brotli preferred, then gzip). Clients that indicate
//! nothing get uncompressed bytes.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Result, WeaverError};
use crate::surface::types::WirePayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Gzip,
    Brotli,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Brotli => "br",
        }
    }

    fn from_accept(token: &str) -> Option<Self> {
        match token.trim() {
            "br" | "brotli" => Some(Self::Brotli),
            "gzip" => Some(Self::Gzip),
            _ => None,
        }
    }
}

/// Pick the encoding to use, if any.
pub fn negotiate(accepted: &[String], body_len: usize, threshold: usize) -> Option<Encoding> {
    if body_len < threshold {
        return None;
    }
    let offered: Vec<Encoding> = accepted
        .iter()
        .filter_map(|t| Encoding::from_accept(t))
        .collect();
    if offered.contains(&Encoding::Brotli) {
        Some(Encoding::Brotli)
    } else if offered.contains(&Encoding::Gzip) {
        Some(Encoding::Gzip)
    } else {
        None
    }
}

/// Apply the negotiated encoding to a serialized payload.
pub fn apply(body: Vec<u8>, accepted: &[String], threshold: usize) -> Result<WirePayload> {
    match negotiate(accepted, body.len(), threshold) {
        None => Ok(WirePayload {
            body,
            encoding: None,
        }),
        Some(encoding) => {
            let compressed = compress(&body, encoding)?;
            Ok(WirePayload {
                body: compressed,
                encoding: Some(encoding.as_str().to_string()),
            })
        }
    }
}

pub fn compress(body: &[u8], encoding: Encoding) -> Result<Vec<u8>> {
    match encoding {
        Encoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(body)?;
            encoder
                .finish()
                .map_err(|e| WeaverError::internal(format!("gzip: {}", e)))
        }
        Encoding::Brotli => {
            let mut out = Vec::new();
            let mut writer = brotli::CompressorWriter::new(&mut out, 4096, 5, 22);
            writer.write_all(body)?;
            drop(writer);
            Ok(out)
        }
    }
}

#[cfg(test)]
pub fn decompress(body: &[u8], encoding: Encoding) -> Result<Vec<u8>> {
    use std::io::Read;
    match encoding {
        Encoding::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(body);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(out)
        }
        Encoding::Brotli => {
            let mut out = Vec::new();
            let mut reader = brotli::Decompressor::new(body, 4096);
            reader.read_to_end(&mut out)?;
            Ok(out)
        }
    }
}
