//! Well-known-binary encoding for 2-D points, plus the GeoPackage
//! geometry blob framing that wraps it.
//!
//! Only point geometries are handled; that is the only shape the survey
//! pipeline produces or consumes.

use geo_types::Point;
use thiserror::Error;

/// WKB geometry type code for a 2-D point.
const WKB_POINT: u32 = 1;

/// EWKB flag bit indicating an embedded SRID.
const EWKB_SRID_FLAG: u32 = 0x2000_0000;

/// GeoPackage blob magic bytes: "GP".
const GPKG_MAGIC: [u8; 2] = [0x47, 0x50];

/// Errors raised while encoding or decoding geometry blobs.
#[derive(Error, Debug)]
pub enum WkbError {
    #[error("geometry blob truncated: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid WKB byte-order marker: {0:#04x}")]
    InvalidByteOrder(u8),

    #[error("unsupported WKB geometry type: {0:#010x} (only points are handled)")]
    UnsupportedGeometry(u32),

    #[error("not a GeoPackage geometry blob (bad magic bytes)")]
    BadMagic,
}

/// Result type for WKB operations.
pub type Result<T> = std::result::Result<T, WkbError>;

/// Encode a point as little-endian WKB.
pub fn encode_point(point: Point<f64>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(21);
    buf.push(0x01); // little-endian
    buf.extend_from_slice(&WKB_POINT.to_le_bytes());
    buf.extend_from_slice(&point.x().to_le_bytes());
    buf.extend_from_slice(&point.y().to_le_bytes());
    buf
}

/// Decode a WKB point, accepting either byte order and EWKB SRID framing.
pub fn decode_point(buf: &[u8]) -> Result<Point<f64>> {
    if buf.len() < 5 {
        return Err(WkbError::Truncated {
            expected: 5,
            actual: buf.len(),
        });
    }

    let little_endian = match buf[0] {
        0x00 => false,
        0x01 => true,
        other => return Err(WkbError::InvalidByteOrder(other)),
    };

    let raw_type = read_u32(&buf[1..5], little_endian);
    let mut offset = 5;

    // EWKB embeds the SRID after the type word; skip it.
    if raw_type & EWKB_SRID_FLAG != 0 {
        offset += 4;
    }
    let geom_type = raw_type & !EWKB_SRID_FLAG;
    if geom_type != WKB_POINT {
        return Err(WkbError::UnsupportedGeometry(raw_type));
    }

    if buf.len() < offset + 16 {
        return Err(WkbError::Truncated {
            expected: offset + 16,
            actual: buf.len(),
        });
    }

    let x = read_f64(&buf[offset..offset + 8], little_endian);
    let y = read_f64(&buf[offset + 8..offset + 16], little_endian);
    Ok(Point::new(x, y))
}

/// Wrap a point in a GeoPackage geometry blob (standard header, no envelope).
pub fn encode_gpkg_blob(point: Point<f64>, srs_id: i32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + 21);
    buf.extend_from_slice(&GPKG_MAGIC);
    buf.push(0x00); // version
    buf.push(0x01); // flags: little-endian header, no envelope
    buf.extend_from_slice(&srs_id.to_le_bytes());
    buf.extend_from_slice(&encode_point(point));
    buf
}

/// Unwrap a GeoPackage geometry blob, returning the point and its SRS id.
pub fn decode_gpkg_blob(buf: &[u8]) -> Result<(Point<f64>, i32)> {
    if buf.len() < 8 {
        return Err(WkbError::Truncated {
            expected: 8,
            actual: buf.len(),
        });
    }
    if buf[0..2] != GPKG_MAGIC {
        return Err(WkbError::BadMagic);
    }

    let flags = buf[3];
    let little_endian = flags & 0x01 != 0;
    let srs_id = read_i32(&buf[4..8], little_endian);

    // Envelope contents code (flag bits 1-3) determines header padding.
    let envelope_len = match (flags >> 1) & 0x07 {
        0 => 0,
        1 => 32,
        2 | 3 => 48,
        4 => 64,
        _ => 0,
    };

    let wkb_start = 8 + envelope_len;
    if buf.len() < wkb_start {
        return Err(WkbError::Truncated {
            expected: wkb_start,
            actual: buf.len(),
        });
    }

    let point = decode_point(&buf[wkb_start..])?;
    Ok((point, srs_id))
}

fn read_u32(bytes: &[u8], little_endian: bool) -> u32 {
    let arr: [u8; 4] = bytes.try_into().unwrap();
    if little_endian {
        u32::from_le_bytes(arr)
    } else {
        u32::from_be_bytes(arr)
    }
}

fn read_i32(bytes: &[u8], little_endian: bool) -> i32 {
    let arr: [u8; 4] = bytes.try_into().unwrap();
    if little_endian {
        i32::from_le_bytes(arr)
    } else {
        i32::from_be_bytes(arr)
    }
}

fn read_f64(bytes: &[u8], little_endian: bool) -> f64 {
    let arr: [u8; 8] = bytes.try_into().unwrap();
    if little_endian {
        f64::from_le_bytes(arr)
    } else {
        f64::from_be_bytes(arr)
    }
}
