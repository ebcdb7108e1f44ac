//! Binary chunk delta files: one sparse edit list per chunk.
//!
//! Layout (little-endian):
//! `magic:u32, version:u16, count:i32, { index:i32, block:u8 } * count`

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::voxel::chunk::{CHUNK_VOLUME, LocalIndex, valid_index};
use crate::voxel::data::CellOp;

/// 'VCD1'
const MAGIC: u32 = 0x4443_5631;
const VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 4;
const ENTRY_LEN: usize = 4 + 1;

/// Distinguishes concurrent writers' temporary files
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Encode ops into the delta file format. Entries are written sorted by index.
pub fn encode_ops(ops: &[CellOp]) -> Vec<u8> {
    let mut sorted = ops.to_vec();
    sorted.sort_by_key(|op| op.index);

    let mut bytes = Vec::with_capacity(HEADER_LEN + sorted.len() * ENTRY_LEN);
    // Writing into a Vec cannot fail
    let _ = write_ops(&mut bytes, &sorted);
    bytes
}

/// Decode a delta file body, rejecting anything malformed.
pub fn decode_ops(bytes: &[u8]) -> io::Result<Vec<CellOp>> {
    read_ops(&mut io::Cursor::new(bytes))
}

fn write_ops(writer: &mut impl Write, ops: &[CellOp]) -> io::Result<()> {
    writer.write_all(&MAGIC.to_le_bytes())?;
    writer.write_all(&VERSION.to_le_bytes())?;
    writer.write_all(&(ops.len() as i32).to_le_bytes())?;
    for op in ops {
        writer.write_all(&(op.index as i32).to_le_bytes())?;
        writer.write_all(&[op.block])?;
    }
    Ok(())
}

fn read_ops(reader: &mut impl Read) -> io::Result<Vec<CellOp>> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if u32::from_le_bytes(magic) != MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Invalid magic bytes",
        ));
    }

    let mut version = [0u8; 2];
    reader.read_exact(&mut version)?;
    let version = u16::from_le_bytes(version);
    if version != VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Unsupported version: {}", version),
        ));
    }

    let mut count = [0u8; 4];
    reader.read_exact(&mut count)?;
    let count = i32::from_le_bytes(count);
    if count < 0 || count as usize > CHUNK_VOLUME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid entry count: {}", count),
        ));
    }

    let mut ops = Vec::with_capacity(count as usize);
    let mut entry = [0u8; ENTRY_LEN];
    for _ in 0..count {
        reader.read_exact(&mut entry)?;
        let index = i32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
        if !valid_index(index as i64) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Cell index out of range: {}", index),
            ));
        }
        ops.push(CellOp::new(index as LocalIndex, entry[4]));
    }

    Ok(ops)
}

/// Write ops to `path` through a temporary file, creating parent directories.
pub fn save_delta(path: &Path, ops: &[CellOp]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_path_for(path);
    let written = (|| {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&encode_ops(ops))?;
        writer.flush()
    })();
    if let Err(e) = written.and_then(|()| fs::rename(&temp_path, path)) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}

/// Unique sibling of `path` for one write
fn temp_path_for(path: &Path) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_extension(format!("{}.{}.tmp", std::process::id(), n))
}

/// Read ops from `path`. A missing file is `Ok(None)`.
pub fn load_delta(path: &Path) -> io::Result<Option<Vec<CellOp>>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    read_ops(&mut reader).map(Some)
}
