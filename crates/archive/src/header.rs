//! Tar header block construction.
//!
//! GNU-flavored ustar: 512-byte header blocks, octal numeric fields, and
//! the `L` long-name convention for paths that do not fit the 100-byte
//! name field (one signaling block followed by the path rounded up to
//! whole blocks).

use std::io::{self, Write};

const BLOCK: usize = 512;
const NAME_FIELD: usize = 100;
const LONG_NAME_MARKER: &str = "././@LongLink";

const TYPE_FILE: u8 = b'0';
const TYPE_DIR: u8 = b'5';
const TYPE_LONG_NAME: u8 = b'L';

const MODE_FILE: u64 = 0o644;
const MODE_DIR: u64 = 0o755;

/// Largest value the 12-byte octal size field can carry.
const MAX_ENTRY_SIZE: u64 = 0o77_777_777_777;

/// Number of 512-byte header blocks an entry with this archive-path length
/// occupies, including long-name blocks.
pub(crate) fn header_blocks_for(path_len: usize) -> u64 {
    if path_len >= NAME_FIELD {
        1 + 1 + (path_len as u64).div_ceil(BLOCK as u64)
    } else {
        1
    }
}

/// Writes the header block(s) for a regular file entry. Returns the number
/// of bytes written.
pub(crate) fn write_file_header<W: Write>(
    w: &mut W,
    name: &str,
    size: u64,
    mtime: i64,
) -> io::Result<u64> {
    write_header(w, name, size, mtime, TYPE_FILE, MODE_FILE)
}

/// Writes the header block(s) for a directory entry (name must carry the
/// trailing slash). Returns the number of bytes written.
pub(crate) fn write_dir_header<W: Write>(w: &mut W, name: &str, mtime: i64) -> io::Result<u64> {
    write_header(w, name, 0, mtime, TYPE_DIR, MODE_DIR)
}

/// Writes zero padding after `content_len` bytes of entry content, up to
/// the next block boundary. Returns the number of bytes written.
pub(crate) fn write_content_padding<W: Write>(w: &mut W, content_len: u64) -> io::Result<u64> {
    let remainder = content_len % BLOCK as u64;
    if remainder == 0 {
        return Ok(0);
    }
    let pad = BLOCK as u64 - remainder;
    w.write_all(&vec![0u8; pad as usize])?;
    Ok(pad)
}

fn write_header<W: Write>(
    w: &mut W,
    name: &str,
    size: u64,
    mtime: i64,
    typeflag: u8,
    mode: u64,
) -> io::Result<u64> {
    if size > MAX_ENTRY_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("entry {name:?} is too large for the ustar size field"),
        ));
    }

    let name_bytes = name.as_bytes();
    let mut written = 0u64;

    if name_bytes.len() >= NAME_FIELD {
        written += write_long_name(w, name_bytes, mtime)?;
    }

    let mut block = [0u8; BLOCK];
    let short_len = name_bytes.len().min(NAME_FIELD);
    block[..short_len].copy_from_slice(&name_bytes[..short_len]);

    fill_common_fields(&mut block, mode, size, mtime, typeflag);
    w.write_all(&block)?;
    Ok(written + BLOCK as u64)
}

/// Emits the GNU `L` signaling block plus the full path rounded up to
/// whole blocks.
fn write_long_name<W: Write>(w: &mut W, name: &[u8], mtime: i64) -> io::Result<u64> {
    let mut block = [0u8; BLOCK];
    block[..LONG_NAME_MARKER.len()].copy_from_slice(LONG_NAME_MARKER.as_bytes());
    fill_common_fields(&mut block, MODE_FILE, name.len() as u64, mtime, TYPE_LONG_NAME);
    w.write_all(&block)?;

    let name_blocks = name.len().div_ceil(BLOCK);
    let mut padded = vec![0u8; name_blocks * BLOCK];
    padded[..name.len()].copy_from_slice(name);
    w.write_all(&padded)?;

    Ok((BLOCK + padded.len()) as u64)
}

fn fill_common_fields(block: &mut [u8; BLOCK], mode: u64, size: u64, mtime: i64, typeflag: u8) {
    write_octal(&mut block[100..108], mode);
    write_octal(&mut block[108..116], 0); // uid
    write_octal(&mut block[116..124], 0); // gid
    write_octal(&mut block[124..136], size);
    write_octal(&mut block[136..148], mtime.max(0) as u64);
    block[156] = typeflag;
    // GNU magic + version.
    block[257..265].copy_from_slice(b"ustar  \0");

    // Checksum is computed with its own field as spaces, then stored as
    // six octal digits, NUL, space.
    block[148..156].fill(b' ');
    let sum: u32 = block.iter().map(|&b| u32::from(b)).sum();
    let digits = format!("{sum:06o}");
    block[148..154].copy_from_slice(digits.as_bytes());
    block[154] = 0;
    block[155] = b' ';
}

/// NUL-terminated zero-padded octal, the width of the field.
fn write_octal(field: &mut [u8], value: u64) {
    let width = field.len() - 1;
    let digits = format!("{value:0width$o}");
    field[..width].copy_from_slice(digits.as_bytes());
    field[width] = 0;
}
