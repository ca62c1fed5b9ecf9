//! The integer-handle boundary, end to end through files on disk.

mod common;

use std::io::Write;

use anyhow::Result;
use spiece::{HandleTable, HostError, ModelSource, Status};

#[test]
fn test_load_from_path_and_bytes() -> Result<()> {
    common::init_tracing();
    let bytes = common::byte_fallback_model().to_bytes()?;
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(&bytes)?;

    let mut table = HandleTable::new();
    let from_path = table.load(ModelSource::Path(file.path()));
    let from_bytes = table.load(ModelSource::Bytes(&bytes));
    assert!(from_path >= 0 && from_bytes >= 0);
    assert_ne!(from_path, from_bytes);

    let a = table.encode(from_path, "the lazy dog").map_err(|c| anyhow::anyhow!("status {c}"))?;
    let b = table.encode(from_bytes, "the lazy dog").map_err(|c| anyhow::anyhow!("status {c}"))?;
    assert_eq!(a, b);
    assert_eq!(table.decode(from_path, &a), Ok("the lazy dog".to_string()));
    Ok(())
}

#[test]
fn test_rich_errors_carry_detail() -> Result<()> {
    let mut table = HandleTable::new();
    let mut corrupt = common::unk_model().to_bytes()?;
    corrupt.truncate(corrupt.len() - 3);

    let err = table.try_load(ModelSource::Bytes(&corrupt)).unwrap_err();
    assert_eq!(err.status(), Status::Corrupt);
    assert_eq!(err.status().legacy(), -1);
    assert!(err.to_string().contains("does not match artifact size"), "{err}");

    let err = table.try_encode(42, "x").unwrap_err();
    assert!(matches!(err, HostError::InvalidHandle(_)));
    assert_eq!(err.to_string(), "invalid model handle 42");
    Ok(())
}

#[test]
fn test_decode_failure_produces_no_output() -> Result<()> {
    let bytes = common::unk_model().to_bytes()?;
    let mut table = HandleTable::new();
    let h = table.load(ModelSource::Bytes(&bytes));
    let mut ids = table.encode(h, "hello").map_err(|c| anyhow::anyhow!("status {c}"))?;
    ids.push(i32::MAX);
    assert_eq!(table.decode(h, &ids), Err(Status::UnknownId.code()));
    Ok(())
}

#[test]
fn test_unsupported_version_status() -> Result<()> {
    let mut bytes = common::unk_model().to_bytes()?;
    bytes[4..6].copy_from_slice(&7u16.to_le_bytes());
    let mut table = HandleTable::new();
    assert_eq!(table.load(ModelSource::Bytes(&bytes)), Status::UnsupportedVersion.code());
    Ok(())
}
