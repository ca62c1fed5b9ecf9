//! Host-call boundary.
//!
//! Callers across a foreign-call boundary cannot hold a [`Model`] directly,
//! so loaded models live in a [`HandleTable`] and are addressed by integer
//! handles. Every operation comes in two flavours: a `try_*` form returning
//! [`HostError`], and a flat form returning plain integers where negative
//! values are [`Status`] codes.
//!
//! Handles are checked: using an unloaded or never-issued handle fails with
//! [`InvalidHandle`] and handles are never reused. `load`/`unload` take
//! `&mut self` and must be serialized by the caller; `encode`/`decode` take
//! `&self` and may run concurrently.

use std::path::Path;

use rustc_hash::FxHashMap;

use crate::codec::EncodeOptions;
use crate::error::{DecodeError, HostError, InvalidHandle, ModelLoadError};
use crate::model::{Model, PieceId};

/// Status codes returned across the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    Failure = -1,
    Corrupt = -2,
    MissingUnknown = -3,
    IoFailure = -4,
    UnsupportedVersion = -5,
    UnknownId = -6,
    InvalidHandle = -7,
}

impl Status {
    #[inline]
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Narrow to the two-valued legacy contract: `0` success, `-1` failure.
    pub fn legacy(self) -> i32 {
        match self {
            Status::Ok => 0,
            _ => -1,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Status::Ok,
            -1 => Status::Failure,
            -2 => Status::Corrupt,
            -3 => Status::MissingUnknown,
            -4 => Status::IoFailure,
            -5 => Status::UnsupportedVersion,
            -6 => Status::UnknownId,
            -7 => Status::InvalidHandle,
            _ => return None,
        })
    }
}

impl From<&HostError> for Status {
    fn from(err: &HostError) -> Self {
        match err {
            HostError::Load(ModelLoadError::Corrupt { .. }) => Status::Corrupt,
            HostError::Load(ModelLoadError::MissingUnknown) => Status::MissingUnknown,
            HostError::Load(ModelLoadError::UnsupportedVersion { .. }) => Status::UnsupportedVersion,
            HostError::Load(ModelLoadError::IoFailure { .. }) => Status::IoFailure,
            HostError::Decode(DecodeError::UnknownId { .. }) => Status::UnknownId,
            HostError::InvalidHandle(_) => Status::InvalidHandle,
            HostError::HandlesExhausted => Status::Failure,
        }
    }
}

impl HostError {
    pub fn status(&self) -> Status {
        Status::from(self)
    }
}

/// Where to load a model from.
#[derive(Debug, Clone, Copy)]
pub enum ModelSource<'a> {
    Path(&'a Path),
    Bytes(&'a [u8]),
}

/// Owner of every model loaded through the boundary.
#[derive(Debug, Default)]
pub struct HandleTable {
    models: FxHashMap<i32, Model>,
    next_handle: i32,
}

impl HandleTable {
    pub fn new() -> Self {
        HandleTable::default()
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Borrow the model behind `handle`.
    pub fn get(&self, handle: i32) -> Result<&Model, InvalidHandle> {
        self.models.get(&handle).ok_or(InvalidHandle(handle))
    }

    // -----------------------------------------------------------------------
    // Rich API
    // -----------------------------------------------------------------------

    pub fn try_load(&mut self, source: ModelSource<'_>) -> Result<i32, HostError> {
        if self.next_handle == i32::MAX {
            return Err(HostError::HandlesExhausted);
        }
        let model = match source {
            ModelSource::Path(path) => Model::from_file(path)?,
            ModelSource::Bytes(bytes) => Model::from_bytes(bytes)?,
        };
        // Ids cross the boundary as i32.
        if model.vocab_size() > i32::MAX as usize {
            return Err(ModelLoadError::corrupt(format!(
                "vocabulary of {} pieces does not fit 32-bit signed ids",
                model.vocab_size()
            ))
            .into());
        }

        let handle = self.next_handle;
        self.next_handle += 1;
        self.models.insert(handle, model);
        tracing::info!("Model handle {handle} loaded ({} live)", self.models.len());
        Ok(handle)
    }

    pub fn try_encode_with(
        &self,
        handle: i32,
        text: &str,
        options: &EncodeOptions,
    ) -> Result<Vec<i32>, HostError> {
        let model = self.get(handle)?;
        Ok(model
            .encode_as_ids(text, options)
            .into_iter()
            .map(|id| id as i32)
            .collect())
    }

    pub fn try_encode(&self, handle: i32, text: &str) -> Result<Vec<i32>, HostError> {
        self.try_encode_with(handle, text, &EncodeOptions::default())
    }

    pub fn try_decode(&self, handle: i32, ids: &[i32]) -> Result<String, HostError> {
        let model = self.get(handle)?;
        let ids = ids
            .iter()
            .map(|&id| {
                PieceId::try_from(id).map_err(|_| DecodeError::UnknownId {
                    id: id as i64,
                    vocab_size: model.vocab_size(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(model.decode_from_ids(&ids)?)
    }

    pub fn try_unload(&mut self, handle: i32) -> Result<(), HostError> {
        let model = self.models.remove(&handle).ok_or(InvalidHandle(handle))?;
        model.unload();
        tracing::debug!("Model handle {handle} unloaded ({} live)", self.models.len());
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Flat API
    // -----------------------------------------------------------------------

    /// Returns a non-negative handle or a negative [`Status`] code.
    pub fn load(&mut self, source: ModelSource<'_>) -> i32 {
        self.try_load(source).unwrap_or_else(|e| report(&e))
    }

    pub fn encode(&self, handle: i32, text: &str) -> Result<Vec<i32>, i32> {
        self.try_encode(handle, text).map_err(|e| report(&e))
    }

    pub fn decode(&self, handle: i32, ids: &[i32]) -> Result<String, i32> {
        self.try_decode(handle, ids).map_err(|e| report(&e))
    }

    /// Returns [`Status::Ok`] or [`Status::InvalidHandle`] as a code.
    pub fn unload(&mut self, handle: i32) -> i32 {
        match self.try_unload(handle) {
            Ok(()) => Status::Ok.code(),
            Err(e) => report(&e),
        }
    }
}

fn report(err: &HostError) -> i32 {
    tracing::debug!("Host call failed: {err}");
    err.status().code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelBuilder, ModelConfig};

    fn artifact() -> Vec<u8> {
        ModelBuilder::new(ModelConfig::verbatim())
            .unknown("<unk>")
            .normal("a", -1.0)
            .normal("b", -1.0)
            .to_artifact()
            .unwrap()
    }

    #[test]
    fn test_lifecycle() {
        let bytes = artifact();
        let mut table = HandleTable::new();
        let h = table.load(ModelSource::Bytes(&bytes));
        assert!(h >= 0);
        assert_eq!(table.encode(h, "abz"), Ok(vec![1, 2, 0]));
        assert_eq!(table.decode(h, &[1, 2]), Ok("ab".to_string()));
        assert_eq!(table.unload(h), 0);
        assert_eq!(table.encode(h, "a"), Err(Status::InvalidHandle.code()));
        assert_eq!(table.unload(h), Status::InvalidHandle.code());
        assert!(table.is_empty());
    }

    #[test]
    fn test_handles_are_not_reused() {
        let bytes = artifact();
        let mut table = HandleTable::new();
        let a = table.load(ModelSource::Bytes(&bytes));
        table.unload(a);
        let b = table.load(ModelSource::Bytes(&bytes));
        assert_ne!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_error_codes() {
        let mut table = HandleTable::new();
        assert_eq!(table.load(ModelSource::Bytes(b"SPCE")), Status::Corrupt.code());
        assert_eq!(
            table.load(ModelSource::Path(Path::new("/nonexistent/model.spce"))),
            Status::IoFailure.code()
        );

        let bytes = artifact();
        let h = table.load(ModelSource::Bytes(&bytes));
        assert_eq!(table.decode(h, &[3]), Err(Status::UnknownId.code()));
        assert_eq!(table.decode(h, &[-1]), Err(Status::UnknownId.code()));
        assert_eq!(table.decode(h + 1, &[0]), Err(Status::InvalidHandle.code()));
    }

    #[test]
    fn test_missing_unknown_status() {
        let bytes = ModelBuilder::new(ModelConfig::verbatim())
            .normal("a", -1.0)
            .to_artifact()
            .unwrap();
        let mut table = HandleTable::new();
        assert_eq!(table.load(ModelSource::Bytes(&bytes)), Status::MissingUnknown.code());
    }

    #[test]
    fn test_status_codes() {
        for code in -7..=0 {
            let status = Status::from_code(code).unwrap();
            assert_eq!(status.code(), code);
            assert_eq!(status.legacy(), if code == 0 { 0 } else { -1 });
        }
        assert_eq!(Status::from_code(1), None);
    }
}
