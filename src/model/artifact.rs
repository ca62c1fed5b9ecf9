//! Binary model artifact.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! ┌──────────────────────────── header (20 bytes) ────────────────────────────┐
//! │ magic "SPCE" │ version u16 │ flags u16 │ record_count u32 │ config_len u32 │ records_len u32 │
//! └───────────────────────────────────────────────────────────────────────────┘
//! config   config_len bytes   UTF-8 TOML (ModelConfig)
//! records  record_count × { len u16 │ surface [len] │ score f32 │ type u8 }
//! ```
//!
//! The declared section lengths must add up to the artifact size exactly, and
//! the records must consume their section exactly.

use crate::error::{ArtifactWriteError, ModelLoadError};
use crate::model::config::ModelConfig;
use crate::model::vocab::{PieceId, PieceType, RawPiece};

pub const MAGIC: [u8; 4] = *b"SPCE";
pub const FORMAT_VERSION: u16 = 1;
pub const HEADER_LEN: usize = 20;

/// Smallest possible record: empty surface + score + type.
const MIN_RECORD_LEN: usize = 2 + 4 + 1;

/// Decoded artifact contents, not yet validated as a vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub version: u16,
    pub config: ModelConfig,
    pub pieces: Vec<RawPiece>,
}

/// Whether `data` starts with the artifact magic.
pub fn is_artifact(data: &[u8]) -> bool {
    data.starts_with(&MAGIC)
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], ModelLoadError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                ModelLoadError::corrupt(format!(
                    "truncated while reading {what} at offset {} (need {n} bytes, {} left)",
                    self.pos,
                    self.data.len() - self.pos
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N], ModelLoadError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn u8(&mut self, what: &str) -> Result<u8, ModelLoadError> {
        Ok(self.array::<1>(what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16, ModelLoadError> {
        Ok(u16::from_le_bytes(self.array(what)?))
    }

    fn u32(&mut self, what: &str) -> Result<u32, ModelLoadError> {
        Ok(u32::from_le_bytes(self.array(what)?))
    }

    fn f32(&mut self, what: &str) -> Result<f32, ModelLoadError> {
        Ok(f32::from_le_bytes(self.array(what)?))
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

/// Parse an artifact. No vocabulary validation happens here beyond the
/// framing; see [`Vocabulary::from_raw`](crate::model::Vocabulary::from_raw).
pub fn parse(data: &[u8]) -> Result<Artifact, ModelLoadError> {
    if data.len() < HEADER_LEN {
        return Err(ModelLoadError::corrupt(format!(
            "artifact is {} bytes, shorter than the {HEADER_LEN}-byte header",
            data.len()
        )));
    }

    let mut header = Reader::new(&data[..HEADER_LEN]);
    let magic: [u8; 4] = header.array("magic")?;
    if magic != MAGIC {
        return Err(ModelLoadError::corrupt(format!(
            "bad magic {magic:02X?}, expected {MAGIC:02X?}"
        )));
    }
    let version = header.u16("version")?;
    if version == 0 {
        return Err(ModelLoadError::corrupt("version 0 is not a valid format version"));
    }
    if version > FORMAT_VERSION {
        return Err(ModelLoadError::UnsupportedVersion {
            found: version,
            supported: FORMAT_VERSION,
        });
    }
    let flags = header.u16("flags")?;
    if flags != 0 {
        return Err(ModelLoadError::corrupt(format!("unknown header flags {flags:#06x}")));
    }
    let record_count = header.u32("record_count")? as usize;
    let config_len = header.u32("config_len")? as usize;
    let records_len = header.u32("records_len")? as usize;

    let declared = HEADER_LEN as u64 + config_len as u64 + records_len as u64;
    if declared != data.len() as u64 {
        return Err(ModelLoadError::corrupt(format!(
            "declared size {declared} does not match artifact size {}",
            data.len()
        )));
    }
    if record_count.saturating_mul(MIN_RECORD_LEN) > records_len {
        return Err(ModelLoadError::corrupt(format!(
            "{record_count} records cannot fit in a {records_len}-byte record section"
        )));
    }

    let config_bytes = &data[HEADER_LEN..HEADER_LEN + config_len];
    let config_text = std::str::from_utf8(config_bytes)
        .map_err(|e| ModelLoadError::corrupt(format!("config section is not UTF-8: {e}")))?;
    let config = ModelConfig::from_toml_str(config_text)?;

    let mut records = Reader::new(&data[HEADER_LEN + config_len..]);
    let mut pieces = Vec::with_capacity(record_count);
    for id in 0..record_count {
        let len = records.u16("piece length")? as usize;
        let surface = records.take(len, "piece surface")?;
        let surface = std::str::from_utf8(surface).map_err(|e| {
            ModelLoadError::corrupt(format!("piece {id} is not valid UTF-8: {e}"))
        })?;
        let score = records.f32("piece score")?;
        let tag = records.u8("piece type")?;
        let kind = PieceType::from_tag(tag).ok_or_else(|| {
            ModelLoadError::corrupt(format!("piece {id} has unknown type tag {tag}"))
        })?;
        pieces.push(RawPiece::new(surface, score, kind));
    }
    if records.remaining() != 0 {
        return Err(ModelLoadError::corrupt(format!(
            "{} trailing bytes after {record_count} records",
            records.remaining()
        )));
    }

    Ok(Artifact {
        version,
        config,
        pieces,
    })
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

fn section_len(len: usize) -> Result<u32, ArtifactWriteError> {
    u32::try_from(len).map_err(|_| ArtifactWriteError::SectionTooLarge { len })
}

/// Serialize a config and piece table into the current format version.
pub fn write<'a, I>(config: &ModelConfig, pieces: I) -> Result<Vec<u8>, ArtifactWriteError>
where
    I: IntoIterator<Item = &'a RawPiece>,
{
    let config_text = config.to_toml_string()?;

    let mut records = Vec::new();
    let mut record_count = 0usize;
    for (id, piece) in pieces.into_iter().enumerate() {
        let surface = piece.surface.as_bytes();
        let len = u16::try_from(surface.len()).map_err(|_| ArtifactWriteError::PieceTooLong {
            id: id as PieceId,
            len: surface.len(),
        })?;
        records.extend_from_slice(&len.to_le_bytes());
        records.extend_from_slice(surface);
        records.extend_from_slice(&piece.score.to_le_bytes());
        records.push(piece.kind.tag());
        record_count += 1;
    }

    let mut out = Vec::with_capacity(HEADER_LEN + config_text.len() + records.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&section_len(record_count)?.to_le_bytes());
    out.extend_from_slice(&section_len(config_text.len())?.to_le_bytes());
    out.extend_from_slice(&section_len(records.len())?.to_le_bytes());
    out.extend_from_slice(config_text.as_bytes());
    out.extend_from_slice(&records);
    Ok(out)
}
