//! Episode container encoding
//!
//! Layout of an `.epz` file:
//!
//! ```text
//! "TREC" | version: u8 | header_len: u32 LE | header: JSON | payloads...
//! ```
//!
//! The header holds the scalar attributes and one [`ArrayDescriptor`] per
//! array. Descriptor offsets are relative to the first payload byte. Array
//! elements are stored in row-major order; `f64` values little-endian.

use super::codec::{codec_for, Codec, CompressionKind};
use crate::episode::MetadataValue;
use crate::error::{RecorderError, Result, ResultExt};
use ndarray::{ArrayD, ArrayViewD, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};

/// File magic
pub const MAGIC: &[u8; 4] = b"TREC";

/// Current format version
pub const FORMAT_VERSION: u8 = 1;

/// Refuse headers larger than this
const MAX_HEADER_LEN: u32 = 64 * 1024 * 1024;

/// Element type of a stored array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    U8,
    F64,
}

impl Dtype {
    /// Bytes per element
    pub fn size(&self) -> usize {
        match self {
            Dtype::U8 => 1,
            Dtype::F64 => 8,
        }
    }
}

/// Where and how one array is stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayDescriptor {
    pub name: String,
    pub dtype: Dtype,
    pub shape: Vec<usize>,
    pub codec: CompressionKind,
    pub offset: u64,
    pub length: u64,
}

impl ArrayDescriptor {
    /// Decoded payload size in bytes, or `Malformed` if the shape overflows
    pub fn raw_len(&self) -> Result<usize> {
        self.shape
            .iter()
            .try_fold(self.dtype.size(), |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| {
                RecorderError::Malformed(format!(
                    "array '{}' declares an impossible shape {:?}",
                    self.name, self.shape
                ))
            })
    }
}

/// Container header
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerHeader {
    #[serde(default)]
    pub attributes: BTreeMap<String, MetadataValue>,
    #[serde(default)]
    pub arrays: Vec<ArrayDescriptor>,
}

impl ContainerHeader {
    /// Look up an array descriptor by name
    pub fn array(&self, name: &str) -> Option<&ArrayDescriptor> {
        self.arrays.iter().find(|a| a.name == name)
    }
}

/// Borrowed array to be written
#[derive(Debug, Clone)]
pub enum ArrayRef<'a> {
    U8(ArrayViewD<'a, u8>),
    F64(ArrayViewD<'a, f64>),
}

impl ArrayRef<'_> {
    fn dtype(&self) -> Dtype {
        match self {
            ArrayRef::U8(_) => Dtype::U8,
            ArrayRef::F64(_) => Dtype::F64,
        }
    }

    fn shape(&self) -> Vec<usize> {
        match self {
            ArrayRef::U8(a) => a.shape().to_vec(),
            ArrayRef::F64(a) => a.shape().to_vec(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        match self {
            ArrayRef::U8(a) => a.iter().copied().collect(),
            ArrayRef::F64(a) => {
                let mut buf = Vec::with_capacity(a.len() * 8);
                for v in a.iter() {
                    buf.extend_from_slice(&v.to_le_bytes());
                }
                buf
            }
        }
    }
}

/// Owned array read back from a container
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    U8(ArrayD<u8>),
    F64(ArrayD<f64>),
}

impl ArrayData {
    fn from_bytes(desc: &ArrayDescriptor, bytes: Vec<u8>) -> Result<Self> {
        let shape = IxDyn(&desc.shape);
        match desc.dtype {
            Dtype::U8 => Ok(ArrayData::U8(ArrayD::from_shape_vec(shape, bytes)?)),
            Dtype::F64 => {
                let values: Vec<f64> = bytes
                    .chunks_exact(8)
                    .map(|c| {
                        let mut b = [0u8; 8];
                        b.copy_from_slice(c);
                        f64::from_le_bytes(b)
                    })
                    .collect();
                Ok(ArrayData::F64(ArrayD::from_shape_vec(shape, values)?))
            }
        }
    }
}

/// Write a complete container
pub fn write_container<W: Write>(
    mut writer: W,
    attributes: &BTreeMap<String, MetadataValue>,
    arrays: &[(&str, ArrayRef<'_>)],
    codec: &dyn Codec,
) -> Result<()> {
    let mut descriptors = Vec::with_capacity(arrays.len());
    let mut payloads = Vec::with_capacity(arrays.len());
    let mut offset = 0u64;

    for (name, array) in arrays {
        let encoded = codec
            .encode(&array.to_bytes())
            .with_context(|| format!("Failed to encode '{}'", name))?;
        descriptors.push(ArrayDescriptor {
            name: name.to_string(),
            dtype: array.dtype(),
            shape: array.shape(),
            codec: codec.kind(),
            offset,
            length: encoded.len() as u64,
        });
        offset += encoded.len() as u64;
        payloads.push(encoded);
    }

    let header = ContainerHeader {
        attributes: attributes.clone(),
        arrays: descriptors,
    };
    let header_bytes = serde_json::to_vec(&header)?;
    let header_len = u32::try_from(header_bytes.len())
        .map_err(|_| RecorderError::Serialization("container header too large".to_string()))?;

    writer.write_all(MAGIC)?;
    writer.write_all(&[FORMAT_VERSION])?;
    writer.write_all(&header_len.to_le_bytes())?;
    writer.write_all(&header_bytes)?;
    for payload in &payloads {
        writer.write_all(payload)?;
    }
    writer.flush()?;
    Ok(())
}

fn read_exact_or_malformed<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            RecorderError::Malformed(format!("truncated {}", what))
        }
        _ => RecorderError::Io(e),
    })
}

/// Read the preamble and header, leaving the reader at the first payload byte
pub fn read_header<R: Read>(reader: &mut R) -> Result<ContainerHeader> {
    let mut magic = [0u8; 4];
    read_exact_or_malformed(reader, &mut magic, "preamble")?;
    if &magic != MAGIC {
        return Err(RecorderError::Unsupported(format!(
            "bad magic {:?}",
            String::from_utf8_lossy(&magic)
        )));
    }

    let mut version = [0u8; 1];
    read_exact_or_malformed(reader, &mut version, "preamble")?;
    if version[0] != FORMAT_VERSION {
        return Err(RecorderError::Unsupported(format!(
            "format version {} (expected {})",
            version[0], FORMAT_VERSION
        )));
    }

    let mut len_bytes = [0u8; 4];
    read_exact_or_malformed(reader, &mut len_bytes, "preamble")?;
    let header_len = u32::from_le_bytes(len_bytes);
    if header_len > MAX_HEADER_LEN {
        return Err(RecorderError::Malformed(format!(
            "header length {} exceeds limit",
            header_len
        )));
    }

    let mut header_bytes = vec![0u8; header_len as usize];
    read_exact_or_malformed(reader, &mut header_bytes, "header")?;
    let header: ContainerHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| RecorderError::Malformed(format!("invalid header: {}", e)))?;

    for desc in &header.arrays {
        if desc.offset.checked_add(desc.length).is_none() {
            return Err(RecorderError::Malformed(format!(
                "array '{}' has an invalid extent",
                desc.name
            )));
        }
        let raw_len = desc.raw_len()?;
        if desc.codec == CompressionKind::None && raw_len as u64 != desc.length {
            return Err(RecorderError::Malformed(format!(
                "array '{}' stores {} bytes but its shape needs {}",
                desc.name, desc.length, raw_len
            )));
        }
    }
    Ok(header)
}

/// Read a complete container
pub fn read_container<R: Read>(
    mut reader: R,
) -> Result<(ContainerHeader, BTreeMap<String, ArrayData>)> {
    let header = read_header(&mut reader)?;

    let mut payload = Vec::new();
    reader.read_to_end(&mut payload)?;

    let mut arrays = BTreeMap::new();
    for desc in &header.arrays {
        let start = desc.offset as usize;
        let end = start + desc.length as usize;
        let encoded = payload.get(start..end).ok_or_else(|| {
            RecorderError::Malformed(format!(
                "array '{}' extends past end of file ({}..{} of {})",
                desc.name,
                start,
                end,
                payload.len()
            ))
        })?;

        let codec = codec_for(desc.codec, 0);
        let raw = codec
            .decode(encoded, desc.raw_len()?)
            .map_err(|e| RecorderError::Malformed(format!("array '{}': {}", desc.name, e)))?;
        let data = ArrayData::from_bytes(desc, raw)
            .map_err(|e| RecorderError::Malformed(format!("array '{}': {}", desc.name, e)))?;
        arrays.insert(desc.name.clone(), data);
    }

    Ok((header, arrays))
}
