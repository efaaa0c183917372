//! # CBIR Index
//!
//! Backend-agnostic corpus store for the retrieval engine: images with their
//! hashes and descriptor sets, and named categories grouping them.
//!
//! ## Core Features
//!
//! - **Pluggable Backends**: every record goes through the [`IndexBackend`]
//!   trait. An ordered in-memory map is always available; a `redb` database is
//!   available behind the `backend-redb` feature (on by default).
//! - **Compact Storage**: records are encoded with `bincode` (serde mode) and
//!   compressed with Zstd unless [`CompressionCodec::None`] is configured.
//! - **Non-unique hash lookup**: perceptual and color-moment hashes are
//!   indexed, but [`ImageIndex::find_by_hash`] returns every image carrying a
//!   hash. Two distinct images with equal hashes coexist.
//!
//! ## Key Layout
//!
//! | Key | Value |
//! |-----|-------|
//! | `img/{id}` | [`ImageRecord`] |
//! | `cat/{name}` | [`CategoryRecord`] |
//! | `desc/{id}/{detector code}` | [`descriptor::DescriptorRecord`] |
//! | `hash/{p\|c}/{hex}/{id}` | empty |
//! | `file/{external file}` | image id |
//!
//! Descriptors and hashes are written once per image and never mutated in
//! place; re-ingesting the same external file replaces them wholesale.
//!
//! ## Example Usage
//!
//! ```
//! use descriptor::{DescriptorSet, DetectorType, HashKind, HashPair, MatrixDescriptor};
//! use index::{BackendConfig, ImageIndex, IndexConfig, NewImage};
//!
//! let index = ImageIndex::new(IndexConfig::new().with_backend(BackendConfig::in_memory())).unwrap();
//!
//! let orb = MatrixDescriptor::new(1, 4, 1, vec![1u8, 2, 3, 4]).unwrap();
//! let id = index
//!     .insert_image(NewImage {
//!         hashes: HashPair::from_bytes(&[0xAB], &1.0f64.to_le_bytes()).unwrap(),
//!         external_file: Some("cats/tabby.jpg".into()),
//!         categories: vec!["cats".into()],
//!         descriptors: DescriptorSet::new([(DetectorType::Orb, orb)]).unwrap(),
//!     })
//!     .unwrap();
//!
//! assert_eq!(index.images_in_category("cats").unwrap(), vec![id]);
//! assert_eq!(index.find_by_hash(HashKind::Perceptual, "AB").unwrap(), vec![id]);
//! assert_eq!(index.get_descriptor(id, DetectorType::Orb).unwrap().rows(), 1);
//! ```

mod backend;

use std::sync::Mutex;

pub use backend::{BackendConfig, InMemoryBackend, IndexBackend};
#[cfg(feature = "backend-redb")]
pub use backend::RedbBackend;

use bincode::config::standard;
use bincode::error::{DecodeError, EncodeError};
use bincode::serde::{decode_from_slice, encode_to_vec};
use descriptor::{
    DescriptorError, DescriptorRecord, DescriptorSet, DetectorType, HashKind, HashPair,
    MatrixDescriptor,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;
use zstd::{decode_all, encode_all};

/// Bump this value whenever the on-disk record layout changes.
pub const INDEX_SCHEMA_VERSION: u16 = 1;

const IMAGE_PREFIX: &str = "img/";
const CATEGORY_PREFIX: &str = "cat/";
const DESCRIPTOR_PREFIX: &str = "desc/";
const HASH_PREFIX: &str = "hash/";
const FILE_PREFIX: &str = "file/";

/// Stored image: identity, hashes, file reference and category memberships.
///
/// Descriptors are stored under their own keys and fetched on demand.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ImageRecord {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    pub id: Uuid,
    pub hashes: HashPair,
    /// Where the original image lives, as given at ingest time.
    pub external_file: Option<String>,
    /// Category names in membership order.
    pub categories: Vec<String>,
}

impl ImageRecord {
    /// First category of the image, empty when it has none.
    pub fn category_label(&self) -> &str {
        self.categories.first().map(String::as_str).unwrap_or("")
    }

    /// The external file, or the id when the image was ingested without one.
    pub fn file_reference(&self) -> String {
        self.external_file
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Stored category. Parent links are not checked for cycles.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CategoryRecord {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    pub name: String,
    pub parent: Option<String>,
    /// Member images in insertion order.
    pub image_ids: Vec<Uuid>,
}

/// Everything needed to store one image.
#[derive(Clone, Debug)]
pub struct NewImage {
    pub hashes: HashPair,
    pub external_file: Option<String>,
    pub categories: Vec<String>,
    pub descriptors: DescriptorSet,
}

const fn default_schema_version() -> u16 {
    INDEX_SCHEMA_VERSION
}

/// Compression codec options for index storage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum CompressionCodec {
    None,
    #[default]
    Zstd,
}

/// Compression behavior configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressionConfig {
    pub codec: CompressionCodec,
    /// Zstd level (1-22, higher compresses better but slower).
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            codec: CompressionCodec::default(),
            level: 3,
        }
    }
}

impl CompressionConfig {
    pub fn new(codec: CompressionCodec, level: i32) -> Self {
        Self { codec, level }
    }

    pub fn with_codec(mut self, codec: CompressionCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, IndexError> {
        match self.codec {
            CompressionCodec::None => Ok(data.to_vec()),
            CompressionCodec::Zstd => Ok(encode_all(data, self.level)?),
        }
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, IndexError> {
        match self.codec {
            CompressionCodec::None => Ok(data.to_vec()),
            CompressionCodec::Zstd => Ok(decode_all(data)?),
        }
    }
}

/// Config for initializing the index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexConfig {
    pub backend: BackendConfig,
    pub compression: CompressionConfig,
}

impl IndexConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Serialization encode error: {0}")]
    Encode(String),
    #[error("Serialization decode error: {0}")]
    Decode(String),
    #[error("Compression error: {0}")]
    Zstd(String),
    #[error("image {0} not found")]
    ImageNotFound(Uuid),
    #[error("category {0:?} not found")]
    CategoryNotFound(String),
    #[error("invalid category name {0:?}")]
    InvalidCategory(String),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

impl From<EncodeError> for IndexError {
    fn from(e: EncodeError) -> Self {
        IndexError::Encode(e.to_string())
    }
}

impl From<DecodeError> for IndexError {
    fn from(e: DecodeError) -> Self {
        IndexError::Decode(e.to_string())
    }
}

impl From<std::io::Error> for IndexError {
    fn from(e: std::io::Error) -> Self {
        IndexError::Zstd(e.to_string())
    }
}

impl IndexError {
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }

    /// Whether the error reports a missing image, category or descriptor.
    pub fn is_not_found(&self) -> bool {
        match self {
            IndexError::ImageNotFound(_) | IndexError::CategoryNotFound(_) => true,
            IndexError::Descriptor(err) => err.is_not_found(),
            _ => false,
        }
    }
}

fn image_key(id: Uuid) -> String {
    format!("{IMAGE_PREFIX}{id}")
}

fn category_key(name: &str) -> String {
    format!("{CATEGORY_PREFIX}{name}")
}

fn descriptor_prefix(id: Uuid) -> String {
    format!("{DESCRIPTOR_PREFIX}{id}/")
}

fn descriptor_key(id: Uuid, detector: DetectorType) -> String {
    format!("{DESCRIPTOR_PREFIX}{id}/{}", detector.code())
}

fn hash_prefix(kind: HashKind, hex: &str) -> String {
    let tag = match kind {
        HashKind::Perceptual => 'p',
        HashKind::ColorMoment => 'c',
    };
    format!("{HASH_PREFIX}{tag}/{}/", hex.to_ascii_uppercase())
}

fn hash_key(kind: HashKind, hex: &str, id: Uuid) -> String {
    format!("{}{id}", hash_prefix(kind, hex))
}

fn file_key(external: &str) -> String {
    format!("{FILE_PREFIX}{external}")
}

/// The corpus store.
pub struct ImageIndex {
    backend: Box<dyn IndexBackend>,
    cfg: IndexConfig,
    /// Serializes multi-key read-modify-write updates; reads never take it.
    writer: Mutex<()>,
}

impl ImageIndex {
    /// Open the index using the configured backend.
    pub fn new(cfg: IndexConfig) -> Result<Self, IndexError> {
        let backend = cfg.backend.build()?;
        Ok(Self::with_backend(cfg, backend))
    }

    /// Build an index over a custom backend.
    pub fn with_backend(cfg: IndexConfig, backend: Box<dyn IndexBackend>) -> Self {
        Self {
            backend,
            cfg,
            writer: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.cfg
    }

    /// Store an image and return its id.
    ///
    /// When `external_file` is already known the existing id is reused: its
    /// stored hashes and descriptors are kept as they are and only the new
    /// categories are appended to its memberships. Otherwise a fresh v4 id is
    /// assigned.
    pub fn insert_image(&self, image: NewImage) -> Result<Uuid, IndexError> {
        if let Some(bad) = image.categories.iter().find(|c| c.trim().is_empty()) {
            return Err(IndexError::InvalidCategory(bad.clone()));
        }
        let _guard = self
            .writer
            .lock()
            .map_err(|_| IndexError::backend("poisoned writer lock"))?;

        let existing = match &image.external_file {
            Some(external) => self.find_by_file(external)?,
            None => None,
        };

        let mut puts = Vec::new();

        let mut record = match existing.map(|id| self.get_image(id)).transpose()? {
            Some(old) => old,
            None => ImageRecord {
                schema_version: INDEX_SCHEMA_VERSION,
                id: Uuid::new_v4(),
                hashes: image.hashes.clone(),
                external_file: image.external_file.clone(),
                categories: Vec::new(),
            },
        };
        let id = record.id;

        for name in &image.categories {
            if !record.categories.contains(name) {
                record.categories.push(name.clone());
            }
            let mut category = self.category(name)?.unwrap_or_else(|| CategoryRecord {
                schema_version: INDEX_SCHEMA_VERSION,
                name: name.clone(),
                parent: None,
                image_ids: Vec::new(),
            });
            if !category.image_ids.contains(&id) {
                category.image_ids.push(id);
                puts.push((category_key(name), self.encode(&category)?));
            }
        }

        // Features are written once, when the image is first stored.
        if existing.is_none() {
            for stored in image.descriptors.to_records()? {
                let detector = DetectorType::from_code(stored.detector)?;
                puts.push((descriptor_key(id, detector), self.encode(&stored)?));
            }
            for kind in HashKind::ALL {
                puts.push((hash_key(kind, record.hashes.get(kind), id), Vec::new()));
            }
            if let Some(external) = &record.external_file {
                puts.push((file_key(external), id.as_bytes().to_vec()));
            }
        }
        puts.push((image_key(id), self.encode(&record)?));

        self.backend.write_batch(Vec::new(), puts)?;
        debug!(
            image_id = %id,
            reused = existing.is_some(),
            detectors = image.descriptors.len(),
            "index_insert_image"
        );
        Ok(id)
    }

    /// Remove an image with its descriptors, hash entries and memberships.
    pub fn delete_image(&self, id: Uuid) -> Result<(), IndexError> {
        let _guard = self
            .writer
            .lock()
            .map_err(|_| IndexError::backend("poisoned writer lock"))?;
        let record = self.get_image(id)?;

        let mut deletes = self.keys_with_prefix(&descriptor_prefix(id))?;
        for kind in HashKind::ALL {
            deletes.push(hash_key(kind, record.hashes.get(kind), id));
        }
        if let Some(external) = &record.external_file {
            if self.find_by_file(external)? == Some(id) {
                deletes.push(file_key(external));
            }
        }
        deletes.push(image_key(id));

        let mut puts = Vec::new();
        for name in &record.categories {
            if let Some(mut category) = self.category(name)? {
                category.image_ids.retain(|member| *member != id);
                puts.push((category_key(name), self.encode(&category)?));
            }
        }

        self.backend.write_batch(deletes, puts)?;
        debug!(image_id = %id, "index_delete_image");
        Ok(())
    }

    /// Fetch an image record, failing with [`IndexError::ImageNotFound`].
    pub fn get_image(&self, id: Uuid) -> Result<ImageRecord, IndexError> {
        self.image(id)?.ok_or(IndexError::ImageNotFound(id))
    }

    pub fn image(&self, id: Uuid) -> Result<Option<ImageRecord>, IndexError> {
        self.backend
            .get(&image_key(id))?
            .map(|data| self.decode(&data))
            .transpose()
    }

    /// Every image id, in scan order.
    pub fn image_ids(&self) -> Result<Vec<Uuid>, IndexError> {
        let mut ids = Vec::new();
        self.backend.scan_prefix(IMAGE_PREFIX, &mut |key, _| {
            ids.push(parse_uuid(&key[IMAGE_PREFIX.len()..])?);
            Ok(())
        })?;
        Ok(ids)
    }

    /// Every image record, in scan order.
    pub fn images(&self) -> Result<Vec<ImageRecord>, IndexError> {
        let mut images: Vec<ImageRecord> = Vec::new();
        self.backend.scan_prefix(IMAGE_PREFIX, &mut |_, data| {
            images.push(self.decode(data)?);
            Ok(())
        })?;
        Ok(images)
    }

    pub fn len(&self) -> Result<usize, IndexError> {
        let mut n = 0usize;
        self.backend.scan_prefix(IMAGE_PREFIX, &mut |_, _| {
            n += 1;
            Ok(())
        })?;
        Ok(n)
    }

    pub fn is_empty(&self) -> Result<bool, IndexError> {
        Ok(self.len()? == 0)
    }

    /// The descriptor computed for `detector` on image `id`.
    ///
    /// Fails with [`DescriptorError::NotFound`] when the image exists but the
    /// detector was never computed, and [`IndexError::ImageNotFound`] when the
    /// image itself is missing.
    pub fn get_descriptor(
        &self,
        id: Uuid,
        detector: DetectorType,
    ) -> Result<MatrixDescriptor, IndexError> {
        match self.backend.get(&descriptor_key(id, detector))? {
            Some(data) => {
                let record: DescriptorRecord = self.decode(&data)?;
                let (_, descriptor) = record.into_descriptor()?;
                Ok(descriptor)
            }
            None if self.backend.get(&image_key(id))?.is_some() => {
                Err(DescriptorError::NotFound(detector).into())
            }
            None => Err(IndexError::ImageNotFound(id)),
        }
    }

    /// Every descriptor stored for image `id`.
    pub fn descriptors(&self, id: Uuid) -> Result<DescriptorSet, IndexError> {
        let mut records = Vec::new();
        self.backend
            .scan_prefix(&descriptor_prefix(id), &mut |_, data| {
                records.push(self.decode::<DescriptorRecord>(data)?);
                Ok(())
            })?;
        Ok(DescriptorSet::from_records(records)?)
    }

    /// All images carrying exactly this hash. Hex case is ignored.
    pub fn find_by_hash(&self, kind: HashKind, hex: &str) -> Result<Vec<Uuid>, IndexError> {
        let prefix = hash_prefix(kind, hex);
        let mut ids = Vec::new();
        self.backend.scan_prefix(&prefix, &mut |key, _| {
            ids.push(parse_uuid(&key[prefix.len()..])?);
            Ok(())
        })?;
        Ok(ids)
    }

    /// Image id registered for an external file reference.
    pub fn find_by_file(&self, external: &str) -> Result<Option<Uuid>, IndexError> {
        self.backend
            .get(&file_key(external))?
            .map(|bytes| Uuid::from_slice(&bytes).map_err(|e| IndexError::Decode(e.to_string())))
            .transpose()
    }

    /// Create a category or update its parent, keeping its members.
    pub fn upsert_category(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<CategoryRecord, IndexError> {
        if name.trim().is_empty() {
            return Err(IndexError::InvalidCategory(name.to_string()));
        }
        let _guard = self
            .writer
            .lock()
            .map_err(|_| IndexError::backend("poisoned writer lock"))?;
        let mut category = self.category(name)?.unwrap_or_else(|| CategoryRecord {
            schema_version: INDEX_SCHEMA_VERSION,
            name: name.to_string(),
            parent: None,
            image_ids: Vec::new(),
        });
        category.parent = parent.map(str::to_string);
        self.backend
            .put(&category_key(name), &self.encode(&category)?)?;
        Ok(category)
    }

    pub fn category(&self, name: &str) -> Result<Option<CategoryRecord>, IndexError> {
        self.backend
            .get(&category_key(name))?
            .map(|data| self.decode(&data))
            .transpose()
    }

    /// Every category, ordered by name.
    pub fn categories(&self) -> Result<Vec<CategoryRecord>, IndexError> {
        let mut categories: Vec<CategoryRecord> = Vec::new();
        self.backend.scan_prefix(CATEGORY_PREFIX, &mut |_, data| {
            categories.push(self.decode(data)?);
            Ok(())
        })?;
        Ok(categories)
    }

    /// Member ids of a category, failing with [`IndexError::CategoryNotFound`].
    pub fn images_in_category(&self, name: &str) -> Result<Vec<Uuid>, IndexError> {
        self.category(name)?
            .map(|c| c.image_ids)
            .ok_or_else(|| IndexError::CategoryNotFound(name.to_string()))
    }

    pub fn flush(&self) -> Result<(), IndexError> {
        self.backend.flush()
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, IndexError> {
        let mut keys = Vec::new();
        self.backend.scan_prefix(prefix, &mut |key, _| {
            keys.push(key.to_string());
            Ok(())
        })?;
        Ok(keys)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, IndexError> {
        let decompressed = self.cfg.compression.decompress(data)?;
        let (value, _) = decode_from_slice(&decompressed, standard())?;
        Ok(value)
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, IndexError> {
        let encoded = encode_to_vec(value, standard())?;
        self.cfg.compression.compress(&encoded)
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, IndexError> {
    Uuid::parse_str(s).map_err(|e| IndexError::Decode(format!("bad id in key {s:?}: {e}")))
}
