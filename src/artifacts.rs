//! On-disk artifacts of one receipt.
//!
//! Every upload gets a content-addressed directory under the extraction root,
//! named `<original file name>-<sha256 of the original bytes>`. The directory
//! existing is the resume signal: uploading the same bytes again reloads the
//! stored artifacts instead of duplicating them.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use bytes::Bytes;
use image::{DynamicImage, ImageFormat};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::receipt::Receipt;
use crate::tables::{receipt_from_columns, ItemColumns, ShopColumns};

/// Closed set of files a receipt directory may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    OriginalImage,
    EditedImage,
    ShopInfoJson,
    ShopInfoBin,
    ItemsInfoJson,
    ItemsInfoBin,
}

impl ArtifactKind {
    pub fn file_name(self) -> &'static str {
        match self {
            ArtifactKind::OriginalImage => "original-image.jpg",
            ArtifactKind::EditedImage => "edited-image.jpg",
            ArtifactKind::ShopInfoJson => "shop-info.json",
            ArtifactKind::ShopInfoBin => "shop-info.bin",
            ArtifactKind::ItemsInfoJson => "items-info.json",
            ArtifactKind::ItemsInfoBin => "items-info.bin",
        }
    }
}

pub fn image_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn target_directory(extraction_dir: &Path, file_name: &str, bytes: &[u8]) -> PathBuf {
    extraction_dir.join(format!("{file_name}-{}", image_hash(bytes)))
}

/// Split a directory name back into `(original file name, content hash)`.
fn split_directory_name(dir_name: &str) -> Option<(&str, &str)> {
    let (file_name, hash) = dir_name.rsplit_once('-')?;
    let looks_like_hash = hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit());
    (looks_like_hash && !file_name.is_empty()).then_some((file_name, hash))
}

/// All artifacts of one receipt, in memory plus their persistence.
#[derive(Clone)]
pub struct ReceiptHandler {
    pub target_directory: PathBuf,
    pub original_bytes: Bytes,
    pub original_file_name: String,
    pub edited_image: Option<DynamicImage>,
    pub extracted: Option<Receipt>,
    pub cropped: bool,
    pub rotated: bool,
    pub angle: f32,
}

impl std::fmt::Debug for ReceiptHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiptHandler")
            .field("target_directory", &self.target_directory)
            .field("original_file_name", &self.original_file_name)
            .field("original_len", &self.original_bytes.len())
            .field("edited", &self.edited_image.is_some())
            .field("extracted", &self.extracted.is_some())
            .field("cropped", &self.cropped)
            .field("rotated", &self.rotated)
            .field("angle", &self.angle)
            .finish()
    }
}

impl ReceiptHandler {
    /// New handler for freshly uploaded bytes; resumes from disk when the
    /// content-addressed directory already exists.
    pub fn from_upload(
        extraction_dir: &Path,
        file_name: &str,
        bytes: Bytes,
    ) -> anyhow::Result<Self> {
        let target = target_directory(extraction_dir, file_name, &bytes);
        if target.exists() {
            debug!(dir = %target.display(), "target directory already exists, resuming");
            return Self::from_target_directory(&target);
        }

        Ok(Self {
            target_directory: target,
            original_bytes: bytes,
            original_file_name: file_name.to_string(),
            edited_image: None,
            extracted: None,
            cropped: false,
            rotated: false,
            angle: 0.0,
        })
    }

    /// Rehydrate a handler from a previously written receipt directory.
    pub fn from_target_directory(target_directory: &Path) -> anyhow::Result<Self> {
        let dir_name = target_directory
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("unreadable directory name: {}", target_directory.display()))?;
        let Some((original_file_name, _hash)) = split_directory_name(dir_name) else {
            bail!("directory name is not content-addressed: {dir_name}");
        };

        let original_path = target_directory.join(ArtifactKind::OriginalImage.file_name());
        let original_bytes = fs::read(&original_path)
            .with_context(|| format!("reading {}", original_path.display()))?;

        let mut handler = Self {
            target_directory: target_directory.to_path_buf(),
            original_bytes: Bytes::from(original_bytes),
            original_file_name: original_file_name.to_string(),
            edited_image: None,
            extracted: None,
            cropped: false,
            rotated: false,
            angle: 0.0,
        };

        let edited_path = handler.artifact_path(ArtifactKind::EditedImage);
        if edited_path.exists() {
            debug!(path = %edited_path.display(), "reading the edited image");
            handler.edited_image = Some(image::open(&edited_path)?);
        }

        let shop_path = handler.artifact_path(ArtifactKind::ShopInfoBin);
        let items_path = handler.artifact_path(ArtifactKind::ItemsInfoBin);
        if shop_path.exists() && items_path.exists() {
            debug!(dir = %target_directory.display(), "reconstructing the receipt data");
            let shop: ShopColumns = bincode::deserialize(&fs::read(&shop_path)?)?;
            let items: ItemColumns = bincode::deserialize(&fs::read(&items_path)?)?;
            handler.extracted = Some(receipt_from_columns(&shop, &items)?);
        } else {
            debug!(
                shop = shop_path.exists(),
                items = items_path.exists(),
                "extracted data incomplete, not reconstructing"
            );
        }

        Ok(handler)
    }

    pub fn artifact_path(&self, kind: ArtifactKind) -> PathBuf {
        self.target_directory.join(kind.file_name())
    }

    /// Persist everything currently in memory.
    pub fn save(&self, mkdir: bool, overwrite: bool) -> anyhow::Result<()> {
        self.save_original_image(mkdir, overwrite)?;
        if self.edited_image.is_some() {
            self.save_edited_image(overwrite)?;
        }
        if self.extracted.is_some() {
            self.save_receipt_info(overwrite)?;
        }
        Ok(())
    }

    /// The original upload is written verbatim so reloading yields identical bytes.
    pub fn save_original_image(&self, mkdir: bool, overwrite: bool) -> anyhow::Result<()> {
        self.ensure_directory(mkdir)?;
        write_file(
            &self.artifact_path(ArtifactKind::OriginalImage),
            &self.original_bytes,
            overwrite,
        )
    }

    pub fn save_edited_image(&self, overwrite: bool) -> anyhow::Result<()> {
        let Some(image) = &self.edited_image else {
            bail!("no edited image to save for {}", self.target_directory.display());
        };
        let mut encoded = Vec::new();
        image
            .to_rgb8()
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Jpeg)
            .context("encoding edited image as jpeg")?;
        write_file(&self.artifact_path(ArtifactKind::EditedImage), &encoded, overwrite)
    }

    pub fn save_receipt_info(&self, overwrite: bool) -> anyhow::Result<()> {
        let Some(receipt) = &self.extracted else {
            bail!("no extracted data to save for {}", self.target_directory.display());
        };
        debug!(dir = %self.target_directory.display(), "saving receipt info");

        let shop = ShopColumns::from_receipt(receipt);
        let items = ItemColumns::from_receipt(receipt);

        write_file(
            &self.artifact_path(ArtifactKind::ShopInfoJson),
            &serde_json::to_vec_pretty(&shop)?,
            overwrite,
        )?;
        write_file(
            &self.artifact_path(ArtifactKind::ShopInfoBin),
            &bincode::serialize(&shop)?,
            overwrite,
        )?;
        write_file(
            &self.artifact_path(ArtifactKind::ItemsInfoJson),
            &serde_json::to_vec_pretty(&items)?,
            overwrite,
        )?;
        write_file(
            &self.artifact_path(ArtifactKind::ItemsInfoBin),
            &bincode::serialize(&items)?,
            overwrite,
        )
    }

    /// Base64 of the persisted edited image, read back from disk.
    pub fn edited_image_base64(&self) -> anyhow::Result<String> {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine as _;

        let path = self.artifact_path(ArtifactKind::EditedImage);
        let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        Ok(STANDARD.encode(bytes))
    }

    fn ensure_directory(&self, mkdir: bool) -> anyhow::Result<()> {
        if self.target_directory.exists() {
            return Ok(());
        }
        if !mkdir {
            bail!(
                "{} does not exist and mkdir was not requested",
                self.target_directory.display()
            );
        }
        fs::create_dir_all(&self.target_directory)
            .with_context(|| format!("creating {}", self.target_directory.display()))
    }
}

/// Write `bytes`, skipping with a warning when the file exists and overwrite
/// was not requested.
fn write_file(path: &Path, bytes: &[u8], overwrite: bool) -> anyhow::Result<()> {
    if path.exists() && !overwrite {
        warn!(path = %path.display(), "file already exists and overwrite not requested, skipping");
        return Ok(());
    }
    debug!(path = %path.display(), len = bytes.len(), "writing artifact");
    fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
}
