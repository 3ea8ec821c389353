//! Batch collation of everything the wizard has persisted.
//!
//! Scans the extraction tree for per-receipt tables, compiles them into two
//! global tables keyed by the receipt directory name, and renders the export
//! formats (csv, zip, xlsx) from the compiled tables.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, Time};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::artifacts::ArtifactKind;
use crate::error::WizardError;
use crate::names::assign_normalized_name;
use crate::tables::{ItemColumns, ShopColumns};

pub const ARCHIVE_FILE_NAME: &str = "extractions.zip";
pub const WORKBOOK_FILE_NAME: &str = "groceries-data.xlsx";

const DATE_FMT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");
const TIME_FMT: &[BorrowedFormatItem<'static>] = format_description!("[hour]:[minute]:[second]");

/// All shops across all receipts, one row per receipt, with the receipt
/// directory name as id column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledShops {
    pub name: Vec<String>,
    pub date: Vec<Option<Date>>,
    pub time: Vec<Option<Time>>,
    pub total: Vec<f64>,
    pub target_directory: Vec<String>,
}

impl CompiledShops {
    pub fn append(&mut self, id: &str, columns: &ShopColumns) {
        self.name.extend_from_slice(&columns.name);
        self.date.extend_from_slice(&columns.date);
        self.time.extend_from_slice(&columns.time);
        self.total.extend_from_slice(&columns.total);
        self.target_directory
            .extend(std::iter::repeat(id.to_string()).take(columns.len()));
    }

    pub fn len(&self) -> usize {
        self.name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

/// All items across all receipts, plus the normalized `pretty name` column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledItems {
    pub name: Vec<String>,
    pub price: Vec<f64>,
    pub count: Vec<Option<i64>>,
    pub mass: Vec<Option<f64>>,
    pub tax: Vec<Option<String>>,
    pub category: Vec<Option<crate::receipt::Category>>,
    pub pretty_name: Vec<String>,
    pub target_directory: Vec<String>,
}

impl CompiledItems {
    pub fn append(&mut self, id: &str, columns: &ItemColumns) {
        self.name.extend_from_slice(&columns.name);
        self.price.extend_from_slice(&columns.price);
        self.count.extend_from_slice(&columns.count);
        self.mass.extend_from_slice(&columns.mass);
        self.tax.extend_from_slice(&columns.tax);
        self.category.extend_from_slice(&columns.category);
        self.pretty_name
            .extend(columns.name.iter().map(|n| assign_normalized_name(n).to_string()));
        self.target_directory
            .extend(std::iter::repeat(id.to_string()).take(columns.len()));
    }

    pub fn len(&self) -> usize {
        self.name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CollationSummary {
    pub receipts: usize,
    pub shop_rows: usize,
    pub item_rows: usize,
}

/// Per-receipt table files under the extraction root. Files sitting directly
/// in the root are compiled artifacts of earlier runs and are skipped.
pub fn find_receipt_files(extraction_dir: &Path, kind: ArtifactKind) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(extraction_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_str() == Some(kind.file_name()))
        .map(|entry| entry.into_path())
        .filter(|path| path.parent() != Some(extraction_dir))
        .collect();
    files.sort();
    debug!(kind = kind.file_name(), count = files.len(), "detected receipt files");
    files
}

pub fn compiled_paths(collation_dir: &Path) -> (PathBuf, PathBuf) {
    (
        collation_dir.join(ArtifactKind::ShopInfoBin.file_name()),
        collation_dir.join(ArtifactKind::ItemsInfoBin.file_name()),
    )
}

pub fn is_collated(collation_dir: &Path) -> bool {
    let (shops, items) = compiled_paths(collation_dir);
    shops.exists() && items.exists()
}

fn receipt_id(table_path: &Path) -> anyhow::Result<&str> {
    table_path
        .parent()
        .and_then(|dir| dir.file_name())
        .and_then(|name| name.to_str())
        .with_context(|| format!("unreadable receipt directory for {}", table_path.display()))
}

/// Compile the per-receipt tables into the two global tables and persist them
/// (json + columnar binary) to the collation dir.
pub fn collate(extraction_dir: &Path, collation_dir: &Path) -> anyhow::Result<CollationSummary> {
    let shop_files = find_receipt_files(extraction_dir, ArtifactKind::ShopInfoBin);
    let items_files = find_receipt_files(extraction_dir, ArtifactKind::ItemsInfoBin);
    if shop_files.is_empty() && items_files.is_empty() {
        return Err(WizardError::NothingToCollate.into());
    }

    info!(receipts = shop_files.len(), "compiling shop info");
    let mut shops = CompiledShops::default();
    for path in &shop_files {
        let columns: ShopColumns = bincode::deserialize(
            &fs::read(path).with_context(|| format!("reading {}", path.display()))?,
        )?;
        shops.append(receipt_id(path)?, &columns);
    }

    info!(receipts = items_files.len(), "compiling items info");
    let mut items = CompiledItems::default();
    for path in &items_files {
        let columns: ItemColumns = bincode::deserialize(
            &fs::read(path).with_context(|| format!("reading {}", path.display()))?,
        )?;
        items.append(receipt_id(path)?, &columns);
    }

    fs::create_dir_all(collation_dir)
        .with_context(|| format!("creating {}", collation_dir.display()))?;
    let (shops_bin, items_bin) = compiled_paths(collation_dir);
    fs::write(&shops_bin, bincode::serialize(&shops)?)?;
    fs::write(
        collation_dir.join(ArtifactKind::ShopInfoJson.file_name()),
        serde_json::to_vec_pretty(&shops)?,
    )?;
    fs::write(&items_bin, bincode::serialize(&items)?)?;
    fs::write(
        collation_dir.join(ArtifactKind::ItemsInfoJson.file_name()),
        serde_json::to_vec_pretty(&items)?,
    )?;

    info!(
        shop_rows = shops.len(),
        item_rows = items.len(),
        "done collecting"
    );
    Ok(CollationSummary {
        receipts: shop_files.len(),
        shop_rows: shops.len(),
        item_rows: items.len(),
    })
}

pub fn load_compiled(collation_dir: &Path) -> anyhow::Result<(CompiledShops, CompiledItems)> {
    if !is_collated(collation_dir) {
        return Err(WizardError::NotCollated.into());
    }
    let (shops_bin, items_bin) = compiled_paths(collation_dir);
    let shops: CompiledShops = bincode::deserialize(&fs::read(&shops_bin)?)?;
    let items: CompiledItems = bincode::deserialize(&fs::read(&items_bin)?)?;
    Ok((shops, items))
}

fn format_date(date: Option<Date>) -> anyhow::Result<String> {
    Ok(match date {
        Some(date) => date.format(DATE_FMT).context("formatting date")?,
        None => String::new(),
    })
}

fn format_time(time: Option<Time>) -> anyhow::Result<String> {
    Ok(match time {
        Some(time) => time.format(TIME_FMT).context("formatting time")?,
        None => String::new(),
    })
}

fn option_string<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

/// Shop table as `;`-separated csv, id column last.
pub fn shops_csv(shops: &CompiledShops) -> anyhow::Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_writer(Vec::new());
    writer.write_record(["name", "date", "time", "total", "target_directory"])?;
    for idx in 0..shops.len() {
        writer.write_record([
            shops.name[idx].clone(),
            format_date(shops.date[idx])?,
            format_time(shops.time[idx])?,
            shops.total[idx].to_string(),
            shops.target_directory[idx].clone(),
        ])?;
    }
    let bytes = writer.into_inner().context("flushing csv")?;
    String::from_utf8(bytes).context("csv is not utf-8")
}

/// Items table as `;`-separated csv, id column last.
pub fn items_csv(items: &CompiledItems) -> anyhow::Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_writer(Vec::new());
    writer.write_record([
        "name",
        "price",
        "count",
        "mass",
        "tax",
        "category",
        "pretty name",
        "target_directory",
    ])?;
    for idx in 0..items.len() {
        writer.write_record([
            items.name[idx].clone(),
            items.price[idx].to_string(),
            option_string(&items.count[idx]),
            option_string(&items.mass[idx]),
            items.tax[idx].clone().unwrap_or_default(),
            items.category[idx].map(|c| c.as_str()).unwrap_or("").to_string(),
            items.pretty_name[idx].clone(),
            items.target_directory[idx].clone(),
        ])?;
    }
    let bytes = writer.into_inner().context("flushing csv")?;
    String::from_utf8(bytes).context("csv is not utf-8")
}

/// Deflate archive of the entire extraction tree, written into the collation
/// dir and returned as bytes.
pub fn create_archive(extraction_dir: &Path, collation_dir: &Path) -> anyhow::Result<Vec<u8>> {
    if !extraction_dir.exists() {
        anyhow::bail!(
            "{} does not exist, stopping creation of zipfile",
            extraction_dir.display()
        );
    }
    let archive_path = collation_dir.join(ARCHIVE_FILE_NAME);
    debug!(path = %archive_path.display(), "creating archive");

    let file = fs::File::create(&archive_path)
        .with_context(|| format!("creating {}", archive_path.display()))?;
    let mut archive = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(extraction_dir).min_depth(1) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(extraction_dir)
            .context("entry outside the extraction tree")?;
        let name = relative.to_string_lossy();
        if entry.file_type().is_dir() {
            archive.add_directory(name, options)?;
        } else {
            archive.start_file(name, options)?;
            let mut source = fs::File::open(entry.path())?;
            std::io::copy(&mut source, &mut archive)?;
        }
    }
    archive.finish()?.flush()?;

    let mut bytes = Vec::new();
    fs::File::open(&archive_path)?.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Excel workbook with `Shops` and `Items` worksheets, written into the
/// collation dir and returned as bytes.
pub fn create_workbook(collation_dir: &Path) -> anyhow::Result<Vec<u8>> {
    use rust_xlsxwriter::{Format, Workbook};

    let (shops, items) = load_compiled(collation_dir)?;
    let workbook_path = collation_dir.join(WORKBOOK_FILE_NAME);
    debug!(path = %workbook_path.display(), "creating workbook");

    let header = Format::new().set_bold();
    let price_format = Format::new().set_num_format("##0.00");
    let mass_format = Format::new().set_num_format("##0.000");

    let mut workbook = Workbook::new();

    let sheet = workbook.add_worksheet().set_name("Shops")?;
    let shop_headers = ["name", "date", "time", "total", "target_directory"];
    for (col, title) in shop_headers.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *title, &header)?;
    }
    for idx in 0..shops.len() {
        let row = idx as u32 + 1;
        sheet.write_string(row, 0, &shops.name[idx])?;
        sheet.write_string(row, 1, format_date(shops.date[idx])?)?;
        sheet.write_string(row, 2, format_time(shops.time[idx])?)?;
        sheet.write_number_with_format(row, 3, shops.total[idx], &price_format)?;
        sheet.write_string(row, 4, &shops.target_directory[idx])?;
    }
    sheet.set_freeze_panes(1, 0)?;
    sheet.autofilter(0, 0, shops.len() as u32, shop_headers.len() as u16 - 1)?;
    sheet.autofit();

    let sheet = workbook.add_worksheet().set_name("Items")?;
    let item_headers = [
        "name",
        "price",
        "count",
        "mass",
        "tax",
        "category",
        "pretty name",
        "target_directory",
    ];
    for (col, title) in item_headers.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *title, &header)?;
    }
    for idx in 0..items.len() {
        let row = idx as u32 + 1;
        sheet.write_string(row, 0, &items.name[idx])?;
        sheet.write_number_with_format(row, 1, items.price[idx], &price_format)?;
        if let Some(count) = items.count[idx] {
            sheet.write_number(row, 2, count as f64)?;
        }
        if let Some(mass) = items.mass[idx] {
            sheet.write_number_with_format(row, 3, mass, &mass_format)?;
        }
        if let Some(tax) = &items.tax[idx] {
            sheet.write_string(row, 4, tax)?;
        }
        if let Some(category) = items.category[idx] {
            sheet.write_string(row, 5, category.as_str())?;
        }
        sheet.write_string(row, 6, &items.pretty_name[idx])?;
        sheet.write_string(row, 7, &items.target_directory[idx])?;
    }
    sheet.set_freeze_panes(1, 0)?;
    sheet.autofilter(0, 0, items.len() as u32, item_headers.len() as u16 - 1)?;
    sheet.autofit();

    workbook.save(&workbook_path)?;

    let mut bytes = Vec::new();
    fs::File::open(&workbook_path)?.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Delete and recreate the extraction and collation dirs.
pub fn cleanup(extraction_dir: &Path, collation_dir: &Path) -> anyhow::Result<()> {
    for dir in [extraction_dir, collation_dir] {
        match fs::remove_dir_all(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("deleting {}", dir.display())),
        }
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    debug!("reset extraction and collation dirs");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ReceiptHandler;
    use crate::receipt::{Category, Item, Receipt, Shop};
    use bytes::Bytes;

    fn receipt(shop_name: &str, item_name: &str) -> Receipt {
        Receipt {
            shop: Shop {
                name: shop_name.into(),
                date_str: "2024-03-02".into(),
                time_str: "16:46".into(),
                total: 2.18,
            },
            items: vec![Item {
                name: item_name.into(),
                price: 2.18,
                count: Some(1),
                mass: Some(0.732),
                tax: Some("A".into()),
                category: Some(Category::Fruits),
            }],
        }
    }

    fn persist(extraction_dir: &Path, file_name: &str, bytes: &'static [u8], r: Receipt) {
        let mut handler =
            ReceiptHandler::from_upload(extraction_dir, file_name, Bytes::from_static(bytes))
                .unwrap();
        handler.extracted = Some(r);
        handler.save(true, false).unwrap();
    }

    fn two_receipt_tree(root: &Path) -> (PathBuf, PathBuf) {
        let extraction = root.join("extractions");
        let collation = root.join("collations");
        fs::create_dir_all(&extraction).unwrap();
        fs::create_dir_all(&collation).unwrap();
        persist(&extraction, "a.jpg", b"first", receipt("Rewe", "BIOD BANANEN"));
        persist(&extraction, "b.jpg", b"second", receipt("Aldi", "Mini Romanasalat"));
        (extraction, collation)
    }

    #[test]
    fn files_directly_in_the_root_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        let (extraction, _collation) = two_receipt_tree(root.path());
        // a stray compiled file in the root must not count as a receipt
        fs::write(extraction.join(ArtifactKind::ShopInfoBin.file_name()), b"stray").unwrap();

        let files = find_receipt_files(&extraction, ArtifactKind::ShopInfoBin);
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.parent() != Some(extraction.as_path())));
    }

    #[test]
    fn collation_compiles_all_receipts_with_ids() {
        let root = tempfile::tempdir().unwrap();
        let (extraction, collation) = two_receipt_tree(root.path());

        let summary = collate(&extraction, &collation).unwrap();
        assert_eq!(summary.receipts, 2);
        assert_eq!(summary.shop_rows, 2);
        assert_eq!(summary.item_rows, 2);

        let (shops, items) = load_compiled(&collation).unwrap();
        assert_eq!(shops.len(), 2);
        assert!(shops.target_directory.iter().all(|id| id.contains(".jpg-")));
        // the normalized name column applies the fixed corrections
        assert!(items.pretty_name.contains(&"BIO BANANEN".to_string()));
    }

    #[test]
    fn empty_tree_is_a_specific_error() {
        let root = tempfile::tempdir().unwrap();
        let extraction = root.path().join("extractions");
        let collation = root.path().join("collations");
        fs::create_dir_all(&extraction).unwrap();

        let err = collate(&extraction, &collation).unwrap_err();
        assert_eq!(
            err.downcast_ref::<WizardError>(),
            Some(&WizardError::NothingToCollate)
        );
    }

    #[test]
    fn csv_exports_put_the_id_column_last() {
        let root = tempfile::tempdir().unwrap();
        let (extraction, collation) = two_receipt_tree(root.path());
        collate(&extraction, &collation).unwrap();
        let (shops, items) = load_compiled(&collation).unwrap();

        let shops_out = shops_csv(&shops).unwrap();
        let header = shops_out.lines().next().unwrap();
        assert_eq!(header, "name;date;time;total;target_directory");
        assert_eq!(shops_out.lines().count(), 3);

        let items_out = items_csv(&items).unwrap();
        let header = items_out.lines().next().unwrap();
        assert!(header.ends_with(";target_directory"));
        assert!(items_out.contains("BIO BANANEN"));
    }

    #[test]
    fn archive_contains_the_extraction_tree() {
        let root = tempfile::tempdir().unwrap();
        let (extraction, collation) = two_receipt_tree(root.path());

        let bytes = create_archive(&extraction, &collation).unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names
            .iter()
            .any(|n| n.ends_with(ArtifactKind::OriginalImage.file_name())));
        assert!(names
            .iter()
            .any(|n| n.ends_with(ArtifactKind::ItemsInfoBin.file_name())));
    }

    #[test]
    fn workbook_requires_compiled_tables() {
        let root = tempfile::tempdir().unwrap();
        let collation = root.path().join("collations");
        fs::create_dir_all(&collation).unwrap();

        let err = create_workbook(&collation).unwrap_err();
        assert_eq!(
            err.downcast_ref::<WizardError>(),
            Some(&WizardError::NotCollated)
        );
    }

    #[test]
    fn workbook_is_written_once_collated() {
        let root = tempfile::tempdir().unwrap();
        let (extraction, collation) = two_receipt_tree(root.path());
        collate(&extraction, &collation).unwrap();

        let bytes = create_workbook(&collation).unwrap();
        assert!(!bytes.is_empty());
        assert!(collation.join(WORKBOOK_FILE_NAME).exists());
    }

    #[test]
    fn cleanup_resets_both_dirs() {
        let root = tempfile::tempdir().unwrap();
        let (extraction, collation) = two_receipt_tree(root.path());
        collate(&extraction, &collation).unwrap();

        cleanup(&extraction, &collation).unwrap();
        assert!(extraction.exists());
        assert!(collation.exists());
        assert!(fs::read_dir(&extraction).unwrap().next().is_none());
        assert!(fs::read_dir(&collation).unwrap().next().is_none());
    }
}
