use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct CollateStatus {
    pub shop_files: usize,
    pub items_files: usize,
    pub collated: bool,
}
