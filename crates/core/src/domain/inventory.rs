use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InventoryLine {
    pub sequence: usize,
    pub product: String,
    pub quantity: f64,
    pub unit: String,
}

/// Store-ready snapshot of a completed session. Handed to the tabular store
/// and not retained afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub warehouse: String,
    pub date: NaiveDate,
    pub responsible_name: String,
    pub phone_number: String,
    pub lines: Vec<InventoryLine>,
}

impl InventoryRecord {
    pub fn date_label(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}
