use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

/// Opaque handle of a message owned by the messaging gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalOutcome {
    Submitted,
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    AwaitingPhone,
    AwaitingName,
    AwaitingWarehouse,
    AwaitingWarehouseConfirm,
    SelectingCategory,
    SelectingProduct,
    AwaitingQuantity,
    ReviewingSummary,
    Terminal(TerminalOutcome),
}

impl Step {
    /// Browsing step for a navigation position: the root menu lists categories,
    /// anything deeper lists subcategories and products.
    pub fn browsing_for(path: &CategoryPath) -> Self {
        if path.is_root() {
            Self::SelectingCategory
        } else {
            Self::SelectingProduct
        }
    }

    pub fn is_browsing(&self) -> bool {
        matches!(self, Self::SelectingCategory | Self::SelectingProduct)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingPhone => "awaiting_phone",
            Self::AwaitingName => "awaiting_name",
            Self::AwaitingWarehouse => "awaiting_warehouse",
            Self::AwaitingWarehouseConfirm => "awaiting_warehouse_confirm",
            Self::SelectingCategory => "selecting_category",
            Self::SelectingProduct => "selecting_product",
            Self::AwaitingQuantity => "awaiting_quantity",
            Self::ReviewingSummary => "reviewing_summary",
            Self::Terminal(TerminalOutcome::Submitted) => "submitted",
            Self::Terminal(TerminalOutcome::Cancelled) => "cancelled",
        }
    }
}

/// Root-to-current trail through the category tree. Empty means "at root".
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoryPath(Vec<String>);

impl CategoryPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_segments<I, T>(segments: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn push(&mut self, segment: impl Into<String>) {
        self.0.push(segment.into());
    }

    pub fn pop(&mut self) -> Option<String> {
        self.0.pop()
    }
}

impl std::fmt::Display for CategoryPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        f.write_str(&self.0.join(" / "))
    }
}

/// Quantities keyed by product display name, in first-entry order.
///
/// Recording a product twice overwrites the quantity and keeps the original
/// position.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectedQuantities {
    entries: Vec<(String, f64)>,
}

impl CollectedQuantities {
    pub fn record(&mut self, product: impl Into<String>, quantity: f64) {
        let product = product.into();
        match self.entries.iter_mut().find(|(name, _)| *name == product) {
            Some(entry) => entry.1 = quantity,
            None => self.entries.push((product, quantity)),
        }
    }

    pub fn get(&self, product: &str) -> Option<f64> {
        self.entries.iter().find(|(name, _)| name == product).map(|(_, quantity)| *quantity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.entries.iter().map(|(name, quantity)| (name.as_str(), *quantity))
    }
}

/// Transient message bookkeeping. Not business data.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiTrail {
    pub menu_message: Option<MessageId>,
    pub stale_messages: Vec<MessageId>,
}

/// Section created by a submission whose later steps failed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSection {
    pub warehouse: String,
    pub date: NaiveDate,
    pub name: String,
}

impl PendingSection {
    /// A retry may only write into the section for the same warehouse and date.
    pub fn belongs_to(&self, warehouse: &str, date: NaiveDate) -> bool {
        self.warehouse == warehouse && self.date == date
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: UserId,
    pub step: Step,
    pub phone_number: Option<String>,
    pub responsible_name: Option<String>,
    pub date: Option<NaiveDate>,
    pub warehouse_candidate: Option<usize>,
    pub warehouse: Option<String>,
    pub category_path: CategoryPath,
    pub previous_category_path: Option<CategoryPath>,
    pub current_product: Option<String>,
    pub collected: CollectedQuantities,
    /// Section left behind by a failed submission, reused on retry.
    pub pending_section: Option<PendingSection>,
    pub ui: UiTrail,
}

impl Session {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            step: Step::AwaitingPhone,
            phone_number: None,
            responsible_name: None,
            date: None,
            warehouse_candidate: None,
            warehouse: None,
            category_path: CategoryPath::root(),
            previous_category_path: None,
            current_product: None,
            collected: CollectedQuantities::default(),
            pending_section: None,
            ui: UiTrail::default(),
        }
    }

    /// Fields that must be present for the session to sit in `step`.
    pub fn missing_fields_for(&self, step: &Step) -> Vec<String> {
        let mut required: Vec<(&str, bool)> = Vec::new();
        let identity = [
            ("phone_number", self.phone_number.is_some()),
            ("responsible_name", self.responsible_name.is_some()),
            ("date", self.date.is_some()),
        ];

        match step {
            Step::AwaitingPhone | Step::Terminal(_) => {}
            Step::AwaitingName => required.push(identity[0]),
            Step::AwaitingWarehouse => required.extend(identity),
            Step::AwaitingWarehouseConfirm => {
                required.extend(identity);
                required.push(("warehouse_candidate", self.warehouse_candidate.is_some()));
            }
            Step::SelectingCategory | Step::SelectingProduct | Step::ReviewingSummary => {
                required.extend(identity);
                required.push(("warehouse", self.warehouse.is_some()));
            }
            Step::AwaitingQuantity => {
                required.extend(identity);
                required.push(("warehouse", self.warehouse.is_some()));
                required.push(("current_product", self.current_product.is_some()));
            }
        }

        required
            .into_iter()
            .filter(|(_, present)| !present)
            .map(|(field, _)| field.to_owned())
            .collect()
    }
}
