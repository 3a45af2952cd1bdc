use crate::catalog::{CatalogError, CategoryTree};
use crate::domain::session::Session;
use crate::flows::states::Action;
use crate::gateway::{Keyboard, Menu, MenuButton, OutgoingMessage};

const RULE_WIDTH: usize = 40;

pub struct MessageBuilder {
    lines: Vec<String>,
    keyboard: Option<Keyboard>,
}

impl MessageBuilder {
    pub fn new(text: impl Into<String>) -> Self {
        Self { lines: vec![text.into()], keyboard: None }
    }

    pub fn from_lines(lines: Vec<String>) -> Self {
        Self { lines, keyboard: None }
    }

    pub fn line(mut self, text: impl Into<String>) -> Self {
        self.lines.push(text.into());
        self
    }

    pub fn lines<I, T>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.lines.extend(lines.into_iter().map(Into::into));
        self
    }

    pub fn menu<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut MenuBuilder),
    {
        let mut builder = MenuBuilder::default();
        build(&mut builder);
        self.keyboard = Some(Keyboard::Inline(builder.build()));
        self
    }

    pub fn request_contact(mut self, label: impl Into<String>) -> Self {
        self.keyboard = Some(Keyboard::RequestContact { label: label.into() });
        self
    }

    pub fn remove_keyboard(mut self) -> Self {
        self.keyboard = Some(Keyboard::Remove);
        self
    }

    pub fn build(self) -> OutgoingMessage {
        OutgoingMessage { text: self.lines.join("\n"), keyboard: self.keyboard }
    }
}

#[derive(Default)]
pub struct MenuBuilder {
    rows: Vec<Vec<MenuButton>>,
}

impl MenuBuilder {
    /// Adds a row holding a single button.
    pub fn button(&mut self, label: impl Into<String>, action: Action) -> &mut Self {
        self.rows.push(vec![MenuButton::new(label, action)]);
        self
    }

    pub fn row<F>(&mut self, build: F) -> &mut Self
    where
        F: FnOnce(&mut RowBuilder),
    {
        let mut builder = RowBuilder::default();
        build(&mut builder);
        if !builder.buttons.is_empty() {
            self.rows.push(builder.buttons);
        }
        self
    }

    fn build(self) -> Menu {
        Menu { rows: self.rows }
    }
}

#[derive(Default)]
pub struct RowBuilder {
    buttons: Vec<MenuButton>,
}

impl RowBuilder {
    pub fn button(&mut self, label: impl Into<String>, action: Action) -> &mut Self {
        self.buttons.push(MenuButton::new(label, action));
        self
    }
}

pub fn welcome() -> OutgoingMessage {
    MessageBuilder::new("Welcome! Choose an action:")
        .menu(|menu| {
            menu.button("📝 Start new inventory", Action::StartNew);
        })
        .build()
}

pub fn contact_request() -> OutgoingMessage {
    MessageBuilder::new("To begin, please share your phone number.")
        .request_contact("📱 Share phone number")
        .build()
}

pub fn name_prompt() -> OutgoingMessage {
    MessageBuilder::new("Thank you! Now enter the full name of the responsible person:")
        .remove_keyboard()
        .build()
}

pub fn empty_name() -> OutgoingMessage {
    MessageBuilder::new("The name cannot be empty. Please enter the responsible person's name:")
        .build()
}

pub fn warehouse_menu(warehouses: &[String]) -> OutgoingMessage {
    MessageBuilder::new("Choose a warehouse:")
        .menu(|menu| {
            for (index, warehouse) in warehouses.iter().enumerate() {
                menu.button(warehouse.clone(), Action::SelectWarehouse(index));
            }
            menu.button("⬅️ Back", Action::StartNew);
        })
        .build()
}

pub fn warehouse_confirmation(warehouse: &str) -> OutgoingMessage {
    MessageBuilder::new(format!("You selected warehouse: {warehouse}"))
        .line("Is that correct?")
        .menu(|menu| {
            menu.row(|row| {
                row.button("✅ Yes", Action::ConfirmWarehouse)
                    .button("❌ No", Action::RejectWarehouse);
            });
        })
        .build()
}

/// Browsing menu for the session's current path. Subcategories come first,
/// then items; collected items show their recorded quantity.
pub fn category_menu(
    catalog: &CategoryTree,
    session: &Session,
    header: Option<&str>,
) -> Result<OutgoingMessage, CatalogError> {
    let path = &session.category_path;
    let node = catalog.resolve(path)?;
    let children = node.list_children();

    let mut lines = Vec::new();
    if let Some(header) = header {
        lines.push(header.to_owned());
        lines.push(String::new());
    }
    if path.is_root() {
        lines.push("Choose a product category:".to_owned());
    } else {
        lines.push(format!("📂 {path}"));
        lines.push("Choose a subcategory or a product:".to_owned());
    }

    Ok(MessageBuilder::from_lines(lines)
        .menu(|menu| {
            for (index, name) in children.subcategories.iter().enumerate() {
                let action = if path.is_root() {
                    Action::SelectCategory(index)
                } else {
                    Action::SelectSubcategory(index)
                };
                menu.button(format!("📁 {name}"), action);
            }
            for (index, item) in children.items.iter().enumerate() {
                let label = match session.collected.get(item) {
                    Some(quantity) => format!("{item} ✓ {quantity}"),
                    None => (*item).to_owned(),
                };
                menu.button(label, Action::SelectItem(index));
            }
            menu.button("✅ Finish inventory", Action::Finish);
            menu.button("⬅️ Back", Action::Back);
        })
        .build())
}

pub fn quantity_saved(product: &str, quantity: f64) -> String {
    format!("✅ Quantity for {product} saved: {quantity}")
}

pub fn quantity_prompt(product: &str) -> OutgoingMessage {
    MessageBuilder::new(format!("Enter the remaining quantity for {product}:"))
        .menu(|menu| {
            menu.button("⬅️ Back", Action::Back);
        })
        .build()
}

pub fn invalid_quantity() -> OutgoingMessage {
    MessageBuilder::new("Please enter a non-negative number:").build()
}

fn summary_lines(session: &Session) -> Vec<String> {
    let or_dash = |value: Option<&str>| value.unwrap_or("-").to_owned();
    let mut lines = vec![
        "📊 Inventory summary".to_owned(),
        "=".repeat(RULE_WIDTH),
        format!("🏭 Warehouse: {}", or_dash(session.warehouse.as_deref())),
        format!("👤 Responsible person: {}", or_dash(session.responsible_name.as_deref())),
        format!("📱 Phone: {}", or_dash(session.phone_number.as_deref())),
        format!(
            "📅 Date: {}",
            session.date.map_or_else(|| "-".to_owned(), |date| date.format("%Y-%m-%d").to_string())
        ),
        "=".repeat(RULE_WIDTH),
        "📝 Results:".to_owned(),
        "№  |  Product  |  Quantity".to_owned(),
        "-".repeat(RULE_WIDTH),
    ];
    lines.extend(
        session
            .collected
            .iter()
            .enumerate()
            .map(|(index, (product, quantity))| format!("{}. {product} | {quantity}", index + 1)),
    );
    lines
}

pub fn summary(session: &Session) -> OutgoingMessage {
    MessageBuilder::from_lines(summary_lines(session))
        .menu(|menu| {
            menu.row(|row| {
                row.button("✅ Save", Action::ConfirmSave).button("⬅️ Back", Action::Back);
            });
            menu.button("❌ Cancel", Action::Cancel);
        })
        .build()
}

pub fn submitted(session: &Session, section: &str) -> OutgoingMessage {
    MessageBuilder::from_lines(summary_lines(session))
        .line("")
        .line(format!("💾 Saved as \"{section}\""))
        .menu(|menu| {
            menu.button("📝 Start new", Action::StartNew);
        })
        .build()
}

pub fn submission_failed() -> OutgoingMessage {
    MessageBuilder::new("❌ The inventory could not be saved. Please try again.")
        .menu(|menu| {
            menu.row(|row| {
                row.button("🔁 Retry", Action::ConfirmSave).button("⬅️ Back", Action::Back);
            });
            menu.button("❌ Cancel", Action::Cancel);
        })
        .build()
}

pub fn cancelled() -> OutgoingMessage {
    MessageBuilder::new("❌ Inventory cancelled")
        .menu(|menu| {
            menu.button("📝 Start new", Action::StartNew);
        })
        .build()
}

pub const UNKNOWN_COMMAND: &str = "Unknown command. Use the menu buttons or /start.";

pub fn unknown_command() -> OutgoingMessage {
    MessageBuilder::new(UNKNOWN_COMMAND).build()
}

pub fn failure(user_message: &str) -> OutgoingMessage {
    MessageBuilder::new(user_message).build()
}

/// `sections` arrive in creation order and are listed newest first.
pub fn history(warehouse: &str, sections: &[String]) -> OutgoingMessage {
    let builder = MessageBuilder::new(format!("📊 Inventory history for warehouse {warehouse}:"));
    if sections.is_empty() {
        return builder.line("No inventories saved yet.").build();
    }
    builder.lines(sections.iter().rev().map(|section| format!("• {section}"))).build()
}

pub fn history_requires_warehouse() -> OutgoingMessage {
    MessageBuilder::new("Choose a warehouse first to see its inventory history.").build()
}

pub fn history_unavailable() -> OutgoingMessage {
    MessageBuilder::new(
        "The inventory history could not be loaded. Please try again later.",
    )
    .build()
}
