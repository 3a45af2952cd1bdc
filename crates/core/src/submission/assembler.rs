use thiserror::Error;

use crate::domain::inventory::{InventoryLine, InventoryRecord};
use crate::domain::session::Session;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("session is missing `{0}`")]
    MissingField(&'static str),
}

/// Splits `"Apples [kg]"` into `("Apples", "kg")`. Without an opening
/// bracket the whole trimmed name is returned with an empty unit.
pub fn split_unit(product: &str) -> (String, String) {
    let Some((name, rest)) = product.split_once('[') else {
        return (product.trim().to_owned(), String::new());
    };
    let unit = rest.split_once(']').map_or(rest, |(unit, _)| unit);
    (name.trim().to_owned(), unit.trim().to_owned())
}

/// Converts a finished session into a store-ready record. Lines keep the
/// first-entry order of the collected quantities.
pub fn assemble(session: &Session) -> Result<InventoryRecord, AssemblyError> {
    let warehouse = session.warehouse.clone().ok_or(AssemblyError::MissingField("warehouse"))?;
    let date = session.date.ok_or(AssemblyError::MissingField("date"))?;
    let responsible_name = session
        .responsible_name
        .clone()
        .ok_or(AssemblyError::MissingField("responsible_name"))?;
    let phone_number =
        session.phone_number.clone().ok_or(AssemblyError::MissingField("phone_number"))?;

    let lines = session
        .collected
        .iter()
        .enumerate()
        .map(|(index, (product, quantity))| {
            let (product, unit) = split_unit(product);
            InventoryLine { sequence: index + 1, product, quantity, unit }
        })
        .collect();

    Ok(InventoryRecord { warehouse, date, responsible_name, phone_number, lines })
}
