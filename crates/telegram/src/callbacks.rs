//! Callback-data tokens carried by inline buttons.
//!
//! Tokens are decoded exactly once, here, into a structured [`Action`]. Menu
//! positions travel instead of names so every token stays well under the
//! 64-byte callback limit regardless of catalog naming.

use stocktake_core::flows::Action;

pub fn encode(action: &Action) -> String {
    match action {
        Action::StartNew => "new".to_owned(),
        Action::SelectWarehouse(index) => format!("wh:{index}"),
        Action::ConfirmWarehouse => "wh.ok".to_owned(),
        Action::RejectWarehouse => "wh.no".to_owned(),
        Action::SelectCategory(index) => format!("cat:{index}"),
        Action::SelectSubcategory(index) => format!("sub:{index}"),
        Action::SelectItem(index) => format!("item:{index}"),
        Action::Back => "back".to_owned(),
        Action::Finish => "finish".to_owned(),
        Action::ConfirmSave => "save".to_owned(),
        Action::Cancel => "cancel".to_owned(),
        Action::Unknown(raw) => raw.clone(),
    }
}

/// Anything unrecognised becomes [`Action::Unknown`] so the conversation can
/// answer it with the unknown-command notice.
pub fn decode(token: &str) -> Action {
    let token = token.trim();
    match token {
        "new" => return Action::StartNew,
        "wh.ok" => return Action::ConfirmWarehouse,
        "wh.no" => return Action::RejectWarehouse,
        "back" => return Action::Back,
        "finish" => return Action::Finish,
        "save" => return Action::ConfirmSave,
        "cancel" => return Action::Cancel,
        _ => {}
    }

    let Some((prefix, index)) = token.split_once(':') else {
        return Action::Unknown(token.to_owned());
    };
    let Ok(index) = index.parse::<usize>() else {
        return Action::Unknown(token.to_owned());
    };
    match prefix {
        "wh" => Action::SelectWarehouse(index),
        "cat" => Action::SelectCategory(index),
        "sub" => Action::SelectSubcategory(index),
        "item" => Action::SelectItem(index),
        _ => Action::Unknown(token.to_owned()),
    }
}
