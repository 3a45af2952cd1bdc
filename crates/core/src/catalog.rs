//! Static product catalog: categories, subcategories and leaf items.
//!
//! The tree is built once (from a TOML file or the bundled sample) and is
//! read-only afterwards. Menus address children by index, so callers resolve
//! the node from the live [`CategoryPath`] on every render and selection.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::domain::session::CategoryPath;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamedNode {
    pub name: String,
    pub node: CategoryNode,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CategoryNode {
    Hub { subcategories: Vec<NamedNode> },
    Leaf { items: Vec<String> },
    HubWithItems { subcategories: Vec<NamedNode>, items: Vec<String> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Child<'a> {
    Subcategory(&'a str),
    Item(&'a str),
}

/// Names presented by one node, in menu order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Children<'a> {
    pub subcategories: Vec<&'a str>,
    pub items: Vec<&'a str>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("category path `{path}` does not resolve (missing `{segment}` at depth {depth})")]
    NotFound { path: String, segment: String, depth: usize },
    #[error("no {kind} at index {index} under `{path}`")]
    IndexOutOfRange { path: String, kind: &'static str, index: usize },
    #[error("duplicate name `{name}` under `{parent}`")]
    DuplicateName { parent: String, name: String },
    #[error("catalog has no root categories")]
    Empty,
    #[error("could not read catalog file `{path}`: {message}")]
    ReadFile { path: PathBuf, message: String },
    #[error("could not parse catalog file: {0}")]
    Parse(String),
}

impl CategoryNode {
    fn from_parts(subcategories: Vec<NamedNode>, items: Vec<String>) -> Self {
        match (subcategories.is_empty(), items.is_empty()) {
            (true, _) => Self::Leaf { items },
            (false, true) => Self::Hub { subcategories },
            (false, false) => Self::HubWithItems { subcategories, items },
        }
    }

    pub fn subcategories(&self) -> &[NamedNode] {
        match self {
            Self::Hub { subcategories } | Self::HubWithItems { subcategories, .. } => subcategories,
            Self::Leaf { .. } => &[],
        }
    }

    pub fn items(&self) -> &[String] {
        match self {
            Self::Leaf { items } | Self::HubWithItems { items, .. } => items,
            Self::Hub { .. } => &[],
        }
    }

    pub fn subcategory(&self, name: &str) -> Option<&CategoryNode> {
        self.subcategories().iter().find(|child| child.name == name).map(|child| &child.node)
    }

    pub fn list_children(&self) -> Children<'_> {
        Children {
            subcategories: self.subcategories().iter().map(|child| child.name.as_str()).collect(),
            items: self.items().iter().map(String::as_str).collect(),
        }
    }

    /// Index over the combined menu space: subcategories first, then items.
    pub fn child_at(&self, index: usize) -> Option<Child<'_>> {
        let subcategories = self.subcategories();
        if let Some(child) = subcategories.get(index) {
            return Some(Child::Subcategory(&child.name));
        }
        self.items().get(index - subcategories.len()).map(|item| Child::Item(item))
    }

    pub fn subcategory_at(&self, index: usize) -> Option<&str> {
        self.subcategories().get(index).map(|child| child.name.as_str())
    }

    pub fn item_at(&self, index: usize) -> Option<&str> {
        self.items().get(index).map(String::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CategoryTree {
    root: CategoryNode,
}

impl CategoryTree {
    pub fn new(categories: Vec<NamedNode>) -> Result<Self, CatalogError> {
        if categories.is_empty() {
            return Err(CatalogError::Empty);
        }
        let root = CategoryNode::Hub { subcategories: categories };
        validate_unique(&root, "/")?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &CategoryNode {
        &self.root
    }

    pub fn root_categories(&self) -> Vec<&str> {
        self.root.list_children().subcategories
    }

    pub fn resolve(&self, path: &CategoryPath) -> Result<&CategoryNode, CatalogError> {
        let mut node = &self.root;
        for (depth, segment) in path.segments().iter().enumerate() {
            node = node.subcategory(segment).ok_or_else(|| CatalogError::NotFound {
                path: path.to_string(),
                segment: segment.clone(),
                depth,
            })?;
        }
        Ok(node)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile =
            toml::from_str(raw).map_err(|error| CatalogError::Parse(error.to_string()))?;
        Self::new(file.categories.into_iter().map(CategorySpec::into_named).collect())
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = fs::read_to_string(path).map_err(|error| CatalogError::ReadFile {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?;
        Self::from_toml_str(&raw)
    }

    /// Sample catalog used when no catalog file is configured.
    pub fn builtin() -> Self {
        let leaf = |name: &str, items: &[&str]| NamedNode {
            name: name.to_owned(),
            node: CategoryNode::Leaf {
                items: items.iter().map(|item| (*item).to_owned()).collect(),
            },
        };

        let categories = vec![
            leaf("Fruit", &["Apples [kg]", "Bananas [kg]", "Lemons [kg]", "Oranges [kg]"]),
            leaf("Vegetables", &["Potatoes [kg]", "Carrots [kg]", "Onions [kg]", "Cabbage [kg]"]),
            NamedNode {
                name: "Meat and meat products".to_owned(),
                node: CategoryNode::Hub {
                    subcategories: vec![
                        leaf("Beef", &["Beef tenderloin [kg]", "Ground beef [kg]"]),
                        leaf("Poultry", &["Chicken breast [kg]", "Chicken thighs [kg]"]),
                        leaf("Sausages", &["Frankfurters [kg]", "Salami [kg]"]),
                    ],
                },
            },
            NamedNode {
                name: "Dairy".to_owned(),
                node: CategoryNode::HubWithItems {
                    subcategories: vec![leaf("Cheese", &["Cheddar [kg]", "Mozzarella [kg]"])],
                    items: vec![
                        "Milk [l]".to_owned(),
                        "Butter [kg]".to_owned(),
                        "Sour cream [kg]".to_owned(),
                    ],
                },
            },
            leaf("Grains and legumes", &["Rice [kg]", "Buckwheat [kg]", "Lentils [kg]"]),
            leaf("Flour and bakery", &["Wheat flour [kg]", "Bread [pcs]"]),
            leaf("Canned goods", &["Canned tomatoes [can]", "Canned tuna [can]"]),
            leaf("Drinks", &["Mineral water [bottle]", "Orange juice [l]"]),
            leaf("Spices and seasonings", &["Salt [kg]", "Black pepper [g]"]),
            leaf("Sweets and dried fruit", &["Sugar [kg]", "Raisins [kg]"]),
            leaf("Nuts and seeds", &["Walnuts [kg]", "Sunflower seeds [kg]"]),
            leaf("Groceries", &["Sunflower oil [l]", "Vinegar [l]", "Tea"]),
        ];

        Self { root: CategoryNode::Hub { subcategories: categories } }
    }
}

fn validate_unique(node: &CategoryNode, parent: &str) -> Result<(), CatalogError> {
    let mut seen = BTreeSet::new();
    let names = node
        .subcategories()
        .iter()
        .map(|child| child.name.as_str())
        .chain(node.items().iter().map(String::as_str));
    for name in names {
        if !seen.insert(name) {
            return Err(CatalogError::DuplicateName {
                parent: parent.to_owned(),
                name: name.to_owned(),
            });
        }
    }

    for child in node.subcategories() {
        validate_unique(&child.node, &child.name)?;
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    categories: Vec<CategorySpec>,
}

#[derive(Debug, Deserialize)]
struct CategorySpec {
    name: String,
    #[serde(default)]
    items: Vec<String>,
    #[serde(default)]
    subcategories: Vec<CategorySpec>,
}

impl CategorySpec {
    fn into_named(self) -> NamedNode {
        let subcategories = self.subcategories.into_iter().map(Self::into_named).collect();
        NamedNode { name: self.name, node: CategoryNode::from_parts(subcategories, self.items) }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::{CatalogError, CategoryNode, CategoryTree, Child};
    use crate::domain::session::CategoryPath;

    const CATALOG: &str = r#"
[[categories]]
name = "Fruit"
items = ["Apples [kg]", "Pears [kg]"]

[[categories]]
name = "Dairy"
items = ["Milk [l]"]

[[categories.subcategories]]
name = "Cheese"
items = ["Cheddar [kg]"]

[[categories]]
name = "Meat"

[[categories.subcategories]]
name = "Beef"
items = ["Steak [kg]"]
"#;

    #[test]
    fn toml_catalog_builds_tagged_nodes_in_file_order() {
        let tree = CategoryTree::from_toml_str(CATALOG).expect("catalog parses");

        assert_eq!(tree.root_categories(), vec!["Fruit", "Dairy", "Meat"]);
        assert!(matches!(
            tree.resolve(&CategoryPath::from_segments(["Fruit"])),
            Ok(CategoryNode::Leaf { .. })
        ));
        assert!(matches!(
            tree.resolve(&CategoryPath::from_segments(["Dairy"])),
            Ok(CategoryNode::HubWithItems { .. })
        ));
        assert!(matches!(
            tree.resolve(&CategoryPath::from_segments(["Meat"])),
            Ok(CategoryNode::Hub { .. })
        ));
    }

    #[test]
    fn resolve_reports_the_first_missing_segment() {
        let tree = CategoryTree::from_toml_str(CATALOG).expect("catalog parses");
        let error = tree
            .resolve(&CategoryPath::from_segments(["Meat", "Pork"]))
            .expect_err("pork is not in the catalog");

        assert_eq!(
            error,
            CatalogError::NotFound {
                path: "Meat / Pork".to_owned(),
                segment: "Pork".to_owned(),
                depth: 1
            }
        );
    }

    #[test]
    fn children_of_every_node_never_overlap() {
        let tree = CategoryTree::builtin();
        let mut pending = vec![CategoryPath::root()];

        while let Some(path) = pending.pop() {
            let node = tree.resolve(&path).expect("walked paths resolve");
            let children = node.list_children();
            for name in &children.subcategories {
                assert!(!children.items.contains(name), "{name} is both a category and an item");
                let mut next = path.clone();
                next.push(*name);
                pending.push(next);
            }
        }
    }

    #[test]
    fn child_at_walks_subcategories_then_items() {
        let tree = CategoryTree::from_toml_str(CATALOG).expect("catalog parses");
        let dairy = tree.resolve(&CategoryPath::from_segments(["Dairy"])).expect("dairy");

        assert_eq!(dairy.child_at(0), Some(Child::Subcategory("Cheese")));
        assert_eq!(dairy.child_at(1), Some(Child::Item("Milk [l]")));
        assert_eq!(dairy.child_at(2), None);
        assert_eq!(dairy.item_at(0), Some("Milk [l]"));
        assert_eq!(dairy.subcategory_at(1), None);
    }

    #[test]
    fn duplicate_sibling_names_are_rejected() {
        let raw = r#"
[[categories]]
name = "Fruit"
items = ["Apples", "Apples"]
"#;
        let error = CategoryTree::from_toml_str(raw).expect_err("duplicates must fail");
        assert!(matches!(error, CatalogError::DuplicateName { ref name, .. } if name == "Apples"));
    }

    #[test]
    fn empty_catalog_is_rejected() {
        assert_eq!(CategoryTree::from_toml_str(""), Err(CatalogError::Empty));
    }

    #[test]
    fn catalog_loads_from_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("catalog.toml");
        fs::write(&path, CATALOG).expect("write catalog");

        let tree = CategoryTree::load(&path).expect("catalog loads");
        assert_eq!(tree.root_categories().len(), 3);
    }
}
