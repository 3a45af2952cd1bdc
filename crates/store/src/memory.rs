use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use stocktake_core::gateway::{ContainerId, FormatSpec, Row, SectionId, StoreError, TabularStore};

#[derive(Clone, Debug)]
struct MemorySection {
    id: SectionId,
    name: String,
    rows: Vec<Row>,
    format: Option<FormatSpec>,
}

#[derive(Default)]
struct Containers {
    ids: HashMap<String, ContainerId>,
    sections: HashMap<ContainerId, Vec<MemorySection>>,
}

/// Process-local Tabular Store for development runs and tests.
#[derive(Default)]
pub struct InMemoryTabularStore {
    containers: RwLock<Containers>,
}

impl InMemoryTabularStore {
    pub async fn rows(&self, container: &ContainerId, section: &str) -> Option<Vec<Row>> {
        let containers = self.containers.read().await;
        containers
            .sections
            .get(container)?
            .iter()
            .find(|candidate| candidate.name == section)
            .map(|found| found.rows.clone())
    }

    pub async fn format(&self, container: &ContainerId, section: &SectionId) -> Option<FormatSpec> {
        let containers = self.containers.read().await;
        containers
            .sections
            .get(container)?
            .iter()
            .find(|candidate| &candidate.id == section)
            .and_then(|found| found.format.clone())
    }
}

#[async_trait]
impl TabularStore for InMemoryTabularStore {
    async fn find_or_create_container(&self, name: &str) -> Result<ContainerId, StoreError> {
        let mut containers = self.containers.write().await;
        if let Some(id) = containers.ids.get(name) {
            return Ok(id.clone());
        }
        let id = ContainerId(Uuid::new_v4().to_string());
        containers.ids.insert(name.to_owned(), id.clone());
        containers.sections.insert(id.clone(), Vec::new());
        Ok(id)
    }

    async fn find_container(&self, name: &str) -> Result<Option<ContainerId>, StoreError> {
        Ok(self.containers.read().await.ids.get(name).cloned())
    }

    async fn list_sections(&self, container: &ContainerId) -> Result<Vec<String>, StoreError> {
        let containers = self.containers.read().await;
        let sections = containers
            .sections
            .get(container)
            .ok_or_else(|| StoreError::ContainerNotFound(container.0.clone()))?;
        Ok(sections.iter().map(|section| section.name.clone()).collect())
    }

    async fn create_section(
        &self,
        container: &ContainerId,
        name: &str,
    ) -> Result<SectionId, StoreError> {
        let mut containers = self.containers.write().await;
        let sections = containers
            .sections
            .get_mut(container)
            .ok_or_else(|| StoreError::ContainerNotFound(container.0.clone()))?;
        if let Some(existing) = sections.iter().find(|section| section.name == name) {
            return Ok(existing.id.clone());
        }
        let id = SectionId(Uuid::new_v4().to_string());
        sections.push(MemorySection {
            id: id.clone(),
            name: name.to_owned(),
            rows: Vec::new(),
            format: None,
        });
        Ok(id)
    }

    async fn write_rows(
        &self,
        container: &ContainerId,
        section: &str,
        rows: &[Row],
    ) -> Result<(), StoreError> {
        let mut containers = self.containers.write().await;
        let target = containers
            .sections
            .get_mut(container)
            .and_then(|sections| sections.iter_mut().find(|candidate| candidate.name == section))
            .ok_or_else(|| StoreError::SectionNotFound {
                container: container.0.clone(),
                section: section.to_owned(),
            })?;
        target.rows = rows.to_vec();
        Ok(())
    }

    async fn apply_formatting(
        &self,
        container: &ContainerId,
        section: &SectionId,
        spec: &FormatSpec,
    ) -> Result<(), StoreError> {
        let mut containers = self.containers.write().await;
        let target = containers
            .sections
            .get_mut(container)
            .and_then(|sections| sections.iter_mut().find(|candidate| &candidate.id == section))
            .ok_or_else(|| StoreError::SectionNotFound {
                container: container.0.clone(),
                section: section.0.clone(),
            })?;
        target.format = Some(spec.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::NaiveDate;
    use stocktake_core::domain::inventory::{InventoryLine, InventoryRecord};
    use stocktake_core::gateway::{Cell, TabularStore};
    use stocktake_core::submission::InventorySubmitter;

    use super::InMemoryTabularStore;

    fn record() -> InventoryRecord {
        InventoryRecord {
            warehouse: "Central".to_owned(),
            date: NaiveDate::from_ymd_opt(2026, 3, 14).expect("date"),
            responsible_name: "Dana Reyes".to_owned(),
            phone_number: "+15550100".to_owned(),
            lines: vec![InventoryLine {
                sequence: 1,
                product: "Apples".to_owned(),
                quantity: 5.0,
                unit: "kg".to_owned(),
            }],
        }
    }

    #[tokio::test]
    async fn sections_keep_creation_order_and_names_are_unique() {
        let store = InMemoryTabularStore::default();
        let container = store.find_or_create_container("Central").await.expect("container");

        let first = store.create_section(&container, "B").await.expect("b");
        store.create_section(&container, "A").await.expect("a");
        let again = store.create_section(&container, "B").await.expect("b again");

        assert_eq!(first, again);
        assert_eq!(store.list_sections(&container).await.expect("list"), vec!["B", "A"]);
    }

    #[tokio::test]
    async fn submitter_writes_a_formatted_section() {
        let store = Arc::new(InMemoryTabularStore::default());
        let submitter = InventorySubmitter::new(store.clone(), Duration::from_secs(5));

        let receipt = submitter.submit(&record(), None).await.expect("submit");
        let rows = store.rows(&receipt.container, &receipt.section_name).await.expect("rows");

        assert_eq!(receipt.section_name, "Inventory 2026-03-14_1");
        assert!(receipt.formatted);
        assert_eq!(rows.len(), receipt.rows_written);
        assert_eq!(rows.last().map(|row| row[1].clone()), Some(Cell::text("Apples")));
        assert!(store.format(&receipt.container, &receipt.section_id).await.is_some());

        let second = submitter.submit(&record(), None).await.expect("submit again");
        assert_eq!(second.section_name, "Inventory 2026-03-14_2");
    }
}
