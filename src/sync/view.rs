use serde::Serialize;

use crate::domain::item::Item;
use crate::domain::layer::Layer;

/// Filter over active items. Archived items never match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct View {
    pub layer: Option<Layer>,
    pub destination_id: Option<String>,
}

impl View {
    pub fn layer(layer: Layer) -> Self {
        Self {
            layer: Some(layer),
            destination_id: None,
        }
    }

    pub fn destination(destination_id: impl Into<String>) -> Self {
        Self {
            layer: None,
            destination_id: Some(destination_id.into()),
        }
    }

    /// The narrowest view holding the item: its destination, else its layer.
    pub fn around(item: &Item) -> Self {
        match item.destination_id.as_deref() {
            Some(destination_id) => Self::destination(destination_id),
            None => Self::layer(item.layer),
        }
    }

    pub fn matches(&self, item: &Item) -> bool {
        if item.is_archived() {
            return false;
        }
        if self.layer.is_some_and(|layer| layer != item.layer) {
            return false;
        }
        match self.destination_id.as_deref() {
            Some(destination_id) => item.destination_id.as_deref() == Some(destination_id),
            None => true,
        }
    }
}
