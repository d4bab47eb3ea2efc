use serde::{Deserialize, Serialize};

use crate::openai::list_models::types::Model;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListObjectType {
    #[serde(rename = "list")]
    List,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ListModelsResponse {
    pub object: ListObjectType,
    pub data: Vec<Model>,
}

impl ListModelsResponse {
    pub fn ids(&self) -> Vec<&str> {
        self.data.iter().map(|model| model.id.as_str()).collect()
    }
}
