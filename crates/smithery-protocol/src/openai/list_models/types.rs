use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelObjectType {
    #[serde(rename = "model")]
    Model,
}

/// One catalog entry. `created` is the listing time; the upstream does not
/// publish release dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Model {
    pub id: String,
    pub object: ModelObjectType,
    pub created: i64,
    pub owned_by: String,
}
