use crate::domain::company::{CompanyDetail, CompanyRef};
use serde::{Deserialize, Serialize};

/// Body of `GET {base}/all`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyListResponse {
    #[serde(default)]
    pub items: Option<Vec<CompanyRef>>,
}

/// Body of `GET {base}/id/{id}`. `item` is `null` for unknown ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyDetailResponse {
    #[serde(default)]
    pub item: Option<CompanyDetail>,
}
