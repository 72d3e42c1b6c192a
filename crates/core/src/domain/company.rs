use serde::{Deserialize, Deserializer, Serialize};

/// Entry of the upstream company list. Only the id is used, to address detail lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRef {
    #[serde(rename = "_id")]
    pub id: String,
}

/// Upstream detail record for one company.
///
/// The counters stay `Option` so that "field missing" and "field is zero" remain
/// distinguishable; a detail only counts toward the totals when both acceptance
/// counters are present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyDetail {
    #[serde(default, deserialize_with = "null_as_default")]
    pub fullname: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub shortname: String,
    #[serde(default)]
    pub student_register: Option<i64>,
    #[serde(default)]
    pub max_register: Option<i64>,
    #[serde(default)]
    pub student_accepted: Option<i64>,
    #[serde(default)]
    pub max_accepted_student: Option<i64>,
}

impl CompanyDetail {
    pub fn has_acceptance_counters(&self) -> bool {
        self.student_accepted.is_some() && self.max_accepted_student.is_some()
    }

    pub fn is_available(&self) -> bool {
        self.student_accepted.unwrap_or(0) < self.max_accepted_student.unwrap_or(0)
    }

    pub fn summary(&self) -> CompanySummary {
        CompanySummary {
            fullname: self.fullname.clone(),
            shortname: self.shortname.clone(),
            register_info: format!(
                "{}/{}",
                self.student_register.unwrap_or(0),
                self.max_register.unwrap_or(0)
            ),
            acceptance_info: format!(
                "{}/{}",
                self.student_accepted.unwrap_or(0),
                self.max_accepted_student.unwrap_or(0)
            ),
            is_available: self.is_available(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanySummary {
    pub fullname: String,
    pub shortname: String,
    /// `"{studentRegister}/{maxRegister}"`
    pub register_info: String,
    /// `"{studentAccepted}/{maxAcceptedStudent}"`
    pub acceptance_info: String,
    pub is_available: bool,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
