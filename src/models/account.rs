use serde::{Deserialize, Serialize};

/// Account profile as returned by the backend.
///
/// Replaced wholesale on every successful profile fetch or update, never
/// merged field-by-field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(rename = "vehicle_no")]
    pub vehicle_number: String,
}

/// Partial profile update; absent fields are left untouched server-side.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "vehicle_no", skip_serializing_if = "Option::is_none")]
    pub vehicle_number: Option<String>,
}
