//! Typed records, one per collection.
//!
//! Each record type names its collection and an index enum, so a lookup on
//! an index the collection does not have fails to compile.

use crate::key::Key;
use crate::schema::{MEDICAL_IMAGES, MEDICAL_RECORDS, OFFLINE_ACTIONS, PATIENTS, USER_PREFERENCES};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// A secondary index a record type can be looked up by.
pub trait IndexField: Copy + Send + 'static {
    fn name(self) -> &'static str;
}

/// Index type for collections without secondary indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoIndex {}

impl IndexField for NoIndex {
    fn name(self) -> &'static str {
        match self {}
    }
}

/// A record stored in one collection.
pub trait Record: Serialize + DeserializeOwned + Send + 'static {
    const COLLECTION: &'static str;
    type Index: IndexField;
}

// ==================== Patients ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record for Patient {
    const COLLECTION: &'static str = PATIENTS;
    type Index = NoIndex;
}

// ==================== Medical records ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalRecord {
    pub id: String,
    pub patient_id: String,
    /// Free-form category such as "diagnosis" or "prescription".
    pub record_type: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MedicalRecordIndex {
    PatientId,
}

impl IndexField for MedicalRecordIndex {
    fn name(self) -> &'static str {
        match self {
            MedicalRecordIndex::PatientId => "patientId",
        }
    }
}

impl Record for MedicalRecord {
    const COLLECTION: &'static str = MEDICAL_RECORDS;
    type Index = MedicalRecordIndex;
}

// ==================== Medical images ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalImage {
    pub id: String,
    pub record_id: String,
    pub patient_id: String,
    /// Imaging modality, e.g. "CT" or "X-Ray".
    pub modality: String,
    pub mime_type: String,
    /// Where the image bytes live (data URL or remote URL).
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taken_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MedicalImageIndex {
    RecordId,
    PatientId,
}

impl IndexField for MedicalImageIndex {
    fn name(self) -> &'static str {
        match self {
            MedicalImageIndex::RecordId => "recordId",
            MedicalImageIndex::PatientId => "patientId",
        }
    }
}

impl Record for MedicalImage {
    const COLLECTION: &'static str = MEDICAL_IMAGES;
    type Index = MedicalImageIndex;
}

// ==================== User preferences ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    /// User id.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub settings: Map<String, JsonValue>,
}

impl Record for UserPreferences {
    const COLLECTION: &'static str = USER_PREFERENCES;
    type Index = NoIndex;
}

// ==================== Offline actions ====================

/// Sync state of a queued action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfflineStatus {
    Pending,
    Synced,
    Failed,
}

impl OfflineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OfflineStatus::Pending => "pending",
            OfflineStatus::Synced => "synced",
            OfflineStatus::Failed => "failed",
        }
    }
}

impl From<OfflineStatus> for Key {
    fn from(status: OfflineStatus) -> Self {
        Key::from(status.as_str())
    }
}

/// A write queued for the remote system while offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineAction {
    /// Generated on insert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// What to replay, e.g. "updatePatient".
    pub action: String,
    #[serde(default)]
    pub payload: JsonValue,
    pub status: OfflineStatus,
    /// Unix milliseconds when queued.
    pub timestamp: i64,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineActionIndex {
    Status,
    Timestamp,
}

impl IndexField for OfflineActionIndex {
    fn name(self) -> &'static str {
        match self {
            OfflineActionIndex::Status => "status",
            OfflineActionIndex::Timestamp => "timestamp",
        }
    }
}

impl Record for OfflineAction {
    const COLLECTION: &'static str = OFFLINE_ACTIONS;
    type Index = OfflineActionIndex;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MEDICAL_SCHEMA;
    use serde_json::json;

    #[test]
    fn test_index_names_exist_in_schema() {
        let records = MEDICAL_SCHEMA.collection(MedicalRecord::COLLECTION).unwrap();
        assert!(records.index(MedicalRecordIndex::PatientId.name()).is_ok());

        let images = MEDICAL_SCHEMA.collection(MedicalImage::COLLECTION).unwrap();
        for index in [MedicalImageIndex::RecordId, MedicalImageIndex::PatientId] {
            assert!(images.index(index.name()).is_ok());
        }

        let actions = MEDICAL_SCHEMA.collection(OfflineAction::COLLECTION).unwrap();
        for index in [OfflineActionIndex::Status, OfflineActionIndex::Timestamp] {
            assert!(actions.index(index.name()).is_ok());
        }
    }

    #[test]
    fn test_record_field_names() {
        let record = MedicalRecord {
            id: "m1".into(),
            patient_id: "p1".into(),
            record_type: "diagnosis".into(),
            title: "Checkup".into(),
            notes: None,
            doctor_id: None,
            created_at: DateTime::from_timestamp(0, 0).unwrap(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["patientId"], "p1");
        assert!(value.get("notes").is_none());
    }

    #[test]
    fn test_offline_action_shape() {
        let action = OfflineAction {
            id: None,
            action: "updatePatient".into(),
            payload: json!({"id": "p1"}),
            status: OfflineStatus::Pending,
            timestamp: 1_700_000_000_000,
            attempts: 0,
            last_error: None,
        };
        let value = serde_json::to_value(&action).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["status"], "pending");
        assert_eq!(Key::from(OfflineStatus::Failed), Key::from("failed"));
    }
}
