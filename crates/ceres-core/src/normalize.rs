//! Mapping of raw CKAN `package_search` records into internal entities.
//!
//! Everything here is pure: no I/O, no clock. Nested payload fields are read
//! through [`RawRecord`], whose accessors return `Option`/`Result` explicitly
//! so that a JSON `null`, a missing key and a value of the wrong type all end
//! up as "absent" rather than as a falsy default.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};
use serde_json::{Map, Value};

use crate::models::{NewDataset, NewResource};
use crate::AppError;

/// Output of [`normalize`]: one dataset and the resources that could be keyed.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub dataset: NewDataset,
    pub resources: Vec<NewResource>,
    /// Resources dropped because they carry no usable `url`.
    pub skipped_resources: usize,
}

/// Read-only view over one JSON object of the catalog payload.
#[derive(Debug, Clone, Copy)]
pub struct RawRecord<'a> {
    fields: &'a Map<String, Value>,
}

impl<'a> RawRecord<'a> {
    /// Wraps a JSON value. Fails if it is not an object.
    pub fn new(value: &'a Value) -> Result<Self, AppError> {
        value
            .as_object()
            .map(|fields| Self { fields })
            .ok_or_else(|| AppError::ValidationError("record is not a JSON object".to_string()))
    }

    /// Value of `key`, with JSON `null` treated as absent.
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.fields.get(key).filter(|v| !v.is_null())
    }

    /// String value of `key`. Non-string values are absent.
    pub fn str_field(&self, key: &str) -> Option<&'a str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn string(&self, key: &str) -> Option<String> {
        self.str_field(key).map(str::to_string)
    }

    pub fn bool_field(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// Nested object under `key`, if it is one.
    pub fn object(&self, key: &str) -> Option<RawRecord<'a>> {
        self.get(key)
            .and_then(Value::as_object)
            .map(|fields| RawRecord { fields })
    }

    /// Array under `key`. Absent or null gives `Ok(None)`; any other
    /// non-array value is an error.
    pub fn array(&self, key: &str) -> Result<Option<&'a Vec<Value>>, AppError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Array(items)) => Ok(Some(items)),
            Some(_) => Err(AppError::ValidationError(format!(
                "field '{}' is not a list",
                key
            ))),
        }
    }

    /// Timestamp under `key`, parsed with [`parse_timestamp`].
    pub fn timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        self.str_field(key).and_then(parse_timestamp)
    }
}

/// Date-time layouts carrying a UTC offset. `%#z` takes `Z`, `+02`, `+0200`
/// and `+02:00`.
const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f%#z",
    "%Y-%m-%d %H:%M:%S%.f%#z",
    "%Y-%m-%dT%H:%M%#z",
    "%Y-%m-%d %H:%M%#z",
];

/// Date-time layouts without an offset, read as UTC.
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parses an ISO-8601 timestamp into a UTC instant.
///
/// Accepts RFC 3339, other offset spellings (`+0000`, `+02`), CKAN's naive
/// `YYYY-MM-DDTHH:MM[:SS[.f]]` (read as UTC) and bare dates (midnight UTC).
/// A comma is accepted as decimal separator. Anything else is `None`.
///
/// The result is truncated to microseconds, the precision of `TIMESTAMPTZ`,
/// so a stored value compares equal to a freshly parsed one.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim().replace(',', ".");
    if raw.is_empty() {
        return None;
    }
    parse_instant(&raw).map(|dt| dt.trunc_subsecs(6))
}

fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Extracts `display_name` from a tag/group list.
///
/// Entries without a string `display_name` are dropped. The list as a whole is
/// rejected only when it is not a list, or when it is non-empty and not a
/// single entry is usable.
fn display_names(record: &RawRecord<'_>, key: &str) -> Result<Vec<String>, AppError> {
    let Some(items) = record.array(key)? else {
        return Ok(Vec::new());
    };

    let names: Vec<String> = items
        .iter()
        .filter_map(|item| {
            item.as_object()
                .and_then(|obj| obj.get("display_name"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .collect();

    if names.is_empty() && !items.is_empty() {
        return Err(AppError::ValidationError(format!(
            "no entry of '{}' has a display_name",
            key
        )));
    }
    Ok(names)
}

fn normalize_resource(value: &Value) -> Option<NewResource> {
    let raw = value.as_object().map(|fields| RawRecord { fields })?;
    let url = raw.str_field("url").map(str::trim).filter(|u| !u.is_empty())?;

    Some(NewResource {
        name: raw.string("name"),
        description: raw.string("description"),
        format: raw.string("format"),
        url: url.to_string(),
        resource_type: raw.string("resource_type"),
    })
}

/// Maps one raw catalog record to a [`NormalizedRecord`].
///
/// # Errors
///
/// Returns `AppError::ValidationError` when the record is not an object, has
/// no usable `id`, or carries a malformed `tags`/`groups` list. Every other
/// missing or mistyped field is normalized to `None` / empty.
pub fn normalize(raw: &Value) -> Result<NormalizedRecord, AppError> {
    let record = RawRecord::new(raw)?;

    let ckan_id = record
        .str_field("id")
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::ValidationError("record has no 'id'".to_string()))?
        .to_string();

    let organization = record.object("organization");
    let tags = display_names(&record, "tags")?;
    let groups = display_names(&record, "groups")?;

    let dataset = NewDataset {
        name: record.string("name").unwrap_or_default(),
        title: record.string("title").unwrap_or_default(),
        notes: record.string("notes"),
        author: record.string("author"),
        author_email: record.string("author_email"),
        organization_id: organization.and_then(|org| org.string("id")),
        organization_title: organization.and_then(|org| org.string("title")),
        license_id: record.string("license_id"),
        license_title: record.string("license_title"),
        license_url: record.string("license_url"),
        metadata_created: record.timestamp("metadata_created"),
        metadata_modified: record.timestamp("metadata_modified"),
        state: record.string("state"),
        private: record.bool_field("private").unwrap_or(false),
        tags,
        groups,
        ckan_id,
    };

    let raw_resources = record.array("resources").unwrap_or(None);
    let mut resources = Vec::new();
    let mut skipped_resources = 0;
    for value in raw_resources.into_iter().flatten() {
        match normalize_resource(value) {
            Some(resource) => resources.push(resource),
            None => skipped_resources += 1,
        }
    }

    Ok(NormalizedRecord {
        dataset,
        resources,
        skipped_resources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn full_record() -> Value {
        json!({
            "id": "6d2f1a4e-0c1b-4a8e-9f0a-1b2c3d4e5f60",
            "name": "qualite-air",
            "title": "Qualité de l'air",
            "notes": "Mesures horaires",
            "author": "Ville",
            "author_email": "data@ville.qc.ca",
            "organization": {"id": "org-1", "title": "Ville de Montréal"},
            "license_id": "cc-by",
            "license_title": "Creative Commons Attribution",
            "license_url": "https://creativecommons.org/licenses/by/4.0/",
            "metadata_created": "2019-05-14T15:02:13.123456",
            "metadata_modified": "2024-02-01T08:00:00Z",
            "state": "active",
            "private": false,
            "tags": [{"display_name": "air"}, {"display_name": "environnement"}],
            "groups": [{"display_name": "Environnement"}],
            "resources": [
                {"url": "https://example.com/air.csv", "name": "CSV", "format": "CSV", "resource_type": "file"},
                {"name": "no url"}
            ]
        })
    }

    #[test]
    fn test_normalize_full_record() {
        let record = normalize(&full_record()).unwrap();
        let ds = &record.dataset;

        assert_eq!(ds.ckan_id, "6d2f1a4e-0c1b-4a8e-9f0a-1b2c3d4e5f60");
        assert_eq!(ds.name, "qualite-air");
        assert_eq!(ds.organization_id.as_deref(), Some("org-1"));
        assert_eq!(ds.organization_title.as_deref(), Some("Ville de Montréal"));
        assert_eq!(ds.tags, vec!["air", "environnement"]);
        assert_eq!(ds.groups, vec!["Environnement"]);
        assert_eq!(
            ds.metadata_modified,
            Some(Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap())
        );
        assert!(ds.metadata_created.is_some());
        assert!(!ds.private);

        assert_eq!(record.resources.len(), 1);
        assert_eq!(record.resources[0].format.as_deref(), Some("CSV"));
        assert_eq!(record.skipped_resources, 1);
    }

    #[test]
    fn test_null_organization_is_tolerated() {
        let mut raw = full_record();
        raw["organization"] = Value::Null;

        let ds = normalize(&raw).unwrap().dataset;
        assert!(ds.organization_id.is_none());
        assert!(ds.organization_title.is_none());
    }

    #[test]
    fn test_partial_organization() {
        let mut raw = full_record();
        raw["organization"] = json!({"title": "Only title"});

        let ds = normalize(&raw).unwrap().dataset;
        assert!(ds.organization_id.is_none());
        assert_eq!(ds.organization_title.as_deref(), Some("Only title"));
    }

    #[test]
    fn test_missing_id_is_validation_error() {
        let mut raw = full_record();
        raw.as_object_mut().unwrap().remove("id");
        assert!(matches!(normalize(&raw), Err(AppError::ValidationError(_))));

        raw["id"] = json!("   ");
        assert!(matches!(normalize(&raw), Err(AppError::ValidationError(_))));
    }

    #[test]
    fn test_non_object_record_is_validation_error() {
        assert!(matches!(
            normalize(&json!(["not", "a", "record"])),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_unparsable_timestamps_become_none() {
        let mut raw = full_record();
        raw["metadata_created"] = json!("yesterday");
        raw["metadata_modified"] = Value::Null;

        let ds = normalize(&raw).unwrap().dataset;
        assert!(ds.metadata_created.is_none());
        assert!(ds.metadata_modified.is_none());
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2020, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(parse_timestamp("2020-03-04T05:06:07"), Some(expected));
        assert_eq!(parse_timestamp("2020-03-04T05:06:07+00:00"), Some(expected));
        assert_eq!(parse_timestamp("2020-03-04T01:06:07-04:00"), Some(expected));
        assert_eq!(
            parse_timestamp("2020-03-04"),
            Some(Utc.with_ymd_and_hms(2020, 3, 4, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("not a date"), None);
    }

    #[test]
    fn test_parse_timestamp_offset_spellings() {
        let expected = Utc.with_ymd_and_hms(2020, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(parse_timestamp("2020-03-04T05:06:07+0000"), Some(expected));
        assert_eq!(parse_timestamp("2020-03-04T07:06:07+02"), Some(expected));
        assert_eq!(parse_timestamp("2020-03-04T00:06:07-0500"), Some(expected));
        assert_eq!(parse_timestamp("2020-03-04 05:06:07+00"), Some(expected));
    }

    #[test]
    fn test_parse_timestamp_without_seconds() {
        let expected = Utc.with_ymd_and_hms(2020, 3, 4, 5, 6, 0).unwrap();
        assert_eq!(parse_timestamp("2020-03-04T05:06"), Some(expected));
        assert_eq!(parse_timestamp("2020-03-04 05:06"), Some(expected));
        assert_eq!(parse_timestamp("2020-03-04T07:06+02:00"), Some(expected));
    }

    #[test]
    fn test_parse_timestamp_comma_fraction() {
        let expected = Utc.with_ymd_and_hms(2020, 3, 4, 5, 6, 7).unwrap()
            + chrono::Duration::milliseconds(500);
        assert_eq!(parse_timestamp("2020-03-04T05:06:07,5"), Some(expected));
        assert_eq!(parse_timestamp("2020-03-04T05:06:07,5Z"), Some(expected));
    }

    #[test]
    fn test_parse_timestamp_truncates_to_microseconds() {
        let parsed = parse_timestamp("2020-03-04T05:06:07.123456789Z").unwrap();
        assert_eq!(parsed.timestamp_subsec_nanos(), 123_456_000);
        assert_eq!(
            parse_timestamp("2020-03-04T05:06:07.123456789"),
            Some(parsed)
        );
    }

    #[test]
    fn test_timestamp_reparse_is_stable() {
        let mut raw = full_record();
        raw["metadata_modified"] = json!("2024-02-01T08:00:00.987654321+00:00");
        let first = normalize(&raw).unwrap().dataset;
        let second = normalize(&raw).unwrap().dataset;
        let stored = first.clone().into_dataset();
        assert_eq!(stored.to_new(), second);
        assert_eq!(
            first.metadata_modified.unwrap().timestamp_subsec_micros(),
            987_654
        );
    }

    #[test]
    fn test_malformed_tag_entries_are_omitted() {
        let mut raw = full_record();
        raw["tags"] = json!([{"display_name": "ok"}, {"name": "no display"}, "string"]);

        let ds = normalize(&raw).unwrap().dataset;
        assert_eq!(ds.tags, vec!["ok"]);
    }

    #[test]
    fn test_entirely_malformed_tag_list_is_rejected() {
        let mut raw = full_record();
        raw["tags"] = json!([{"name": "a"}, {"name": "b"}]);
        assert!(matches!(normalize(&raw), Err(AppError::ValidationError(_))));

        raw["tags"] = json!("air,eau");
        assert!(matches!(normalize(&raw), Err(AppError::ValidationError(_))));
    }

    #[test]
    fn test_absent_lists_are_empty() {
        let raw = json!({"id": "x"});
        let record = normalize(&raw).unwrap();
        assert!(record.dataset.tags.is_empty());
        assert!(record.dataset.groups.is_empty());
        assert!(record.resources.is_empty());
        assert_eq!(record.dataset.name, "");
        assert!(record.dataset.author_email.is_none());
    }

    #[test]
    fn test_duplicate_tags_are_kept_in_order() {
        let raw = json!({
            "id": "x",
            "tags": [{"display_name": "b"}, {"display_name": "a"}, {"display_name": "b"}]
        });
        assert_eq!(normalize(&raw).unwrap().dataset.tags, vec!["b", "a", "b"]);
    }

    #[test]
    fn test_private_flag() {
        let raw = json!({"id": "x", "private": true});
        assert!(normalize(&raw).unwrap().dataset.private);

        let raw = json!({"id": "x", "private": "yes"});
        assert!(!normalize(&raw).unwrap().dataset.private);
    }
}
