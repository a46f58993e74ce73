use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single notification delivery request flowing through the queue.
///
/// Jobs are immutable once enqueued and round-trip losslessly through the
/// JSON wire format. Unknown fields are ignored on decode; absent fields
/// decode to their empty value so producers can omit what they don't use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationJob {
    /// Lookup key for the live push connection. Empty when the recipient has
    /// no push identity; the email path does not depend on it.
    #[serde(default)]
    pub recipient_user_id: String,

    /// Delivery address for the email path.
    #[serde(default)]
    pub to: String,

    #[serde(default)]
    pub subject: String,

    /// Selects the rendering template on the email provider side.
    #[serde(default)]
    pub template_name: String,

    /// Values interpolated into the template. Absent means empty.
    #[serde(default)]
    pub template_data: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_job() -> NotificationJob {
        let mut data = Map::new();
        data.insert("name".to_string(), json!("Ada"));
        data.insert("items".to_string(), json!([1, 2, 3]));
        NotificationJob {
            recipient_user_id: "user-42".to_string(),
            to: "ada@example.com".to_string(),
            subject: "Welcome".to_string(),
            template_name: "welcome_email".to_string(),
            template_data: data,
        }
    }

    #[test]
    fn test_job_round_trips_losslessly() {
        let job = sample_job();
        let encoded = serde_json::to_vec(&job).unwrap();
        let decoded: NotificationJob = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let raw = json!({
            "recipient_user_id": "user-1",
            "to": "a@b.com",
            "subject": "hi",
            "template_name": "t",
            "template_data": {"k": "v"},
            "some_future_field": 123
        });
        let decoded: NotificationJob = serde_json::from_value(raw).unwrap();
        assert_eq!(decoded.recipient_user_id, "user-1");
        assert_eq!(decoded.template_data.get("k"), Some(&json!("v")));
    }

    #[test]
    fn test_absent_template_data_decodes_empty() {
        let raw = json!({
            "to": "a@b.com",
            "subject": "hi",
            "template_name": "t"
        });
        let decoded: NotificationJob = serde_json::from_value(raw).unwrap();
        assert!(decoded.template_data.is_empty());
        assert!(decoded.recipient_user_id.is_empty());
    }

    #[test]
    fn test_nested_template_data_survives() {
        let raw = json!({
            "to": "a@b.com",
            "template_name": "t",
            "template_data": {"outer": {"inner": [true, null, "x"]}}
        });
        let decoded: NotificationJob = serde_json::from_value(raw.clone()).unwrap();
        let reencoded = serde_json::to_value(&decoded).unwrap();
        assert_eq!(
            reencoded["template_data"]["outer"],
            raw["template_data"]["outer"]
        );
    }
}
