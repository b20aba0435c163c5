use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::Rng;

/// A 32-hex-character opaque job identifier, minted locally rather than
/// by Redis.
pub fn new_job_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// The invocation blob a job carries. Serialization of the target type,
/// method, parameter types, and arguments into these four fields is an
/// external concern; this crate only stores and moves the opaque strings
/// around.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Invocation {
    pub job_type: String,
    pub method: String,
    pub parameter_types: String,
    pub arguments: String,
}

/// The job record stored at `job:<id>`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JobData {
    pub invocation: Invocation,
    pub created_at: DateTime<Utc>,
    pub state: Option<String>,
    pub fetched: Option<DateTime<Utc>>,
    pub checked: Option<DateTime<Utc>>,
    pub parameters: HashMap<String, String>,
    /// Set when the invocation blob failed to deserialize. Carried here
    /// rather than thrown so the fetch loop isn't interrupted by a bad
    /// payload.
    pub load_error: Option<String>,
}

impl JobData {
    /// Flatten this record into the field/value pairs written to the
    /// `job:<id>` hash.
    pub fn to_hash_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("Type".to_string(), self.invocation.job_type.clone()),
            ("Method".to_string(), self.invocation.method.clone()),
            (
                "ParameterTypes".to_string(),
                self.invocation.parameter_types.clone(),
            ),
            ("Arguments".to_string(), self.invocation.arguments.clone()),
            ("CreatedAt".to_string(), self.created_at.to_rfc3339()),
        ];
        if let Some(state) = &self.state {
            fields.push(("State".to_string(), state.clone()));
        }
        if let Some(fetched) = &self.fetched {
            fields.push(("Fetched".to_string(), fetched.to_rfc3339()));
        }
        if let Some(checked) = &self.checked {
            fields.push(("Checked".to_string(), checked.to_rfc3339()));
        }
        for (k, v) in &self.parameters {
            fields.push((k.clone(), v.clone()));
        }
        fields
    }

    /// Rebuild a record from the raw `HGETALL` field map, surfacing a
    /// `load_error` instead of failing outright when `CreatedAt` is
    /// missing or malformed.
    pub fn from_hash_fields(mut fields: HashMap<String, String>) -> Self {
        let created_at = fields
            .remove("CreatedAt")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let invocation = Invocation {
            job_type: fields.remove("Type").unwrap_or_default(),
            method: fields.remove("Method").unwrap_or_default(),
            parameter_types: fields.remove("ParameterTypes").unwrap_or_default(),
            arguments: fields.remove("Arguments").unwrap_or_default(),
        };

        let state = fields.remove("State");
        let fetched = fields
            .remove("Fetched")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let checked = fields
            .remove("Checked")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let load_error = if created_at.is_none() {
            Some("missing or invalid CreatedAt field".to_string())
        } else {
            None
        };

        JobData {
            invocation,
            created_at: created_at.unwrap_or_else(Utc::now),
            state,
            fetched,
            checked,
            parameters: fields,
            load_error,
        }
    }
}

/// A single entry appended to `job:<id>:history`, and the snapshot
/// written to `job:<id>:state`.
#[derive(Clone, Debug, PartialEq)]
pub struct StateData {
    pub name: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub data: HashMap<String, String>,
}

impl StateData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: None,
            created_at: Utc::now(),
            data: HashMap::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Serialize as the JSON object appended to `:history`, matching the
    /// shared `JobHelper` contract: `State`, `Reason`, `CreatedAt`, plus
    /// the state's own serialized data.
    pub fn to_history_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("State".to_string(), serde_json::Value::String(self.name.clone()));
        obj.insert(
            "Reason".to_string(),
            self.reason
                .clone()
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null),
        );
        obj.insert(
            "CreatedAt".to_string(),
            serde_json::Value::String(self.created_at.to_rfc3339()),
        );
        for (k, v) in &self.data {
            obj.insert(k.clone(), serde_json::Value::String(v.clone()));
        }
        serde_json::Value::Object(obj)
    }

    /// Flatten into the hash fields written to `job:<id>:state`.
    pub fn to_state_hash_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![("State".to_string(), self.name.clone())];
        if let Some(reason) = &self.reason {
            fields.push(("Reason".to_string(), reason.clone()));
        }
        for (k, v) in &self.data {
            fields.push((k.clone(), v.clone()));
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_is_32_hex_chars() {
        let id = new_job_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn job_ids_are_distinct() {
        let a = new_job_id();
        let b = new_job_id();
        assert_ne!(a, b);
    }

    #[test]
    fn hash_round_trips_through_fields() {
        let mut job = JobData {
            invocation: Invocation {
                job_type: "MyApp.Jobs".to_string(),
                method: "Send".to_string(),
                parameter_types: "System.String".to_string(),
                arguments: "[\"hi\"]".to_string(),
            },
            created_at: Utc::now(),
            state: Some("Enqueued".to_string()),
            fetched: None,
            checked: None,
            parameters: HashMap::new(),
            load_error: None,
        };
        job.parameters.insert("RetryCount".to_string(), "0".to_string());

        let fields: HashMap<String, String> = job.to_hash_fields().into_iter().collect();
        let rebuilt = JobData::from_hash_fields(fields);

        assert_eq!(rebuilt.invocation, job.invocation);
        assert_eq!(rebuilt.state, job.state);
        assert!(rebuilt.load_error.is_none());
        assert_eq!(rebuilt.parameters.get("RetryCount"), Some(&"0".to_string()));
    }

    #[test]
    fn missing_created_at_surfaces_as_load_error() {
        let fields = HashMap::new();
        let job = JobData::from_hash_fields(fields);
        assert!(job.load_error.is_some());
    }
}
