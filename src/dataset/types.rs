use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One benchmark instance joined with the model's prediction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkItem {
    pub instance_id: String,
    #[serde(default)]
    pub repo_key: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub pull_number: String,
    #[serde(default)]
    pub base_commit: String,
    #[serde(default)]
    pub test_cmd: String,
    #[serde(default)]
    pub pre_test_cmd: String,
    #[serde(default)]
    pub model_patch: String,
    #[serde(default)]
    pub test_patch: Option<String>,
    #[serde(default, rename = "PASS_TO_PASS", deserialize_with = "test_names")]
    pub pass_to_pass: Vec<String>,
    #[serde(default, rename = "FAIL_TO_PASS", deserialize_with = "test_names")]
    pub fail_to_pass: Vec<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default = "unknown", deserialize_with = "dimension")]
    pub programming_languages: String,
    #[serde(default = "unknown", deserialize_with = "dimension")]
    pub programming_scenarios: String,
    #[serde(default = "unknown", deserialize_with = "dimension")]
    pub task_types: String,
    #[serde(default)]
    pub questions: Value,
    #[serde(default)]
    pub checklists: Value,
    #[serde(default)]
    pub model_name_or_path: Option<String>,
}

impl WorkItem {
    /// Value of one of the three reporting dimensions
    pub fn dimension(&self, field: Dimension) -> &str {
        match field {
            Dimension::Language => &self.programming_languages,
            Dimension::Scenario => &self.programming_scenarios,
            Dimension::TaskType => &self.task_types,
        }
    }
}

/// Reporting and filtering dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Language,
    Scenario,
    TaskType,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::Language, Dimension::Scenario, Dimension::TaskType];

    pub fn field_name(&self) -> &'static str {
        match self {
            Dimension::Language => "programming_languages",
            Dimension::Scenario => "programming_scenarios",
            Dimension::TaskType => "task_types",
        }
    }
}

/// A prediction entry keyed by instance id in the predictions file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(default)]
    pub model_patch: String,
    #[serde(default)]
    pub model_name_or_path: Option<String>,
}

fn unknown() -> String {
    "unknown".to_string()
}

fn render(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => String::new(),
        other => render(other),
    })
}

fn dimension<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(render)
}

/// Test name lists arrive either as arrays or as JSON-encoded strings.
fn test_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let list = match value {
        Value::String(s) if s.trim().is_empty() => Value::Array(Vec::new()),
        Value::String(s) => serde_json::from_str(&s).map_err(serde::de::Error::custom)?,
        other => other,
    };
    match list {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items.into_iter().map(render).collect()),
        other => Err(serde::de::Error::custom(format!(
            "expected a list of test names, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_item_defaults() {
        let item: WorkItem = serde_json::from_str(r#"{"instance_id": "a-1"}"#).unwrap();
        assert_eq!(item.instance_id, "a-1");
        assert_eq!(item.programming_languages, "unknown");
        assert_eq!(item.task_types, "unknown");
        assert!(item.pass_to_pass.is_empty());
        assert!(item.test_patch.is_none());
        assert!(item.questions.is_null());
    }

    #[test]
    fn test_pull_number_accepts_integer() {
        let item: WorkItem =
            serde_json::from_str(r#"{"instance_id": "a", "pull_number": 12907}"#).unwrap();
        assert_eq!(item.pull_number, "12907");
    }

    #[test]
    fn test_test_names_from_encoded_string() {
        let item: WorkItem = serde_json::from_str(
            r#"{"instance_id": "a", "PASS_TO_PASS": "[\"t1\", \"t2\"]", "FAIL_TO_PASS": ["t3"]}"#,
        )
        .unwrap();
        assert_eq!(item.pass_to_pass, vec!["t1", "t2"]);
        assert_eq!(item.fail_to_pass, vec!["t3"]);
    }

    #[test]
    fn test_test_names_rejects_objects() {
        let result =
            serde_json::from_str::<WorkItem>(r#"{"instance_id": "a", "PASS_TO_PASS": {"x": 1}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_dimension_rendering() {
        let item: WorkItem = serde_json::from_str(
            r#"{"instance_id": "a", "programming_languages": "Python", "task_types": 3}"#,
        )
        .unwrap();
        assert_eq!(item.dimension(Dimension::Language), "Python");
        assert_eq!(item.dimension(Dimension::TaskType), "3");
        assert_eq!(item.dimension(Dimension::Scenario), "unknown");
    }
}
