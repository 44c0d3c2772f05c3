//! Generation request types and their wire bodies

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use std::str::FromStr;

/// Declared type of the form field being generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "text")]
    ShortText,
    #[serde(rename = "textarea")]
    LongText,
    #[serde(rename = "rich_text")]
    RichText,
    #[serde(rename = "json")]
    StructuredJson,
    #[serde(rename = "other")]
    Other,
}

impl FieldType {
    /// Wire name sent to the backend
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::ShortText => "text",
            FieldType::LongText => "textarea",
            FieldType::RichText => "rich_text",
            FieldType::StructuredJson => "json",
            FieldType::Other => "other",
        }
    }

    /// Whether generated text must be reduced to a JSON document on accept
    pub fn is_structured(&self) -> bool {
        matches!(self, FieldType::StructuredJson)
    }
}

impl FromStr for FieldType {
    type Err = Infallible;

    /// Map a content-type schema field type onto the enumeration
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "text" | "string" | "short_text" | "short-text" | "slug" | "email" | "url" => {
                FieldType::ShortText
            }
            "textarea" | "long_text" | "long-text" | "multiline" => FieldType::LongText,
            "rich_text" | "rich-text" | "richtext" | "wysiwyg" | "html" | "markdown" => {
                FieldType::RichText
            }
            "json" | "structured-json" | "structured_json" | "object" | "array" => {
                FieldType::StructuredJson
            }
            _ => FieldType::Other,
        })
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context sent with a free-form task request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    /// Display name of the content type
    pub content_type: String,
    /// Identifier of the content type
    pub content_type_id: String,
    /// Name of the field to generate
    pub target_field: String,
    /// Human-readable label of the field
    pub field_label: String,
    /// Current values of the whole form
    #[serde(default)]
    pub current_data: Value,
}

/// What the generation is for
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationTarget {
    /// A field of a stored content instance
    Instance {
        instance_id: String,
        field_name: String,
    },
    /// A free-form task with a parameter bag, used before an instance exists
    Task {
        task_description: String,
        context: TaskContext,
    },
}

/// Value object sent to start a stream
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub target: GenerationTarget,
    /// Agent (or agent config) to invoke. The caller has already checked it
    /// is allowed for the field.
    pub agent_id: String,
    pub field_type: FieldType,
    /// Example or schema, forwarded only for structured fields
    pub output_schema_hint: Option<String>,
}

#[derive(Serialize)]
struct TaskBody<'a> {
    agent_type: &'a str,
    task_description: &'a str,
    parameters: TaskParameters<'a>,
}

#[derive(Serialize)]
struct TaskParameters<'a> {
    content_type: &'a str,
    content_type_id: &'a str,
    target_field: &'a str,
    field_label: &'a str,
    field_type: FieldType,
    current_data: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_schema: Option<&'a str>,
}

impl GenerationRequest {
    /// Request generation of a stored instance's field
    pub fn for_instance(
        instance_id: impl Into<String>,
        field_name: impl Into<String>,
        agent_id: impl Into<String>,
        field_type: FieldType,
    ) -> Self {
        Self {
            target: GenerationTarget::Instance {
                instance_id: instance_id.into(),
                field_name: field_name.into(),
            },
            agent_id: agent_id.into(),
            field_type,
            output_schema_hint: None,
        }
    }

    /// Request generation through a free-form task description
    pub fn for_task(
        task_description: impl Into<String>,
        context: TaskContext,
        agent_id: impl Into<String>,
        field_type: FieldType,
    ) -> Self {
        Self {
            target: GenerationTarget::Task {
                task_description: task_description.into(),
                context,
            },
            agent_id: agent_id.into(),
            field_type,
            output_schema_hint: None,
        }
    }

    /// Attach an output schema hint
    pub fn with_output_schema(mut self, hint: impl Into<String>) -> Self {
        self.output_schema_hint = Some(hint.into());
        self
    }

    /// Name of the field being generated
    pub fn field_name(&self) -> &str {
        match &self.target {
            GenerationTarget::Instance { field_name, .. } => field_name,
            GenerationTarget::Task { context, .. } => &context.target_field,
        }
    }

    /// JSON body for the task shape; `None` for instance requests
    pub fn task_body(&self) -> Option<Value> {
        let GenerationTarget::Task {
            task_description,
            context,
        } = &self.target
        else {
            return None;
        };

        let output_schema = self
            .output_schema_hint
            .as_deref()
            .filter(|_| self.field_type.is_structured());

        let body = TaskBody {
            agent_type: &self.agent_id,
            task_description,
            parameters: TaskParameters {
                content_type: &context.content_type,
                content_type_id: &context.content_type_id,
                target_field: &context.target_field,
                field_label: &context.field_label,
                field_type: self.field_type,
                current_data: &context.current_data,
                output_schema,
            },
        };
        serde_json::to_value(body).ok()
    }

    /// Query parameters for the instance shape; empty for task requests
    pub fn instance_query(&self) -> Vec<(&'static str, String)> {
        let GenerationTarget::Instance { field_name, .. } = &self.target else {
            return Vec::new();
        };

        let mut query = vec![
            ("field_name", field_name.clone()),
            ("stream", "true".to_string()),
        ];
        if !self.agent_id.is_empty() {
            query.push(("agent_config_id", self.agent_id.clone()));
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task_context() -> TaskContext {
        TaskContext {
            content_type: "Lesson".into(),
            content_type_id: "7".into(),
            target_field: "objectives".into(),
            field_label: "Learning objectives".into(),
            current_data: json!({"title": "Fractions"}),
        }
    }

    #[test]
    fn test_task_body_shape() {
        let request = GenerationRequest::for_task(
            "Write learning objectives",
            task_context(),
            "content_writer",
            FieldType::LongText,
        );
        let body = request.task_body().unwrap();
        assert_eq!(
            body,
            json!({
                "agent_type": "content_writer",
                "task_description": "Write learning objectives",
                "parameters": {
                    "content_type": "Lesson",
                    "content_type_id": "7",
                    "target_field": "objectives",
                    "field_label": "Learning objectives",
                    "field_type": "textarea",
                    "current_data": {"title": "Fractions"}
                }
            })
        );
    }

    #[test]
    fn test_output_schema_only_for_structured_fields() {
        let structured = GenerationRequest::for_task(
            "Generate quiz",
            task_context(),
            "quiz_builder",
            FieldType::StructuredJson,
        )
        .with_output_schema(r#"{"questions": []}"#);
        let body = structured.task_body().unwrap();
        assert_eq!(body["parameters"]["output_schema"], json!(r#"{"questions": []}"#));
        assert_eq!(body["parameters"]["field_type"], json!("json"));

        let plain = GenerationRequest::for_task(
            "Generate quiz",
            task_context(),
            "quiz_builder",
            FieldType::RichText,
        )
        .with_output_schema("ignored");
        let body = plain.task_body().unwrap();
        assert!(body["parameters"].get("output_schema").is_none());
    }

    #[test]
    fn test_instance_query() {
        let request = GenerationRequest::for_instance("42", "summary", "3", FieldType::ShortText);
        assert!(request.task_body().is_none());
        assert_eq!(
            request.instance_query(),
            vec![
                ("field_name", "summary".to_string()),
                ("stream", "true".to_string()),
                ("agent_config_id", "3".to_string()),
            ]
        );
    }

    #[test]
    fn test_instance_query_without_agent() {
        let request = GenerationRequest::for_instance("42", "summary", "", FieldType::ShortText);
        assert_eq!(request.instance_query().len(), 2);
        assert_eq!(request.field_name(), "summary");
    }

    #[test]
    fn test_field_type_from_schema_names() {
        assert_eq!("string".parse::<FieldType>().unwrap(), FieldType::ShortText);
        assert_eq!("textarea".parse::<FieldType>().unwrap(), FieldType::LongText);
        assert_eq!("Markdown".parse::<FieldType>().unwrap(), FieldType::RichText);
        assert_eq!("json".parse::<FieldType>().unwrap(), FieldType::StructuredJson);
        assert_eq!("image".parse::<FieldType>().unwrap(), FieldType::Other);
    }

    #[test]
    fn test_field_type_wire_names_match_serde() {
        for ft in [
            FieldType::ShortText,
            FieldType::LongText,
            FieldType::RichText,
            FieldType::StructuredJson,
            FieldType::Other,
        ] {
            assert_eq!(serde_json::to_value(ft).unwrap(), json!(ft.as_str()));
        }
    }
}
