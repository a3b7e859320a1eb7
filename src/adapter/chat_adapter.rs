use indexmap::IndexMap;
use serde_json::Value;

use crate::core::errors::AdapterError;
use crate::core::lm::{Chat, Message};
use crate::core::signature::{FieldSpec, Signature};
use crate::data::{Demo, FieldValues, Prediction};

const FIELD_HEADER_OPEN: &str = "[[ ## ";
const COMPLETED_MARKER: &str = "[[ ## completed ## ]]";

/// Renders a signature, demos, and inputs into provider messages, and parses
/// completions back into structured outputs.
///
/// Every field is serialized under a `[[ ## <field_name> ## ]]` header on its
/// own line, which makes the rendering deterministic and round-trippable:
/// parsing a completion that echoes the output headers recovers the field map.
#[derive(Default, Clone, Debug)]
pub struct ChatAdapter;

impl ChatAdapter {
    pub fn format(
        &self,
        signature: &Signature,
        demos: &[Demo],
        inputs: &FieldValues,
    ) -> Result<Chat, AdapterError> {
        if signature.output_fields().is_empty() {
            return Err(AdapterError::NoOutputFields);
        }

        let mut chat = Chat::default();
        chat.push(Message::system(self.format_system_message(signature)));

        for demo in demos {
            chat.push(Message::user(self.format_field_block(
                signature.input_fields(),
                &demo.data,
            )));
            chat.push(Message::assistant(
                self.format_assistant_message(signature, &demo.data),
            ));
        }

        chat.push(Message::user(self.format_user_message(signature, inputs)));
        Ok(chat)
    }

    pub fn parse(
        &self,
        signature: &Signature,
        completion: &str,
    ) -> Result<Prediction, AdapterError> {
        let output_fields = signature.output_fields();
        if output_fields.is_empty() {
            return Err(AdapterError::NoOutputFields);
        }

        let mut data = FieldValues::new();
        for field_name in output_fields.keys() {
            let header = field_header(field_name);
            if let Some(position) = completion.find(&header) {
                let after = &completion[position + header.len()..];
                let value = after
                    .split(FIELD_HEADER_OPEN)
                    .next()
                    .unwrap_or_default()
                    .trim();
                data.insert(field_name.clone(), Value::String(value.to_string()));
            }
        }

        if data.is_empty() {
            // A bare completion is acceptable for a single output field.
            if output_fields.len() == 1 {
                let field_name = output_fields.keys().next().cloned().unwrap_or_default();
                data.insert(field_name, Value::String(completion.trim().to_string()));
                return Ok(Prediction::new(data));
            }
            return Err(AdapterError::MalformedResponse {
                expected: output_fields.len(),
                raw_response: completion.to_string(),
            });
        }

        for field_name in output_fields.keys() {
            if !data.contains_key(field_name) {
                return Err(AdapterError::MissingField {
                    field: field_name.clone(),
                    raw_response: completion.to_string(),
                });
            }
        }

        Ok(Prediction::new(data))
    }

    /// Serializes output fields the way a well-formed completion looks,
    /// ending with the `completed` marker. Demos render their assistant turn
    /// with this; deterministic clients can use it to fabricate completions.
    pub fn format_assistant_message(&self, signature: &Signature, fields: &FieldValues) -> String {
        let mut message = String::new();
        for field_name in signature.output_fields().keys() {
            if let Some(value) = fields.get(field_name) {
                message.push_str(&format!(
                    "{}\n{}\n\n",
                    field_header(field_name),
                    render_value(value)
                ));
            }
        }
        message.push_str(COMPLETED_MARKER);
        message
    }

    fn format_system_message(&self, signature: &Signature) -> String {
        let field_description = self.format_field_description(signature);
        let field_structure = self.format_field_structure(signature);
        let task_description = self.format_task_description(signature);

        format!("{field_description}\n{field_structure}\n{task_description}")
    }

    fn format_field_description(&self, signature: &Signature) -> String {
        let input_field_description = field_attribute_list(signature.input_fields());
        let output_field_description = field_attribute_list(signature.output_fields());

        format!(
            "Your input fields are:\n{input_field_description}\nYour output fields are:\n{output_field_description}"
        )
    }

    fn format_field_structure(&self, signature: &Signature) -> String {
        let input_field_structure = field_structure(signature.input_fields());
        let output_field_structure = field_structure(signature.output_fields());

        format!(
            "All interactions will be structured in the following way, with the appropriate values filled in.\n\n{input_field_structure}{output_field_structure}{COMPLETED_MARKER}\n"
        )
    }

    fn format_task_description(&self, signature: &Signature) -> String {
        let instruction = if signature.instruction.is_empty() {
            format!(
                "Given the fields `{}`, produce the fields `{}`.",
                signature
                    .input_fields()
                    .keys()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
                signature
                    .output_fields()
                    .keys()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        } else {
            signature.instruction.clone()
        };

        format!("In adhering to this structure, your objective is:\n\t{instruction}")
    }

    fn format_user_message(&self, signature: &Signature, inputs: &FieldValues) -> String {
        let input_block = self.format_field_block(signature.input_fields(), inputs);

        let mut output_names = signature.output_fields().keys();
        let first = output_names.next().cloned().unwrap_or_default();
        let mut directive = format!(
            "Respond with the corresponding output fields, starting with the field `{first}`,"
        );
        for field_name in output_names {
            directive.push_str(&format!(" then `{field_name}`,"));
        }
        directive.push_str(" and then ending with the marker for `completed`.");

        format!("{input_block}{directive}")
    }

    fn format_field_block(
        &self,
        declared: &IndexMap<String, FieldSpec>,
        values: &FieldValues,
    ) -> String {
        let mut block = String::new();
        for field_name in declared.keys() {
            if let Some(value) = values.get(field_name) {
                block.push_str(&format!(
                    "{}\n{}\n\n",
                    field_header(field_name),
                    render_value(value)
                ));
            }
        }
        block
    }
}

fn field_header(field_name: &str) -> String {
    format!("[[ ## {field_name} ## ]]")
}

fn field_attribute_list(fields: &IndexMap<String, FieldSpec>) -> String {
    let mut attributes = String::new();
    for (i, (field_name, spec)) in fields.iter().enumerate() {
        attributes.push_str(&format!("{}. `{field_name}`", i + 1));
        if !spec.desc.is_empty() {
            attributes.push_str(&format!(": {}", spec.desc));
        }
        attributes.push('\n');
    }
    attributes
}

fn field_structure(fields: &IndexMap<String, FieldSpec>) -> String {
    let mut structure = String::new();
    for field_name in fields.keys() {
        structure.push_str(&format!("{}\n{field_name}\n\n", field_header(field_name)));
    }
    structure
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
