use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::errors::SignatureError;
use crate::data::FieldValues;

#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub desc: String,
}

impl FieldSpec {
    pub fn new(desc: impl Into<String>) -> Self {
        Self { desc: desc.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Input,
    Output,
}

/// Declarative input/output contract for a program.
///
/// Signatures are immutable values: "modifying" one ([`with_instruction`],
/// [`append_field`], [`prepend_field`]) produces a new signature. Field names
/// are unique within each set and disjoint across the two sets; both
/// invariants are checked at construction.
///
/// [`with_instruction`]: Signature::with_instruction
/// [`append_field`]: Signature::append_field
/// [`prepend_field`]: Signature::prepend_field
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Signature {
    pub name: String,
    pub instruction: String,
    input_fields: IndexMap<String, FieldSpec>,
    output_fields: IndexMap<String, FieldSpec>,
}

impl Signature {
    pub fn new(
        name: impl Into<String>,
        instruction: impl Into<String>,
        input_fields: IndexMap<String, FieldSpec>,
        output_fields: IndexMap<String, FieldSpec>,
    ) -> Result<Self, SignatureError> {
        for field in input_fields.keys() {
            if output_fields.contains_key(field) {
                return Err(SignatureError::OverlappingField {
                    field: field.clone(),
                });
            }
        }

        Ok(Self {
            name: name.into(),
            instruction: instruction.into(),
            input_fields,
            output_fields,
        })
    }

    /// Parses the `"question, hint -> answer"` shorthand. Field descriptions
    /// are empty and the instruction is left blank (the adapter supplies the
    /// canonical fallback objective).
    pub fn parse(shorthand: &str) -> Result<Self, SignatureError> {
        let Some((inputs, outputs)) = shorthand.split_once("->") else {
            return Err(SignatureError::InvalidShorthand {
                raw: shorthand.to_string(),
            });
        };

        let parse_side = |side: &str| -> Result<IndexMap<String, FieldSpec>, SignatureError> {
            let mut fields = IndexMap::new();
            for name in side.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                if fields.insert(name.to_string(), FieldSpec::default()).is_some() {
                    return Err(SignatureError::DuplicateField {
                        field: name.to_string(),
                    });
                }
            }
            Ok(fields)
        };

        let input_fields = parse_side(inputs)?;
        let output_fields = parse_side(outputs)?;
        if input_fields.is_empty() || output_fields.is_empty() {
            return Err(SignatureError::InvalidShorthand {
                raw: shorthand.to_string(),
            });
        }

        Self::new(shorthand.trim(), "", input_fields, output_fields)
    }

    pub fn input_fields(&self) -> &IndexMap<String, FieldSpec> {
        &self.input_fields
    }

    pub fn output_fields(&self) -> &IndexMap<String, FieldSpec> {
        &self.output_fields
    }

    /// Checks that every declared input field is present. Unknown extra
    /// fields are permitted.
    pub fn validate_inputs(&self, inputs: &FieldValues) -> Result<(), SignatureError> {
        let fields = self.missing_from(&self.input_fields, inputs);
        if fields.is_empty() {
            Ok(())
        } else {
            Err(SignatureError::MissingInputs { fields })
        }
    }

    pub fn validate_outputs(&self, outputs: &FieldValues) -> Result<(), SignatureError> {
        let fields = self.missing_from(&self.output_fields, outputs);
        if fields.is_empty() {
            Ok(())
        } else {
            Err(SignatureError::MissingOutputs { fields })
        }
    }

    fn missing_from(
        &self,
        declared: &IndexMap<String, FieldSpec>,
        values: &FieldValues,
    ) -> Vec<String> {
        declared
            .keys()
            .filter(|field| !values.contains_key(*field))
            .cloned()
            .collect()
    }

    pub fn with_instruction(&self, instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            ..self.clone()
        }
    }

    pub fn append_field(
        &self,
        kind: FieldKind,
        name: impl Into<String>,
        spec: FieldSpec,
    ) -> Result<Self, SignatureError> {
        self.insert_field(kind, name.into(), spec, InsertAt::Back)
    }

    pub fn prepend_field(
        &self,
        kind: FieldKind,
        name: impl Into<String>,
        spec: FieldSpec,
    ) -> Result<Self, SignatureError> {
        self.insert_field(kind, name.into(), spec, InsertAt::Front)
    }

    fn insert_field(
        &self,
        kind: FieldKind,
        name: String,
        spec: FieldSpec,
        at: InsertAt,
    ) -> Result<Self, SignatureError> {
        if self.input_fields.contains_key(&name) || self.output_fields.contains_key(&name) {
            return Err(SignatureError::DuplicateField { field: name });
        }

        let mut next = self.clone();
        let side = match kind {
            FieldKind::Input => &mut next.input_fields,
            FieldKind::Output => &mut next.output_fields,
        };
        match at {
            InsertAt::Front => {
                side.insert_before(0, name, spec);
            }
            InsertAt::Back => {
                side.insert(name, spec);
            }
        }
        Ok(next)
    }
}

#[derive(Clone, Copy)]
enum InsertAt {
    Front,
    Back,
}

impl FromStr for Signature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Signature::parse(s)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}",
            self.input_fields
                .keys()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", "),
            self.output_fields
                .keys()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        )
    }
}
