use wasm_bindgen::JsValue;

/// A document that does not conform to the TCX v2 schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("at byte {position}: {message}")]
pub struct SchemaViolation {
    pub position: u64,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Schema validation failed {0}")]
    SchemaValidation(SchemaViolation),

    #[error("Invalid value '{value}' in <{element}>")]
    FieldParse { element: &'static str, value: String },

    #[error("Missing <{element}> in <{parent}>")]
    MissingElement {
        parent: &'static str,
        element: &'static str,
    },

    #[error("Missing attribute '{attribute}' on <{element}>")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SchemaViolation> for DecodeError {
    fn from(v: SchemaViolation) -> Self {
        Self::SchemaValidation(v)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML write error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Track point source failed: {0}")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<DecodeError> for JsValue {
    fn from(e: DecodeError) -> Self {
        JsValue::from_str(&e.to_string())
    }
}

impl From<EncodeError> for JsValue {
    fn from(e: EncodeError) -> Self {
        JsValue::from_str(&e.to_string())
    }
}
