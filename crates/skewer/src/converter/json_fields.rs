use std::path::Path;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info};
use crate::config::PluginArgs;
use crate::context::RequestContext;
use crate::error::{PipelineError, Result};
use crate::message::{APPLICATION_JSON, Payload, Status, WireMessage};
use crate::tensor::{NamedTensorList, TensorHandle};
use super::Converter;

/// Reads numeric fields of a JSON request into scalar tensors and writes the
/// first output tensor back as a one-field JSON object.
///
/// With the default arguments a request `{"a": 1.0, "b": 2.0}` becomes the
/// scalars `a` and `b`, and an output scalar `3.0` becomes `{"c":3.0}`.
///
/// Arguments:
/// - `fields` - input field names, in tensor order (default `["a", "b"]`)
/// - `output_field` - response field name (default `"c"`)
#[derive(Debug, Clone)]
pub struct JsonFieldsConverter {
    fields: Vec<String>,
    output_field: String,
}

impl Default for JsonFieldsConverter {
    fn default() -> Self {
        Self {
            fields: vec!["a".to_string(), "b".to_string()],
            output_field: "c".to_string(),
        }
    }
}

impl JsonFieldsConverter {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_media_type(request: &WireMessage) -> Result<()> {
        // structured payloads need no media type
        if matches!(request.payload(), Payload::Fields(_)) {
            return Ok(());
        }
        let content_type = request.content_type().unwrap_or_default();
        let media_type = content_type.split(';').next().unwrap_or_default().trim();
        if !media_type.eq_ignore_ascii_case(APPLICATION_JSON) {
            return Err(PipelineError::input(format!("Unsupported media type: {}", content_type)));
        }
        Ok(())
    }

    fn read_fields(&self, request: &WireMessage) -> Result<NamedTensorList> {
        Self::check_media_type(request)?;
        let body = request
            .json_body()
            .map_err(|_| PipelineError::input("Parse json failed."))?;
        let mut tensors = NamedTensorList::new();
        for field in &self.fields {
            let value = body
                .get(field)
                .and_then(Value::as_f64)
                .ok_or_else(|| PipelineError::input("Json format error."))?;
            tensors.push(TensorHandle::scalar(field.as_str(), value as f32));
        }
        Ok(tensors)
    }
}

#[async_trait]
impl Converter for JsonFieldsConverter {
    fn name(&self) -> &str {
        "json_fields"
    }

    fn init(&mut self, path: &Path, args: &PluginArgs) -> Result<()> {
        if let Some(fields) = args.optional::<Vec<String>>("fields")? {
            if fields.is_empty() {
                return Err(PipelineError::config("arg `fields` must name at least one field"));
            }
            self.fields = fields;
        }
        if let Some(output_field) = args.optional::<String>("output_field")? {
            self.output_field = output_field;
        }
        info!(path = %path.display(), fields = ?self.fields, output = %self.output_field, "json_fields converter init");
        Ok(())
    }

    async fn preprocess(&self, request: &WireMessage, ctx: &mut RequestContext) -> Result<NamedTensorList> {
        let tensors = self.read_fields(request).map_err(|err| ctx.fail(err))?;
        debug!(request_id = %ctx.request_id(), names = ?tensors.names(), "json_fields preprocess");
        Ok(tensors)
    }

    async fn postprocess(&self, outputs: NamedTensorList, ctx: &mut RequestContext) -> Result<WireMessage> {
        let Some(first) = outputs.first() else {
            return Err(ctx.fail(PipelineError::output("Infer out is empty.")));
        };
        let value = first
            .payload()
            .as_scalar()
            .map_err(|err| ctx.fail(PipelineError::output(format!("`{}` is not a scalar: {}", first.name(), err))))?;

        let mut body = Map::new();
        body.insert(self.output_field.clone(), Value::from(f64::from(value)));
        let response = WireMessage::text(Value::Object(body).to_string())
            .with_status(Status::OK)
            .with_content_type(APPLICATION_JSON);
        Ok(response)
    }
}
