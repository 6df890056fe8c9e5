//! Name to factory lookup for converters and inferers.

use std::collections::HashMap;
use crate::converter::{Converter, ImageClassifierConverter, JsonFieldsConverter, MaskedLmConverter};
use crate::error::{PipelineError, Result};
use crate::inferer::{Inferer, RnnGenerator, SumInferer};

type ConverterFactory = Box<dyn Fn() -> Box<dyn Converter> + Send + Sync>;
type InfererFactory = Box<dyn Fn() -> Box<dyn Inferer> + Send + Sync>;

/// Creates fresh, uninitialized plugin instances by name.
///
/// Converters and inferers live in separate namespaces, so a converter and an
/// inferer may share a name.
#[derive(Default)]
pub struct Registry {
    converters: HashMap<String, ConverterFactory>,
    inferers: HashMap<String, InfererFactory>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in plugin.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        // names are distinct, registration cannot fail
        let _ = registry.register_converter("json_fields", || Box::new(JsonFieldsConverter::new()));
        let _ = registry.register_converter("image_classifier", || Box::new(ImageClassifierConverter::new()));
        let _ = registry.register_converter("masked_lm", || Box::new(MaskedLmConverter::new()));
        let _ = registry.register_inferer("sum", || Box::new(SumInferer::new()));
        let _ = registry.register_inferer("rnn_generator", || Box::new(RnnGenerator::new()));
        registry
    }

    pub fn register_converter<F>(&mut self, name: impl Into<String>, factory: F) -> Result<()>
    where F: Fn() -> Box<dyn Converter> + Send + Sync + 'static
    {
        let name = name.into();
        if self.converters.contains_key(&name) {
            return Err(PipelineError::config(format!("converter `{}` is already registered", name)));
        }
        self.converters.insert(name, Box::new(factory));
        Ok(())
    }

    pub fn register_inferer<F>(&mut self, name: impl Into<String>, factory: F) -> Result<()>
    where F: Fn() -> Box<dyn Inferer> + Send + Sync + 'static
    {
        let name = name.into();
        if self.inferers.contains_key(&name) {
            return Err(PipelineError::config(format!("inferer `{}` is already registered", name)));
        }
        self.inferers.insert(name, Box::new(factory));
        Ok(())
    }

    pub fn create_converter(&self, name: &str) -> Result<Box<dyn Converter>> {
        self.converters
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| unknown("converter", name, self.converter_names()))
    }

    pub fn create_inferer(&self, name: &str) -> Result<Box<dyn Inferer>> {
        self.inferers
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| unknown("inferer", name, self.inferer_names()))
    }

    /// Registered converter names, sorted.
    pub fn converter_names(&self) -> Vec<&str> {
        sorted(self.converters.keys())
    }

    /// Registered inferer names, sorted.
    pub fn inferer_names(&self) -> Vec<&str> {
        sorted(self.inferers.keys())
    }
}

fn sorted<'a>(names: impl Iterator<Item = &'a String>) -> Vec<&'a str> {
    let mut names: Vec<&str> = names.map(String::as_str).collect();
    names.sort_unstable();
    names
}

fn unknown(kind: &str, name: &str, known: Vec<&str>) -> PipelineError {
    PipelineError::config(format!("unknown {} `{}`, known: [{}]", kind, name, known.join(", ")))
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("converters", &self.converter_names())
            .field("inferers", &self.inferer_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_builtins() {
        let registry = Registry::with_builtins();
        assert_eq!(registry.converter_names(), vec!["image_classifier", "json_fields", "masked_lm"]);
        assert_eq!(registry.inferer_names(), vec!["rnn_generator", "sum"]);
        assert_eq!(registry.create_converter("masked_lm").unwrap().name(), "masked_lm");
        assert!(registry.create_inferer("rnn_generator").unwrap().supports_messages());
    }

    #[test]
    fn test_unknown_name_lists_known() {
        let registry = Registry::with_builtins();
        let err = registry.create_inferer("resnet").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.message().contains("rnn_generator, sum"));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = Registry::with_builtins();
        let err = registry.register_inferer("sum", || Box::new(SumInferer::new())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        // the namespaces are separate
        registry.register_converter("sum", || Box::new(JsonFieldsConverter::new())).unwrap();
    }

    #[test]
    fn test_factories_create_fresh_instances() {
        let mut registry = Registry::new();
        registry.register_converter("fields", || Box::new(JsonFieldsConverter::new())).unwrap();
        let first = registry.create_converter("fields").unwrap();
        let second = registry.create_converter("fields").unwrap();
        assert!(!std::ptr::eq(
            first.as_ref() as *const dyn Converter as *const u8,
            second.as_ref() as *const dyn Converter as *const u8
        ));
    }
}
