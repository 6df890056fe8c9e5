use std::any::{Any, type_name};
use crate::error::{PipelineError, Result};

/// A single typed slot a converter uses to hand side data from pre- to
/// post-process of the same request.
///
/// The slot is written once. Reads check the stored type explicitly; reading
/// an empty slot or asking for the wrong type is a [`PipelineError::Context`].
#[derive(Default)]
pub struct UserData {
    value: Option<Box<dyn Any + Send + Sync>>,
    type_name: Option<&'static str>,
}

impl UserData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    pub fn put<T: Any + Send + Sync>(&mut self, value: T) -> Result<()> {
        if let Some(existing) = self.type_name {
            return Err(PipelineError::context(format!(
                "user data already holds a `{}`", existing
            )));
        }
        self.value = Some(Box::new(value));
        self.type_name = Some(type_name::<T>());
        Ok(())
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Result<&T> {
        let Some(value) = self.value.as_ref() else {
            return Err(PipelineError::context("user data read before it was written"));
        };
        value.downcast_ref::<T>().ok_or_else(|| self.wrong_type::<T>())
    }

    /// Moves the value out. The slot stays written, so it cannot be filled again.
    pub fn take<T: Any + Send + Sync>(&mut self) -> Result<T> {
        let Some(value) = self.value.take() else {
            return Err(PipelineError::context("user data read before it was written"));
        };
        match value.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(value) => {
                self.value = Some(value);
                Err(self.wrong_type::<T>())
            }
        }
    }

    fn wrong_type<T>(&self) -> PipelineError {
        PipelineError::context(format!(
            "user data holds a `{}`, not a `{}`",
            self.type_name.unwrap_or("<none>"),
            type_name::<T>()
        ))
    }
}

impl std::fmt::Debug for UserData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserData")
            .field("type_name", &self.type_name)
            .field("present", &self.value.is_some())
            .finish()
    }
}
