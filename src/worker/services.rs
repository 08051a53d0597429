//! Service and parameter lookup handed to a [`Worker`](crate::Worker).
//!
//! Lookups return [`ServiceError`] instead of panicking; [`serve`](crate::serve)
//! turns a failing [`Worker::prepare`](crate::Worker::prepare) into exit code 78.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ServiceError;

/// Registry of named services and configuration parameters.
#[derive(Clone, Default)]
pub struct ServiceContainer {
    services: HashMap<String, Arc<dyn Any + Send + Sync>>,
    parameters: HashMap<String, Value>,
}

impl fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut services: Vec<_> = self.services.keys().collect();
        services.sort();
        f.debug_struct("ServiceContainer")
            .field("services", &services)
            .field("parameters", &self.parameters)
            .finish()
    }
}

impl ServiceContainer {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service` under `id`, replacing any previous one.
    pub fn register<T: Any + Send + Sync>(
        &mut self,
        id: impl Into<String>,
        service: T,
    ) -> &mut Self {
        self.services.insert(id.into(), Arc::new(service));
        self
    }

    /// Looks up a service.
    pub fn get<T: Any + Send + Sync>(&self, id: &str) -> Result<Arc<T>, ServiceError> {
        let service = self
            .services
            .get(id)
            .ok_or_else(|| ServiceError::ServiceNotFound { id: id.to_string() })?;
        Arc::clone(service)
            .downcast::<T>()
            .map_err(|_| ServiceError::TypeMismatch { id: id.to_string() })
    }

    /// Returns `true` if a service is registered under `id`.
    pub fn has(&self, id: &str) -> bool {
        self.services.contains_key(id)
    }

    /// Sets a parameter, replacing any previous value.
    ///
    /// Fails with [`ServiceError::InvalidParameter`] if `value` cannot be
    /// represented as JSON; the previous value is then kept.
    pub fn set_parameter(
        &mut self,
        name: impl Into<String>,
        value: impl Serialize,
    ) -> Result<&mut Self, ServiceError> {
        let name = name.into();
        let value = serde_json::to_value(value).map_err(|e| ServiceError::InvalidParameter {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        self.parameters.insert(name, value);
        Ok(self)
    }

    /// Reads a parameter as `T`.
    pub fn parameter<T: DeserializeOwned>(&self, name: &str) -> Result<T, ServiceError> {
        let value = self
            .parameters
            .get(name)
            .ok_or_else(|| ServiceError::ParameterNotFound {
                name: name.to_string(),
            })?;
        T::deserialize(value).map_err(|_| ServiceError::TypeMismatch {
            id: name.to_string(),
        })
    }
}
