/*!
 * Scripts and their executors.
 *
 * A script is opaque to the engine. An executor runs it with a set of
 * parameters and yields the records it produced; scripts that need the device
 * reach it through a channel they captured.
 */
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use devlink_core::record::Record;
use devlink_core::types::{Id, Value};

use crate::error::Result;

/// Named parameters passed to a script run
pub type Parameters = HashMap<String, Value>;

/// An opaque, compiled device script
#[derive(Clone, PartialEq, Eq)]
pub struct Script {
    id: Id,
    source: Arc<str>,
}

impl Script {
    /// Create a script from its source text
    pub fn new<I: Into<Id>, S: AsRef<str>>(id: I, source: S) -> Self {
        Self {
            id: id.into(),
            source: Arc::from(source.as_ref()),
        }
    }

    /// Script identifier
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Script source
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("id", &self.id)
            .field("len", &self.source.len())
            .finish()
    }
}

/// Runs scripts
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Run `script` once and return the records it produced
    async fn execute(&self, script: &Script, parameters: &Parameters) -> Result<Vec<Record>>;
}

type ScriptFn = dyn Fn(Script, Parameters) -> BoxFuture<'static, Result<Vec<Record>>> + Send + Sync;

/// Executor backed by a closure
pub struct FnExecutor {
    run: Box<ScriptFn>,
}

impl FnExecutor {
    /// Wrap a closure that receives the script and its parameters
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(Script, Parameters) -> BoxFuture<'static, Result<Vec<Record>>> + Send + Sync + 'static,
    {
        Self { run: Box::new(run) }
    }

    /// Wrap in an `Arc` ready to share between operations
    pub fn shared(self) -> Arc<dyn ScriptExecutor> {
        Arc::new(self)
    }
}

impl fmt::Debug for FnExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnExecutor")
    }
}

#[async_trait]
impl ScriptExecutor for FnExecutor {
    async fn execute(&self, script: &Script, parameters: &Parameters) -> Result<Vec<Record>> {
        (self.run)(script.clone(), parameters.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devlink_core::attribute::{Attribute, AttributeType};
    use futures::FutureExt;

    #[tokio::test]
    async fn test_fn_executor_passes_parameters() {
        let executor = FnExecutor::new(|script, params| {
            async move {
                let unit = params.get("unit").cloned().unwrap_or_default();
                let record = Record::builder()
                    .set(Attribute::new("script.id", AttributeType::String), script.id().as_str())
                    .set(Attribute::new("script.unit", AttributeType::String), unit)
                    .build();
                Ok(vec![record])
            }
            .boxed()
        });

        let mut params = Parameters::new();
        params.insert("unit".to_string(), Value::from("C"));
        let records = executor.execute(&Script::new("read", "READ 1"), &params).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("script.id").unwrap().as_str(), Some("read"));
        assert_eq!(records[0].get("script.unit").unwrap().as_str(), Some("C"));
    }
}
