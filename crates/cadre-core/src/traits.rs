use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::ModelRequest;

/// Model-call collaborator: the only capability the core consumes.
///
/// Implementations return the structured JSON the model produced. Callers
/// must treat that value as untrusted and check it against `request.schema`
/// before it enters the data model.
pub trait ModelCaller: Send + Sync + 'static {
    fn call_model(&self, request: ModelRequest) -> BoxFuture<'_, Result<serde_json::Value>>;
}
