use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use cadre_core::error::{CadreError, Result};
use cadre_core::traits::ModelCaller;
use cadre_core::types::ModelRequest;

/// Call the model under `timeout` and check the reply against the request's
/// schema before handing it back.
pub(crate) async fn call_checked(
    caller: &dyn ModelCaller,
    request: ModelRequest,
    timeout: Duration,
) -> Result<Value> {
    let role = request.role;
    let schema = request.schema.clone();

    let value = match tokio::time::timeout(timeout, caller.call_model(request)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(CadreError::ModelTimeout {
                role,
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    };

    if let Err(problems) = schema.check(&value) {
        debug!(%role, ?problems, "Model reply failed schema check");
        return Err(CadreError::InvalidModelResponse(format!(
            "{} reply: {}",
            role,
            problems.join("; ")
        )));
    }
    Ok(value)
}
