//! JSON-RPC method routing.
//!
//! | method              | params                    | result            |
//! |---------------------|---------------------------|-------------------|
//! | `subscribe`         | `{query}`                 | `{ast}` + pushes  |
//! | `unsubscribe`       | `{query}`                 | `{}`              |
//! | `unsubscribe_all`   |                           | `{}`              |
//! | `parse_query`       | `{query}`                 | `{ast}`           |
//! | `search_txs`        | `{query}`                 | `{ast}` + pushes  |
//! | `attributes`        | `{limit, offset}`         | `{keys}`          |
//! | `power_stream_info` |                           | `{version, node}` |

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::ServiceError;
use crate::session::{Outgoing, RequestId, ServiceContext, Session};

// ─── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: RequestId,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: RequestId::Number(id),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&ServiceError> for RpcError {
    fn from(e: &ServiceError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            data: e.data(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    fn ok(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: RequestId, error: &ServiceError) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

// ─── Param extraction ─────────────────────────────────────────────────────────

/// Named param, falling back to position `index` for array params.
fn param<'p>(params: &'p Value, name: &str, index: usize) -> Option<&'p Value> {
    params.get(name).or_else(|| params.get(index))
}

fn query_param(params: &Value) -> Result<&str, ServiceError> {
    match param(params, "query", 0) {
        Some(Value::String(q)) if !q.trim().is_empty() => Ok(q),
        Some(Value::String(_)) => Err(ServiceError::params("query must not be empty")),
        Some(_) => Err(ServiceError::params("query must be a string")),
        None => Err(ServiceError::params("missing required param: query")),
    }
}

fn count_param(params: &Value, name: &str, index: usize) -> Result<usize, ServiceError> {
    let value = param(params, name, index)
        .ok_or_else(|| ServiceError::params(format!("missing required param: {name}")))?;
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| ServiceError::params(format!("{name} must be a non-negative integer")))
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Routes JSON-RPC requests to the session that issued them.
#[derive(Clone)]
pub struct Router {
    ctx: ServiceContext,
}

impl Router {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    /// Open a session for a new connection.
    pub fn open_session(&self) -> (Session, mpsc::UnboundedReceiver<Outgoing>) {
        Session::new(self.ctx.clone())
    }

    pub async fn handle(&self, session: &mut Session, request: RpcRequest) -> RpcResponse {
        let RpcRequest { id, method, params } = request;
        match self.route(session, &id, &method, &params).await {
            Ok(result) => RpcResponse::ok(id, result),
            Err(e) if e.is_benign() => {
                debug!(%id, method = %method, reason = %e, "benign no-op");
                RpcResponse::ok(id, json!({}))
            }
            Err(e) => {
                debug!(%id, method = %method, error = %e, "request failed");
                RpcResponse::err(id, &e)
            }
        }
    }

    async fn route(
        &self,
        session: &mut Session,
        id: &RequestId,
        method: &str,
        params: &Value,
    ) -> Result<Value, ServiceError> {
        match method {
            "subscribe" => session.subscribe(id.clone(), query_param(params)?),
            "unsubscribe" => session.unsubscribe(query_param(params)?),
            "unsubscribe_all" => {
                session.unsubscribe_all();
                Ok(json!({}))
            }
            "parse_query" => session.parse_query(query_param(params)?),
            "search_txs" => session.search_txs(id.clone(), query_param(params)?),
            "attributes" => {
                let limit = count_param(params, "limit", 0)?;
                let offset = count_param(params, "offset", 1)?;
                let max = self.ctx.config.attributes_max_limit;
                if limit > max {
                    return Err(ServiceError::params(format!("limit must not exceed {max}")));
                }
                session.attributes(limit, offset).await
            }
            "power_stream_info" => Ok(session.power_stream_info()),
            other => Err(ServiceError::MethodNotFound(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_param_accepts_named_or_positional() {
        assert_eq!(query_param(&json!({ "query": "a=1" })).unwrap(), "a=1");
        assert_eq!(query_param(&json!(["a=1"])).unwrap(), "a=1");
        assert!(query_param(&json!({ "query": "  " })).is_err());
        assert!(query_param(&json!({ "query": 5 })).is_err());
        assert!(query_param(&Value::Null).is_err());
    }

    #[test]
    fn count_param_rejects_negative_and_fractional() {
        assert_eq!(count_param(&json!({ "limit": 10 }), "limit", 0).unwrap(), 10);
        assert!(count_param(&json!({ "limit": -1 }), "limit", 0).is_err());
        assert!(count_param(&json!({ "limit": 1.5 }), "limit", 0).is_err());
        assert!(count_param(&json!({ "limit": "10" }), "limit", 0).is_err());
        assert!(count_param(&json!({}), "limit", 0).is_err());
    }

    #[test]
    fn request_deserializes_without_params() {
        let req: RpcRequest =
            serde_json::from_value(json!({ "jsonrpc": "2.0", "id": 7, "method": "unsubscribe_all" }))
                .unwrap();
        assert_eq!(req.id, RequestId::Number(7));
        assert!(req.params.is_null());
    }
}
