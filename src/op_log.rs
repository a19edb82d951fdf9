use std::collections::HashMap;
use std::time::Instant;

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::error::ErrorKind;
use crate::AppError;

fn context_to_json(context: &HashMap<String, String>) -> Option<Value> {
    if context.is_empty() {
        None
    } else {
        let mut map = Map::with_capacity(context.len());
        for (key, value) in context {
            map.insert(key.clone(), Value::String(value.clone()));
        }
        Some(Value::Object(map))
    }
}

/// Failures the caller can fix by changing the request.
pub(crate) fn is_client_error(err: &AppError) -> bool {
    !matches!(
        err.kind(),
        ErrorKind::StorageUnavailable | ErrorKind::Internal
    )
}

/// Timing and outcome logging for one service operation.
pub(crate) struct LogScope {
    area: &'static str,
    cmd: &'static str,
    entity: String,
    owner_id: i64,
    start: Instant,
}

impl LogScope {
    pub fn new(area: &'static str, cmd: &'static str, entity: &str, owner_id: i64) -> Self {
        debug!(
            target: "kinboard",
            area,
            cmd,
            entity,
            owner_id,
            "op_enter"
        );
        Self {
            area,
            cmd,
            entity: entity.to_string(),
            owner_id,
            start: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn success(&self, row_count: usize) {
        info!(
            target: "kinboard",
            area = self.area,
            cmd = self.cmd,
            entity = self.entity.as_str(),
            owner_id = self.owner_id,
            elapsed_ms = self.elapsed_ms(),
            row_count,
            "op_success"
        );
    }

    pub fn fail(&self, err: &AppError) {
        let context = context_to_json(err.context()).unwrap_or(Value::Null);
        if is_client_error(err) {
            warn!(
                target: "kinboard",
                area = self.area,
                cmd = self.cmd,
                entity = self.entity.as_str(),
                owner_id = self.owner_id,
                code = err.code(),
                message = err.message(),
                context = %context,
                elapsed_ms = self.elapsed_ms(),
                "op_failure"
            );
        } else {
            error!(
                target: "kinboard",
                area = self.area,
                cmd = self.cmd,
                entity = self.entity.as_str(),
                owner_id = self.owner_id,
                code = err.code(),
                message = err.message(),
                context = %context,
                cause = ?err.cause(),
                elapsed_ms = self.elapsed_ms(),
                "op_failure"
            );
        }
    }

    /// Log the outcome and add the operation name to a failure.
    pub fn finish<T>(&self, result: Result<T, AppError>, rows: impl FnOnce(&T) -> usize) -> Result<T, AppError> {
        match result {
            Ok(value) => {
                self.success(rows(&value));
                Ok(value)
            }
            Err(err) => {
                let err = err
                    .with_context("operation", self.cmd)
                    .with_context("entity", self.entity.clone());
                self.fail(&err);
                Err(err)
            }
        }
    }
}
