use crate::error::{EngineError, Result};
use crate::models::Metric;
use crate::packed;

/// Whether a single progress value completes its goal.
///
/// Completion logs are complete at 100% regardless of `target`; count logs
/// need a positive target.
pub fn is_complete(metric: Metric, progress: i64, target: i64) -> Result<bool> {
    match metric {
        Metric::Completion => Ok(packed::decode(progress).is_complete()),
        Metric::Count => {
            if target <= 0 {
                return Err(EngineError::InvalidTarget(target));
            }
            Ok(progress >= target)
        }
    }
}
