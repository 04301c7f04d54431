//! User-defined parameters of one joining operation.

use serde::{Deserialize, Serialize};

/// Parameters handed down by the join configuration layer.
///
/// Passed explicitly to the operations that need them; nothing in the join
/// engine reads process-wide settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinParam {
    /// Number of the joining operation (used to tag log lines).
    pub num: u32,
    /// 0 is silent; higher values log more detail.
    pub verbosity: i32,
    /// Tolerance sphere radius as a fraction of the shortest incident edge.
    pub fraction: f64,
}

impl Default for JoinParam {
    fn default() -> Self {
        Self {
            num: 1,
            verbosity: 0,
            fraction: 0.15,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let p: JoinParam = serde_json::from_str(r#"{ "verbosity": 2 }"#).unwrap();
        assert_eq!(p.verbosity, 2);
        assert_eq!(p.num, 1);
        assert_eq!(p.fraction, 0.15);
    }
}
