//! Per-request state threaded through every retrieval stage, the
//! explicit-struct analogue of the original's `QueryState` typed dict:
//! one value built once per dispatch and passed by reference to
//! whichever path the classifier picked, rather than each stage
//! re-deriving it from a handful of loose arguments.

use crate::config::{CostEstimatorConfig, RetrievalConfig};
use crate::model::SecurityPrincipal;
use crate::traits::GraphStore;

pub struct RetrievalContext<'a> {
    pub graph: &'a dyn GraphStore,
    pub principal: &'a SecurityPrincipal,
    pub retrieval_config: &'a RetrievalConfig,
    pub cost_config: &'a CostEstimatorConfig,
    pub default_deny_untagged: bool,
}
