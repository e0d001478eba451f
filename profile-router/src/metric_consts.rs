pub const ROUTED_IMMEDIATE: &str = "router.routed.immediate";
pub const ROUTED_BATCH: &str = "router.routed.batch";
pub const MALFORMED: &str = "router.malformed";
