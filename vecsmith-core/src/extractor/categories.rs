//! TSVC benchmark categories.

/// Category recorded for functions outside the curated table.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Curated benchmark functions and the dependence pattern each exercises, in run order.
pub const CURATED_FUNCTIONS: &[(&str, &str)] = &[
    ("s112", "linear_dependence"),
    ("s1113", "linear_dependence"),
    ("s114", "linear_dependence"),
    ("s115", "linear_dependence"),
    ("s116", "linear_dependence"),
    ("s123", "induction_variable"),
    ("s126", "induction_variable"),
    ("s131", "global_dataflow"),
    ("s132", "global_dataflow"),
    ("s141", "nonlinear_dependence"),
    ("s161", "control_flow"),
    ("s1161", "control_flow"),
    ("s211", "statement_reordering"),
    ("s212", "statement_reordering"),
    ("s1213", "statement_reordering"),
    ("s221", "loop_distribution"),
    ("s222", "loop_distribution"),
    ("s231", "loop_interchange"),
    ("s232", "loop_interchange"),
    ("s233", "loop_interchange"),
    ("s2233", "loop_interchange"),
    ("s235", "loop_interchange"),
    ("s241", "node_splitting"),
    ("s242", "node_splitting"),
    ("s244", "node_splitting"),
    ("s1244", "node_splitting"),
    ("s2251", "scalar_expansion"),
    ("s256", "array_expansion"),
    ("s258", "scalar_expansion"),
    ("s261", "scalar_expansion"),
    ("s275", "control_flow"),
    ("s277", "control_flow"),
    ("s281", "crossing_thresholds"),
    ("s291", "loop_peeling"),
    ("s292", "loop_peeling"),
    ("s293", "loop_peeling"),
    ("s2111", "wavefronts"),
    ("s31111", "reductions"),
    ("s318", "reductions"),
    ("s3110", "reductions"),
    ("s3112", "reductions"),
    ("s321", "recurrences"),
    ("s322", "recurrences"),
    ("s323", "recurrences"),
    ("s332", "search_loops"),
    ("s341", "packing"),
    ("s342", "packing"),
    ("s343", "packing"),
    ("s442", "non_logical_ifs"),
    ("s451", "intrinsics"),
    ("s481", "non_local_gotos"),
    ("s482", "non_local_gotos"),
];

/// Category of `function`, or [`UNCATEGORIZED`].
pub fn category_for(function: &str) -> &'static str {
    CURATED_FUNCTIONS
        .iter()
        .find(|(name, _)| *name == function)
        .map(|(_, category)| *category)
        .unwrap_or(UNCATEGORIZED)
}

/// Names of the curated functions, in run order.
pub fn curated_function_names() -> Vec<String> {
    CURATED_FUNCTIONS
        .iter()
        .map(|(name, _)| name.to_string())
        .collect()
}
