/// Catch-all query used when a gamer type has no dedicated angle.
pub const GENERAL_QUERY: &str = "overall impressions of the game quality and content";

/// Retrieval angles per gamer type. The first entry is the primary query the
/// engine uses for that type; the rest widen cache warmup coverage.
const GAMER_TYPE_QUERIES: [(&str, &[&str]); 8] = [
    (
        "ultimate_gamer",
        &[
            "is the game fun and worth playing at launch",
            "story quality and gameplay depth",
        ],
    ),
    (
        "all_round_enthusiast",
        &[
            "balanced review of strengths and weaknesses",
            "is the game worth the full price",
        ],
    ),
    (
        "cloud_gamer",
        &[
            "performance and optimization on low-end hardware",
            "frame rate drops and stuttering",
        ],
    ),
    (
        "conventional_player",
        &["is the game approachable for casual players"],
    ),
    (
        "hardware_enthusiast",
        &[
            "graphics quality ray tracing and benchmarks",
            "how the game runs on high-end PCs",
        ],
    ),
    (
        "popcorn_gamer",
        &["is the game entertaining to watch on streams"],
    ),
    (
        "backseat_gamer",
        &["does the game live up to the studio's earlier titles"],
    ),
    (
        "time_filler",
        &["is the game playable in short sessions"],
    ),
];

/// Primary retrieval query for a gamer type; unknown keys get the general
/// query.
pub fn primary_query_for(gamer_type: &str) -> &'static str {
    GAMER_TYPE_QUERIES
        .iter()
        .find(|(key, _)| *key == gamer_type)
        .and_then(|(_, queries)| queries.first().copied())
        .unwrap_or(GENERAL_QUERY)
}

/// Full template set (general + every per-type query), deduplicated, for
/// cache warmup before a simulation run.
pub fn all_queries() -> Vec<String> {
    let mut queries = vec![GENERAL_QUERY.to_string()];
    for (_, type_queries) in &GAMER_TYPE_QUERIES {
        for query in *type_queries {
            if !queries.iter().any(|q| q == query) {
                queries.push((*query).to_string());
            }
        }
    }
    queries
}
