/// Structural errors: configuration or pairing mistakes that must surface.
///
/// Data that a reader simply did not draw is never reported through this type.
#[derive(Debug, thiserror::Error)]
pub enum CompareError {
    #[error(
        "cannot compare cases of different studies: {case1} ({uid1}) vs {case2} ({uid2})"
    )]
    StudyMismatch {
        case1: String,
        uid1: String,
        case2: String,
        uid2: String,
    },

    #[error("cases are seen through different views: {view1} vs {view2}")]
    ViewMismatch { view1: String, view2: String },

    #[error("unknown view: {0}")]
    UnknownView(String),

    #[error("contour {contour} has no category mapping in view {view}")]
    UnmappedContour { view: String, contour: String },

    #[error("unknown category: {0}")]
    UnknownCategory(String),

    #[error("index not found: slice {slice}, phase {phase} in category {category}")]
    IndexNotFound {
        category: String,
        slice: usize,
        phase: usize,
    },
}
