use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("non-finite coordinate in {0}")]
    NonFinite(&'static str),

    #[error("invalid viewport: {0}")]
    InvalidViewport(&'static str),

    #[error("degenerate bounds: {0}")]
    DegenerateBounds(&'static str),

    #[error("stroke needs at least {expected} distinct points, got {actual}")]
    TooFewPoints { expected: usize, actual: usize },
}
