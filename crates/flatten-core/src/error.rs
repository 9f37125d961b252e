use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlattenError {
    /// The document cannot be opened, the target index is out of range, or
    /// the page count changed since capture. Fatal to the save attempt.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// The overlay could not be produced or the original page could not be
    /// read. Fatal; the original document bytes are untouched.
    #[error("page flatten failed: {0}")]
    FlattenFailure(String),

    /// The rebuilt document failed its page count or page identity check.
    /// A logic bug, never retried.
    #[error("reassembly invariant violated: {0}")]
    ReassemblyInvariant(String),
}
