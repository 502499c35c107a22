use thiserror::Error;

/// Construction-time failures. Everything after construction follows the
/// two-tier model: soft failures log and return sentinels, broken heap
/// invariants panic.
#[derive(Debug, Error)]
pub enum HeapError {
    /// The class index resource was not provided by the loader. The heap
    /// cannot resolve any class without it.
    #[error("class index resource is missing")]
    MissingClassIndex,

    /// The class index resource does not divide into whole records.
    #[error("class index resource is truncated at {size} bytes")]
    MalformedClassIndex { size: usize },
}
