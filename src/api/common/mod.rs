pub(crate) mod non_streaming;
pub(crate) mod passthrough;
pub(crate) mod streaming;
