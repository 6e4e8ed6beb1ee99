//! Current-generation span codecs.

pub(crate) mod json;
pub(crate) mod proto;
