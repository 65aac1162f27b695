mod attribute_value;
pub mod big_segments;
mod bucketing;
mod contexts;
mod detail;
mod eval;
mod flag;
mod operators;
mod requester;
mod rule;
mod segment;
mod semantic_version;
mod test_common;
mod util;
mod variation;

pub use attribute_value::*;
pub use big_segments::{
    BigSegmentStoreManager, BigSegmentStoreStatus, BigSegmentStoreStatusProvider,
    BigSegmentsStatus, MembershipResolver, MembershipResult,
};
pub use bucketing::*;
pub use contexts::attribute_reference::*;
pub use contexts::context::*;
pub use contexts::context_builder::*;
pub use detail::*;
pub use eval::*;
pub use flag::*;
pub use operators::*;
pub use requester::*;
pub use rule::*;
pub use segment::*;
pub use semantic_version::*;
pub use variation::*;
