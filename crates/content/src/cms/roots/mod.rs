//! Path roots of a CMS authority.

mod category;
mod post;

pub use self::category::{CategoryPathRoot, Lookup};
pub use self::post::PostPathRoot;
