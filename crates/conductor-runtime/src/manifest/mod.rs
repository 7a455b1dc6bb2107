//! Manifest resolvers: pure lookup tables built once from ordered catalogs
//!
//! Both resolvers merge the same way: walk the catalogs in order, then the
//! override maps in order, shallow-merging each into one flat map. Later
//! entries win, and overrides always outrank catalogs. A rebuilt manifest
//! replaces the old one wholesale; nothing is patched in place.

mod interaction;
mod topics;

pub use interaction::InteractionManifest;
pub use topics::TopicsManifest;
