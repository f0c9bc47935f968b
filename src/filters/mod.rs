//! Filter-Rule Matcher
//!
//! Loads AdBlock-style filter lists and answers "is this host blocked by
//! any rule, and by which list and rule?". Match results (including
//! misses) are memoized and the memo cache is persisted across runs.
//!
//! Rule precedence is the list load order (lexicographic file order, so
//! runs are reproducible), then rule order within a list.

mod list;
mod matcher;

pub use list::{list_name_from_file, FilterList, FilterRule};
pub use matcher::{FilterIndex, FilterMatch};
