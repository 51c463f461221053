//! End-to-end tests at the collection and cursor level.
//!
//! Each test file covers a specific scenario against real files in a
//! temporary directory, with deterministic (seeded) inputs.

#![cfg(test)]

mod helpers;

mod test_bookmark;
mod test_concurrent_readers;
mod test_corruption;
mod test_deletes;
mod test_duplicate_key;
mod test_lock_timeout;
mod test_ordering;
mod test_overflow;
mod test_pagination;
mod test_rank;
mod test_regeneration;
mod test_sort_order;
mod test_stale_entries;
