//! Sync loop tests.
//!
//! All tests run a real SQLite store in a temp dir against scripted device
//! and sink mocks, one cycle at a time unless they exercise the loop itself.
