//! Session tests against an in-process fake terminal.

mod session;
