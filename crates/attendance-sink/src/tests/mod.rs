//! HTTP sink tests against an in-process responder.
