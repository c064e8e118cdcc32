//! 🔌 Backends: where the real I/O happens.
//!
//! One backend today: an Elasticsearch-compatible cluster spoken to over HTTP.
//! Bulk submission, index settings, index create/delete, mapping, refresh. Every
//! call goes through the same retry loop and the same endpoint selector.
//!
//! 🦆 The duck is here because every file must have one. This is law.

pub(crate) mod elasticsearch;

pub(crate) use elasticsearch::{BulkTally, CallError, ElasticsearchClient, excerpt};
