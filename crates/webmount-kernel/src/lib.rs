//! # webmount-kernel
//!
//! Remote web content as a filesystem namespace.
//!
//! A [`Namespace`] is a tree of modules answering six operations (stat, list,
//! open, read, write, truncate) by path. Content modules fetch their entries
//! through a [`ContentProvider`] and cache them with a TTL. Every remote call
//! goes through one shared [`Session`], which keeps the login cookies, caps
//! concurrency, retries rate-limited requests and logs in again, once for all
//! concurrent callers, when the site stops recognising it.
//!
//! The namespace root carries the session's control files: writing
//! `username` or `password` changes credentials, writing `1` to `logout`
//! drops the session.

pub mod config;
pub mod constants;
pub mod provider;
pub mod session;
pub mod vfs;

pub use config::{Config, ConfigError};
pub use provider::{ContentProvider, PageProvider, PageSpec, ProviderError, Snapshot};
pub use session::{
    AuthClassifier, AuthState, HttpTransport, MarkerClassifier, ReqwestTransport, Session,
    SessionConfig, SessionError,
};
pub use vfs::{
    ContentModule, DelegatingModule, EmptyModule, FileAttr, FileType, Module, Namespace,
    StaticModule, VfsError, VfsResult, VirtualEntry,
};
