//! # Omni common
//!
//! Leaf utilities shared by every pipeline crate:
//!
//! - **ContentHasher**: deterministic SHA-256 ids for texts, documents and fragments
//! - **TokenCounter**: exact or approximate token counts per model family
//! - **RequestContext**: user scoping, cancellation and deadlines

pub mod context;
pub mod error;
pub mod hasher;
pub mod tokenizer;

pub use context::RequestContext;
pub use error::{CommonError, Result};
pub use hasher::{ContentHasher, HASHER_MODEL};
pub use tokenizer::{ApproxTokenCounter, TiktokenCounter, TokenCounter, TokenizerKind};
