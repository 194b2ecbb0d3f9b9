//! Schema-driven form engine for disaster debris field data collection.
//!
//! Forms are not hard-coded: a remote JSON schema document declares the
//! sections, fields, conditional visibility rules, calculated values and
//! data-dependent routing for each flow (truck certification, field monitor,
//! site monitor). This crate synchronizes those documents to the device,
//! materializes their image assets for offline use, and interprets them
//! against live form state.
//!
//! The moving parts, front to back:
//!
//! - [`sync::SchemaSynchronizer`] keeps a per-domain [`sync::SchemaBundle`]
//!   current: offline-first, version-gated, atomically persisted.
//! - [`assets::AssetCache`] rewrites remote image URLs into stable local
//!   `file://` handles during sync.
//! - [`form_state::FormState`] holds the answers for one active flow.
//! - [`engine`] turns a section plus the current state into render
//!   instructions, completeness checks and the next [`engine::RouteToken`].
//! - [`dependency`] and [`formula`] are the two evaluators the engine
//!   composes: conditional visibility and arithmetic over field values.

pub mod assets;
pub mod dependency;
pub mod domain;
pub mod engine;
pub mod error;
pub mod form_state;
pub mod formula;
pub mod schema;
pub mod store;
pub mod sync;

pub use domain::Domain;
pub use engine::{next_route, render_section, section_complete, FieldRender, RouteToken, Widget};
pub use error::{FormulaError, ImageMaterializeError, SchemaError};
pub use form_state::FormState;
pub use schema::{Field, FieldIndex, FormSchema, Section, VersionToken};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use sync::{SchemaBundle, SchemaSynchronizer, SyncState};
