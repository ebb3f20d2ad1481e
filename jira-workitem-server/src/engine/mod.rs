//! Work item engine
//!
//! Category detection, field mapping, query building, dual-endpoint
//! dispatch, response normalization and hierarchy aggregation.

pub mod adf;
pub mod category;
pub mod dispatch;
pub mod fetch;
pub mod fields;
pub mod hierarchy;
pub mod normalize;
pub mod predicate;

pub use category::{detect, detect_category, Category};
pub use dispatch::{all_succeeded, dispatch_all, dispatch_field_set, DispatchOutcome, PathUsed};
pub use fields::{map_fields, FieldSet, FieldTable, FieldWarning, LogicalField, WorkItemFields};
pub use hierarchy::{aggregate, HierarchyContext, ItemSummary, Progress};
pub use normalize::{normalize_issue, NormalizedItem, Relation, RelationKind};
pub use predicate::{build_predicate, SearchFilter};
