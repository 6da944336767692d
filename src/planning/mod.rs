//! Request analysis, role selection, and graph construction.

pub mod builder;
pub mod roles;

pub use builder::{
    BuildConstraints, BuildResult, Complexity, GraphBuilder, RequestAnalysis, RequestContext,
};
pub use roles::{RoleSpec, RoleTable, DEFAULT_ROLE};
