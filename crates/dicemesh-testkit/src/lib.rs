//! # Dicemesh Testkit
//!
//! Testing utilities shared by the dicemesh crates:
//!
//! - **Fixtures**: deterministic identities and ready-made event builders
//!   for setting up scenarios ([`fixtures`]).
//! - **Generators**: proptest strategies for property-based testing,
//!   including the random op lists used by convergence tests
//!   ([`generators`]).

pub mod fixtures;
pub mod generators;

pub use fixtures::TestFixture;
pub use generators::{op_list, Op};
