#![allow(clippy::needless_return, clippy::too_many_arguments, clippy::collapsible_if,
         clippy::manual_range_contains, clippy::needless_range_loop,
         clippy::comparison_chain, clippy::float_cmp)]

pub mod math;
pub mod defines;
pub mod winding;
pub mod scriplib;
