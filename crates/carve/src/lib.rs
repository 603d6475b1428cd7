#![warn(missing_docs)]

//! carve — a set-theoretic solid modelling kernel over implicit
//! potential functions.
//!
//! Solids are modelled implicitly: a primitive is a real-valued
//! function of space whose interior is negative, surface zero, and
//! exterior positive. Boolean combinations of primitives make sets;
//! a model attaches a set-list to a box and subdivides it recursively,
//! pruning each sub-box down to the primitives that matter there.
//!
//! # Example
//!
//! ```
//! use carve::geom::{Box3, Point3};
//! use carve::prim::p_sphere;
//! use carve::set::{Membership, Set, SetList};
//! use carve::model::{default_decision, DivideParams, Model};
//!
//! let ball = Set::from_prim(&p_sphere(&Point3::origin(), 1.0));
//! let bounds = Box3::from_corners(
//!     &Point3::new(-2.0, -2.0, -2.0),
//!     &Point3::new(2.0, 2.0, 2.0),
//! );
//! let model = Model::new(&SetList::new(&ball), &bounds)
//!     .divide(&DivideParams::default(), &default_decision);
//! assert_eq!(model.member(&Point3::origin()).0, Membership::In);
//! ```

/// Scalar and geometric utility types.
pub use carve_geom as geom;

/// The primitive expression DAG.
pub use carve_prim as prim;

/// Boolean set algebra, attributes, and set-lists.
pub use carve_set as set;

/// Spatial subdivision, faceting, and ray firing.
pub use carve_model as model;

/// Tagged stream serialisation.
pub use carve_io as io;
