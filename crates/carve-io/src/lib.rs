#![warn(missing_docs)]

//! Tagged text-stream serialisation for the carve modelling kernel.
//!
//! The format is ASCII and line-oriented: a fixed two-line header, then
//! entities of the form `TAG { address present payload }` drawn from the
//! closed tag set POINT, PLANE, INTERVAL, BOX, PRIM, SET, SET_LIST,
//! ATTRIBUTE, MODEL, POLYGON. The address keys a per-stream table: the
//! first occurrence of a node carries its payload, later occurrences
//! are references, and the reader resolves every occurrence of one
//! address to one handle — the expression DAG round-trips without
//! duplicating shared sub-graphs.
//!
//! The reader also accepts the previous format version, which carried
//! no flag word on primitives and no complement back-link on sets.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use carve_model::Model;
use carve_prim::{Kind, Op, USER_TAG_BASE};

mod error;
mod read;
mod write;

pub use error::ReadError;
pub use read::Reader;
pub use write::Writer;

/// The magic first line of every stream.
pub const MAGIC: &str = "carve set-theoretic model stream";

/// The version this crate writes.
pub const VERSION_CURRENT: u32 = 2;

/// The oldest version this crate still reads.
pub const VERSION_PREVIOUS: u32 = 1;

/// Single-character operator codes, fixed by the format.
pub(crate) fn op_char(op: Op) -> char {
    match op {
        Op::Plus => '+',
        Op::Minus => '-',
        Op::Times => '*',
        Op::Divide => '/',
        Op::Pow => '^',
        Op::Comp => '~',
        Op::Abs => '|',
        Op::Sin => 'S',
        Op::Cos => 'C',
        Op::Exp => 'E',
        Op::Ssqrt => '@',
        Op::Sign => '%',
    }
}

pub(crate) fn op_from_char(c: char) -> Option<Op> {
    Some(match c {
        '+' => Op::Plus,
        '-' => Op::Minus,
        '*' => Op::Times,
        '/' => Op::Divide,
        '^' => Op::Pow,
        '~' => Op::Comp,
        '|' => Op::Abs,
        'S' => Op::Sin,
        'C' => Op::Cos,
        'E' => Op::Exp,
        '@' => Op::Ssqrt,
        '%' => Op::Sign,
        _ => return None,
    })
}

/// Numeric kind codes, fixed by the format. User tags are their own
/// codes, at or above the reserved threshold.
pub(crate) fn kind_code(kind: Kind) -> i64 {
    match kind {
        Kind::Real => 0,
        Kind::Plane => 1,
        Kind::Sphere => 2,
        Kind::Cylinder => 3,
        Kind::Cone => 4,
        Kind::Torus => 5,
        Kind::Cyclide => 6,
        Kind::General => 7,
        Kind::Block => 8,
        Kind::User(tag) => tag as i64,
    }
}

pub(crate) fn kind_from_code(code: i64) -> Option<Kind> {
    Some(match code {
        0 => Kind::Real,
        1 => Kind::Plane,
        2 => Kind::Sphere,
        3 => Kind::Cylinder,
        4 => Kind::Cone,
        5 => Kind::Torus,
        6 => Kind::Cyclide,
        7 => Kind::General,
        8 => Kind::Block,
        t if t >= USER_TAG_BASE as i64 => Kind::User(t as i32),
        _ => return None,
    })
}

/// Write a model to a file.
pub fn save_model(path: &Path, m: &Model) -> std::io::Result<()> {
    let mut w = Writer::new(BufWriter::new(File::create(path)?));
    w.write_model(m)
}

/// Read a model from a file.
pub fn load_model(path: &Path) -> Result<Model, ReadError> {
    let mut r = Reader::new(BufReader::new(File::open(path)?));
    r.read_model()
}

#[cfg(test)]
mod tests {
    use super::*;
    use carve_geom::{Box3, Line, Plane, Point3, Vec3};
    use carve_model::{default_decision, DivideParams, Model, PolyVertex, Polygon, PolygonKind};
    use carve_prim::{abs, p_cylinder, p_sphere, same, Primitive, SameAs};
    use carve_set::{Attribute, Membership, Set, SetList, TextAttribute};
    use std::sync::Arc;

    fn roundtrip_bytes(write: impl FnOnce(&mut Writer<&mut Vec<u8>>)) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut w = Writer::new(&mut buf);
        write(&mut w);
        buf
    }

    #[test]
    fn test_primitive_roundtrip_values() {
        let s = p_sphere(&Point3::new(1.0, -0.5, 0.25), 1.75);
        let buf = roundtrip_bytes(|w| w.write_primitive(&s).unwrap());
        let mut r = Reader::new(&buf[..]);
        let back = r.read_primitive().unwrap();
        assert_eq!(back.kind(), s.kind());
        assert_eq!(same(&back, &s), SameAs::Same);
        for p in [
            Point3::origin(),
            Point3::new(2.75, -0.5, 0.25),
            Point3::new(0.1, 0.2, 0.3),
        ] {
            assert!((back.value(&p) - s.value(&p)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_real_full_precision() {
        let r0 = Primitive::real(0.1 + 0.2);
        let buf = roundtrip_bytes(|w| w.write_primitive(&r0).unwrap());
        let mut r = Reader::new(&buf[..]);
        let back = r.read_primitive().unwrap();
        assert_eq!(back.as_real(), r0.as_real());
    }

    #[test]
    fn test_shared_subexpression_written_once() {
        let p = Primitive::plane(Plane::new(Vec3::x(), &Point3::origin()));
        let shared = &p.powi(2) + &p.powi(3);
        let buf = roundtrip_bytes(|w| w.write_primitive(&shared).unwrap());
        let text = String::from_utf8(buf.clone()).unwrap();
        // The plane payload appears exactly once.
        assert_eq!(text.matches("PLANE {").count(), 1);
        let mut r = Reader::new(&buf[..]);
        let back = r.read_primitive().unwrap();
        // And the two references resolve to the identical node.
        let a = back.child_1().unwrap().child_1().unwrap();
        let b = back.child_2().unwrap().child_1().unwrap();
        assert!(a == b);
    }

    #[test]
    fn test_complemented_named_shape_roundtrip() {
        let hollow = -&p_sphere(&Point3::origin(), 2.0);
        let buf = roundtrip_bytes(|w| w.write_primitive(&hollow).unwrap());
        let back = Reader::new(&buf[..]).read_primitive().unwrap();
        assert_eq!(back.kind(), hollow.kind());
        assert_eq!(same(&back, &hollow), SameAs::Same);
        assert!((back.value(&Point3::origin()) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_abs_and_flags_roundtrip() {
        let thin = abs(&p_cylinder(&Line::new(Vec3::z(), Point3::origin()), 1.0));
        thin.set_flags(0x2A);
        let buf = roundtrip_bytes(|w| w.write_primitive(&thin).unwrap());
        let back = Reader::new(&buf[..]).read_primitive().unwrap();
        assert_eq!(back.flags(), 0x2A);
        assert_eq!(same(&back, &thin), SameAs::Same);
    }

    #[test]
    fn test_set_roundtrip_shared_prim() {
        let p = p_sphere(&Point3::origin(), 1.0);
        let a = Set::from_prim(&p);
        let b = Set::intersection(
            &Set::from_prim(&p),
            &Set::from_prim(&Primitive::plane(Plane::new(Vec3::z(), &Point3::origin()))),
        );
        let u = Set::union(&a, &b);
        let buf = roundtrip_bytes(|w| w.write_set(&u).unwrap());
        let text = String::from_utf8(buf.clone()).unwrap();
        // The sphere expression is written once; its other occurrence
        // is a reference.
        assert_eq!(text.matches("F PLANE").count(), 4, "{text}");
        let back = Reader::new(&buf[..]).read_set().unwrap();
        let p1 = back.child_1().unwrap().prim().unwrap();
        let p2 = back.child_2().unwrap().child_1().unwrap().prim().unwrap();
        assert!(p1 == p2);
        for q in [Point3::origin(), Point3::new(0.5, 0.0, -0.5)] {
            assert_eq!(back.member(&q).0, u.member(&q).0);
        }
    }

    #[test]
    fn test_set_complement_link_roundtrip() {
        let s = Set::from_prim(&p_sphere(&Point3::origin(), 1.0));
        let c = s.complement();
        let u = Set::union(&s, &c);
        let buf = roundtrip_bytes(|w| w.write_set(&u).unwrap());
        let back = Reader::new(&buf[..]).read_set().unwrap();
        let bs = back.child_1().unwrap();
        let bc = back.child_2().unwrap();
        // The partnership survived: complementing either side answers
        // the other without recomputation.
        assert!(bs.cached_complement().unwrap() == bc);
        assert!(bc.complement() == bs);
    }

    #[test]
    fn test_attribute_roundtrip_order() {
        let chain = Attribute::cons(
            1,
            Arc::new(TextAttribute::from("first payload")),
            Some(Attribute::new(2, Arc::new(TextAttribute::from("second")))),
        );
        let s = Set::from_prim(&p_sphere(&Point3::origin(), 1.0)).with_attributes(Some(chain));
        let buf = roundtrip_bytes(|w| w.write_set(&s).unwrap());
        let back = Reader::new(&buf[..]).read_set().unwrap();
        let at = back.attributes().unwrap();
        let tags: Vec<i32> = at.iter().map(|a| a.tag()).collect();
        assert_eq!(tags, vec![1, 2]);
        assert_eq!(at.payload().payload(), "first payload");
        assert_eq!(at.next().unwrap().payload().payload(), "second");
    }

    #[test]
    fn test_set_list_roundtrip_order() {
        let s = Set::from_prim(&p_sphere(&Point3::origin(), 1.0));
        let c = Set::from_prim(&p_cylinder(&Line::new(Vec3::z(), Point3::origin()), 0.5));
        let sl = SetList::from_sets([s, c]);
        let buf = roundtrip_bytes(|w| w.write_set_list(&sl).unwrap());
        let back = Reader::new(&buf[..]).read_set_list().unwrap();
        assert_eq!(back.len(), 2);
        let kinds: Vec<_> = back
            .iter()
            .map(|x| x.prim().unwrap().kind())
            .collect();
        assert_eq!(kinds[0], carve_prim::Kind::Sphere);
        assert_eq!(kinds[1], carve_prim::Kind::Cylinder);
    }

    #[test]
    fn test_model_roundtrip_membership() {
        let s = Set::from_prim(&p_sphere(&Point3::origin(), 1.0));
        let b = Box3::from_corners(&Point3::new(-2.0, -2.0, -2.0), &Point3::new(2.0, 2.0, 2.0));
        let m = Model::new(&SetList::new(&s), &b).divide(
            &DivideParams {
                max_depth: 3,
                ..DivideParams::default()
            },
            &default_decision,
        );
        let buf = roundtrip_bytes(|w| w.write_model(&m).unwrap());
        let back = Reader::new(&buf[..]).read_model().unwrap();
        assert_eq!(back.kind(), m.kind());
        assert_eq!(back.leaves().len(), m.leaves().len());
        for p in [
            Point3::origin(),
            Point3::new(0.9, 0.0, 0.0),
            Point3::new(1.5, 1.5, 0.0),
            Point3::new(1.0, 0.0, 0.0),
        ] {
            assert_eq!(back.member(&p).0, m.member(&p).0, "at {p:?}");
        }
    }

    #[test]
    fn test_model_shared_lists_stay_shared() {
        // Two sibling leaves sharing one set handle through their lists.
        let s = Set::from_prim(&p_sphere(&Point3::origin(), 10.0));
        let b = Box3::from_corners(&Point3::new(-1.0, -1.0, -1.0), &Point3::new(1.0, 1.0, 1.0));
        let m = Model::new(&SetList::new(&s), &b);
        let buf = roundtrip_bytes(|w| w.write_model(&m).unwrap());
        let back = Reader::new(&buf[..]).read_model().unwrap();
        assert_eq!(back.set_list().len(), 1);
    }

    #[test]
    fn test_polygon_roundtrip() {
        let poly = Polygon {
            kind: PolygonKind::Polygon,
            verts: vec![
                PolyVertex {
                    p: Point3::new(0.0, 0.0, 0.0),
                    g: Vec3::x(),
                    edge: 0,
                },
                PolyVertex {
                    p: Point3::new(0.0, 1.0, 0.0),
                    g: Vec3::x(),
                    edge: 1,
                },
                PolyVertex {
                    p: Point3::new(0.0, 1.0, 1.5),
                    g: Vec3::x(),
                    edge: 2,
                },
            ],
        };
        let buf = roundtrip_bytes(|w| w.write_polygon(&poly).unwrap());
        let back = Reader::new(&buf[..]).read_polygon().unwrap();
        assert_eq!(back, poly);
    }

    #[test]
    fn test_consecutive_reads_share_addresses() {
        let p = p_sphere(&Point3::origin(), 1.0);
        let mut buf = Vec::new();
        {
            let mut w = Writer::new(&mut buf);
            w.write_primitive(&p).unwrap();
            w.write_primitive(&p).unwrap();
        }
        let mut r = Reader::new(&buf[..]);
        let first = r.read_primitive().unwrap();
        let second = r.read_primitive().unwrap();
        assert!(first == second);
    }

    #[test]
    fn test_bad_header_rejected() {
        let mut r = Reader::new(&b"not a model stream\nversion 2\n"[..]);
        assert!(matches!(
            r.read_primitive(),
            Err(ReadError::BadHeader { .. })
        ));
    }

    #[test]
    fn test_future_version_rejected() {
        let text = format!("{MAGIC}\nversion 3\nPRIM {{ 1 1 0 R 1 }}\n");
        let mut r = Reader::new(text.as_bytes());
        assert!(matches!(
            r.read_primitive(),
            Err(ReadError::UnsupportedVersion(3))
        ));
    }

    #[test]
    fn test_previous_version_primitive() {
        // Version 1 carried no flags word on primitives.
        let text = format!(
            "{MAGIC}\nversion 1\nPRIM {{ 42 1 0 R 2.5 }}\nPRIM {{ 42 0 }}\n"
        );
        let mut r = Reader::new(text.as_bytes());
        let a = r.read_primitive().unwrap();
        assert_eq!(a.as_real(), Some(2.5));
        let b = r.read_primitive().unwrap();
        assert!(a == b);
    }

    #[test]
    fn test_previous_version_set() {
        // Version 1 carried no complement back-link on sets.
        let text = format!(
            "{MAGIC}\nversion 1\nSET {{ 9 1 1 0\nPRIM {{ 8 1 1 F PLANE {{ POINT {{ 1 0 0 }} 0 }} }}\n 0\n}}\n"
        );
        let mut r = Reader::new(text.as_bytes());
        let s = r.read_set().unwrap();
        assert_eq!(s.member(&Point3::new(-1.0, 0.0, 0.0)).0, Membership::In);
    }

    #[test]
    fn test_truncated_stream_errors() {
        let text = format!("{MAGIC}\nversion 2\nPRIM {{ 1 1 0 R\n");
        let mut r = Reader::new(text.as_bytes());
        assert!(r.read_primitive().is_err());
    }

    #[test]
    fn test_dangling_reference_errors() {
        let text = format!("{MAGIC}\nversion 2\nPRIM {{ 77 0 }}\n");
        let mut r = Reader::new(text.as_bytes());
        assert!(matches!(
            r.read_primitive(),
            Err(ReadError::MissingAddress { addr: 77, .. })
        ));
    }

    #[test]
    fn test_divided_then_roundtripped_then_redivided() {
        let sphere = Set::from_prim(&p_sphere(&Point3::origin(), 1.0));
        let b = Box3::from_corners(&Point3::new(-2.0, -2.0, -2.0), &Point3::new(2.0, 2.0, 2.0));
        let params = DivideParams {
            max_depth: 3,
            ..DivideParams::default()
        };
        let m = Model::new(&SetList::new(&sphere), &b).divide(&params, &default_decision);
        let buf = roundtrip_bytes(|w| w.write_model(&m).unwrap());
        let back = Reader::new(&buf[..]).read_model().unwrap();
        // The reloaded model redivides like the original.
        let refined = back.redivide(&SetList::new(&Set::nothing()), &params, &default_decision);
        assert_eq!(refined.member(&Point3::origin()).0, Membership::Air);
    }
}
