//! The stream writer.
//!
//! Every compound entity is written as `TAG { address present payload }`.
//! The first occurrence of a shared node carries `present = 1` and its
//! payload; later occurrences carry `present = 0` and resolve through
//! the reader's address table, so shared sub-graphs stay shared across
//! a round trip. The write-visited flag bit decides which case applies;
//! each top-level write clears it across its tree first.

use std::io::{self, Write};

use carve_geom::{Box3, Interval, Plane, Point3};
use carve_model::{Model, ModelKind, Polygon, PolygonKind};
use carve_prim::{user_primitive, Primitive};
use carve_set::{Attribute, Set, SetList, SetOp};

use crate::{kind_code, op_char, MAGIC, VERSION_CURRENT};

/// A model stream writer.
///
/// The header is emitted before the first entity; entities may then be
/// written back to back on the same stream.
pub struct Writer<W: Write> {
    w: W,
    headed: bool,
}

impl<W: Write> Writer<W> {
    /// Wrap an output stream.
    pub fn new(w: W) -> Self {
        Self { w, headed: false }
    }

    /// Unwrap the output stream.
    pub fn into_inner(self) -> W {
        self.w
    }

    fn header(&mut self) -> io::Result<()> {
        if !self.headed {
            writeln!(self.w, "{MAGIC}")?;
            writeln!(self.w, "version {VERSION_CURRENT}")?;
            self.headed = true;
        }
        Ok(())
    }

    /// Write a primitive expression.
    pub fn write_primitive(&mut self, p: &Primitive) -> io::Result<()> {
        self.header()?;
        p.unwrite();
        self.prim(p, 0)
    }

    /// Write a set.
    pub fn write_set(&mut self, s: &Set) -> io::Result<()> {
        self.header()?;
        s.unwrite();
        self.set(s, 0)
    }

    /// Write a set-list.
    pub fn write_set_list(&mut self, l: &SetList) -> io::Result<()> {
        self.header()?;
        l.unwrite();
        self.set_list(l, 0)
    }

    /// Write an attribute chain.
    pub fn write_attribute(&mut self, a: &Attribute) -> io::Result<()> {
        self.header()?;
        for node in a.iter() {
            node.unwrite_node();
        }
        self.attribute_chain(a, 0)
    }

    /// Write a model tree.
    pub fn write_model(&mut self, m: &Model) -> io::Result<()> {
        self.header()?;
        m.unwrite();
        self.model(m, 0)
    }

    /// Write a facet polygon.
    pub fn write_polygon(&mut self, pg: &Polygon) -> io::Result<()> {
        self.header()?;
        self.polygon(pg, 0)
    }

    fn prim(&mut self, p: &Primitive, level: usize) -> io::Result<()> {
        let pad = "  ".repeat(level);
        if p.mark_written() {
            return writeln!(self.w, "{pad}PRIM {{ {} 0 }}", p.unique());
        }
        writeln!(
            self.w,
            "{pad}PRIM {{ {} 1 {} {}",
            p.unique(),
            kind_code(p.kind()),
            p.flags()
        )?;
        // The payload form follows the node structure, not the advisory
        // kind: a complemented user primitive is an expression whose
        // kind tag is still the user tag.
        if let Some(op) = p.op() {
            writeln!(self.w, "{pad} E {}", op_char(op))?;
            let a = p.child_1().expect("interior node has a child");
            self.prim(&a, level + 1)?;
            if let Some(b) = p.child_2() {
                self.prim(&b, level + 1)?;
            }
            // Gradients are never written; the lazy deriver rebuilds
            // them on demand.
            writeln!(self.w, "{pad} 0")?;
        } else if let Some(r) = p.as_real() {
            writeln!(self.w, "{pad} R {r}")?;
        } else if let Some(f) = p.flat() {
            writeln!(self.w, "{pad} F {}", plane_str(&f))?;
        } else if let Some(b) = p.block_box() {
            writeln!(self.w, "{pad} B {}", box_str(&b))?;
        } else if let Some(tag) = p.user_tag() {
            let payload = user_primitive(tag)
                .map(|u| u.payload())
                .unwrap_or_default();
            writeln!(self.w, "{pad} U")?;
            writeln!(self.w, "{pad} {payload}")?;
        } else {
            log::error!("write: primitive with no recognisable form");
            writeln!(self.w, "{pad} R 0")?;
        }
        writeln!(self.w, "{pad}}}")
    }

    fn set(&mut self, s: &Set, level: usize) -> io::Result<()> {
        let pad = "  ".repeat(level);
        if s.mark_written() {
            return writeln!(self.w, "{pad}SET {{ {} 0 }}", s.unique());
        }
        let contents: i64 = if s.is_nothing() {
            0
        } else if s.is_everything() {
            -1
        } else if s.prim().is_some() {
            1
        } else {
            2
        };
        writeln!(
            self.w,
            "{pad}SET {{ {} 1 {} {}",
            s.unique(),
            contents,
            s.flags()
        )?;
        if let Some(p) = s.prim() {
            self.prim(&p, level + 1)?;
        } else if let Some(op) = s.op() {
            let c = match op {
                SetOp::Union => '|',
                SetOp::Intersection => '&',
            };
            writeln!(self.w, "{pad} {c}")?;
            self.set(&s.child_1().expect("pair set"), level + 1)?;
            self.set(&s.child_2().expect("pair set"), level + 1)?;
        }
        match s.attributes() {
            Some(chain) => {
                writeln!(self.w, "{pad} 1")?;
                self.attribute_chain(&chain, level + 1)?;
            }
            None => writeln!(self.w, "{pad} 0")?,
        }
        // The complement back-link is carried by whichever partner is
        // written second, so the reference always resolves.
        let comp = s
            .cached_complement()
            .filter(|c| c.written())
            .map(|c| c.unique())
            .unwrap_or(0);
        writeln!(self.w, "{pad} {comp}")?;
        writeln!(self.w, "{pad}}}")
    }

    fn set_list(&mut self, l: &SetList, level: usize) -> io::Result<()> {
        let pad = "  ".repeat(level);
        let mut cur = Some(l.clone());
        while let Some(n) = cur {
            if n.mark_written() {
                // The tail was written before; reference it and stop.
                return writeln!(self.w, "{pad}SET_LIST {{ {} 0 }}", n.unique());
            }
            writeln!(self.w, "{pad}SET_LIST {{ {} 1 {}", n.unique(), n.flags())?;
            self.set(&n.set(), level + 1)?;
            writeln!(self.w, "{pad}}}")?;
            cur = n.next();
        }
        writeln!(self.w, "{pad}SET_LIST {{ 0 0 }}")
    }

    fn attribute_chain(&mut self, a: &Attribute, level: usize) -> io::Result<()> {
        let pad = "  ".repeat(level);
        let mut cur = Some(a.clone());
        while let Some(n) = cur {
            if n.mark_written() {
                return writeln!(self.w, "{pad}ATTRIBUTE {{ {} 0 }}", n.unique());
            }
            writeln!(
                self.w,
                "{pad}ATTRIBUTE {{ {} 1 {} {}",
                n.unique(),
                n.tag(),
                n.flags()
            )?;
            writeln!(self.w, "{pad} {}", n.payload().payload())?;
            writeln!(self.w, "{pad}}}")?;
            cur = n.next();
        }
        writeln!(self.w, "{pad}ATTRIBUTE {{ 0 0 }}")
    }

    fn model(&mut self, m: &Model, level: usize) -> io::Result<()> {
        let pad = "  ".repeat(level);
        if m.mark_written() {
            return writeln!(self.w, "{pad}MODEL {{ {} 0 }}", m.unique());
        }
        let kind = match m.kind() {
            ModelKind::Leaf => 'L',
            ModelKind::XDiv => 'X',
            ModelKind::YDiv => 'Y',
            ModelKind::ZDiv => 'Z',
        };
        writeln!(
            self.w,
            "{pad}MODEL {{ {} 1 {} {}",
            m.unique(),
            kind,
            m.flags()
        )?;
        writeln!(self.w, "{pad} {}", box_str(&m.boxx()))?;
        self.set_list(&m.set_list(), level + 1)?;
        if m.kind() != ModelKind::Leaf {
            writeln!(self.w, "{pad} {}", m.cut())?;
            self.model(&m.child_1().expect("division"), level + 1)?;
            self.model(&m.child_2().expect("division"), level + 1)?;
        }
        writeln!(self.w, "{pad}}}")
    }

    fn polygon(&mut self, pg: &Polygon, level: usize) -> io::Result<()> {
        let pad = "  ".repeat(level);
        let kind = match pg.kind {
            PolygonKind::PointSet => 'P',
            PolygonKind::Polyline => 'L',
            PolygonKind::Polygon => 'O',
        };
        writeln!(self.w, "{pad}POLYGON {{ 1 {} {}", kind, pg.verts.len())?;
        for v in &pg.verts {
            writeln!(
                self.w,
                "{pad} {} {} {}",
                point_str(&v.p),
                vec_str(&v.g),
                v.edge
            )?;
        }
        writeln!(self.w, "{pad}}}")
    }
}

pub(crate) fn point_str(p: &Point3) -> String {
    format!("POINT {{ {} {} {} }}", p.x, p.y, p.z)
}

pub(crate) fn vec_str(v: &carve_geom::Vec3) -> String {
    format!("POINT {{ {} {} {} }}", v.x, v.y, v.z)
}

pub(crate) fn plane_str(f: &Plane) -> String {
    format!("PLANE {{ {} {} }}", vec_str(&f.normal), f.d)
}

pub(crate) fn interval_str(i: &Interval) -> String {
    format!("INTERVAL {{ {} {} }}", i.lo, i.hi)
}

pub(crate) fn box_str(b: &Box3) -> String {
    format!(
        "BOX {{ {} {} {} }}",
        interval_str(&b.x),
        interval_str(&b.y),
        interval_str(&b.z)
    )
}
