//! The stream reader.
//!
//! Reads the current format and the one before it (the header's
//! version line dispatches; the old format carried no flag word on
//! primitives and no complement back-link on sets). Address tables are
//! per-reader: within one reader's lifetime, every occurrence of an
//! address resolves to the same handle, which is exactly what keeps
//! shared sub-graphs shared.

use std::collections::HashMap;
use std::io::BufRead;

use carve_geom::{Box3, Interval, Plane, Point3, Vec3};
use carve_model::{Model, ModelKind, PolyVertex, Polygon, PolygonKind};
use carve_prim::{user_primitive, Primitive};
use carve_set::{read_attribute_payload, Attribute, Set, SetList};

use crate::error::ReadError;
use crate::{kind_from_code, op_from_char, MAGIC, VERSION_CURRENT, VERSION_PREVIOUS};

/// A model stream reader with per-stream shared-node tables.
pub struct Reader<R: BufRead> {
    input: R,
    rest: String,
    line_no: usize,
    eof: bool,
    version: Option<u32>,
    prims: HashMap<u64, Primitive>,
    sets: HashMap<u64, Set>,
    lists: HashMap<u64, SetList>,
    attrs: HashMap<u64, Attribute>,
    models: HashMap<u64, Model>,
}

impl<R: BufRead> Reader<R> {
    /// Wrap an input stream. The header is checked on the first read.
    pub fn new(input: R) -> Self {
        Self {
            input,
            rest: String::new(),
            line_no: 0,
            eof: false,
            version: None,
            prims: HashMap::new(),
            sets: HashMap::new(),
            lists: HashMap::new(),
            attrs: HashMap::new(),
            models: HashMap::new(),
        }
    }

    /// The format version named in the header, once read.
    pub fn version(&self) -> Option<u32> {
        self.version
    }

    /// Forget every address read so far. Subsequent reads rebuild
    /// shared nodes from scratch.
    pub fn clear_tables(&mut self) {
        self.prims.clear();
        self.sets.clear();
        self.lists.clear();
        self.attrs.clear();
        self.models.clear();
    }

    /// Read a primitive expression.
    pub fn read_primitive(&mut self) -> Result<Primitive, ReadError> {
        self.ensure_header()?;
        self.prim()
    }

    /// Read a set.
    pub fn read_set(&mut self) -> Result<Set, ReadError> {
        self.ensure_header()?;
        self.set()
    }

    /// Read a set-list.
    pub fn read_set_list(&mut self) -> Result<SetList, ReadError> {
        self.ensure_header()?;
        self.set_list()
    }

    /// Read an attribute chain.
    pub fn read_attribute(&mut self) -> Result<Option<Attribute>, ReadError> {
        self.ensure_header()?;
        self.attribute_chain()
    }

    /// Read a model tree.
    pub fn read_model(&mut self) -> Result<Model, ReadError> {
        self.ensure_header()?;
        self.model()
    }

    /// Read a facet polygon.
    pub fn read_polygon(&mut self) -> Result<Polygon, ReadError> {
        self.ensure_header()?;
        self.polygon()
    }

    // ------------------------------------------------------------------
    // Tokenizer
    // ------------------------------------------------------------------

    fn refill(&mut self) -> Result<bool, ReadError> {
        loop {
            if !self.rest.trim().is_empty() {
                return Ok(true);
            }
            if self.eof {
                return Ok(false);
            }
            let mut line = String::new();
            let n = self.input.read_line(&mut line)?;
            if n == 0 {
                self.eof = true;
                return Ok(false);
            }
            self.line_no += 1;
            self.rest = line;
        }
    }

    fn token(&mut self) -> Result<String, ReadError> {
        if !self.refill()? {
            return Err(ReadError::UnexpectedEnd { line: self.line_no });
        }
        let trimmed = self.rest.trim_start();
        let end = trimmed
            .find(char::is_whitespace)
            .unwrap_or(trimmed.len());
        let tok = trimmed[..end].to_owned();
        self.rest = trimmed[end..].to_owned();
        Ok(tok)
    }

    /// The rest of the current physical line (or the next line when the
    /// current one is exhausted), as an opaque payload.
    fn payload_line(&mut self) -> Result<String, ReadError> {
        if self.rest.trim().is_empty() {
            if self.eof {
                return Err(ReadError::UnexpectedEnd { line: self.line_no });
            }
            let mut line = String::new();
            let n = self.input.read_line(&mut line)?;
            if n == 0 {
                self.eof = true;
                return Err(ReadError::UnexpectedEnd { line: self.line_no });
            }
            self.line_no += 1;
            self.rest = line;
        }
        let payload = self.rest.trim().to_owned();
        self.rest.clear();
        Ok(payload)
    }

    fn expect(&mut self, want: &'static str) -> Result<(), ReadError> {
        let got = self.token()?;
        if got == want {
            Ok(())
        } else {
            Err(ReadError::UnexpectedToken {
                expected: want,
                got,
                line: self.line_no,
            })
        }
    }

    fn real(&mut self) -> Result<f64, ReadError> {
        let tok = self.token()?;
        tok.parse().map_err(|_| ReadError::BadNumber {
            what: "real",
            got: tok,
            line: self.line_no,
        })
    }

    fn int(&mut self) -> Result<i64, ReadError> {
        let tok = self.token()?;
        tok.parse().map_err(|_| ReadError::BadNumber {
            what: "integer",
            got: tok,
            line: self.line_no,
        })
    }

    fn addr(&mut self) -> Result<u64, ReadError> {
        let tok = self.token()?;
        tok.parse().map_err(|_| ReadError::BadNumber {
            what: "address",
            got: tok,
            line: self.line_no,
        })
    }

    fn flag(&mut self) -> Result<bool, ReadError> {
        Ok(self.int()? != 0)
    }

    fn single_char(&mut self, what: &'static str) -> Result<char, ReadError> {
        let tok = self.token()?;
        let mut chars = tok.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(ReadError::UnknownCode {
                what,
                code: tok,
                line: self.line_no,
            }),
        }
    }

    fn ensure_header(&mut self) -> Result<(), ReadError> {
        if self.version.is_some() {
            return Ok(());
        }
        let mut first = String::new();
        self.input.read_line(&mut first)?;
        self.line_no += 1;
        if first.trim_end() != MAGIC {
            return Err(ReadError::BadHeader {
                line: first.trim_end().to_owned(),
            });
        }
        let mut second = String::new();
        self.input.read_line(&mut second)?;
        self.line_no += 1;
        let version = second
            .trim()
            .strip_prefix("version ")
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or(ReadError::BadHeader {
                line: second.trim_end().to_owned(),
            })?;
        if !(VERSION_PREVIOUS..=VERSION_CURRENT).contains(&version) {
            return Err(ReadError::UnsupportedVersion(version));
        }
        self.version = Some(version);
        Ok(())
    }

    fn v1(&self) -> bool {
        self.version == Some(VERSION_PREVIOUS)
    }

    // ------------------------------------------------------------------
    // Scalar entities
    // ------------------------------------------------------------------

    fn point(&mut self) -> Result<Point3, ReadError> {
        self.expect("POINT")?;
        self.expect("{")?;
        let (x, y, z) = (self.real()?, self.real()?, self.real()?);
        self.expect("}")?;
        Ok(Point3::new(x, y, z))
    }

    fn vec(&mut self) -> Result<Vec3, ReadError> {
        Ok(self.point()?.coords)
    }

    fn plane(&mut self) -> Result<Plane, ReadError> {
        self.expect("PLANE")?;
        self.expect("{")?;
        let normal = self.vec()?;
        let d = self.real()?;
        self.expect("}")?;
        Ok(Plane { normal, d })
    }

    fn interval(&mut self) -> Result<Interval, ReadError> {
        self.expect("INTERVAL")?;
        self.expect("{")?;
        let (lo, hi) = (self.real()?, self.real()?);
        self.expect("}")?;
        Ok(Interval::new(lo, hi))
    }

    fn box3(&mut self) -> Result<Box3, ReadError> {
        self.expect("BOX")?;
        self.expect("{")?;
        let (x, y, z) = (self.interval()?, self.interval()?, self.interval()?);
        self.expect("}")?;
        Ok(Box3::new(x, y, z))
    }

    // ------------------------------------------------------------------
    // Compound entities
    // ------------------------------------------------------------------

    fn prim(&mut self) -> Result<Primitive, ReadError> {
        self.expect("PRIM")?;
        self.expect("{")?;
        let addr = self.addr()?;
        if !self.flag()? {
            let p = self
                .prims
                .get(&addr)
                .cloned()
                .ok_or(ReadError::MissingAddress {
                    what: "primitive",
                    addr,
                    line: self.line_no,
                })?;
            self.expect("}")?;
            return Ok(p);
        }
        let code = self.int()?;
        let flags = if self.v1() { 0 } else { self.int()? as u32 };
        let form = self.single_char("primitive form")?;
        let built = match form {
            'R' => Primitive::real(self.real()?),
            'F' => Primitive::plane(self.plane()?),
            'B' => Primitive::block(self.box3()?),
            'U' => {
                let tag = code as i32;
                let payload = self.payload_line()?;
                match user_primitive(tag) {
                    Some(u) => u.from_payload(tag, &payload),
                    None => Primitive::user(tag),
                }
            }
            'E' => {
                let opc = self.single_char("primitive operator")?;
                let op = op_from_char(opc).ok_or(ReadError::UnknownCode {
                    what: "primitive operator",
                    code: opc.to_string(),
                    line: self.line_no,
                })?;
                let a = self.prim()?;
                let b = if op.diadic() {
                    Some(self.prim()?)
                } else {
                    None
                };
                let _grads = self.int()?;
                let kind = kind_from_code(code).ok_or(ReadError::UnknownCode {
                    what: "primitive kind",
                    code: code.to_string(),
                    line: self.line_no,
                })?;
                Primitive::rebuild(op, &a, b.as_ref()).retag(kind)
            }
            other => {
                return Err(ReadError::UnknownCode {
                    what: "primitive form",
                    code: other.to_string(),
                    line: self.line_no,
                })
            }
        };
        built.set_flags(flags);
        // A duplicate definition keeps the first handle, so repeated
        // reads of one address always resolve identically.
        let out = self.prims.entry(addr).or_insert(built).clone();
        self.expect("}")?;
        Ok(out)
    }

    fn set(&mut self) -> Result<Set, ReadError> {
        self.expect("SET")?;
        self.expect("{")?;
        let addr = self.addr()?;
        if !self.flag()? {
            let s = self
                .sets
                .get(&addr)
                .cloned()
                .ok_or(ReadError::MissingAddress {
                    what: "set",
                    addr,
                    line: self.line_no,
                })?;
            self.expect("}")?;
            return Ok(s);
        }
        let contents = self.int()?;
        let flags = self.int()? as u32;
        let mut built = match contents {
            0 => Set::nothing(),
            -1 => Set::everything(),
            1 => Set::from_prim(&self.prim()?),
            2 => {
                let opc = self.single_char("set operator")?;
                let a = self.set()?;
                let b = self.set()?;
                match opc {
                    '|' => Set::union(&a, &b),
                    '&' => Set::intersection(&a, &b),
                    other => {
                        return Err(ReadError::UnknownCode {
                            what: "set operator",
                            code: other.to_string(),
                            line: self.line_no,
                        })
                    }
                }
            }
            other => {
                return Err(ReadError::UnknownCode {
                    what: "set contents",
                    code: other.to_string(),
                    line: self.line_no,
                })
            }
        };
        if self.flag()? {
            let at = self.attribute_chain()?;
            built = built.with_attributes(at);
        }
        if !self.v1() {
            let comp = self.addr()?;
            if comp != 0 {
                let partner =
                    self.sets
                        .get(&comp)
                        .cloned()
                        .ok_or(ReadError::MissingAddress {
                            what: "complement set",
                            addr: comp,
                            line: self.line_no,
                        })?;
                built.link_complement(&partner);
            }
        }
        built.set_flags(flags);
        let out = self.sets.entry(addr).or_insert(built).clone();
        self.expect("}")?;
        Ok(out)
    }

    fn set_list(&mut self) -> Result<SetList, ReadError> {
        // Collect the chain, then link it back to front so the original
        // order (and each node's stream address) is preserved.
        let mut entries: Vec<(u64, u32, Set)> = Vec::new();
        let mut tail: Option<SetList> = None;
        loop {
            self.expect("SET_LIST")?;
            self.expect("{")?;
            let addr = self.addr()?;
            if addr == 0 {
                self.flag()?;
                self.expect("}")?;
                break;
            }
            if !self.flag()? {
                tail = Some(self.lists.get(&addr).cloned().ok_or(
                    ReadError::MissingAddress {
                        what: "set-list",
                        addr,
                        line: self.line_no,
                    },
                )?);
                self.expect("}")?;
                break;
            }
            let flags = self.int()? as u32;
            let set = self.set()?;
            self.expect("}")?;
            entries.push((addr, flags, set));
        }
        let mut list = tail;
        for (addr, flags, set) in entries.into_iter().rev() {
            let node = SetList::cons(&set, list);
            node.set_flags(flags);
            let node = self.lists.entry(addr).or_insert(node).clone();
            list = Some(node);
        }
        list.ok_or(ReadError::UnexpectedEnd { line: self.line_no })
    }

    fn attribute_chain(&mut self) -> Result<Option<Attribute>, ReadError> {
        let mut entries: Vec<(u64, i32, u32, String)> = Vec::new();
        let mut tail: Option<Attribute> = None;
        loop {
            self.expect("ATTRIBUTE")?;
            self.expect("{")?;
            let addr = self.addr()?;
            if addr == 0 {
                self.flag()?;
                self.expect("}")?;
                break;
            }
            if !self.flag()? {
                tail = Some(self.attrs.get(&addr).cloned().ok_or(
                    ReadError::MissingAddress {
                        what: "attribute",
                        addr,
                        line: self.line_no,
                    },
                )?);
                self.expect("}")?;
                break;
            }
            let tag = self.int()? as i32;
            let flags = self.int()? as u32;
            let payload = self.payload_line()?;
            self.expect("}")?;
            entries.push((addr, tag, flags, payload));
        }
        let mut chain = tail;
        for (addr, tag, flags, payload) in entries.into_iter().rev() {
            let node = Attribute::cons(tag, read_attribute_payload(tag, &payload), chain);
            node.set_flags(flags);
            let node = self.attrs.entry(addr).or_insert(node).clone();
            chain = Some(node);
        }
        Ok(chain)
    }

    fn model(&mut self) -> Result<Model, ReadError> {
        self.expect("MODEL")?;
        self.expect("{")?;
        let addr = self.addr()?;
        if !self.flag()? {
            let m = self
                .models
                .get(&addr)
                .cloned()
                .ok_or(ReadError::MissingAddress {
                    what: "model",
                    addr,
                    line: self.line_no,
                })?;
            self.expect("}")?;
            return Ok(m);
        }
        let kind = match self.single_char("model kind")? {
            'L' => ModelKind::Leaf,
            'X' => ModelKind::XDiv,
            'Y' => ModelKind::YDiv,
            'Z' => ModelKind::ZDiv,
            other => {
                return Err(ReadError::UnknownCode {
                    what: "model kind",
                    code: other.to_string(),
                    line: self.line_no,
                })
            }
        };
        let flags = self.int()? as u32;
        let b = self.box3()?;
        let list = self.set_list()?;
        let built = match kind.axis() {
            None => Model::new(&list, &b),
            Some(axis) => {
                let cut = self.real()?;
                let low = self.model()?;
                let high = self.model()?;
                Model::new_division(&list, &b, axis, cut, low, high)
            }
        };
        built.set_flags(flags);
        let out = self.models.entry(addr).or_insert(built).clone();
        self.expect("}")?;
        Ok(out)
    }

    fn polygon(&mut self) -> Result<Polygon, ReadError> {
        self.expect("POLYGON")?;
        self.expect("{")?;
        self.flag()?;
        let kind = match self.single_char("polygon kind")? {
            'P' => PolygonKind::PointSet,
            'L' => PolygonKind::Polyline,
            'O' => PolygonKind::Polygon,
            other => {
                return Err(ReadError::UnknownCode {
                    what: "polygon kind",
                    code: other.to_string(),
                    line: self.line_no,
                })
            }
        };
        let n = self.int()?;
        let mut verts = Vec::with_capacity(n.max(0) as usize);
        for _ in 0..n {
            let p = self.point()?;
            let g = self.vec()?;
            let edge = self.int()? as i32;
            verts.push(PolyVertex { p, g, edge });
        }
        self.expect("}")?;
        Ok(Polygon { kind, verts })
    }
}
